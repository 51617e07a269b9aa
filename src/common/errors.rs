use serde::{Deserialize, Serialize};

use crate::common::types::GuildId;

/// Exception severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Common,
    Suspicious,
    Fault,
}

/// JSON error body returned by a node for any non-2xx REST response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeError {
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
    /// HTTP status code.
    pub status: u16,
    /// HTTP status reason phrase (e.g. "Bad Request").
    pub error: String,
    /// Human-readable error message.
    #[serde(default)]
    pub message: String,
    /// The request path that caused the error.
    pub path: String,
    /// Stack trace, only present when the request asked for one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl NodeError {
    /// Builds an error for a response whose body was not the node's JSON error format.
    pub fn from_status(status: reqwest::StatusCode, path: impl Into<String>, body: String) -> Self {
        Self {
            timestamp: crate::common::time::Millis::now_unix().0,
            status: status.as_u16(),
            error: status
                .canonical_reason()
                .unwrap_or("Unknown Status")
                .to_string(),
            message: body,
            path: path.into(),
            trace: None,
        }
    }
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} on {}: {}",
            self.status, self.error, self.path, self.message
        )
    }
}

impl std::error::Error for NodeError {}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("node responded with {0}")]
    Node(#[from] NodeError),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("no node available for guild {0}")]
    NoNode(GuildId),

    #[error("node {0} has no active session")]
    NotConnected(String),

    #[error("node {0} is already registered")]
    DuplicateNode(String),

    #[error("player for guild {0} is bound to node {1}")]
    NodeMismatch(GuildId, String),

    #[error("no node named {0}")]
    UnknownNode(String),

    #[error("invalid track: {0}")]
    InvalidTrack(String),

    #[error("invalid bot token: {0}")]
    InvalidToken(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_error_deserializes_from_rest_body() {
        let body = r#"{
            "timestamp": 1667857581613,
            "status": 404,
            "error": "Not Found",
            "message": "Session not found",
            "path": "/v4/sessions/xtaug914v9k5032f/players/817327181659111454"
        }"#;
        let err: NodeError = serde_json::from_str(body).unwrap();

        assert_eq!(err.status, 404);
        assert_eq!(err.error, "Not Found");
        assert_eq!(err.message, "Session not found");
        assert!(err.trace.is_none());
        assert!(err.to_string().starts_with("404 Not Found on /v4/sessions/"));
    }

    #[test]
    fn test_node_error_from_plain_status() {
        let err = NodeError::from_status(
            reqwest::StatusCode::BAD_GATEWAY,
            "/v4/info",
            "upstream down".into(),
        );
        assert_eq!(err.status, 502);
        assert_eq!(err.error, "Bad Gateway");
        assert_eq!(err.message, "upstream down");
    }
}
