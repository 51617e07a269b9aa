use serde::{Deserialize, Serialize};

/// Request body for PATCH /v4/sessions/{sessionId}.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resuming: Option<bool>,
    /// Seconds the node keeps the session alive after a disconnect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// Response from PATCH /v4/sessions/{sessionId}.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub resuming: bool,
    pub timeout: u64,
}
