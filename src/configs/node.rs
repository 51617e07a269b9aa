use serde::{Deserialize, Serialize};

/// Connection settings for a single node.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NodeConfig {
    /// Logical name, unique within a client.
    pub name: String,
    /// `host:port` of the node.
    pub address: String,
    pub password: String,
    #[serde(default)]
    pub secure: bool,
    /// Session to resume on the first connect, e.g. one persisted across a restart.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Ask the node to keep this session's players alive across disconnects.
    #[serde(default)]
    pub resuming: bool,
    #[serde(default = "default_resume_timeout_secs")]
    pub resume_timeout_secs: u64,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
}

fn default_resume_timeout_secs() -> u64 {
    60
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

impl NodeConfig {
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            password: password.into(),
            secure: false,
            session_id: None,
            resuming: false,
            resume_timeout_secs: default_resume_timeout_secs(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
        }
    }

    pub fn websocket_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}/v4/websocket", scheme, self.address)
    }

    pub fn rest_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}", scheme, self.address)
    }
}
