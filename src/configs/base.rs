use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    common::{
        errors::{Error, Result},
        http::CLIENT_NAME,
        types::UserId,
    },
    configs::*,
};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    /// The bot's user id. Takes precedence over `bot_token`.
    #[serde(default)]
    pub user_id: Option<u64>,
    /// Bot token the user id is derived from when `user_id` is absent.
    #[serde(default)]
    pub bot_token: Option<String>,
    /// Overrides the `Client-Name` header.
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub rest: RestConfig,
    pub logging: Option<LoggingConfig>,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

impl Config {
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: Some(user_id.into().0),
            ..Default::default()
        }
    }

    pub fn with_node(mut self, node: NodeConfig) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        if config_str.trim().is_empty() {
            return Err(Error::Config(format!("{} is empty", path.display())));
        }
        Self::from_toml(&config_str)
    }

    pub fn from_toml(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).map_err(|e| Error::Config(e.to_string()))?;
        config.user_id()?;
        Ok(config)
    }

    pub fn user_id(&self) -> Result<UserId> {
        match (self.user_id, self.bot_token.as_deref()) {
            (Some(id), _) => Ok(UserId(id)),
            (None, Some(token)) => UserId::from_bot_token(token),
            (None, None) => Err(Error::Config(
                "either user_id or bot_token must be set".into(),
            )),
        }
    }

    pub fn client_name(&self) -> &str {
        self.client_name.as_deref().unwrap_or(CLIENT_NAME)
    }
}
