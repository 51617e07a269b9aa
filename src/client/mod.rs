use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use tracing::{info, warn};

use crate::{
    common::{
        errors::{Error, Result},
        http::HttpClient,
        types::{ChannelId, GuildId, UserId},
    },
    configs::{Config, NodeConfig},
    node::Node,
    player::Player,
};

mod registry;

pub(crate) use registry::Registry;

/// Entry point: owns the node pool and one player per guild.
///
/// Cloning is cheap; clones share the same nodes and players.
#[derive(Clone)]
pub struct Client {
    config: Arc<Config>,
    user_id: UserId,
    http: reqwest::Client,
    registry: Arc<Registry>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("user_id", &self.user_id)
            .field("nodes", &self.registry.nodes.len())
            .field("players", &self.registry.players.len())
            .finish()
    }
}

impl Client {
    /// Creates a client without connecting anything. Nodes listed in `config`
    /// are only opened by [`Client::connect`].
    pub fn new(config: Config) -> Result<Self> {
        let user_id = config.user_id()?;
        let http = HttpClient::new(config.client_name(), config.rest.timeout())?;
        Ok(Self {
            config: Arc::new(config),
            user_id,
            http,
            registry: Arc::new(Registry::default()),
        })
    }

    /// Creates a client and opens every configured node.
    ///
    /// A node that fails to open is logged and left out; add it again with
    /// [`Client::add_node`].
    pub async fn connect(config: Config) -> Result<Self> {
        let client = Self::new(config)?;
        for node in client.config.nodes.iter().cloned() {
            let name = node.name.clone();
            if let Err(e) = client.add_node(node).await {
                warn!("[{}] Not added: {}", name, e);
            }
        }
        info!(
            "Connected {}/{} nodes",
            client.registry.nodes.len(),
            client.config.nodes.len()
        );
        Ok(client)
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Opens a node and registers it under its name.
    ///
    /// Fails if the name is taken or the node cannot be opened; in both cases
    /// the registry is unchanged.
    pub async fn add_node(&self, config: NodeConfig) -> Result<Arc<Node>> {
        if self.registry.nodes.contains_key(&config.name) {
            return Err(Error::DuplicateNode(config.name));
        }

        let node = Node::new(
            config,
            self.user_id,
            self.config.client_name().to_string(),
            self.config.reconnect.clone(),
            self.http.clone(),
            Arc::downgrade(&self.registry),
        );
        node.open().await?;

        match self.registry.nodes.entry(node.name().to_string()) {
            Entry::Occupied(_) => {
                // Lost a race with a concurrent add of the same name.
                node.close();
                Err(Error::DuplicateNode(node.name().to_string()))
            }
            Entry::Vacant(slot) => {
                slot.insert(node.clone());
                info!("[{}] Added", node.name());
                Ok(node)
            }
        }
    }

    pub fn node(&self, name: &str) -> Option<Arc<Node>> {
        self.registry.node(name)
    }

    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.registry
            .nodes
            .iter()
            .map(|n| n.value().clone())
            .collect()
    }

    /// Closes and forgets a node. Its players rebind to another node on their next update.
    pub fn remove_node(&self, name: &str) -> Option<Arc<Node>> {
        let (_, node) = self.registry.nodes.remove(name)?;
        node.close();

        for player in self.players() {
            player.unbind_from(&node);
        }
        info!("[{}] Removed", name);
        Some(node)
    }

    /// The node new players are bound to. See [`Node::load`].
    pub fn best_node(&self) -> Option<Arc<Node>> {
        self.registry.best_node()
    }

    /// The guild's player, created unbound if it does not exist yet.
    pub fn player(&self, guild_id: impl Into<GuildId>) -> Arc<Player> {
        let guild_id = guild_id.into();
        self.registry
            .players
            .entry(guild_id.clone())
            .or_insert_with(|| {
                Arc::new(Player::new(guild_id, Arc::downgrade(&self.registry), None))
            })
            .value()
            .clone()
    }

    pub fn existing_player(&self, guild_id: &GuildId) -> Option<Arc<Player>> {
        self.registry.player(guild_id)
    }

    /// The guild's player, bound to the named node.
    ///
    /// Fails if the node is unknown or the player is already bound elsewhere.
    pub fn player_on_node(&self, node: &str, guild_id: impl Into<GuildId>) -> Result<Arc<Player>> {
        let node = self
            .registry
            .node(node)
            .ok_or_else(|| Error::UnknownNode(node.to_string()))?;
        let player = self.player(guild_id);
        player.bind(&node)?;
        Ok(player)
    }

    /// Forgets the guild's player without touching the node.
    pub fn remove_player(&self, guild_id: &GuildId) -> Option<Arc<Player>> {
        self.registry.remove_player(guild_id)
    }

    /// Forgets the guild's player and destroys it on its node.
    pub async fn destroy_player(&self, guild_id: &GuildId) -> Result<()> {
        match self.registry.remove_player(guild_id) {
            Some(player) => player.destroy().await,
            None => Ok(()),
        }
    }

    pub fn players(&self) -> Vec<Arc<Player>> {
        self.registry
            .players
            .iter()
            .map(|p| p.value().clone())
            .collect()
    }

    /// Forwards a voice server update from the gateway.
    pub async fn on_voice_server_update(
        &self,
        guild_id: impl Into<GuildId>,
        token: impl Into<String>,
        endpoint: impl Into<String>,
    ) {
        self.player(guild_id)
            .on_voice_server_update(token.into(), endpoint.into())
            .await;
    }

    /// Forwards the bot's own voice state update from the gateway.
    ///
    /// `None` means the bot left the channel: the player is destroyed and removed.
    pub async fn on_voice_state_update(
        &self,
        guild_id: impl Into<GuildId>,
        channel_id: Option<ChannelId>,
        session_id: impl Into<String>,
    ) {
        let guild_id = guild_id.into();
        let player = match channel_id {
            Some(_) => self.player(guild_id),
            None => match self.registry.player(&guild_id) {
                Some(player) => player,
                None => return,
            },
        };
        player
            .on_voice_state_update(channel_id, session_id.into())
            .await;
    }

    /// Closes every node and forgets all nodes and players.
    pub fn close(&self) {
        let names: Vec<String> = self
            .registry
            .nodes
            .iter()
            .map(|n| n.key().clone())
            .collect();
        for name in names {
            if let Some((_, node)) = self.registry.nodes.remove(&name) {
                node.close();
            }
        }
        self.registry.players.clear();
        info!("Client closed");
    }
}
