use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    client::Registry,
    common::{
        errors::{Error, Result},
        time::Millis,
        types::{ChannelId, GuildId},
    },
    node::Node,
    protocol::{
        Filters, PlayerEvent, PlayerPauseEvent, PlayerResumeEvent, PlayerSnapshot, PlayerState,
        PlayerUpdate, Track, VoiceState,
    },
};

mod listener;
mod state;

pub use listener::EventListener;
pub use state::DEFAULT_VOLUME;

use listener::{ChannelListener, Listeners};
use state::PlayerCache;

/// Controls one guild's playback on a node.
///
/// Reads are served from a local cache that the node keeps current through
/// `playerUpdate` pushes and events; writes go through [`Player::update`].
pub struct Player {
    guild_id: GuildId,
    registry: Weak<Registry>,
    node: RwLock<Option<Arc<Node>>>,
    cache: Mutex<PlayerCache>,
    listeners: Listeners,
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("guild_id", &self.guild_id)
            .field("node", &self.node.read().as_ref().map(|n| n.name().to_string()))
            .field("paused", &self.paused())
            .finish()
    }
}

impl Player {
    pub(crate) fn new(guild_id: GuildId, registry: Weak<Registry>, node: Option<Arc<Node>>) -> Self {
        Self {
            guild_id,
            registry,
            node: RwLock::new(node),
            cache: Mutex::new(PlayerCache::default()),
            listeners: Listeners::default(),
        }
    }

    pub fn guild_id(&self) -> &GuildId {
        &self.guild_id
    }

    /// The node this player is bound to. `None` until first use.
    pub fn node(&self) -> Option<Arc<Node>> {
        self.node.read().clone()
    }

    /// Binds to `node`, failing if already bound to a different one.
    pub(crate) fn bind(&self, node: &Arc<Node>) -> Result<()> {
        let mut slot = self.node.write();
        match slot.as_ref() {
            Some(current) if !Arc::ptr_eq(current, node) => Err(Error::NodeMismatch(
                self.guild_id.clone(),
                current.name().to_string(),
            )),
            _ => {
                *slot = Some(node.clone());
                Ok(())
            }
        }
    }

    /// Drops the binding if it points at `node`; the next operation rebinds.
    pub(crate) fn unbind_from(&self, node: &Arc<Node>) {
        let mut slot = self.node.write();
        if slot.as_ref().is_some_and(|n| Arc::ptr_eq(n, node)) {
            debug!("[{}] Unbound from node {}", self.guild_id, node.name());
            *slot = None;
        }
    }

    fn node_or_bind(&self) -> Result<Arc<Node>> {
        if let Some(node) = self.node() {
            return Ok(node);
        }

        let best = self
            .registry
            .upgrade()
            .and_then(|registry| registry.best_node())
            .ok_or_else(|| Error::NoNode(self.guild_id.clone()))?;

        let mut slot = self.node.write();
        let node = slot.get_or_insert(best).clone();
        debug!("[{}] Bound to node {}", self.guild_id, node.name());
        Ok(node)
    }

    // Getters. Pure reads of the cache.

    pub fn channel_id(&self) -> Option<ChannelId> {
        self.cache.lock().channel_id
    }

    pub fn track(&self) -> Option<Track> {
        self.cache.lock().track.clone()
    }

    pub fn paused(&self) -> bool {
        self.cache.lock().paused
    }

    /// Live playback position, extrapolated from the last report.
    pub fn position(&self) -> Millis {
        self.cache.lock().position_at(Instant::now())
    }

    /// The last state reported by the node, as received.
    pub fn state(&self) -> PlayerState {
        self.cache.lock().state
    }

    pub fn volume(&self) -> u16 {
        self.cache.lock().volume
    }

    pub fn filters(&self) -> Filters {
        self.cache.lock().filters.clone()
    }

    pub fn voice(&self) -> VoiceState {
        self.cache.lock().voice.clone()
    }

    /// Sends a partial update to the node and commits the node's response to the cache.
    ///
    /// Nothing in the cache changes if the request fails. When the update flips
    /// the paused flag, a [`PlayerEvent::PlayerPause`] or [`PlayerEvent::PlayerResume`]
    /// is delivered to listeners before the new flag is committed.
    pub async fn update(&self, update: PlayerUpdate) -> Result<PlayerSnapshot> {
        let node = self.node_or_bind()?;
        let session_id = node.require_session()?;
        let snapshot = node
            .rest()
            .update_player(&session_id, &self.guild_id, &update)
            .await?;

        if let Some(event) = self.pause_transition(&update, &snapshot) {
            self.listeners.emit(&event);
        }
        self.commit(&update, snapshot.clone(), Instant::now());
        Ok(snapshot)
    }

    /// The synthetic event to emit if `update` explicitly changed the paused flag.
    fn pause_transition(&self, update: &PlayerUpdate, snapshot: &PlayerSnapshot) -> Option<PlayerEvent> {
        update.paused?;
        if self.cache.lock().paused == snapshot.paused {
            return None;
        }

        let guild_id = self.guild_id.clone();
        Some(if snapshot.paused {
            PlayerEvent::PlayerPause(PlayerPauseEvent { guild_id })
        } else {
            PlayerEvent::PlayerResume(PlayerResumeEvent { guild_id })
        })
    }

    fn commit(&self, update: &PlayerUpdate, snapshot: PlayerSnapshot, now: Instant) {
        let position = match (update.position, update.changes_track()) {
            (Some(position), _) => position,
            (None, true) => snapshot
                .track
                .as_ref()
                .map_or(Millis::ZERO, |t| t.info.position),
            (None, false) => snapshot.state.position,
        };

        let mut cache = self.cache.lock();
        cache.track = snapshot.track;
        cache.volume = snapshot.volume;
        cache.paused = snapshot.paused;
        cache.state = PlayerState {
            time: Millis::now_unix(),
            position,
            ..snapshot.state
        };
        cache.anchored_at = now;
        cache.voice = snapshot.voice;
        cache.filters = snapshot.filters;
    }

    /// Plays `track`, replacing whatever is playing.
    pub async fn play(&self, track: &Track) -> Result<()> {
        self.update(PlayerUpdate::new().track(track)).await?;
        Ok(())
    }

    /// Lets the node resolve `identifier` (a URL or a search like `ytsearch:...`) and play it.
    pub async fn play_identifier(&self, identifier: impl Into<String>) -> Result<()> {
        self.update(PlayerUpdate::new().identifier(identifier)).await?;
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        self.update(PlayerUpdate::new().clear_track()).await?;
        Ok(())
    }

    pub async fn pause(&self, paused: bool) -> Result<()> {
        self.update(PlayerUpdate::new().paused(paused)).await?;
        Ok(())
    }

    pub async fn seek(&self, position: impl Into<Millis>) -> Result<()> {
        self.update(PlayerUpdate::new().position(position)).await?;
        Ok(())
    }

    /// Clamped to `0..=1000`.
    pub async fn set_volume(&self, volume: u16) -> Result<()> {
        self.update(PlayerUpdate::new().volume(volume)).await?;
        Ok(())
    }

    pub async fn set_filters(&self, filters: Filters) -> Result<()> {
        self.update(PlayerUpdate::new().filters(filters)).await?;
        Ok(())
    }

    /// Destroys the node-side player. Does not remove this player from the client.
    ///
    /// A player that was never bound has nothing to destroy.
    pub async fn destroy(&self) -> Result<()> {
        let Some(node) = self.node() else {
            return Ok(());
        };
        let session_id = node.require_session()?;
        node.rest()
            .destroy_player(&session_id, &self.guild_id)
            .await?;
        debug!("[{}] Destroyed on node {}", self.guild_id, node.name());
        Ok(())
    }

    /// Registers a listener for this player's events.
    pub fn add_listener(&self, listener: Arc<dyn EventListener>) {
        self.listeners.add(listener);
    }

    /// Events as a channel. The subscription ends when the receiver is dropped.
    pub fn subscribe(&self) -> flume::Receiver<PlayerEvent> {
        let (listener, rx) = ChannelListener::new();
        self.listeners.add(Arc::new(listener));
        rx
    }

    /// Applies an event from the node to the cache, then hands it to listeners.
    pub(crate) fn on_event(&self, event: PlayerEvent) {
        let now = Instant::now();
        {
            let mut cache = self.cache.lock();
            match &event {
                PlayerEvent::PlayerPause(_) => cache.set_paused(true, now),
                PlayerEvent::PlayerResume(_) => cache.set_paused(false, now),
                PlayerEvent::TrackEnd(e) if !e.reason.is_transition() => cache.clear_track(now),
                PlayerEvent::TrackException(_) | PlayerEvent::TrackStuck(_) => {
                    cache.clear_track(now)
                }
                PlayerEvent::WebSocketClosed(e) => {
                    warn!(
                        "[{}] Voice websocket closed: {} {} (by remote: {})",
                        self.guild_id, e.code, e.reason, e.by_remote
                    );
                    cache.voice = VoiceState::default();
                    cache.state.connected = false;
                }
                _ => {}
            }
        }
        self.listeners.emit(&event);
    }

    pub(crate) fn on_player_update(&self, state: PlayerState) {
        self.cache.lock().set_state(state, Instant::now());
    }

    pub(crate) fn apply_snapshot(&self, snapshot: PlayerSnapshot) {
        self.cache.lock().apply_snapshot(snapshot, Instant::now());
    }

    /// Relays new voice server credentials to the node.
    ///
    /// The cache takes the new credentials even if the relay fails; the next
    /// successful update sends them again.
    pub(crate) async fn on_voice_server_update(&self, token: String, endpoint: String) {
        let voice = {
            let cache = self.cache.lock();
            VoiceState {
                token,
                endpoint,
                session_id: cache.voice.session_id.clone(),
                channel_id: cache.channel_id.map(|c| c.to_string()),
            }
        };

        if let Err(e) = self.update(PlayerUpdate::new().voice(voice.clone())).await {
            warn!("[{}] Failed to send voice server update: {}", self.guild_id, e);
        }
        self.cache.lock().voice = voice;
    }

    /// Tracks the bot's voice channel. Leaving the channel destroys the player.
    pub(crate) async fn on_voice_state_update(&self, channel_id: Option<ChannelId>, session_id: String) {
        let Some(channel_id) = channel_id else {
            self.cache.lock().channel_id = None;
            if let Err(e) = self.destroy().await {
                warn!("[{}] Failed to destroy player after leaving voice: {}", self.guild_id, e);
            }
            if let Some(registry) = self.registry.upgrade() {
                registry.remove_player(&self.guild_id);
            }
            info!("[{}] Left voice channel, player removed", self.guild_id);
            return;
        };

        let mut cache = self.cache.lock();
        cache.channel_id = Some(channel_id);
        cache.voice.session_id = session_id;
    }
}
