use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    client::Registry,
    common::{
        errors::{Error, Result},
        types::{SessionId, UserId},
    },
    configs::{NodeConfig, ReconnectConfig},
    protocol::{SessionUpdate, Stats},
    rest::RestClient,
};

mod backoff;
mod connection;

/// Lifecycle of a node's websocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

struct Connection {
    status: NodeStatus,
    /// Last session handed out by the node. Kept across drops so a reconnect can resume it.
    session_id: Option<SessionId>,
    /// Cancels the receive/reconnect task of the live connection.
    cancel: Option<CancellationToken>,
    /// Bumped on every `open`, so a superseded task can tell it no longer owns the connection.
    generation: u64,
}

/// One connection to one node, plus its REST interface.
pub struct Node {
    config: NodeConfig,
    user_id: UserId,
    client_name: String,
    reconnect: ReconnectConfig,
    rest: RestClient,
    registry: Weak<Registry>,
    conn: Mutex<Connection>,
    stats: RwLock<Option<Stats>>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.config.name)
            .field("address", &self.config.address)
            .field("status", &self.status())
            .finish()
    }
}

impl Node {
    pub(crate) fn new(
        config: NodeConfig,
        user_id: UserId,
        client_name: String,
        reconnect: ReconnectConfig,
        http: reqwest::Client,
        registry: Weak<Registry>,
    ) -> Arc<Self> {
        let rest = RestClient::new(config.rest_url(), config.password.clone(), http);
        let session_id = config.session_id.clone().map(SessionId);
        Arc::new(Self {
            config,
            user_id,
            client_name,
            reconnect,
            rest,
            registry,
            conn: Mutex::new(Connection {
                status: NodeStatus::Disconnected,
                session_id,
                cancel: None,
                generation: 0,
            }),
            stats: RwLock::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    pub fn status(&self) -> NodeStatus {
        self.conn.lock().status
    }

    /// The current session, only while connected.
    pub fn session_id(&self) -> Option<SessionId> {
        let conn = self.conn.lock();
        match conn.status {
            NodeStatus::Connected => conn.session_id.clone(),
            _ => None,
        }
    }

    /// Like [`Node::session_id`], but an error for callers that need one.
    pub fn require_session(&self) -> Result<SessionId> {
        self.session_id()
            .ok_or_else(|| Error::NotConnected(self.config.name.clone()))
    }

    /// Last stats pushed by the node, if any arrived yet.
    pub fn stats(&self) -> Option<Stats> {
        self.stats.read().clone()
    }

    /// CPU load percentage from the last stats, `None` before the first stats frame.
    pub fn load(&self) -> Option<f64> {
        self.stats.read().as_ref().map(Stats::load)
    }

    pub(crate) fn set_stats(&self, stats: Stats) {
        *self.stats.write() = Some(stats);
    }

    /// Connects and waits for the node's `ready` frame.
    ///
    /// Failures are returned without retrying. Once this has succeeded, later
    /// connection drops are recovered in the background until [`Node::close`].
    pub async fn open(self: &Arc<Self>) -> Result<()> {
        let cancel = CancellationToken::new();
        let (generation, resume) = {
            let mut conn = self.conn.lock();
            if conn.status == NodeStatus::Connected {
                return Ok(());
            }
            if let Some(old) = conn.cancel.replace(cancel.clone()) {
                old.cancel();
            }
            conn.generation += 1;
            conn.status = NodeStatus::Connecting;
            (conn.generation, conn.session_id.clone())
        };
        let mut guard = OpenGuard {
            node: self,
            owner: Some(Owner { generation, cancel }),
        };

        info!("[{}] Connecting to {}", self.name(), self.config.websocket_url());
        let (stream, ready) = match self.connect(resume.as_ref()).await {
            Ok(connected) => connected,
            Err(e) => {
                warn!("[{}] Failed to connect: {}", self.name(), e);
                return Err(e);
            }
        };

        if !guard.mark_connected(&ready.session_id) {
            return Err(Error::Handshake("node was closed while connecting".into()));
        }
        self.after_handshake(ready.resumed).await;

        if let Some(owner) = guard.disarm() {
            tokio::spawn(self.clone().run(stream, owner));
        }
        Ok(())
    }

    /// Closes the connection. Idempotent; never triggers a reconnect.
    pub fn close(&self) {
        let mut conn = self.conn.lock();
        if let Some(cancel) = conn.cancel.take() {
            cancel.cancel();
        }
        if conn.status != NodeStatus::Disconnected {
            info!("[{}] Closing connection", self.config.name);
        }
        conn.status = NodeStatus::Disconnected;
        conn.session_id = None;
    }

    /// Commits a successful handshake unless the attempt was closed or superseded meanwhile.
    fn mark_connected(&self, owner: &Owner, session_id: &str) -> bool {
        let mut conn = self.conn.lock();
        if !owner.owns(&conn) {
            return false;
        }
        conn.status = NodeStatus::Connected;
        conn.session_id = Some(SessionId(session_id.to_string()));
        true
    }

    fn mark_disconnected(&self, owner: &Owner) {
        let mut conn = self.conn.lock();
        if owner.owns(&conn) {
            conn.status = NodeStatus::Disconnected;
            if let Some(cancel) = conn.cancel.take() {
                cancel.cancel();
            }
        }
    }

    fn mark_reconnecting(&self, owner: &Owner) -> bool {
        let mut conn = self.conn.lock();
        if !owner.owns(&conn) {
            return false;
        }
        conn.status = NodeStatus::Reconnecting;
        true
    }

    /// Session kept for resuming, regardless of status.
    fn resume_session(&self) -> Option<SessionId> {
        self.conn.lock().session_id.clone()
    }

    /// Session setup after every successful handshake.
    async fn after_handshake(&self, resumed: bool) {
        let Some(session_id) = self.session_id() else {
            return;
        };

        if self.config.resuming {
            let update = SessionUpdate {
                resuming: Some(true),
                timeout: Some(self.config.resume_timeout_secs),
            };
            match self.rest.update_session(&session_id, &update).await {
                Ok(info) => debug!(
                    "[{}] Session {} resumable for {}s",
                    self.name(),
                    session_id,
                    info.timeout
                ),
                Err(e) => warn!("[{}] Failed to enable resuming: {}", self.name(), e),
            }
        }

        if resumed {
            self.reconcile_players(&session_id).await;
        }
    }

    /// Overwrites local players from the node's view after a resumed session.
    /// Guilds without a local player are left to the node to clean up.
    async fn reconcile_players(&self, session_id: &SessionId) {
        let snapshots = match self.rest.players(session_id).await {
            Ok(players) => players,
            Err(e) => {
                warn!("[{}] Failed to fetch players after resume: {}", self.name(), e);
                return;
            }
        };
        let Some(registry) = self.registry.upgrade() else {
            return;
        };

        info!(
            "[{}] Resumed session {} with {} players",
            self.name(),
            session_id,
            snapshots.len()
        );
        for snapshot in snapshots {
            match registry.player(&snapshot.guild_id) {
                Some(player) => player.apply_snapshot(snapshot),
                None => debug!(
                    "[{}] Ignoring orphaned player for guild {}",
                    self.name(),
                    snapshot.guild_id
                ),
            }
        }
    }
}

/// Identifies the open/reconnect task that owns the live connection.
struct Owner {
    generation: u64,
    cancel: CancellationToken,
}

impl Owner {
    fn owns(&self, conn: &Connection) -> bool {
        !self.cancel.is_cancelled() && conn.generation == self.generation
    }
}

/// Holds an in-flight `open` attempt. Dropping it before [`OpenGuard::disarm`],
/// whether by error or by the caller abandoning the future, leaves the node
/// `Disconnected`.
struct OpenGuard<'a> {
    node: &'a Node,
    owner: Option<Owner>,
}

impl OpenGuard<'_> {
    fn mark_connected(&self, session_id: &str) -> bool {
        self.owner
            .as_ref()
            .is_some_and(|owner| self.node.mark_connected(owner, session_id))
    }

    fn disarm(&mut self) -> Option<Owner> {
        self.owner.take()
    }
}

impl Drop for OpenGuard<'_> {
    fn drop(&mut self) {
        if let Some(owner) = self.owner.take() {
            self.node.mark_disconnected(&owner);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::net::TcpListener;

    use super::*;

    fn node(address: String, handshake_timeout_ms: u64) -> Arc<Node> {
        let mut config = NodeConfig::new("silent", address, "youshallnotpass");
        config.handshake_timeout_ms = handshake_timeout_ms;
        Node::new(
            config,
            UserId(170_939_974_227_591_168),
            "lavabridge-test".into(),
            ReconnectConfig::default(),
            reqwest::Client::new(),
            Weak::new(),
        )
    }

    /// Accepts connections and never answers the upgrade.
    async fn silent_listener() -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let task = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        (address, task)
    }

    #[tokio::test]
    async fn test_abandoned_open_leaves_node_disconnected() {
        let (address, task) = silent_listener().await;
        let node = node(address, 10_000);

        let attempt = tokio::time::timeout(Duration::from_millis(100), node.open()).await;
        assert!(attempt.is_err());
        assert_eq!(node.status(), NodeStatus::Disconnected);
        assert!(node.conn.lock().cancel.is_none());

        task.abort();
    }

    #[tokio::test]
    async fn test_handshake_timeout_leaves_node_disconnected() {
        let (address, task) = silent_listener().await;
        let node = node(address, 100);

        let err = node.open().await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)), "{err:?}");
        assert_eq!(node.status(), NodeStatus::Disconnected);

        task.abort();
    }

    #[tokio::test]
    async fn test_open_on_refused_port_fails() {
        let node = node("127.0.0.1:1".into(), 1_000);
        assert!(node.open().await.is_err());
        assert_eq!(node.status(), NodeStatus::Disconnected);
        assert!(node.session_id().is_none());
    }
}
