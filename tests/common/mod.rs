//! An in-process node speaking just enough of the v4 protocol for the client tests.

#![allow(dead_code)]

use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch},
};
use lavabridge::{
    Client, Config, NodeConfig, Track,
    configs::ReconnectConfig,
    protocol::{TrackInfo, tracks::encode},
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;

pub const PASSWORD: &str = "youshallnotpass";
pub const SESSION_ID: &str = "la3kfsdf5eafe848";
pub const USER_ID: u64 = 170_939_974_227_591_168;

/// How the node behaves between the upgrade and the `ready` frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Handshake {
    #[default]
    Ready,
    /// Never sends anything.
    Silent,
    /// Sends a stats frame where `ready` is expected.
    StatsFirst,
    /// Closes the socket before `ready`.
    CloseFirst,
}

#[derive(Default)]
pub struct FakeState {
    pub handshake: Mutex<Handshake>,
    /// Session-Id header of every accepted websocket, in order.
    pub handshakes: Mutex<Vec<Option<String>>>,
    /// Node-side players by guild, as snapshot JSON.
    pub players: Mutex<HashMap<String, Value>>,
    /// Bodies of every session PATCH.
    pub session_updates: Mutex<Vec<Value>>,
    /// When set, player PATCHes fail with this status.
    pub fail_updates: Mutex<Option<StatusCode>>,
    /// Pushes frames into the live websocket; `None` closes it.
    push: Mutex<Option<mpsc::UnboundedSender<Option<String>>>>,
}

pub struct FakeNode {
    pub addr: SocketAddr,
    pub state: Arc<FakeState>,
}

impl FakeNode {
    pub async fn start() -> Self {
        let state = Arc::new(FakeState::default());
        let app = Router::new()
            .route("/v4/websocket", get(websocket))
            .route("/v4/sessions/{session_id}", patch(update_session))
            .route("/v4/sessions/{session_id}/players", get(players))
            .route(
                "/v4/sessions/{session_id}/players/{guild_id}",
                patch(update_player).delete(destroy_player),
            )
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn node_config(&self, name: &str) -> NodeConfig {
        let mut config = NodeConfig::new(name, self.addr.to_string(), PASSWORD);
        config.resuming = true;
        config.handshake_timeout_ms = 2_000;
        config
    }

    pub fn client_config(&self) -> Config {
        let mut config = Config::new(USER_ID).with_node(self.node_config("fake"));
        config.reconnect = ReconnectConfig {
            base_delay_ms: 10,
            max_delay_ms: 50,
        };
        config
    }

    pub async fn client(&self) -> Client {
        Client::connect(self.client_config()).await.unwrap()
    }

    /// Sends a frame to the connected client.
    pub fn push(&self, frame: Value) {
        if let Some(tx) = self.state.push.lock().as_ref() {
            let _ = tx.send(Some(frame.to_string()));
        }
    }

    /// Closes the websocket from the node's side.
    pub fn drop_connection(&self) {
        if let Some(tx) = self.state.push.lock().take() {
            let _ = tx.send(None);
        }
    }

    pub fn set_handshake(&self, handshake: Handshake) {
        *self.state.handshake.lock() = handshake;
    }

    pub fn handshakes(&self) -> Vec<Option<String>> {
        self.state.handshakes.lock().clone()
    }

    pub fn set_player(&self, guild_id: &str, snapshot: Value) {
        self.state
            .players
            .lock()
            .insert(guild_id.to_string(), snapshot);
    }
}

pub fn animals() -> Track {
    let info = TrackInfo {
        identifier: "jdWhJcrrjQs".into(),
        is_seekable: true,
        author: "Epitaph Records".into(),
        length: 244_000u64.into(),
        title: "Architects - \"Animals\"".into(),
        uri: Some("https://www.youtube.com/watch?v=jdWhJcrrjQs".into()),
        source_name: "youtube".into(),
        ..Default::default()
    };
    Track {
        encoded: encode(&info).unwrap(),
        info,
        plugin_info: json!({}),
        user_data: json!({}),
    }
}

pub fn empty_player(guild_id: &str) -> Value {
    json!({
        "guildId": guild_id,
        "track": null,
        "volume": 100,
        "paused": false,
        "state": { "time": 0, "position": 0, "connected": false, "ping": -1 },
        "voice": { "token": "", "endpoint": "", "sessionId": "" },
        "filters": {}
    })
}

/// Polls `check` until it holds, panicking after a few seconds.
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {}", what);
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .is_some_and(|auth| auth == PASSWORD)
}

async fn websocket(
    headers: HeaderMap,
    ws: WebSocketUpgrade,
    State(state): State<Arc<FakeState>>,
) -> Response {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }
    let user_id = headers.get("user-id").and_then(|h| h.to_str().ok());
    if user_id != Some(USER_ID.to_string().as_str()) {
        return (StatusCode::BAD_REQUEST, "Missing or invalid User-Id header").into_response();
    }

    let session_id = headers
        .get("session-id")
        .and_then(|h| h.to_str().ok())
        .map(String::from);
    ws.on_upgrade(move |socket| serve_socket(socket, state, session_id))
}

async fn serve_socket(mut socket: WebSocket, state: Arc<FakeState>, session_id: Option<String>) {
    let resumed = session_id.as_deref() == Some(SESSION_ID);
    state.handshakes.lock().push(session_id);

    let handshake = *state.handshake.lock();
    match handshake {
        Handshake::Ready => {}
        Handshake::Silent => return drain(socket).await,
        Handshake::StatsFirst => {
            let _ = socket.send(Message::Text(stats().to_string().into())).await;
            return drain(socket).await;
        }
        Handshake::CloseFirst => {
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    *state.push.lock() = Some(tx);

    let ready = json!({ "op": "ready", "resumed": resumed, "sessionId": SESSION_ID });
    if socket
        .send(Message::Text(ready.to_string().into()))
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(Some(text)) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            },
            msg = socket.recv() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

/// Holds the socket open until the client goes away.
async fn drain(mut socket: WebSocket) {
    while let Some(Ok(msg)) = socket.recv().await {
        if matches!(msg, Message::Close(_)) {
            break;
        }
    }
}

pub fn stats() -> Value {
    json!({
        "op": "stats",
        "players": 1,
        "playingPlayers": 0,
        "uptime": 123_456,
        "memory": { "free": 1, "used": 1, "allocated": 1, "reservable": 1 },
        "cpu": { "cores": 4, "systemLoad": 0.25, "lavalinkLoad": 0.1 }
    })
}

fn node_error(status: StatusCode, message: &str, path: String) -> Response {
    let body = json!({
        "timestamp": 1_667_857_581_613u64,
        "status": status.as_u16(),
        "error": status.canonical_reason().unwrap_or_default(),
        "message": message,
        "path": path,
    });
    (status, Json(body)).into_response()
}

async fn update_session(
    State(state): State<Arc<FakeState>>,
    Path(_session_id): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    state.session_updates.lock().push(body.clone());
    Json(json!({
        "resuming": body["resuming"].as_bool().unwrap_or(false),
        "timeout": body["timeout"].as_u64().unwrap_or(60),
    }))
}

async fn players(State(state): State<Arc<FakeState>>, Path(_session_id): Path<String>) -> Json<Value> {
    Json(Value::Array(state.players.lock().values().cloned().collect()))
}

async fn update_player(
    State(state): State<Arc<FakeState>>,
    Path((session_id, guild_id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    let path = format!("/v4/sessions/{}/players/{}", session_id, guild_id);
    if let Some(status) = *state.fail_updates.lock() {
        return node_error(status, "player update rejected", path);
    }
    if session_id != SESSION_ID {
        return node_error(StatusCode::NOT_FOUND, "Session not found", path);
    }

    let mut players = state.players.lock();
    let player = players
        .entry(guild_id.clone())
        .or_insert_with(|| empty_player(&guild_id));

    match body.get("track").and_then(|t| t.get("encoded")) {
        Some(Value::Null) => player["track"] = Value::Null,
        Some(Value::String(encoded)) => match Track::decode(encoded) {
            Ok(track) => player["track"] = serde_json::to_value(track).unwrap(),
            Err(e) => return node_error(StatusCode::BAD_REQUEST, &e.to_string(), path),
        },
        _ => {}
    }
    for key in ["volume", "paused", "filters", "voice"] {
        if let Some(value) = body.get(key) {
            player[key] = value.clone();
        }
    }
    if let Some(position) = body.get("position") {
        player["state"]["position"] = position.clone();
    }

    Json(player.clone()).into_response()
}

async fn destroy_player(
    State(state): State<Arc<FakeState>>,
    Path((_session_id, guild_id)): Path<(String, String)>,
) -> StatusCode {
    state.players.lock().remove(&guild_id);
    StatusCode::NO_CONTENT
}
