use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::HeaderValue,
        protocol::Message,
    },
};
use tracing::{debug, info, trace, warn};

use super::{Node, Owner, backoff::Backoff};
use crate::{
    common::{
        errors::{Error, Result},
        types::SessionId,
    },
    protocol::IncomingMessage,
};

pub(super) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Contents of the node's `ready` frame.
pub(super) struct Ready {
    pub(super) resumed: bool,
    pub(super) session_id: String,
}

impl Node {
    /// Opens the websocket and waits for `ready`, bounded by the handshake timeout.
    pub(super) async fn connect(&self, resume: Option<&SessionId>) -> Result<(WsStream, Ready)> {
        let timeout = Duration::from_millis(self.config.handshake_timeout_ms);
        tokio::time::timeout(timeout, self.handshake(resume))
            .await
            .map_err(|_| Error::Timeout(timeout))?
    }

    async fn handshake(&self, resume: Option<&SessionId>) -> Result<(WsStream, Ready)> {
        let mut request = self.config.websocket_url().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert("Authorization", header_value(&self.config.password)?);
        headers.insert("User-Id", header_value(&self.user_id.to_string())?);
        headers.insert("Client-Name", header_value(&self.client_name)?);
        if let Some(session_id) = resume {
            debug!("[{}] Attempting to resume session {}", self.name(), session_id);
            headers.insert("Session-Id", header_value(session_id)?);
        }

        let (mut stream, _) = connect_async(request).await?;

        loop {
            let text = match stream.next().await {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(frame))) => {
                    return Err(Error::Handshake(format!(
                        "closed before ready: {}",
                        frame.map(|f| f.reason.as_str().to_string()).unwrap_or_default()
                    )));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err(Error::Handshake("stream ended before ready".into())),
            };

            return match IncomingMessage::from_json(&text)? {
                IncomingMessage::Ready {
                    resumed,
                    session_id,
                } => {
                    info!(
                        "[{}] Ready, session {} (resumed: {})",
                        self.name(),
                        session_id,
                        resumed
                    );
                    Ok((
                        stream,
                        Ready {
                            resumed,
                            session_id,
                        },
                    ))
                }
                other => Err(Error::Handshake(format!(
                    "expected ready, got {:?}",
                    other
                ))),
            };
        }
    }

    /// Receive loop for the connection's lifetime, reconnecting on unexpected drops.
    pub(super) async fn run(self: Arc<Self>, mut stream: WsStream, owner: Owner) {
        let mut backoff = Backoff::new(&self.reconnect);

        loop {
            let reason = self.receive(&mut stream, &owner).await;
            if owner.cancel.is_cancelled() {
                let _ = stream.close(None).await;
                debug!("[{}] Receive loop stopped", self.name());
                return;
            }

            warn!("[{}] Connection lost: {}", self.name(), reason);
            drop(stream);
            if !self.mark_reconnecting(&owner) {
                return;
            }

            stream = loop {
                let delay = backoff.next();
                info!(
                    "[{}] Reconnecting in {:?} (attempt {})",
                    self.name(),
                    delay,
                    backoff.attempt()
                );
                tokio::select! {
                    _ = owner.cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }

                let resume = self.resume_session();
                match self.connect(resume.as_ref()).await {
                    Ok((stream, ready)) => {
                        if !self.mark_connected(&owner, &ready.session_id) {
                            return;
                        }
                        self.after_handshake(ready.resumed).await;
                        backoff.reset();
                        break stream;
                    }
                    Err(e) => warn!("[{}] Reconnect failed: {}", self.name(), e),
                }
            };
        }
    }

    /// Reads frames in arrival order until the connection fails or is closed.
    async fn receive(&self, stream: &mut WsStream, owner: &Owner) -> String {
        loop {
            let msg = tokio::select! {
                _ = owner.cancel.cancelled() => return "closed".into(),
                msg = stream.next() => msg,
            };

            match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = self.handle_text(&text) {
                        return format!("protocol error: {}", e);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    return match frame {
                        Some(f) => format!("closed by node: {} {}", f.code, f.reason.as_str()),
                        None => "closed by node".into(),
                    };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return e.to_string(),
                None => return "stream ended".into(),
            }
        }
    }

    fn handle_text(&self, text: &str) -> Result<()> {
        trace!("[{}] <- {}", self.name(), text);
        self.dispatch(IncomingMessage::from_json(text)?);
        Ok(())
    }

    /// Routes one decoded frame. Frames for guilds without a local player are dropped.
    pub(crate) fn dispatch(&self, message: IncomingMessage) {
        match message {
            IncomingMessage::Ready { session_id, .. } => {
                let mut conn = self.conn.lock();
                conn.session_id = Some(SessionId(session_id));
            }
            IncomingMessage::Stats(stats) => self.set_stats(stats),
            IncomingMessage::PlayerUpdate { guild_id, state } => {
                match self.routed_player(&guild_id) {
                    Some(player) => player.on_player_update(state),
                    None => trace!("[{}] No player for update in guild {}", self.name(), guild_id),
                }
            }
            IncomingMessage::Event(event) => match self.routed_player(event.guild_id()) {
                Some(player) => player.on_event(event),
                None => trace!(
                    "[{}] No player for {} in guild {}",
                    self.name(),
                    event.kind(),
                    event.guild_id()
                ),
            },
            IncomingMessage::Unknown { op, .. } => {
                debug!("[{}] Ignoring unknown op {}", self.name(), op);
            }
        }
    }

    fn routed_player(
        &self,
        guild_id: &crate::common::types::GuildId,
    ) -> Option<Arc<crate::player::Player>> {
        let player = self.registry.upgrade()?.player(guild_id)?;
        match player.node() {
            Some(node) if !std::ptr::eq(Arc::as_ptr(&node), self) => None,
            _ => Some(player),
        }
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| Error::Handshake(format!("invalid header value: {}", e)))
}
