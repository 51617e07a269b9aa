use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    common::{errors::Result, types::GuildId},
    protocol::{
        models::PlayerState,
        stats::Stats,
        tracks::{Exception, Track},
    },
};

/// Frames pushed by a node over the websocket.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    Ready {
        resumed: bool,
        session_id: String,
    },
    Stats(Stats),
    PlayerUpdate {
        guild_id: GuildId,
        state: PlayerState,
    },
    Event(PlayerEvent),
    /// An `op` this client does not know. Kept for forward compatibility.
    Unknown { op: String, raw: Value },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadyFrame {
    resumed: bool,
    session_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayerUpdateFrame {
    guild_id: GuildId,
    state: PlayerState,
}

impl IncomingMessage {
    /// Decodes one text frame. Unknown `op`s and event types are not errors.
    pub fn from_json(text: &str) -> Result<Self> {
        let raw: Value = serde_json::from_str(text)?;
        let op = raw
            .get("op")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let message = match op.as_str() {
            "ready" => {
                let ReadyFrame {
                    resumed,
                    session_id,
                } = serde_json::from_value(raw)?;
                Self::Ready {
                    resumed,
                    session_id,
                }
            }
            "stats" => Self::Stats(serde_json::from_value(raw)?),
            "playerUpdate" => {
                let PlayerUpdateFrame { guild_id, state } = serde_json::from_value(raw)?;
                Self::PlayerUpdate { guild_id, state }
            }
            "event" => Self::Event(PlayerEvent::from_value(raw)?),
            _ => Self::Unknown { op, raw },
        };
        Ok(message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackEndReason {
    Finished,
    LoadFailed,
    Stopped,
    Replaced,
    Cleanup,
}

impl TrackEndReason {
    /// Whether an application should start the next queued track.
    pub fn may_start_next(self) -> bool {
        matches!(self, Self::Finished | Self::LoadFailed)
    }

    /// Whether the track ended because something else took its place,
    /// rather than playback actually stopping.
    pub fn is_transition(self) -> bool {
        matches!(self, Self::Replaced | Self::Stopped)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackStartEvent {
    pub guild_id: GuildId,
    pub track: Track,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackEndEvent {
    pub guild_id: GuildId,
    pub track: Track,
    pub reason: TrackEndReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackExceptionEvent {
    pub guild_id: GuildId,
    pub track: Track,
    pub exception: Exception,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackStuckEvent {
    pub guild_id: GuildId,
    pub track: Track,
    pub threshold_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketClosedEvent {
    pub guild_id: GuildId,
    pub code: u16,
    pub reason: String,
    pub by_remote: bool,
}

/// Pause state change, generated locally when an update flips the paused flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerPauseEvent {
    pub guild_id: GuildId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerResumeEvent {
    pub guild_id: GuildId,
}

/// Lifecycle events delivered to a player and its listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    TrackStart(TrackStartEvent),
    TrackEnd(TrackEndEvent),
    TrackException(TrackExceptionEvent),
    TrackStuck(TrackStuckEvent),
    WebSocketClosed(WebSocketClosedEvent),
    PlayerPause(PlayerPauseEvent),
    PlayerResume(PlayerResumeEvent),
    /// An event `type` this client does not know, with its raw payload.
    Unknown {
        guild_id: GuildId,
        kind: String,
        raw: Value,
    },
}

impl PlayerEvent {
    pub fn from_value(raw: Value) -> Result<Self> {
        let kind = raw
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        fn parse<T: DeserializeOwned>(raw: Value) -> Result<T> {
            Ok(serde_json::from_value(raw)?)
        }

        let event = match kind.as_str() {
            "TrackStartEvent" => Self::TrackStart(parse(raw)?),
            "TrackEndEvent" => Self::TrackEnd(parse(raw)?),
            "TrackExceptionEvent" => Self::TrackException(parse(raw)?),
            "TrackStuckEvent" => Self::TrackStuck(parse(raw)?),
            "WebSocketClosedEvent" => Self::WebSocketClosed(parse(raw)?),
            "PlayerPauseEvent" => Self::PlayerPause(parse(raw)?),
            "PlayerResumeEvent" => Self::PlayerResume(parse(raw)?),
            _ => {
                let guild_id = raw
                    .get("guildId")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .into();
                Self::Unknown {
                    guild_id,
                    kind,
                    raw,
                }
            }
        };
        Ok(event)
    }

    pub fn guild_id(&self) -> &GuildId {
        match self {
            Self::TrackStart(e) => &e.guild_id,
            Self::TrackEnd(e) => &e.guild_id,
            Self::TrackException(e) => &e.guild_id,
            Self::TrackStuck(e) => &e.guild_id,
            Self::WebSocketClosed(e) => &e.guild_id,
            Self::PlayerPause(e) => &e.guild_id,
            Self::PlayerResume(e) => &e.guild_id,
            Self::Unknown { guild_id, .. } => guild_id,
        }
    }

    /// The wire name of the event type.
    pub fn kind(&self) -> &str {
        match self {
            Self::TrackStart(_) => "TrackStartEvent",
            Self::TrackEnd(_) => "TrackEndEvent",
            Self::TrackException(_) => "TrackExceptionEvent",
            Self::TrackStuck(_) => "TrackStuckEvent",
            Self::WebSocketClosed(_) => "WebSocketClosedEvent",
            Self::PlayerPause(_) => "PlayerPauseEvent",
            Self::PlayerResume(_) => "PlayerResumeEvent",
            Self::Unknown { kind, .. } => kind,
        }
    }
}
