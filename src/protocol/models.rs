use serde::{Deserialize, Serialize};

use crate::{
    common::{time::Millis, types::GuildId},
    protocol::{filters::Filters, tracks::Track},
};

/// Full player state as returned by the node's REST endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub guild_id: GuildId,
    pub track: Option<Track>,
    pub volume: u16,
    pub paused: bool,
    pub state: PlayerState,
    pub voice: VoiceState,
    #[serde(default)]
    pub filters: Filters,
}

/// Position and connection state, pushed periodically in `playerUpdate` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    /// Unix timestamp the state was sampled at.
    pub time: Millis,
    pub position: Millis,
    /// Whether the node is connected to the voice gateway.
    pub connected: bool,
    /// Voice gateway ping in milliseconds. -1 if not connected.
    pub ping: i64,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            time: Millis::ZERO,
            position: Millis::ZERO,
            connected: false,
            ping: -1,
        }
    }
}

/// Voice server credentials relayed to the node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceState {
    pub token: String,
    pub endpoint: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
}

impl VoiceState {
    /// True once both halves of the voice handshake (state + server) are known.
    pub fn is_complete(&self) -> bool {
        !self.token.is_empty() && !self.endpoint.is_empty() && !self.session_id.is_empty()
    }
}

/// Tri-state track field: absent keeps the current track, `Clear` stops it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TrackEncoded {
    Clear,       // JSON: null
    Set(String), // JSON: string
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EndTime {
    Clear,       // JSON: null
    Set(Millis), // JSON: number
}

/// Track field in a player update request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePlayerTrack {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoded: Option<TrackEncoded>,
    /// Identifier for the node to resolve. Mutually exclusive with `encoded`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<serde_json::Value>,
}

/// A partial player update, the body of PATCH /v4/sessions/{sessionId}/players/{guildId}.
///
/// Every field is optional; only the set ones are sent and changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<UpdatePlayerTrack>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Millis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<EndTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Filters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceState>,
    /// Sent as the `noReplace` query parameter.
    #[serde(skip)]
    pub no_replace: bool,
}

pub const MAX_VOLUME: u16 = 1000;

impl PlayerUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(self, track: &Track) -> Self {
        self.encoded_track(track.encoded.clone())
    }

    pub fn encoded_track(mut self, encoded: impl Into<String>) -> Self {
        let user_data = self.track.take().and_then(|t| t.user_data);
        self.track = Some(UpdatePlayerTrack {
            encoded: Some(TrackEncoded::Set(encoded.into())),
            identifier: None,
            user_data,
        });
        self
    }

    /// Asks the node to resolve and play an identifier (a URL or `ytsearch:...`).
    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        let user_data = self.track.take().and_then(|t| t.user_data);
        self.track = Some(UpdatePlayerTrack {
            encoded: None,
            identifier: Some(identifier.into()),
            user_data,
        });
        self
    }

    /// Stops the current track.
    pub fn clear_track(mut self) -> Self {
        self.track = Some(UpdatePlayerTrack {
            encoded: Some(TrackEncoded::Clear),
            identifier: None,
            user_data: None,
        });
        self
    }

    pub fn user_data(mut self, user_data: serde_json::Value) -> Self {
        self.track.get_or_insert_with(Default::default).user_data = Some(user_data);
        self
    }

    pub fn position(mut self, position: impl Into<Millis>) -> Self {
        self.position = Some(position.into());
        self
    }

    /// `None` clears a previously set end time.
    pub fn end_time(mut self, end_time: Option<Millis>) -> Self {
        self.end_time = Some(end_time.map_or(EndTime::Clear, EndTime::Set));
        self
    }

    /// Clamped to `0..=1000`.
    pub fn volume(mut self, volume: u16) -> Self {
        self.volume = Some(volume.min(MAX_VOLUME));
        self
    }

    pub fn paused(mut self, paused: bool) -> Self {
        self.paused = Some(paused);
        self
    }

    pub fn filters(mut self, filters: Filters) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn voice(mut self, voice: VoiceState) -> Self {
        self.voice = Some(voice);
        self
    }

    /// Leave a currently playing track alone instead of replacing it.
    pub fn no_replace(mut self, no_replace: bool) -> Self {
        self.no_replace = no_replace;
        self
    }

    /// Whether this update assigns or clears the track.
    pub fn changes_track(&self) -> bool {
        self.track
            .as_ref()
            .is_some_and(|t| t.encoded.is_some() || t.identifier.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_serializes_only_set_fields() {
        let update = PlayerUpdate::new().volume(50).paused(true).no_replace(true);
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            serde_json::json!({ "volume": 50, "paused": true })
        );
    }

    #[test]
    fn test_clear_track_and_end_time_serialize_as_null() {
        let update = PlayerUpdate::new().clear_track().end_time(None);
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            serde_json::json!({ "track": { "encoded": null }, "endTime": null })
        );
        assert!(update.changes_track());
    }

    #[test]
    fn test_identifier_keeps_user_data() {
        let update = PlayerUpdate::new()
            .user_data(serde_json::json!({ "requester": 1 }))
            .identifier("ytsearch:animals")
            .position(1500u64);
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            serde_json::json!({
                "track": { "identifier": "ytsearch:animals", "userData": { "requester": 1 } },
                "position": 1500
            })
        );
    }

    #[test]
    fn test_volume_is_clamped() {
        assert_eq!(PlayerUpdate::new().volume(5000).volume, Some(MAX_VOLUME));
        assert!(!PlayerUpdate::new().volume(10).changes_track());
    }

    #[test]
    fn test_snapshot_deserializes() {
        let snapshot: PlayerSnapshot = serde_json::from_value(serde_json::json!({
            "guildId": "817327181659111454",
            "track": null,
            "volume": 100,
            "paused": false,
            "state": { "time": 1500467109, "position": 60000, "connected": true, "ping": 50 },
            "voice": { "token": "t", "endpoint": "e", "sessionId": "s" },
            "filters": {}
        }))
        .unwrap();

        assert_eq!(snapshot.guild_id, GuildId::from("817327181659111454"));
        assert_eq!(snapshot.state.position, Millis(60000));
        assert!(snapshot.voice.is_complete());
        assert!(snapshot.filters.is_empty());
    }
}
