use tokio::time::Instant;

use crate::{
    common::{time::Millis, types::ChannelId},
    protocol::{Filters, PlayerSnapshot, PlayerState, Track, VoiceState},
};

pub const DEFAULT_VOLUME: u16 = 100;

/// Locally cached view of a node-side player.
///
/// Every mutation is a full-field overwrite done under the player's lock, so
/// readers never see e.g. a new track with a stale position anchor.
#[derive(Debug, Clone)]
pub(crate) struct PlayerCache {
    pub(crate) track: Option<Track>,
    pub(crate) volume: u16,
    pub(crate) paused: bool,
    /// Last state reported by the node, or reset locally by an update.
    pub(crate) state: PlayerState,
    /// When `state` was recorded; the live position is extrapolated from here.
    pub(crate) anchored_at: Instant,
    pub(crate) voice: VoiceState,
    pub(crate) channel_id: Option<ChannelId>,
    pub(crate) filters: Filters,
}

impl Default for PlayerCache {
    fn default() -> Self {
        Self {
            track: None,
            volume: DEFAULT_VOLUME,
            paused: false,
            state: PlayerState::default(),
            anchored_at: Instant::now(),
            voice: VoiceState::default(),
            channel_id: None,
            filters: Filters::default(),
        }
    }
}

impl PlayerCache {
    /// Playback position at `now`.
    ///
    /// Frozen while paused; otherwise the last reported position plus the time
    /// elapsed since, clamped to the track's length. Zero without a track.
    pub(crate) fn position_at(&self, now: Instant) -> Millis {
        let Some(track) = &self.track else {
            return Millis::ZERO;
        };

        let mut position = self.state.position;
        if !self.paused {
            position = position + Millis::from(now.saturating_duration_since(self.anchored_at));
        }
        // Streams report a length of 0, there is nothing to clamp against.
        if !track.info.is_stream {
            position = position.min(track.info.length);
        }
        position
    }

    /// Re-anchors the position at `now` and sets the paused flag, so time spent
    /// paused is never counted as playback.
    pub(crate) fn set_paused(&mut self, paused: bool, now: Instant) {
        if self.paused == paused {
            return;
        }
        self.state.position = self.position_at(now);
        self.anchored_at = now;
        self.paused = paused;
    }

    pub(crate) fn set_state(&mut self, state: PlayerState, now: Instant) {
        self.state = state;
        self.anchored_at = now;
    }

    pub(crate) fn clear_track(&mut self, now: Instant) {
        self.track = None;
        self.state.position = Millis::ZERO;
        self.anchored_at = now;
    }

    /// Replaces everything the node is authoritative for.
    pub(crate) fn apply_snapshot(&mut self, snapshot: PlayerSnapshot, now: Instant) {
        self.track = snapshot.track;
        self.volume = snapshot.volume;
        self.paused = snapshot.paused;
        self.state = snapshot.state;
        self.anchored_at = now;
        self.voice = snapshot.voice;
        self.filters = snapshot.filters;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::protocol::TrackInfo;

    fn track(length: u64) -> Track {
        Track::from_info(TrackInfo {
            identifier: "jdWhJcrrjQs".into(),
            is_seekable: true,
            author: "Epitaph Records".into(),
            length: Millis(length),
            title: "Architects - \"Animals\"".into(),
            source_name: "youtube".into(),
            ..Default::default()
        })
        .unwrap()
    }

    fn playing(length: u64, position: u64) -> (PlayerCache, Instant) {
        let now = Instant::now();
        let mut cache = PlayerCache::default();
        cache.track = Some(track(length));
        cache.set_state(
            PlayerState {
                position: Millis(position),
                ..Default::default()
            },
            now,
        );
        (cache, now)
    }

    #[test]
    fn test_position_is_zero_without_track() {
        let cache = PlayerCache::default();
        assert_eq!(cache.position_at(Instant::now()), Millis::ZERO);
    }

    #[test]
    fn test_position_advances_and_is_clamped() {
        let (cache, start) = playing(10_000, 2_000);

        let t1 = cache.position_at(start + Duration::from_millis(500));
        let t2 = cache.position_at(start + Duration::from_millis(1_500));
        assert_eq!(t1, Millis(2_500));
        assert_eq!(t2, Millis(3_500));
        assert!(t2 >= t1);

        assert_eq!(
            cache.position_at(start + Duration::from_secs(3600)),
            Millis(10_000)
        );
        // At the anchor itself the reported position is returned as is.
        assert_eq!(cache.position_at(start), Millis(2_000));
    }

    #[test]
    fn test_pause_freezes_position() {
        let (mut cache, start) = playing(60_000, 1_000);

        let paused_at = start + Duration::from_millis(2_000);
        cache.set_paused(true, paused_at);
        assert_eq!(cache.position_at(paused_at), Millis(3_000));
        assert_eq!(
            cache.position_at(paused_at + Duration::from_secs(30)),
            Millis(3_000)
        );

        let resumed_at = paused_at + Duration::from_secs(30);
        cache.set_paused(false, resumed_at);
        assert_eq!(
            cache.position_at(resumed_at + Duration::from_millis(1_000)),
            Millis(4_000)
        );
    }

    #[test]
    fn test_stream_position_is_not_clamped() {
        let (mut cache, start) = playing(0, 0);
        if let Some(track) = cache.track.as_mut() {
            track.info.is_stream = true;
        }
        assert_eq!(
            cache.position_at(start + Duration::from_secs(5)),
            Millis(5_000)
        );
    }
}
