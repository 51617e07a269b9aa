use serde::{Deserialize, Serialize};

use crate::common::time::Millis;

/// Node statistics, pushed over the websocket and served by `GET /v4/stats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub players: i32,
    pub playing_players: i32,
    pub uptime: Millis,
    pub memory: Memory,
    pub cpu: Cpu,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_stats: Option<FrameStats>,
}

impl Stats {
    /// System CPU load as a percentage. Lower is better.
    pub fn load(&self) -> f64 {
        (self.cpu.system_load * 100.0).max(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    pub free: u64,
    pub used: u64,
    pub allocated: u64,
    pub reservable: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cpu {
    pub cores: i32,
    /// Fraction of total system capacity in use, 0.0 to 1.0.
    pub system_load: f64,
    pub lavalink_load: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameStats {
    pub sent: i32,
    pub nulled: i32,
    pub deficit: i32,
}
