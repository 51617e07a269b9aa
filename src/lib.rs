//! Client for Lavalink-protocol (v4) audio nodes.
//!
//! A [`Client`] keeps websocket connections to one or more [`Node`]s and one
//! [`Player`] per guild. Players are driven through the node's REST API and kept
//! in sync by the events and state updates the node pushes back.

pub mod client;
pub mod common;
pub mod configs;
pub mod node;
pub mod player;
pub mod protocol;
pub mod rest;

pub use client::Client;
pub use common::errors::{Error, NodeError, Result};
pub use common::types::{ChannelId, GuildId, SessionId, UserId};
pub use configs::{Config, NodeConfig};
pub use node::{Node, NodeStatus};
pub use player::{EventListener, Player};
pub use protocol::{LoadResult, PlayerEvent, PlayerUpdate, Track};
pub use rest::RestClient;
