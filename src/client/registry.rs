use std::{cmp::Ordering, sync::Arc};

use dashmap::DashMap;

use crate::{
    common::types::GuildId,
    node::{Node, NodeStatus},
    player::Player,
};

/// Nodes by name and players by guild, shared by the client, its nodes and its players.
///
/// Map guards are only held for the lookup or mutation itself, never across an
/// await or a call into a node or player.
#[derive(Default)]
pub(crate) struct Registry {
    pub(crate) nodes: DashMap<String, Arc<Node>>,
    pub(crate) players: DashMap<GuildId, Arc<Player>>,
}

impl Registry {
    pub(crate) fn node(&self, name: &str) -> Option<Arc<Node>> {
        self.nodes.get(name).map(|n| n.value().clone())
    }

    pub(crate) fn player(&self, guild_id: &GuildId) -> Option<Arc<Player>> {
        self.players.get(guild_id).map(|p| p.value().clone())
    }

    pub(crate) fn remove_player(&self, guild_id: &GuildId) -> Option<Arc<Player>> {
        self.players.remove(guild_id).map(|(_, player)| player)
    }

    /// The least loaded node, preferring connected nodes over the rest and
    /// nodes with stats over those without. `None` only when there are no nodes.
    pub(crate) fn best_node(&self) -> Option<Arc<Node>> {
        let nodes: Vec<Arc<Node>> = self.nodes.iter().map(|n| n.value().clone()).collect();
        nodes.into_iter().min_by(|a, b| rank(a, b))
    }
}

fn rank(a: &Node, b: &Node) -> Ordering {
    let offline = |n: &Node| n.status() != NodeStatus::Connected;
    offline(a).cmp(&offline(b)).then_with(|| match (a.load(), b.load()) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Weak;

    use super::*;
    use crate::{
        common::{time::Millis, types::UserId},
        configs::{NodeConfig, ReconnectConfig},
        protocol::{Cpu, Memory, Stats},
    };

    fn node(name: &str, load: Option<f64>) -> Arc<Node> {
        let node = Node::new(
            NodeConfig::new(name, "localhost:2333", "youshallnotpass"),
            UserId(1),
            "test/0.0.0".into(),
            ReconnectConfig::default(),
            reqwest::Client::new(),
            Weak::new(),
        );
        if let Some(load) = load {
            node.set_stats(Stats {
                players: 0,
                playing_players: 0,
                uptime: Millis(1_000),
                memory: Memory {
                    free: 0,
                    used: 0,
                    allocated: 0,
                    reservable: 0,
                },
                cpu: Cpu {
                    cores: 4,
                    system_load: load,
                    lavalink_load: 0.0,
                },
                frame_stats: None,
            });
        }
        node
    }

    fn registry(nodes: Vec<Arc<Node>>) -> Registry {
        let registry = Registry::default();
        for node in nodes {
            registry.nodes.insert(node.name().to_string(), node);
        }
        registry
    }

    #[test]
    fn test_best_node_picks_lowest_load() {
        let registry = registry(vec![
            node("busy", Some(0.5)),
            node("fresh", None),
            node("idle", Some(0.2)),
        ]);
        assert_eq!(registry.best_node().unwrap().name(), "idle");
    }

    #[test]
    fn test_best_node_accepts_node_without_stats() {
        let registry = registry(vec![node("fresh", None)]);
        assert_eq!(registry.best_node().unwrap().name(), "fresh");
    }

    #[test]
    fn test_best_node_none_without_nodes() {
        assert!(Registry::default().best_node().is_none());
    }

    #[test]
    fn test_remove_player_is_authoritative() {
        let registry = Registry::default();
        let guild = GuildId::from(42u64);
        registry.players.insert(
            guild.clone(),
            Arc::new(Player::new(guild.clone(), Weak::new(), None)),
        );

        assert!(registry.player(&guild).is_some());
        assert!(registry.remove_player(&guild).is_some());
        assert!(registry.player(&guild).is_none());
        assert!(registry.remove_player(&guild).is_none());
    }
}
