use std::time::Duration;

use lavabridge::{Client, Config, common::logger};
use tracing::{info, warn};

const STATS_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    let config = Config::load(&path)?;
    logger::init(config.logging.as_ref());

    if config.nodes.is_empty() {
        warn!("No nodes configured in {}", path);
    }
    let client = Client::connect(config).await?;

    let mut interval = tokio::time::interval(STATS_INTERVAL);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = interval.tick() => report(&client),
        }
    }

    info!("Shutting down");
    client.close();
    Ok(())
}

fn report(client: &Client) {
    for node in client.nodes() {
        match node.stats() {
            Some(stats) => info!(
                "[{}] {:?} | players {}/{} | load {:.1}% | uptime {}",
                node.name(),
                node.status(),
                stats.playing_players,
                stats.players,
                stats.load(),
                stats.uptime
            ),
            None => info!("[{}] {:?} | no stats yet", node.name(), node.status()),
        }
    }
}
