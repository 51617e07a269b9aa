use std::time::Duration;

use reqwest::{Client, Error};

/// Value sent as `Client-Name` on the websocket handshake and as the REST user agent.
pub const CLIENT_NAME: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

pub struct HttpClient;

impl HttpClient {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Client, Error> {
        Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
    }
}
