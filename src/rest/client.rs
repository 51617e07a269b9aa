use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::{
    common::{
        errors::{NodeError, Result},
        types::{GuildId, SessionId},
    },
    protocol::{
        Info, LoadResult, PlayerSnapshot, PlayerUpdate, SessionInfo, SessionUpdate, Stats, Track,
    },
};

/// Request/response interface of one node.
///
/// Stateless apart from the base URL and credentials. Every call can be
/// cancelled by dropping its future; the underlying HTTP client also
/// enforces the configured request timeout.
#[derive(Clone)]
pub struct RestClient {
    base_url: String,
    password: String,
    http: reqwest::Client,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>, password: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            password: password.into(),
            http,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        trace!("{} {}{}", method, self.base_url, path);
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .header("Authorization", &self.password)
    }

    /// Maps non-2xx responses to the node's structured error.
    async fn check(path: &str, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await?;
        let error = serde_json::from_str::<NodeError>(&body)
            .unwrap_or_else(|_| NodeError::from_status(status, path, body));
        debug!("{} failed: {}", path, error);
        Err(error.into())
    }

    async fn send_json<T: DeserializeOwned>(&self, path: &str, request: RequestBuilder) -> Result<T> {
        let response = Self::check(path, request.send().await?).await?;
        Ok(response.json::<T>().await?)
    }

    /// GET /version
    pub async fn version(&self) -> Result<String> {
        let path = "/version";
        let response = Self::check(path, self.request(Method::GET, path).send().await?).await?;
        Ok(response.text().await?)
    }

    /// GET /v4/info
    pub async fn info(&self) -> Result<Info> {
        let path = "/v4/info";
        self.send_json(path, self.request(Method::GET, path)).await
    }

    /// GET /v4/stats
    pub async fn stats(&self) -> Result<Stats> {
        let path = "/v4/stats";
        self.send_json(path, self.request(Method::GET, path)).await
    }

    /// PATCH /v4/sessions/{sessionId}
    pub async fn update_session(
        &self,
        session_id: &SessionId,
        update: &SessionUpdate,
    ) -> Result<SessionInfo> {
        let path = format!("/v4/sessions/{}", session_id);
        self.send_json(&path, self.request(Method::PATCH, &path).json(update))
            .await
    }

    /// GET /v4/sessions/{sessionId}/players
    pub async fn players(&self, session_id: &SessionId) -> Result<Vec<PlayerSnapshot>> {
        let path = format!("/v4/sessions/{}/players", session_id);
        self.send_json(&path, self.request(Method::GET, &path)).await
    }

    /// GET /v4/sessions/{sessionId}/players/{guildId}
    pub async fn player(&self, session_id: &SessionId, guild_id: &GuildId) -> Result<PlayerSnapshot> {
        let path = format!("/v4/sessions/{}/players/{}", session_id, guild_id);
        self.send_json(&path, self.request(Method::GET, &path)).await
    }

    /// PATCH /v4/sessions/{sessionId}/players/{guildId}?noReplace=...
    pub async fn update_player(
        &self,
        session_id: &SessionId,
        guild_id: &GuildId,
        update: &PlayerUpdate,
    ) -> Result<PlayerSnapshot> {
        let path = format!("/v4/sessions/{}/players/{}", session_id, guild_id);
        let request = self
            .request(Method::PATCH, &path)
            .query(&[("noReplace", update.no_replace)])
            .json(update);
        self.send_json(&path, request).await
    }

    /// DELETE /v4/sessions/{sessionId}/players/{guildId}
    pub async fn destroy_player(&self, session_id: &SessionId, guild_id: &GuildId) -> Result<()> {
        let path = format!("/v4/sessions/{}/players/{}", session_id, guild_id);
        Self::check(&path, self.request(Method::DELETE, &path).send().await?).await?;
        Ok(())
    }

    /// GET /v4/loadtracks?identifier=...
    pub async fn load_tracks(&self, identifier: &str) -> Result<LoadResult> {
        let path = format!(
            "/v4/loadtracks?identifier={}",
            urlencoding::encode(identifier)
        );
        self.send_json(&path, self.request(Method::GET, &path)).await
    }

    /// GET /v4/decodetrack?encodedTrack=...
    pub async fn decode_track(&self, encoded: &str) -> Result<Track> {
        let path = format!(
            "/v4/decodetrack?encodedTrack={}",
            urlencoding::encode(encoded)
        );
        self.send_json(&path, self.request(Method::GET, &path)).await
    }

    /// POST /v4/decodetracks
    pub async fn decode_tracks(&self, encoded: &[String]) -> Result<Vec<Track>> {
        let path = "/v4/decodetracks";
        self.send_json(path, self.request(Method::POST, path).json(encoded))
            .await
    }
}
