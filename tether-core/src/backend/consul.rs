//! Consul-backed CoordinationBackend implementation.
//!
//! Speaks the agent's HTTP API with `reqwest`:
//!
//! - `PUT /v1/session/create`, `/renew/{id}`, `/destroy/{id}`
//! - `GET /v1/session/list`
//! - `PUT /v1/kv/{key}?acquire={id}` and `?release={id}`
//! - `GET /v1/kv/{key}`
//!
//! Responses are classified into the crate's error taxonomy. A 5xx while
//! the cluster has no leader counts as unavailable, since the agent is
//! reachable but cannot serve writes until an election completes.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::traits::{CoordinationBackend, KeyEntry, SessionDescriptor};
use crate::config::ConsulConfig;
use crate::error::{Error, Result};

/// Format a duration the way Consul's Go duration parser expects.
fn go_duration(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

/// Map a non-success response onto the error taxonomy.
fn classify(status: StatusCode, body: &str, session_id: Option<&str>) -> Error {
    let message = body.trim().to_string();
    let lowered = message.to_lowercase();

    // Only calls made on behalf of a lease can report it missing. Create
    // errors such as "Invalid Session TTL" are plain rejections.
    if let Some(id) = session_id
        && (status == StatusCode::NOT_FOUND
            || lowered.contains("invalid session \"")
            || lowered.contains("session not found"))
    {
        return Error::SessionNotFound(id.to_string());
    }

    if matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    ) || (status.is_server_error()
        && (lowered.contains("no cluster leader") || lowered.contains("rpc error")))
    {
        return Error::BackendUnavailable(format!("{}: {}", status, message));
    }

    Error::BackendRejected {
        status: status.as_u16(),
        message,
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateSessionRequest<'a> {
    name: &'a str,
    #[serde(rename = "TTL")]
    ttl: String,
    behavior: String,
    lock_delay: String,
}

impl<'a> CreateSessionRequest<'a> {
    fn new(name: &'a str, ttl: Duration, config: &ConsulConfig) -> Self {
        Self {
            name,
            ttl: go_duration(ttl),
            behavior: config.behavior.to_string(),
            lock_delay: go_duration(config.lock_delay),
        }
    }
}

#[derive(Deserialize)]
struct CreateSessionResponse {
    #[serde(rename = "ID")]
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawKeyEntry {
    key: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    session: Option<String>,
    #[serde(default)]
    modify_index: u64,
}

impl RawKeyEntry {
    fn decode(self) -> Result<KeyEntry> {
        let value = match self.value {
            Some(encoded) => BASE64
                .decode(encoded.as_bytes())
                .map_err(|e| Error::BackendRejected {
                    status: 200,
                    message: format!("undecodable value for {}: {}", self.key, e),
                })?,
            None => Vec::new(),
        };

        Ok(KeyEntry {
            key: self.key,
            value,
            session: self.session.filter(|s| !s.is_empty()),
            modify_index: self.modify_index,
        })
    }
}

/// Consul-backed implementation of CoordinationBackend.
pub struct ConsulBackend {
    config: ConsulConfig,
    http: reqwest::Client,
    base_url: String,
}

impl ConsulBackend {
    /// Build a client for the agent described by `config`.
    pub fn new(config: ConsulConfig) -> Result<Self> {
        if config.address.trim().is_empty() {
            return Err(Error::InvalidConfig("consul address is empty".to_string()));
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("failed to build HTTP client: {}", e)))?;

        let base_url = config.base_url();
        debug!(base_url = %base_url, "Configured Consul backend");

        Ok(Self {
            config,
            http,
            base_url,
        })
    }

    /// The configuration this client was built with.
    #[must_use]
    pub fn config(&self) -> &ConsulConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut req = self.http.request(method, self.url(path));
        if let Some(dc) = &self.config.datacenter {
            req = req.query(&[("dc", dc)]);
        }
        if let Some(token) = &self.config.token {
            req = req.header("X-Consul-Token", token);
        }
        req
    }

    /// Send a request, mapping transport failures to `BackendUnavailable`.
    async fn send(&self, req: RequestBuilder) -> Result<Response> {
        req.send()
            .await
            .map_err(|e| Error::BackendUnavailable(e.to_string()))
    }

    async fn reject(response: Response, session_id: Option<&str>) -> Error {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        classify(status, &body, session_id)
    }

    fn kv_path(key: &str) -> String {
        format!("kv/{}", key.trim_start_matches('/'))
    }

    async fn conditional_kv(
        &self,
        req: RequestBuilder,
        session_id: &str,
    ) -> Result<bool> {
        let response = self.send(req).await?;
        if !response.status().is_success() {
            return Err(Self::reject(response, Some(session_id)).await);
        }

        let body = response.text().await?;
        match body.trim() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(Error::BackendRejected {
                status: 200,
                message: format!("unexpected kv response: {}", other),
            }),
        }
    }
}

#[async_trait]
impl CoordinationBackend for ConsulBackend {
    async fn create_session(&self, name: &str, ttl: Duration) -> Result<String> {
        let body = CreateSessionRequest::new(name, ttl, &self.config);

        let response = self
            .send(self.request(Method::PUT, "session/create").json(&body))
            .await?;
        if !response.status().is_success() {
            return Err(Self::reject(response, None).await);
        }

        let created: CreateSessionResponse = response.json().await?;
        debug!(session_id = %created.id, name = %name, "Consul session created");
        Ok(created.id)
    }

    async fn renew_session(&self, id: &str) -> Result<()> {
        let response = self
            .send(self.request(Method::PUT, &format!("session/renew/{}", id)))
            .await?;
        if !response.status().is_success() {
            return Err(Self::reject(response, Some(id)).await);
        }

        // Older agents answer 200 with `null` for unknown sessions.
        let renewed: Option<Vec<SessionDescriptor>> = response.json().await?;
        if renewed.is_none_or(|sessions| sessions.is_empty()) {
            return Err(Error::SessionNotFound(id.to_string()));
        }

        trace!(session_id = %id, "Consul session renewed");
        Ok(())
    }

    async fn destroy_session(&self, id: &str) -> Result<()> {
        let response = self
            .send(self.request(Method::PUT, &format!("session/destroy/{}", id)))
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            _ => Err(Self::reject(response, Some(id)).await),
        }
    }

    async fn list_sessions(&self) -> Result<Vec<SessionDescriptor>> {
        let response = self
            .send(self.request(Method::GET, "session/list"))
            .await?;
        if !response.status().is_success() {
            return Err(Self::reject(response, None).await);
        }

        let sessions: Option<Vec<SessionDescriptor>> = response.json().await?;
        Ok(sessions.unwrap_or_default())
    }

    async fn put_if_session_owns(
        &self,
        key: &str,
        value: &[u8],
        session_id: &str,
    ) -> Result<bool> {
        let req = self
            .request(Method::PUT, &Self::kv_path(key))
            .query(&[("acquire", session_id)])
            .body(value.to_vec());
        self.conditional_kv(req, session_id).await
    }

    async fn release_if_session_owns(&self, key: &str, session_id: &str) -> Result<bool> {
        let req = self
            .request(Method::PUT, &Self::kv_path(key))
            .query(&[("release", session_id)]);
        self.conditional_kv(req, session_id).await
    }

    async fn get_key(&self, key: &str) -> Result<Option<KeyEntry>> {
        let response = self
            .send(self.request(Method::GET, &Self::kv_path(key)))
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let entries: Vec<RawKeyEntry> = response.json().await?;
                entries.into_iter().next().map(RawKeyEntry::decode).transpose()
            }
            _ => Err(Self::reject(response, None).await),
        }
    }
}
