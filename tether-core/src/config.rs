//! Configuration for the Consul client and for session behavior.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Longest session TTL Consul accepts.
pub const MAX_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// What the backend does with keys locked by a session when the session is
/// invalidated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBehavior {
    /// Locks are released, keys are kept.
    #[default]
    Release,
    /// Locked keys are deleted.
    Delete,
}

impl std::fmt::Display for SessionBehavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Release => write!(f, "release"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Configuration for talking to a Consul agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsulConfig {
    /// Agent address as `host:port`.
    #[serde(default = "default_address")]
    pub address: String,

    /// URL scheme, `http` or `https`.
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// Datacenter to target, agent default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacenter: Option<String>,

    /// ACL token sent as `X-Consul-Token`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Per-request timeout.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Behavior attached to sessions created through this client.
    #[serde(default)]
    pub behavior: SessionBehavior,

    /// Lock delay attached to sessions created through this client.
    ///
    /// Zero lets another session take a lock as soon as its holder is gone.
    #[serde(default = "default_lock_delay", with = "humantime_serde")]
    pub lock_delay: Duration,
}

fn default_address() -> String {
    "127.0.0.1:8500".to_string()
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_lock_delay() -> Duration {
    Duration::ZERO
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            scheme: default_scheme(),
            datacenter: None,
            token: None,
            request_timeout: default_request_timeout(),
            behavior: SessionBehavior::default(),
            lock_delay: default_lock_delay(),
        }
    }
}

impl ConsulConfig {
    /// Set the agent address.
    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Set the URL scheme.
    #[must_use]
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Set the datacenter.
    #[must_use]
    pub fn with_datacenter(mut self, datacenter: impl Into<String>) -> Self {
        self.datacenter = Some(datacenter.into());
        self
    }

    /// Set the ACL token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the per-request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Base URL of the agent's HTTP API, without trailing slash.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.scheme, self.address.trim_end_matches('/'))
    }
}

/// Timing knobs for a [`Session`](crate::Session).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Lease TTL used when the caller does not pick one.
    #[serde(default = "default_ttl", with = "humantime_serde")]
    pub ttl: Duration,

    /// Interval between creation attempts while the backend is unreachable.
    #[serde(default = "default_retry_interval", with = "humantime_serde")]
    pub retry_interval: Duration,

    /// Interval between renewals. Half the TTL when unset.
    #[serde(
        default,
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub renew_interval: Option<Duration>,
}

fn default_ttl() -> Duration {
    Duration::from_secs(20)
}

fn default_retry_interval() -> Duration {
    Duration::from_secs(1)
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: default_ttl(),
            retry_interval: default_retry_interval(),
            renew_interval: None,
        }
    }
}

impl SessionConfig {
    /// Set the default TTL.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the creation retry interval.
    #[must_use]
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Set an explicit renewal interval.
    #[must_use]
    pub fn with_renew_interval(mut self, interval: Duration) -> Self {
        self.renew_interval = Some(interval);
        self
    }

    /// Renewal interval for a lease with the given TTL.
    #[must_use]
    pub fn renew_interval_for(&self, ttl: Duration) -> Duration {
        self.renew_interval.unwrap_or(ttl / 2)
    }
}

/// Top-level configuration as stored in `tether.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TetherConfig {
    #[serde(default)]
    pub consul: ConsulConfig,

    #[serde(default)]
    pub session: SessionConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consul_config_default_values() {
        let config = ConsulConfig::default();

        assert_eq!(config.address, "127.0.0.1:8500");
        assert_eq!(config.scheme, "http");
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.behavior, SessionBehavior::Release);
        assert_eq!(config.lock_delay, Duration::ZERO);
        assert!(config.datacenter.is_none());
        assert!(config.token.is_none());
    }

    #[test]
    fn consul_config_builder_pattern() {
        let config = ConsulConfig::default()
            .with_address("10.0.0.5:8501")
            .with_scheme("https")
            .with_datacenter("dc2")
            .with_token("secret");

        assert_eq!(config.base_url(), "https://10.0.0.5:8501");
        assert_eq!(config.datacenter.as_deref(), Some("dc2"));
        assert_eq!(config.token.as_deref(), Some("secret"));
    }

    #[test]
    fn renew_interval_defaults_to_half_ttl() {
        let config = SessionConfig::default();
        assert_eq!(
            config.renew_interval_for(Duration::from_secs(20)),
            Duration::from_secs(10)
        );

        let config = config.with_renew_interval(Duration::from_secs(3));
        assert_eq!(
            config.renew_interval_for(Duration::from_secs(20)),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn tether_config_parses_partial_toml() {
        let raw = r#"
            [consul]
            address = "consul.service:8500"
            behavior = "delete"
            lock_delay = "5s"

            [session]
            ttl = "30s"
            renew_interval = "5s"
        "#;

        let config: TetherConfig = toml::from_str(raw).unwrap();

        assert_eq!(config.consul.address, "consul.service:8500");
        assert_eq!(config.consul.scheme, "http");
        assert_eq!(config.consul.behavior, SessionBehavior::Delete);
        assert_eq!(config.consul.lock_delay, Duration::from_secs(5));
        assert_eq!(config.session.ttl, Duration::from_secs(30));
        assert_eq!(config.session.retry_interval, Duration::from_secs(1));
        assert_eq!(config.session.renew_interval, Some(Duration::from_secs(5)));
    }
}
