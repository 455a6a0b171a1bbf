//! Authentication and authorization
//!
//! [`AccessControl`] turns connect credentials into an [`Access`] descriptor:
//! - statically configured superusers are checked first, in constant time
//! - other identities are resolved through a [`RightsBackend`] (normally the
//!   account server) and the result is cached per identity and credential
//! - every denial is delayed by the configured penalty
//!
//! After connect, the same descriptor rewrites subscriptions into the
//! session's namespace and answers per-topic read/write checks.

mod access;
mod backend;
mod cache;
mod error;

pub use access::{Access, RIGHT_MESSAGES_DOWN_WRITE, RIGHT_MESSAGES_UP_READ};
pub use backend::{split_credential, AccountServerBackend, Entity, RightsBackend};
pub use cache::{AuthCache, DEFAULT_CACHE_TTL};
pub use error::{AuthError, AuthResult};

use std::fmt;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use ahash::AHashMap;
use regex::Regex;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::config::{AuthConfig, ConfigError};
use crate::metrics::Metrics;
use crate::protocol::QoS;

#[cfg(test)]
mod tests;

/// Pattern of identities that may be looked up remotely
pub const ID_REGEX: &str = "^[0-9a-z](?:[_-]?[0-9a-z]){1,35}$";

static ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(ID_REGEX).expect("identity pattern is valid"));

/// Check whether an identity may be sent to the account server
pub fn is_valid_id(id: &str) -> bool {
    ID_PATTERN.is_match(id)
}

/// Connection details handed over by the transport layer
///
/// `access` is filled in by [`AccessControl::connect`] and read by every
/// later authorization check on this connection.
#[derive(Clone, Default)]
pub struct ConnectInfo {
    pub username: String,
    pub password: Vec<u8>,
    pub remote_addr: String,
    pub remote_host: Option<String>,
    pub access: Option<Access>,
}

impl ConnectInfo {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<Vec<u8>>,
        remote_addr: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            remote_addr: remote_addr.into(),
            ..Default::default()
        }
    }

    pub fn with_remote_host(mut self, host: impl Into<String>) -> Self {
        self.remote_host = Some(host.into());
        self
    }
}

impl fmt::Debug for ConnectInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectInfo")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("remote_addr", &self.remote_addr)
            .field("remote_host", &self.remote_host)
            .field("access", &self.access)
            .finish()
    }
}

struct SuperUser {
    password: Vec<u8>,
    access: Access,
}

/// Access control backed by superusers and a rights backend
pub struct AccessControl {
    backend: Arc<dyn RightsBackend>,
    cache: AuthCache,
    superusers: AHashMap<String, SuperUser>,
    penalty: Duration,
    gateways: bool,
    applications: bool,
    metrics: Option<Arc<Metrics>>,
}

impl AccessControl {
    /// Create access control with default cache TTL, no penalty and both
    /// gateway and application lookups disabled
    pub fn new(backend: Arc<dyn RightsBackend>) -> Self {
        Self {
            backend,
            cache: AuthCache::default(),
            superusers: AHashMap::new(),
            penalty: Duration::ZERO,
            gateways: false,
            applications: false,
            metrics: None,
        }
    }

    /// Create access control from configuration, querying the configured
    /// account servers
    pub fn from_config(config: &AuthConfig) -> Result<Self, ConfigError> {
        let backend = AccountServerBackend::new(config.servers.clone(), config.request_timeout)
            .map_err(|e| ConfigError::Validation(format!("account server client: {}", e)))?;

        let mut access_control = Self::new(Arc::new(backend))
            .with_cache_ttl(config.cache_ttl)
            .with_penalty(config.penalty);
        if config.gateways {
            access_control = access_control.authenticate_gateways();
        }
        if config.applications {
            access_control = access_control.authenticate_applications();
        }
        for user in &config.superusers {
            access_control.add_superuser(&user.username, user.password.as_bytes(), user.access());
        }
        Ok(access_control)
    }

    /// Set the cache expiration time
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache = AuthCache::new(ttl);
        self
    }

    /// Set the time penalty for a failed login
    pub fn with_penalty(mut self, penalty: Duration) -> Self {
        self.penalty = penalty;
        self
    }

    /// Enable rights lookups for gateways
    pub fn authenticate_gateways(mut self) -> Self {
        self.gateways = true;
        self
    }

    /// Enable rights lookups for applications
    pub fn authenticate_applications(mut self) -> Self {
        self.applications = true;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Add a superuser that bypasses the cache and the rights backend
    pub fn add_superuser(
        &mut self,
        username: impl Into<String>,
        password: impl Into<Vec<u8>>,
        access: Access,
    ) {
        self.superusers.insert(
            username.into(),
            SuperUser {
                password: password.into(),
                access,
            },
        );
    }

    pub fn cache(&self) -> &AuthCache {
        &self.cache
    }

    /// Authenticate a connection and attach its access
    ///
    /// On success `info.access` is set. On any denial `info.access` is
    /// cleared and the call is delayed by the configured penalty before the
    /// error is returned.
    pub async fn connect(&self, info: &mut ConnectInfo) -> AuthResult<()> {
        let started = Instant::now();

        let result = match self.authenticate(info).await {
            Ok(access) => {
                if let Some(metrics) = &self.metrics {
                    metrics.connect_accepted();
                }
                info.access = Some(access);
                Ok(())
            }
            Err(err) => {
                warn!(
                    username = %info.username,
                    remote_addr = %info.remote_addr,
                    remote_host = info.remote_host.as_deref().unwrap_or(""),
                    reason = err.reason(),
                    "Connect denied: {}",
                    err
                );
                if let Some(metrics) = &self.metrics {
                    metrics.connect_denied(err.reason());
                }
                info.access = None;
                if !self.penalty.is_zero() {
                    tokio::time::sleep(self.penalty).await;
                }
                Err(err)
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics
                .connect_duration
                .observe(started.elapsed().as_secs_f64());
        }
        result
    }

    async fn authenticate(&self, info: &ConnectInfo) -> AuthResult<Access> {
        if let Some(superuser) = self.superusers.get(&info.username) {
            if !bool::from(info.password.as_slice().ct_eq(superuser.password.as_slice())) {
                return Err(AuthError::NotAuthorized);
            }
            debug!(username = %info.username, "Authenticated superuser");
            return Ok(superuser.access.clone());
        }

        let access = match self.cache.get(&info.username, &info.password) {
            Some(access) => {
                debug!(
                    username = %info.username,
                    remote_addr = %info.remote_addr,
                    "Using auth result from cache"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.cache_hit();
                }
                access
            }
            None => {
                if let Some(metrics) = &self.metrics {
                    metrics.cache_miss();
                }
                let access = self.lookup(&info.username, &info.password).await?;
                self.cache
                    .set(&info.username, &info.password, access.clone());
                access
            }
        };

        if access.is_empty() {
            return Err(AuthError::NotAuthorized);
        }
        Ok(access)
    }

    async fn lookup(&self, username: &str, password: &[u8]) -> AuthResult<Access> {
        if !is_valid_id(username) {
            return Err(AuthError::Syntax);
        }
        let key = std::str::from_utf8(password)
            .map_err(|_| AuthError::InvalidCredential("not valid UTF-8"))?;
        self.backend.validate_credential(key)?;

        let mut access = Access {
            read_prefix: username.to_string(),
            ..Default::default()
        };

        debug!(username, "Authenticating using account server");

        if self.applications {
            let rights = self.fetch_rights(Entity::Application, username, key).await?;
            access.grant_application_rights(username, &rights);
        }

        if self.gateways {
            let rights = self.fetch_rights(Entity::Gateway, username, key).await?;
            access.grant_gateway_rights(username, &rights);
        }

        Ok(access)
    }

    async fn fetch_rights(&self, entity: Entity, id: &str, key: &str) -> AuthResult<Vec<String>> {
        if let Some(metrics) = &self.metrics {
            metrics.account_server_request(entity.as_str());
        }
        self.backend.fetch_rights(entity, id, key).await
    }

    /// Rewrite or reject a subscription request
    ///
    /// A connection without attached access is never authorized.
    pub fn subscribe(
        &self,
        info: &ConnectInfo,
        requested_topic: &str,
        requested_qos: QoS,
    ) -> AuthResult<(String, QoS)> {
        let access = info.access.as_ref().ok_or(AuthError::NotAuthorized)?;
        let accepted = access.subscribe(requested_topic, requested_qos);
        if accepted.is_err() {
            debug!(
                username = %info.username,
                topic = requested_topic,
                "Subscription rejected"
            );
        }
        accepted
    }

    /// Returns true iff the connection can read from the topic levels
    pub fn can_read<S: AsRef<str>>(&self, info: &ConnectInfo, topic: &[S]) -> bool {
        info.access
            .as_ref()
            .is_some_and(|access| access.can_read(topic))
    }

    /// Returns true iff the connection can write to the topic levels
    pub fn can_write<S: AsRef<str>>(&self, info: &ConnectInfo, topic: &[S]) -> bool {
        info.access
            .as_ref()
            .is_some_and(|access| access.can_write(topic))
    }
}
