//! Rights backends
//!
//! A backend validates the shape of a credential and looks up the rights an
//! entity holds. The account server backend asks a remote HTTP service:
//!
//! `GET {base}/api/v2/{gateways|applications}/{id}/rights`
//! with `Authorization: Key {credential}`.
//!
//! A 200 response carries a JSON array of right strings; every other status
//! means "no rights". Transport and decoding failures are errors.

use std::fmt;
use std::time::Duration;

use ahash::AHashMap;
use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use super::error::{AuthError, AuthResult};

/// Kind of entity whose rights are looked up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    Gateway,
    Application,
}

impl Entity {
    /// Path segment used by the account server API
    pub fn as_str(&self) -> &'static str {
        match self {
            Entity::Gateway => "gateways",
            Entity::Application => "applications",
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of rights for remotely managed identities
#[async_trait]
pub trait RightsBackend: Send + Sync {
    /// Reject credentials this backend can never accept, without any I/O
    fn validate_credential(&self, credential: &str) -> AuthResult<()>;

    /// Fetch the rights `id` holds as `entity`
    async fn fetch_rights(
        &self,
        entity: Entity,
        id: &str,
        credential: &str,
    ) -> AuthResult<Vec<String>>;
}

/// Split a `<server>.<key>` credential into the server alias and the key
pub fn split_credential(credential: &str) -> AuthResult<(&str, &str)> {
    credential
        .split_once('.')
        .ok_or(AuthError::InvalidCredential("missing server prefix"))
}

/// Rights backend that queries one of several account servers, selected by
/// the alias prefix of the credential
pub struct AccountServerBackend {
    client: reqwest::Client,
    servers: AHashMap<String, String>,
}

impl AccountServerBackend {
    /// Create a backend for the given alias -> base URL map
    pub fn new<I, K, V>(servers: I, timeout: Duration) -> Result<Self, reqwest::Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, servers))
    }

    /// Create a backend that uses an existing HTTP client
    pub fn with_client<I, K, V>(client: reqwest::Client, servers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let servers = servers
            .into_iter()
            .map(|(alias, base)| {
                let base: String = base.into();
                (alias.into(), base.trim_end_matches('/').to_string())
            })
            .collect();
        Self { client, servers }
    }

    fn server_for(&self, credential: &str) -> AuthResult<&str> {
        let (alias, _) = split_credential(credential)?;
        self.servers
            .get(alias)
            .map(String::as_str)
            .ok_or_else(|| AuthError::UnknownServer(alias.to_string()))
    }
}

#[async_trait]
impl RightsBackend for AccountServerBackend {
    fn validate_credential(&self, credential: &str) -> AuthResult<()> {
        self.server_for(credential).map(|_| ())
    }

    async fn fetch_rights(
        &self,
        entity: Entity,
        id: &str,
        credential: &str,
    ) -> AuthResult<Vec<String>> {
        let server = self.server_for(credential)?;
        let url = format!("{}/api/v2/{}/{}/rights", server, entity, id);
        debug!(%url, "Fetching rights from account server");

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, format!("Key {}", credential))
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        if response.status() != StatusCode::OK {
            debug!(status = %response.status(), "Account server granted no rights");
            return Ok(Vec::new());
        }

        response
            .json::<Vec<String>>()
            .await
            .map_err(|e| AuthError::Protocol(e.to_string()))
    }
}
