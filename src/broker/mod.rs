//! Broker context
//!
//! Owns the pieces a broker shares between connections: access control,
//! the retained message store and every session registry it created. It is
//! passed to the connection layer explicitly.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::auth::{AccessControl, AuthError, AuthResult, ConnectInfo};
use crate::config::{Config, ConfigError};
use crate::metrics::Metrics;
use crate::protocol::{Publish, QoS};
use crate::retained::RetainedStore;
use crate::session::SessionRegistry;
use crate::topic;


/// Result of an authorized subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Topic filter after rewriting into the session's namespace
    pub topic: String,
    /// Granted QoS
    pub qos: QoS,
    /// Retained messages currently matching the filter
    pub retained: Vec<Publish>,
}

/// Shared broker state
pub struct BrokerContext {
    access_control: AccessControl,
    retained: RetainedStore,
    registries: RwLock<Vec<Arc<SessionRegistry>>>,
    workers: usize,
    metrics: Option<Arc<Metrics>>,
}

impl BrokerContext {
    /// Create a context; `workers` sizes the fan-out pool of every registry
    pub fn new(access_control: AccessControl, workers: usize) -> Self {
        Self {
            access_control,
            retained: RetainedStore::new(),
            registries: RwLock::new(Vec::new()),
            workers,
            metrics: None,
        }
    }

    /// Record retained and fan-out metrics for everything this context owns
    ///
    /// Access control is built separately and takes its own metrics handle.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.retained = RetainedStore::new().with_metrics(metrics.clone());
        self.metrics = Some(metrics);
        self
    }

    /// Build the context described by the configuration
    pub fn from_config(config: &Config, metrics: Arc<Metrics>) -> Result<Self, ConfigError> {
        let access_control =
            AccessControl::from_config(&config.auth)?.with_metrics(metrics.clone());
        let workers = config.sessions.worker_count();
        info!(
            workers,
            servers = config.auth.servers.len(),
            superusers = config.auth.superusers.len(),
            "Broker context ready"
        );
        Ok(Self::new(access_control, workers).with_metrics(metrics))
    }

    pub fn access_control(&self) -> &AccessControl {
        &self.access_control
    }

    pub fn retained(&self) -> &RetainedStore {
        &self.retained
    }

    pub fn metrics(&self) -> Option<&Arc<Metrics>> {
        self.metrics.as_ref()
    }

    /// Create a session registry owned by this context
    pub fn new_registry(&self) -> Arc<SessionRegistry> {
        let registry = Arc::new(SessionRegistry::with_metrics(
            self.workers,
            self.metrics.clone(),
        ));
        let mut registries = self.registries.write();
        registries.push(registry.clone());
        debug!(registries = registries.len(), "Session registry created");
        registry
    }

    /// Stop tracking a registry
    ///
    /// Its workers exit once the last other handle to it is dropped. Returns
    /// false if the registry does not belong to this context.
    pub fn remove_registry(&self, registry: &Arc<SessionRegistry>) -> bool {
        let mut registries = self.registries.write();
        let before = registries.len();
        registries.retain(|owned| !Arc::ptr_eq(owned, registry));
        registries.len() != before
    }

    /// Snapshot of the registries created so far
    pub fn registries(&self) -> Vec<Arc<SessionRegistry>> {
        self.registries.read().clone()
    }

    /// Authenticate a connection, see [`AccessControl::connect`]
    pub async fn connect(&self, info: &mut ConnectInfo) -> AuthResult<()> {
        self.access_control.connect(info).await
    }

    /// Authorize a subscription and collect the retained messages it matches
    pub fn subscribe(
        &self,
        info: &ConnectInfo,
        requested_topic: &str,
        requested_qos: QoS,
    ) -> AuthResult<Subscription> {
        let (topic, qos) = self
            .access_control
            .subscribe(info, requested_topic, requested_qos)?;
        let retained = self.retained.get(&[topic.as_str()]);
        Ok(Subscription {
            topic,
            qos,
            retained,
        })
    }

    /// Check that the connection may write the message, then publish it
    pub fn publish_from(&self, info: &ConnectInfo, message: &mut Publish) -> AuthResult<()> {
        if !self
            .access_control
            .can_write(info, &topic::split(&message.topic))
        {
            debug!(
                username = %info.username,
                topic = %message.topic,
                "Publish rejected"
            );
            return Err(AuthError::TopicNotAuthorized(message.topic.to_string()));
        }
        self.publish(message);
        Ok(())
    }

    /// Retain the message if flagged, then fan it out to every registry
    ///
    /// The live copy always goes out with the retain flag cleared.
    pub fn publish(&self, message: &mut Publish) {
        self.retained.retain(message);
        for registry in self.registries() {
            registry.publish(message);
        }
    }
}
