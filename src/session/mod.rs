//! Session registry and publish fan-out
//!
//! Sessions are owned by the connection layer; the registry only keeps weak
//! references keyed by session id. A publish is fanned out to every live
//! session through a fixed pool of worker threads fed by a bounded queue
//! whose capacity equals the worker count, so a burst of publishes blocks
//! the publisher instead of growing memory.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::metrics::Metrics;
use crate::protocol::Publish;


/// Why a session could not accept a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The session is shutting down
    Closed,
    /// The session's outbound queue is full
    QueueFull,
    /// Any other session-specific failure
    Failed(String),
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::Closed => write!(f, "session closed"),
            DeliveryError::QueueFull => write!(f, "session queue full"),
            DeliveryError::Failed(msg) => write!(f, "delivery failed: {}", msg),
        }
    }
}

impl std::error::Error for DeliveryError {}

/// A live session that can receive published messages
///
/// Implementations decide for themselves whether a message matches one of
/// their subscriptions; the registry hands every message to every session.
pub trait SessionHandle: Send + Sync {
    /// Unique session identifier
    fn id(&self) -> &str;

    /// Accept a published message for delivery
    fn deliver(&self, message: Arc<Publish>) -> Result<(), DeliveryError>;
}

struct Job {
    session: Arc<dyn SessionHandle>,
    message: Arc<Publish>,
}

/// Number of workers used when none is configured
pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Concurrent registry of live sessions
pub struct SessionRegistry {
    sessions: DashMap<Arc<str>, Weak<dyn SessionHandle>>,
    queue: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    metrics: Option<Arc<Metrics>>,
}

impl SessionRegistry {
    /// Create a registry with `workers` fan-out threads (at least one)
    pub fn new(workers: usize) -> Self {
        Self::with_metrics(workers, None)
    }

    pub fn with_metrics(workers: usize, metrics: Option<Arc<Metrics>>) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = crossbeam_channel::bounded(workers);

        let handles = (0..workers)
            .map(|id| {
                let rx = rx.clone();
                let metrics = metrics.clone();
                thread::Builder::new()
                    .name(format!("gatewaymq-fanout-{}", id))
                    .spawn(move || run_worker(id, rx, metrics))
                    .unwrap_or_else(|e| panic!("failed to spawn fan-out worker: {}", e))
            })
            .collect();

        debug!(workers, "Session registry started");

        Self {
            sessions: DashMap::new(),
            queue: Some(tx),
            workers: handles,
            metrics,
        }
    }

    /// Register a session, replacing any registration with the same id
    pub fn store(&self, session: &Arc<dyn SessionHandle>) {
        let id: Arc<str> = Arc::from(session.id());
        if self.sessions.insert(id, Arc::downgrade(session)).is_none() {
            if let Some(metrics) = &self.metrics {
                metrics.session_registered();
            }
        }
    }

    /// Remove a session
    ///
    /// Only removes the registration if it still refers to this session, so
    /// a late delete of a replaced session leaves its successor in place.
    pub fn delete(&self, session: &Arc<dyn SessionHandle>) {
        let target = Arc::downgrade(session);
        let removed = self
            .sessions
            .remove_if(session.id(), |_, registered| registered.ptr_eq(&target));
        if removed.is_some() {
            if let Some(metrics) = &self.metrics {
                metrics.session_removed();
            }
        }
    }

    /// Snapshot of the currently registered live sessions
    pub fn all(&self) -> Vec<Arc<dyn SessionHandle>> {
        let mut live = Vec::with_capacity(self.sessions.len());
        let mut dead = Vec::new();
        for entry in self.sessions.iter() {
            match entry.value().upgrade() {
                Some(session) => live.push(session),
                None => dead.push(entry.key().clone()),
            }
        }

        // Sessions dropped without an explicit delete
        for id in dead {
            let removed = self
                .sessions
                .remove_if(&id, |_, registered| registered.strong_count() == 0);
            if removed.is_some() {
                if let Some(metrics) = &self.metrics {
                    metrics.session_removed();
                }
            }
        }
        live
    }

    /// Hand a message to every registered session
    ///
    /// Returns once every delivery has been queued, blocking while all
    /// workers are busy and the queue is full.
    pub fn publish(&self, message: &Publish) {
        let Some(queue) = &self.queue else {
            return;
        };
        let message = Arc::new(message.clone());
        for session in self.all() {
            let job = Job {
                session,
                message: message.clone(),
            };
            if queue.send(job).is_err() {
                warn!(topic = %message.topic, "Fan-out queue closed, dropping publish");
                return;
            }
        }
    }

    /// Number of registered sessions, including ones not yet pruned
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of fan-out worker threads
    pub fn workers(&self) -> usize {
        self.workers.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(default_workers())
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        // Closing the queue lets workers drain what is queued, then exit
        self.queue.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("Fan-out worker exited abnormally");
            }
        }
    }
}

fn run_worker(id: usize, jobs: Receiver<Job>, metrics: Option<Arc<Metrics>>) {
    while let Ok(job) = jobs.recv() {
        let Job { session, message } = job;
        let result = panic::catch_unwind(AssertUnwindSafe(|| session.deliver(message.clone())));
        let ok = match result {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                warn!(
                    session = session.id(),
                    topic = %message.topic,
                    "Delivery failed: {}",
                    err
                );
                false
            }
            Err(_) => {
                warn!(
                    session = session.id(),
                    topic = %message.topic,
                    "Session panicked during delivery"
                );
                false
            }
        };
        if let Some(metrics) = &metrics {
            metrics.delivery(ok);
        }
    }
    debug!(worker = id, "Fan-out worker stopped");
}
