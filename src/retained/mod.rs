//! Retained message store
//!
//! Holds at most one message per exact topic. A retained publish with an
//! empty payload deletes the entry instead of storing it.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::metrics::Metrics;
use crate::protocol::Publish;
use crate::topic;


/// Retained messages keyed by topic
#[derive(Default)]
pub struct RetainedStore {
    messages: DashMap<Arc<str>, Publish>,
    metrics: Option<Arc<Metrics>>,
}

impl RetainedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Store or delete the retained message for the message's topic
    ///
    /// Does nothing unless the retain flag is set. The stored copy keeps the
    /// flag; `message` itself has it cleared, since it is the copy that is
    /// delivered live.
    pub fn retain(&self, message: &mut Publish) {
        if !message.retain {
            return;
        }
        message.retain = false;

        if message.payload.is_empty() {
            if let Some((_, old)) = self.messages.remove(&message.topic) {
                debug!(topic = %message.topic, "Retained message removed");
                if let Some(metrics) = &self.metrics {
                    metrics.retained_message_removed(old.payload.len());
                }
            }
            return;
        }

        let mut stored = message.clone();
        stored.retain = true;
        stored.dup = false;
        let new_len = stored.payload.len();

        match self.messages.entry(message.topic.clone()) {
            Entry::Occupied(mut entry) => {
                let old = entry.insert(stored);
                if let Some(metrics) = &self.metrics {
                    metrics.retained_message_replaced(old.payload.len(), new_len);
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(stored);
                if let Some(metrics) = &self.metrics {
                    metrics.retained_message_stored(new_len);
                }
            }
        }
        debug!(topic = %message.topic, bytes = new_len, "Retained message stored");
    }

    /// Get every retained message whose topic matches at least one filter
    ///
    /// Each message is returned once, in no particular order.
    pub fn get<S: AsRef<str>>(&self, filters: &[S]) -> Vec<Publish> {
        if filters.is_empty() {
            return Vec::new();
        }
        self.messages
            .iter()
            .filter(|entry| {
                filters
                    .iter()
                    .any(|filter| topic::match_filter(entry.key(), filter.as_ref()))
            })
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Number of retained messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
