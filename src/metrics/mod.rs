//! Prometheus metrics for GatewayMQ
//!
//! Collectors are registered in a private [`Registry`]; exporting it is left
//! to the process that embeds the broker core.

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

/// All GatewayMQ metrics in one place
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // Connect metrics
    pub connect_accepted_total: IntCounter,
    pub connect_denied_total: IntCounterVec,
    pub connect_duration: Histogram,

    // Auth cache metrics
    pub auth_cache_hits_total: IntCounter,
    pub auth_cache_misses_total: IntCounter,
    pub account_server_requests_total: IntCounterVec,

    // Session metrics
    pub sessions_current: IntGauge,

    // Fan-out metrics
    pub deliveries_total: IntCounter,
    pub delivery_failures_total: IntCounter,

    // Retained messages
    pub retained_messages_current: IntGauge,
    pub retained_bytes_current: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        // Connect metrics
        let connect_accepted_total = IntCounter::with_opts(Opts::new(
            "gatewaymq_connect_accepted_total",
            "Total connect attempts that were authorized",
        ))
        .unwrap();

        let connect_denied_total = IntCounterVec::new(
            Opts::new(
                "gatewaymq_connect_denied_total",
                "Total connect attempts that were denied",
            ),
            &["reason"],
        )
        .unwrap();

        let connect_duration = Histogram::with_opts(
            HistogramOpts::new(
                "gatewaymq_connect_duration_seconds",
                "Time to authorize a connect attempt, including any penalty",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
            ]),
        )
        .unwrap();

        // Auth cache metrics
        let auth_cache_hits_total = IntCounter::with_opts(Opts::new(
            "gatewaymq_auth_cache_hits_total",
            "Connect attempts answered from the access cache",
        ))
        .unwrap();

        let auth_cache_misses_total = IntCounter::with_opts(Opts::new(
            "gatewaymq_auth_cache_misses_total",
            "Connect attempts that required an account server lookup",
        ))
        .unwrap();

        let account_server_requests_total = IntCounterVec::new(
            Opts::new(
                "gatewaymq_account_server_requests_total",
                "Rights lookups sent to account servers",
            ),
            &["entity"],
        )
        .unwrap();

        // Session metrics
        let sessions_current = IntGauge::with_opts(Opts::new(
            "gatewaymq_sessions_current",
            "Current number of registered sessions",
        ))
        .unwrap();

        // Fan-out metrics
        let deliveries_total = IntCounter::with_opts(Opts::new(
            "gatewaymq_deliveries_total",
            "Messages handed to sessions by the fan-out workers",
        ))
        .unwrap();

        let delivery_failures_total = IntCounter::with_opts(Opts::new(
            "gatewaymq_delivery_failures_total",
            "Deliveries that failed or panicked inside a session",
        ))
        .unwrap();

        // Retained messages
        let retained_messages_current = IntGauge::with_opts(Opts::new(
            "gatewaymq_retained_messages_current",
            "Current number of retained messages",
        ))
        .unwrap();

        let retained_bytes_current = IntGauge::with_opts(Opts::new(
            "gatewaymq_retained_bytes_current",
            "Current payload bytes held by retained messages",
        ))
        .unwrap();

        // Register all metrics
        registry
            .register(Box::new(connect_accepted_total.clone()))
            .unwrap();
        registry
            .register(Box::new(connect_denied_total.clone()))
            .unwrap();
        registry
            .register(Box::new(connect_duration.clone()))
            .unwrap();
        registry
            .register(Box::new(auth_cache_hits_total.clone()))
            .unwrap();
        registry
            .register(Box::new(auth_cache_misses_total.clone()))
            .unwrap();
        registry
            .register(Box::new(account_server_requests_total.clone()))
            .unwrap();
        registry
            .register(Box::new(sessions_current.clone()))
            .unwrap();
        registry
            .register(Box::new(deliveries_total.clone()))
            .unwrap();
        registry
            .register(Box::new(delivery_failures_total.clone()))
            .unwrap();
        registry
            .register(Box::new(retained_messages_current.clone()))
            .unwrap();
        registry
            .register(Box::new(retained_bytes_current.clone()))
            .unwrap();

        Self {
            registry,
            connect_accepted_total,
            connect_denied_total,
            connect_duration,
            auth_cache_hits_total,
            auth_cache_misses_total,
            account_server_requests_total,
            sessions_current,
            deliveries_total,
            delivery_failures_total,
            retained_messages_current,
            retained_bytes_current,
        }
    }

    // Connect helpers

    pub fn connect_accepted(&self) {
        self.connect_accepted_total.inc();
    }

    pub fn connect_denied(&self, reason: &str) {
        self.connect_denied_total.with_label_values(&[reason]).inc();
    }

    pub fn cache_hit(&self) {
        self.auth_cache_hits_total.inc();
    }

    pub fn cache_miss(&self) {
        self.auth_cache_misses_total.inc();
    }

    pub fn account_server_request(&self, entity: &str) {
        self.account_server_requests_total
            .with_label_values(&[entity])
            .inc();
    }

    // Session helpers

    pub fn session_registered(&self) {
        self.sessions_current.inc();
    }

    pub fn session_removed(&self) {
        self.sessions_current.dec();
    }

    pub fn delivery(&self, ok: bool) {
        self.deliveries_total.inc();
        if !ok {
            self.delivery_failures_total.inc();
        }
    }

    // Retained helpers

    pub fn retained_message_stored(&self, bytes: usize) {
        self.retained_messages_current.inc();
        self.retained_bytes_current.add(bytes as i64);
    }

    pub fn retained_message_replaced(&self, old_bytes: usize, new_bytes: usize) {
        self.retained_bytes_current
            .add(new_bytes as i64 - old_bytes as i64);
    }

    pub fn retained_message_removed(&self, bytes: usize) {
        self.retained_messages_current.dec();
        self.retained_bytes_current.sub(bytes as i64);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retained_gauges() {
        let metrics = Metrics::new();
        metrics.retained_message_stored(10);
        metrics.retained_message_stored(5);
        metrics.retained_message_replaced(5, 8);
        assert_eq!(metrics.retained_messages_current.get(), 2);
        assert_eq!(metrics.retained_bytes_current.get(), 18);

        metrics.retained_message_removed(10);
        assert_eq!(metrics.retained_messages_current.get(), 1);
        assert_eq!(metrics.retained_bytes_current.get(), 8);
    }

    #[test]
    fn test_connect_denied_by_reason() {
        let metrics = Metrics::new();
        metrics.connect_denied("syntax");
        metrics.connect_denied("syntax");
        metrics.connect_denied("network");
        assert_eq!(
            metrics
                .connect_denied_total
                .with_label_values(&["syntax"])
                .get(),
            2
        );
    }
}
