//! GatewayMQ - authorization, retention and fan-out core of an MQTT broker
//!
//! Gateways and application handlers connect with credentials that are
//! checked against remote account servers. The resulting access decides
//! which topics a session may subscribe to, read and write. Retained
//! messages are kept per topic, and every publish is fanned out to all live
//! sessions by a bounded worker pool.

pub mod auth;
pub mod broker;
pub mod config;
pub mod metrics;
pub mod protocol;
pub mod retained;
pub mod session;
pub mod topic;

pub use auth::{Access, AccessControl, AuthError, ConnectInfo};
pub use broker::BrokerContext;
pub use config::Config;
pub use metrics::Metrics;
pub use protocol::{Publish, QoS};
pub use retained::RetainedStore;
pub use session::{SessionHandle, SessionRegistry};
