//! Auth module tests

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use super::*;
use crate::topic::TopicPattern;

#[derive(Default)]
struct MockBackend {
    gateway_rights: Mutex<Vec<String>>,
    application_rights: Mutex<Vec<String>>,
    failure: Mutex<Option<AuthError>>,
    calls: AtomicUsize,
}

impl MockBackend {
    fn with_gateway_rights(rights: &[&str]) -> Arc<Self> {
        let backend = Self::default();
        *backend.gateway_rights.lock() = rights.iter().map(|r| r.to_string()).collect();
        Arc::new(backend)
    }

    fn with_application_rights(rights: &[&str]) -> Arc<Self> {
        let backend = Self::default();
        *backend.application_rights.lock() = rights.iter().map(|r| r.to_string()).collect();
        Arc::new(backend)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RightsBackend for MockBackend {
    fn validate_credential(&self, credential: &str) -> AuthResult<()> {
        let (alias, _) = split_credential(credential)?;
        if alias == "ttn" {
            Ok(())
        } else {
            Err(AuthError::UnknownServer(alias.to_string()))
        }
    }

    async fn fetch_rights(
        &self,
        entity: Entity,
        _id: &str,
        _credential: &str,
    ) -> AuthResult<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failure.lock().clone() {
            return Err(err);
        }
        Ok(match entity {
            Entity::Gateway => self.gateway_rights.lock().clone(),
            Entity::Application => self.application_rights.lock().clone(),
        })
    }
}

fn gateway_control(backend: Arc<MockBackend>) -> AccessControl {
    AccessControl::new(backend).authenticate_gateways()
}

fn patterns(list: &[&str]) -> Vec<TopicPattern> {
    list.iter().map(|p| p.parse().unwrap()).collect()
}

fn connected(access: Access) -> ConnectInfo {
    let mut info = ConnectInfo::new("gw1", "ttn.key", "127.0.0.1:50000");
    info.access = Some(access);
    info
}

fn prefixed(prefix: &str) -> Access {
    Access {
        read_prefix: prefix.to_string(),
        read: patterns(&["gw1/down"]),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_gateway_connect_grants_gateway_bundle() {
    let backend = MockBackend::with_gateway_rights(&["gateway:settings"]);
    let control = gateway_control(backend.clone());

    let mut info = ConnectInfo::new("gw1", "ttn.key", "127.0.0.1:50000");
    control.connect(&mut info).await.unwrap();

    let access = info.access.clone().unwrap();
    assert_eq!(access.read_prefix, "gw1");
    assert_eq!(access.read, patterns(&["gw1/down"]));
    assert_eq!(
        access.write,
        patterns(&["gw1/up", "gw1/status", "connect", "disconnect"])
    );
    assert_eq!(backend.calls(), 1);

    assert!(control.can_write(&info, &["gw1", "up"]));
    assert!(!control.can_write(&info, &["gw2", "up"]));
    assert!(control.can_read(&info, &["gw1", "down"]));
    assert!(!control.can_read(&info, &["gw1", "up"]));
}

#[tokio::test]
async fn test_application_connect_translates_rights() {
    let backend = MockBackend::with_application_rights(&[
        RIGHT_MESSAGES_UP_READ,
        RIGHT_MESSAGES_DOWN_WRITE,
        "settings",
    ]);
    let control = AccessControl::new(backend.clone()).authenticate_applications();

    let mut info = ConnectInfo::new("app-1", "ttn.key", "127.0.0.1:50000");
    control.connect(&mut info).await.unwrap();

    let access = info.access.as_ref().unwrap();
    assert_eq!(
        access.read,
        patterns(&[
            "app-1/devices/+/up",
            "app-1/devices/+/up/#",
            "app-1/devices/+/events",
            "app-1/devices/+/events/#",
            "app-1/events",
            "app-1/events/#",
        ])
    );
    assert_eq!(access.write, patterns(&["app-1/devices/+/down"]));

    assert!(access.can_read_topic("app-1/devices/dev1/up"));
    assert!(access.can_read_topic("app-1/devices/dev1/events/activations"));
    assert!(!access.can_read_topic("app-2/devices/dev1/up"));
    assert!(access.can_write_topic("app-1/devices/dev1/down"));
    assert!(!access.can_write_topic("app-1/devices/dev1/up"));
}

#[tokio::test]
async fn test_connect_uses_cache() {
    let backend = MockBackend::with_gateway_rights(&["gateway:settings"]);
    let control = gateway_control(backend.clone());

    let mut first = ConnectInfo::new("gw1", "ttn.key", "127.0.0.1:50000");
    let mut second = ConnectInfo::new("gw1", "ttn.key", "127.0.0.1:50001");
    control.connect(&mut first).await.unwrap();
    control.connect(&mut second).await.unwrap();

    assert_eq!(first.access, second.access);
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_rotated_credential_is_looked_up_again() {
    let backend = MockBackend::with_gateway_rights(&["gateway:settings"]);
    let control = gateway_control(backend.clone());

    let mut old = ConnectInfo::new("gw1", "ttn.old", "127.0.0.1:50000");
    let mut new = ConnectInfo::new("gw1", "ttn.new", "127.0.0.1:50000");
    control.connect(&mut old).await.unwrap();
    control.connect(&mut new).await.unwrap();

    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn test_cache_expiry_requeries() {
    let backend = MockBackend::with_gateway_rights(&["gateway:settings"]);
    let control = gateway_control(backend.clone()).with_cache_ttl(Duration::from_millis(20));

    let mut info = ConnectInfo::new("gw1", "ttn.key", "127.0.0.1:50000");
    control.connect(&mut info).await.unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;
    control.connect(&mut info).await.unwrap();

    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn test_empty_rights_denied_and_cached() {
    let backend = MockBackend::with_gateway_rights(&[]);
    let control = gateway_control(backend.clone());

    let mut info = ConnectInfo::new("gw1", "ttn.key", "127.0.0.1:50000");
    assert_eq!(
        control.connect(&mut info).await,
        Err(AuthError::NotAuthorized)
    );
    assert!(info.access.is_none());
    assert_eq!(
        control.connect(&mut info).await,
        Err(AuthError::NotAuthorized)
    );

    assert_eq!(backend.calls(), 1);
    assert_eq!(
        control.cache().get("gw1", b"ttn.key"),
        Some(Access {
            read_prefix: "gw1".to_string(),
            ..Default::default()
        })
    );
}

#[tokio::test]
async fn test_network_error_denied_and_not_cached() {
    let backend = MockBackend::with_gateway_rights(&["gateway:settings"]);
    *backend.failure.lock() = Some(AuthError::Network("connection refused".to_string()));
    let control = gateway_control(backend.clone());

    let mut info = ConnectInfo::new("gw1", "ttn.key", "127.0.0.1:50000");
    assert!(matches!(
        control.connect(&mut info).await,
        Err(AuthError::Network(_))
    ));
    assert!(control.cache().is_empty());

    // The account server recovers: the next attempt looks up again
    *backend.failure.lock() = None;
    control.connect(&mut info).await.unwrap();
    assert!(info.access.is_some());
    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn test_protocol_error_fails_closed() {
    let backend = MockBackend::with_gateway_rights(&["gateway:settings"]);
    *backend.failure.lock() = Some(AuthError::Protocol("expected array".to_string()));
    let control = gateway_control(backend.clone());

    let mut info = ConnectInfo::new("gw1", "ttn.key", "127.0.0.1:50000");
    assert!(matches!(
        control.connect(&mut info).await,
        Err(AuthError::Protocol(_))
    ));
    assert!(info.access.is_none());
}

#[tokio::test]
async fn test_invalid_identity_never_reaches_backend() {
    let backend = MockBackend::with_gateway_rights(&["gateway:settings"]);
    let control = gateway_control(backend.clone());

    let too_long = "a".repeat(40);
    for username in ["", "a", "GW1", "gw1/../admin", "gw__1", "-gw1", too_long.as_str()] {
        let mut info = ConnectInfo::new(username, "ttn.key", "127.0.0.1:50000");
        assert_eq!(control.connect(&mut info).await, Err(AuthError::Syntax));
    }
    assert_eq!(backend.calls(), 0);
    assert!(control.cache().is_empty());
}

#[tokio::test]
async fn test_invalid_credential_denied_without_lookup() {
    let backend = MockBackend::with_gateway_rights(&["gateway:settings"]);
    let control = gateway_control(backend.clone());

    let mut info = ConnectInfo::new("gw1", "nodot", "127.0.0.1:50000");
    assert!(matches!(
        control.connect(&mut info).await,
        Err(AuthError::InvalidCredential(_))
    ));

    let mut info = ConnectInfo::new("gw1", "other.key", "127.0.0.1:50000");
    assert_eq!(
        control.connect(&mut info).await,
        Err(AuthError::UnknownServer("other".to_string()))
    );

    let mut info = ConnectInfo::new("gw1", vec![0xff, b'.', 0xfe], "127.0.0.1:50000");
    assert!(matches!(
        control.connect(&mut info).await,
        Err(AuthError::InvalidCredential(_))
    ));

    assert_eq!(backend.calls(), 0);
    assert!(control.cache().is_empty());
}

#[tokio::test]
async fn test_superuser_bypasses_backend() {
    let backend = MockBackend::with_gateway_rights(&[]);
    let mut control = gateway_control(backend.clone());
    control.add_superuser("router", "router-secret", Access::router());

    let mut info = ConnectInfo::new("router", "router-secret", "10.0.0.1:40000");
    control.connect(&mut info).await.unwrap();

    assert_eq!(info.access, Some(Access::router()));
    assert_eq!(backend.calls(), 0);
    assert!(control.cache().is_empty());
}

#[tokio::test]
async fn test_root_superuser_with_no_patterns_is_accepted() {
    let backend = MockBackend::with_gateway_rights(&[]);
    let mut control = gateway_control(backend);
    control.add_superuser("admin", "secret", Access::root());

    let mut info = ConnectInfo::new("admin", "secret", "10.0.0.1:40000");
    control.connect(&mut info).await.unwrap();
    assert!(info.access.as_ref().unwrap().root);
}

#[tokio::test]
async fn test_superuser_wrong_password_denied() {
    let backend = MockBackend::with_gateway_rights(&["gateway:settings"]);
    let mut control = gateway_control(backend.clone());
    control.add_superuser("router", "router-secret", Access::router());

    // Same length with a matching prefix, shorter, longer and empty
    for password in ["router-secreX", "router", "router-secret-2", ""] {
        let mut info = ConnectInfo::new("router", password, "10.0.0.1:40000");
        assert_eq!(control.connect(&mut info).await, Err(AuthError::NotAuthorized));
        assert!(info.access.is_none());
    }
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_penalty_applied_on_deny() {
    let backend = MockBackend::with_gateway_rights(&[]);
    let control = gateway_control(backend).with_penalty(Duration::from_millis(50));

    let started = Instant::now();
    let mut info = ConnectInfo::new("gw1", "ttn.key", "127.0.0.1:50000");
    assert!(control.connect(&mut info).await.is_err());
    assert!(started.elapsed() >= Duration::from_millis(50));

    let started = Instant::now();
    let mut info = ConnectInfo::new("GW1", "ttn.key", "127.0.0.1:50000");
    assert_eq!(control.connect(&mut info).await, Err(AuthError::Syntax));
    assert!(started.elapsed() >= Duration::from_millis(50));
}

#[tokio::test]
async fn test_penalty_applied_on_network_error() {
    let backend = MockBackend::with_gateway_rights(&["gateway:settings"]);
    *backend.failure.lock() = Some(AuthError::Network("connection refused".to_string()));
    let control = gateway_control(backend).with_penalty(Duration::from_millis(50));

    let started = Instant::now();
    let mut info = ConnectInfo::new("gw1", "ttn.key", "127.0.0.1:50000");
    assert!(matches!(
        control.connect(&mut info).await,
        Err(AuthError::Network(_))
    ));
    assert!(started.elapsed() >= Duration::from_millis(50));
}

#[tokio::test]
async fn test_penalty_applied_on_superuser_wrong_password() {
    let backend = MockBackend::with_gateway_rights(&["gateway:settings"]);
    let mut control = gateway_control(backend).with_penalty(Duration::from_millis(50));
    control.add_superuser("router", "router-secret", Access::router());

    let started = Instant::now();
    let mut info = ConnectInfo::new("router", "router-secreX", "10.0.0.1:40000");
    assert_eq!(
        control.connect(&mut info).await,
        Err(AuthError::NotAuthorized)
    );
    assert!(started.elapsed() >= Duration::from_millis(50));
}

#[tokio::test]
async fn test_guessed_credentials_do_not_accumulate() {
    let backend = MockBackend::with_gateway_rights(&[]);
    let control = gateway_control(backend).with_cache_ttl(Duration::from_millis(10));

    for i in 0..200 {
        let mut info = ConnectInfo::new("gw1", format!("ttn.guess{}", i), "127.0.0.1:50000");
        assert!(control.connect(&mut info).await.is_err());
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut info = ConnectInfo::new("gw1", "ttn.guess-last", "127.0.0.1:50000");
    assert!(control.connect(&mut info).await.is_err());
    assert_eq!(control.cache().len(), 1);
}

#[tokio::test]
async fn test_no_penalty_on_success() {
    let backend = MockBackend::with_gateway_rights(&["gateway:settings"]);
    let control = gateway_control(backend).with_penalty(Duration::from_secs(5));

    let started = Instant::now();
    let mut info = ConnectInfo::new("gw1", "ttn.key", "127.0.0.1:50000");
    control.connect(&mut info).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_connect_updates_metrics() {
    let metrics = Arc::new(Metrics::new());
    let backend = MockBackend::with_gateway_rights(&["gateway:settings"]);
    let control = gateway_control(backend).with_metrics(metrics.clone());

    let mut info = ConnectInfo::new("gw1", "ttn.key", "127.0.0.1:50000");
    control.connect(&mut info).await.unwrap();
    control.connect(&mut info).await.unwrap();
    let mut bad = ConnectInfo::new("GW1", "ttn.key", "127.0.0.1:50000");
    assert!(control.connect(&mut bad).await.is_err());

    assert_eq!(metrics.connect_accepted_total.get(), 2);
    assert_eq!(metrics.auth_cache_hits_total.get(), 1);
    assert_eq!(metrics.auth_cache_misses_total.get(), 2);
    assert_eq!(
        metrics
            .connect_denied_total
            .with_label_values(&["syntax"])
            .get(),
        1
    );
    assert_eq!(
        metrics
            .account_server_requests_total
            .with_label_values(&["gateways"])
            .get(),
        1
    );
}

#[test]
fn test_empty_access_is_empty_regardless_of_prefix() {
    let access = Access {
        read_prefix: "gw1".to_string(),
        ..Default::default()
    };
    assert!(access.is_empty());
    assert!(!Access::router().is_empty());
}

#[test]
fn test_subscribe_rewrites_into_namespace() {
    let control = AccessControl::new(MockBackend::with_gateway_rights(&[]));
    let info = connected(prefixed("gw1"));

    assert_eq!(
        control.subscribe(&info, "#", QoS::AtLeastOnce).unwrap(),
        ("gw1/#".to_string(), QoS::AtLeastOnce)
    );
    assert_eq!(
        control.subscribe(&info, "+/status", QoS::AtMostOnce).unwrap(),
        ("gw1/status".to_string(), QoS::AtMostOnce)
    );
    assert_eq!(
        control.subscribe(&info, "gw1/down", QoS::ExactlyOnce).unwrap(),
        ("gw1/down".to_string(), QoS::ExactlyOnce)
    );
    assert_eq!(
        control.subscribe(&info, "other/status", QoS::AtMostOnce),
        Err(AuthError::TopicNotAuthorized("other/status".to_string()))
    );
    assert!(control.subscribe(&info, "", QoS::AtMostOnce).is_err());
}

#[test]
fn test_subscribe_passthrough_for_root_and_unprefixed() {
    let control = AccessControl::new(MockBackend::with_gateway_rights(&[]));

    let root = connected(Access::root());
    assert_eq!(
        control.subscribe(&root, "other/#", QoS::AtLeastOnce).unwrap(),
        ("other/#".to_string(), QoS::AtLeastOnce)
    );

    let router = connected(Access::router());
    assert_eq!(
        control.subscribe(&router, "+/up", QoS::AtMostOnce).unwrap(),
        ("+/up".to_string(), QoS::AtMostOnce)
    );
}

#[test]
fn test_subscribe_without_access_denied() {
    let control = AccessControl::new(MockBackend::with_gateway_rights(&[]));
    let info = ConnectInfo::new("gw1", "ttn.key", "127.0.0.1:50000");
    assert_eq!(
        control.subscribe(&info, "gw1/#", QoS::AtMostOnce),
        Err(AuthError::NotAuthorized)
    );
    assert!(!control.can_read(&info, &["gw1", "down"]));
    assert!(!control.can_write(&info, &["gw1", "up"]));
}

#[test]
fn test_internal_topics() {
    let root = Access::root();
    assert!(root.can_read_topic("$broker/stats"));
    assert!(!root.can_write_topic("$broker/stats"));
    assert!(root.can_write_topic("any/topic"));

    let everything = Access {
        read: patterns(&["#"]),
        write: patterns(&["#"]),
        ..Default::default()
    };
    assert!(!everything.can_read_topic("$broker/stats"));
    assert!(!everything.can_write_topic("$broker/stats"));
    assert!(everything.can_read_topic("gw1/up"));
}

#[test]
fn test_router_and_handler_presets() {
    let router = Access::router();
    assert!(router.can_read_topic("connect"));
    assert!(router.can_read_topic("gw1/up"));
    assert!(router.can_read_topic("gw1/status"));
    assert!(router.can_write_topic("gw1/down"));
    assert!(!router.can_write_topic("gw1/up"));

    let handler = Access::handler();
    assert!(handler.can_read_topic("app/devices/dev/down"));
    assert!(handler.can_write_topic("app/devices/dev/up"));
    assert!(handler.can_write_topic("app/devices/dev/events/activations"));
    assert!(handler.can_write_topic("app/events"));
    assert!(!handler.can_write_topic("app/devices/dev/down"));
}

#[test]
fn test_is_valid_id() {
    assert!(is_valid_id("gw1"));
    assert!(is_valid_id("my-gateway_01"));
    assert!(!is_valid_id("g"));
    assert!(!is_valid_id("my--gateway"));
    assert!(!is_valid_id("gateway-"));
    assert!(!is_valid_id(&"a".repeat(37)));
    assert!(is_valid_id(&"a".repeat(36)));
}

#[test]
fn test_connect_info_debug_redacts_password() {
    let info = ConnectInfo::new("gw1", "ttn.secret", "127.0.0.1:1").with_remote_host("gw.local");
    let debug = format!("{:?}", info);
    assert!(!debug.contains("ttn.secret"));
    assert!(debug.contains("gw.local"));
}
