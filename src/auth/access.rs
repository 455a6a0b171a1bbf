//! Per-session access descriptors

use serde::{Deserialize, Serialize};

use super::error::{AuthError, AuthResult};
use crate::protocol::QoS;
use crate::topic::{self, TopicPattern, PART_WILDCARD, WILDCARD};

/// Application right granting uplink and event reads
pub const RIGHT_MESSAGES_UP_READ: &str = "messages:up:r";
/// Application right granting downlink writes
pub const RIGHT_MESSAGES_DOWN_WRITE: &str = "messages:down:w";

/// Access information attached to an authenticated session
///
/// An access with no read and no write patterns grants nothing and must be
/// denied at connect time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Access {
    /// Root bypasses every pattern check
    pub root: bool,
    /// Namespace that wildcard subscriptions are rewritten into
    pub read_prefix: String,
    /// Patterns this session may read from
    pub read: Vec<TopicPattern>,
    /// Patterns this session may write to
    pub write: Vec<TopicPattern>,
}

fn pattern(parts: &[&str]) -> TopicPattern {
    TopicPattern::from_parts(parts.iter().copied())
}

impl Access {
    /// Access for a router: reads gateway traffic, writes downlinks
    pub fn router() -> Self {
        Self {
            read: vec![
                pattern(&["connect"]),
                pattern(&["disconnect"]),
                pattern(&[PART_WILDCARD, "up"]),
                pattern(&[PART_WILDCARD, "status"]),
            ],
            write: vec![pattern(&[PART_WILDCARD, "down"])],
            ..Default::default()
        }
    }

    /// Access for a handler: reads device downlinks, writes uplinks and events
    pub fn handler() -> Self {
        Self {
            read: vec![pattern(&[PART_WILDCARD, "devices", PART_WILDCARD, "down"])],
            write: vec![
                pattern(&[PART_WILDCARD, "devices", PART_WILDCARD, "up"]),
                pattern(&[PART_WILDCARD, "devices", PART_WILDCARD, "up", WILDCARD]),
                pattern(&[PART_WILDCARD, "devices", PART_WILDCARD, "events"]),
                pattern(&[PART_WILDCARD, "devices", PART_WILDCARD, "events", WILDCARD]),
                pattern(&[PART_WILDCARD, "events"]),
                pattern(&[PART_WILDCARD, "events", WILDCARD]),
            ],
            ..Default::default()
        }
    }

    /// Root access
    pub fn root() -> Self {
        Self {
            root: true,
            ..Default::default()
        }
    }

    /// Returns true if there is no access
    pub fn is_empty(&self) -> bool {
        self.read.is_empty() && self.write.is_empty()
    }

    /// Translate the rights an application holds into topic patterns
    ///
    /// Unknown rights are ignored.
    pub fn grant_application_rights<S: AsRef<str>>(&mut self, id: &str, rights: &[S]) {
        for right in rights {
            match right.as_ref() {
                RIGHT_MESSAGES_UP_READ => {
                    self.read.extend([
                        pattern(&[id, "devices", PART_WILDCARD, "up"]),
                        pattern(&[id, "devices", PART_WILDCARD, "up", WILDCARD]),
                        pattern(&[id, "devices", PART_WILDCARD, "events"]),
                        pattern(&[id, "devices", PART_WILDCARD, "events", WILDCARD]),
                        pattern(&[id, "events"]),
                        pattern(&[id, "events", WILDCARD]),
                    ]);
                }
                RIGHT_MESSAGES_DOWN_WRITE => {
                    self.write
                        .push(pattern(&[id, "devices", PART_WILDCARD, "down"]));
                }
                _ => {}
            }
        }
    }

    /// Grant the fixed gateway bundle if the gateway holds any right
    pub fn grant_gateway_rights<S: AsRef<str>>(&mut self, id: &str, rights: &[S]) {
        if rights.is_empty() {
            return;
        }
        self.write.push(pattern(&[id, "up"]));
        self.read.push(pattern(&[id, "down"]));
        self.write.push(pattern(&[id, "status"]));
        self.write.push(pattern(&["connect"]));
        self.write.push(pattern(&["disconnect"]));
    }

    /// Rewrite a requested subscription into this session's namespace
    ///
    /// A client requesting `#` is rewritten to `<read_prefix>/#`, a leading
    /// `+` is replaced by the read prefix, and any other first level must
    /// already equal the read prefix. The QoS is passed through unchanged.
    pub fn subscribe(&self, requested: &str, qos: QoS) -> AuthResult<(String, QoS)> {
        if self.root || self.read_prefix.is_empty() {
            return Ok((requested.to_string(), qos));
        }

        let mut parts = topic::split(requested);
        let first = parts.first().copied();
        match first {
            Some(WILDCARD) => Ok((format!("{}/{}", self.read_prefix, WILDCARD), qos)),
            Some(PART_WILDCARD) => {
                parts[0] = self.read_prefix.as_str();
                Ok((topic::join(&parts), qos))
            }
            Some(first) if first == self.read_prefix => Ok((requested.to_string(), qos)),
            _ => Err(AuthError::TopicNotAuthorized(requested.to_string())),
        }
    }

    /// Returns true iff the session can read from the topic
    pub fn can_read<S: AsRef<str>>(&self, parts: &[S]) -> bool {
        if topic::is_internal(parts) {
            // Internal topics are only readable by root
            return self.root;
        }
        if self.root {
            return true;
        }
        self.read.iter().any(|allowed| allowed.matches(parts))
    }

    /// Returns true iff the session can write to the topic
    pub fn can_write<S: AsRef<str>>(&self, parts: &[S]) -> bool {
        if topic::is_internal(parts) {
            // Only the server itself writes internal topics
            return false;
        }
        if self.root {
            return true;
        }
        self.write.iter().any(|allowed| allowed.matches(parts))
    }

    /// [`can_read`](Self::can_read) on an unsplit topic
    pub fn can_read_topic(&self, topic: &str) -> bool {
        self.can_read(&topic::split(topic))
    }

    /// [`can_write`](Self::can_write) on an unsplit topic
    pub fn can_write_topic(&self, topic: &str) -> bool {
        self.can_write(&topic::split(topic))
    }
}
