//! Authentication and authorization error types

use std::fmt;

/// Errors returned by [`AccessControl`](super::AccessControl)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Identity does not match the allowed pattern
    Syntax,
    /// Credential rejected, or the resolved access grants nothing
    NotAuthorized,
    /// Credential is not of the form `<server>.<key>`
    InvalidCredential(&'static str),
    /// Credential names an account server that is not configured
    UnknownServer(String),
    /// Account server could not be reached
    Network(String),
    /// Account server answered with something that could not be decoded
    Protocol(String),
    /// Session may not subscribe to or use this topic
    TopicNotAuthorized(String),
}

impl AuthError {
    /// Short label used for the denial metric
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::Syntax => "syntax",
            AuthError::NotAuthorized => "not_authorized",
            AuthError::InvalidCredential(_) => "invalid_credential",
            AuthError::UnknownServer(_) => "unknown_server",
            AuthError::Network(_) => "network",
            AuthError::Protocol(_) => "protocol",
            AuthError::TopicNotAuthorized(_) => "topic_not_authorized",
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::Syntax => write!(f, "invalid identity"),
            AuthError::NotAuthorized => write!(f, "not authorized"),
            AuthError::InvalidCredential(msg) => write!(f, "invalid access key: {}", msg),
            AuthError::UnknownServer(alias) => write!(f, "account server {} not found", alias),
            AuthError::Network(msg) => write!(f, "account server unreachable: {}", msg),
            AuthError::Protocol(msg) => write!(f, "invalid account server response: {}", msg),
            AuthError::TopicNotAuthorized(topic) => {
                write!(f, "not authorized on topic {}", topic)
            }
        }
    }
}

impl std::error::Error for AuthError {}

/// Auth result type
pub type AuthResult<T> = Result<T, AuthError>;
