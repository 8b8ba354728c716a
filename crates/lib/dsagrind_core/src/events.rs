//! Domain events published after credential operations.
//!
//! Publishing is fire-and-forget: the session service logs sink failures
//! and carries on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

/// Event sink errors.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Serialize failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Authentication events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthEvent {
    UserRegistered {
        user_id: String,
        username: String,
        email: String,
    },
    UserLoggedIn {
        user_id: String,
        /// `password`, `google`, or `github`.
        method: String,
        ip: String,
    },
    TokenRevoked {
        user_id: String,
        ip: String,
    },
    AllTokensRevoked {
        user_id: String,
        ip: String,
    },
    EmailVerified {
        user_id: String,
    },
    PasswordResetRequested {
        user_id: String,
        ip: String,
    },
    PasswordReset {
        user_id: String,
        ip: String,
    },
    OAuthAccountLinked {
        user_id: String,
        provider: String,
    },
}

impl AuthEvent {
    /// Topic the event is published under.
    pub fn topic(&self) -> &'static str {
        match self {
            AuthEvent::UserRegistered { .. } => "user.registered",
            AuthEvent::UserLoggedIn { .. } => "user.logged_in",
            AuthEvent::TokenRevoked { .. } => "user.token_revoked",
            AuthEvent::AllTokensRevoked { .. } => "user.tokens_revoked",
            AuthEvent::EmailVerified { .. } => "user.email_verified",
            AuthEvent::PasswordResetRequested { .. } => "user.password_reset_requested",
            AuthEvent::PasswordReset { .. } => "user.password_reset",
            AuthEvent::OAuthAccountLinked { .. } => "user.oauth_linked",
        }
    }
}

/// Published envelope: event payload plus when it happened.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope<'a> {
    pub topic: &'static str,
    pub occurred_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: &'a AuthEvent,
}

impl<'a> EventEnvelope<'a> {
    pub fn new(event: &'a AuthEvent) -> Self {
        Self {
            topic: event.topic(),
            occurred_at: Utc::now(),
            event,
        }
    }
}

/// Event publishing port.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: &AuthEvent) -> Result<(), EventError>;
}

/// Sink that writes each event as a structured log line.
#[derive(Debug, Default, Clone)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn publish(&self, event: &AuthEvent) -> Result<(), EventError> {
        let payload = serde_json::to_string(&EventEnvelope::new(event))?;
        info!(topic = event.topic(), payload = %payload, "auth event");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_flattens_event_fields() {
        let event = AuthEvent::UserLoggedIn {
            user_id: "u1".into(),
            method: "github".into(),
            ip: "10.0.0.1".into(),
        };
        let json = serde_json::to_value(EventEnvelope::new(&event)).unwrap();
        assert_eq!(json["topic"], "user.logged_in");
        assert_eq!(json["type"], "user_logged_in");
        assert_eq!(json["method"], "github");
        assert!(json["occurred_at"].is_string());
    }

    #[tokio::test]
    async fn tracing_sink_accepts_every_event() {
        let sink = TracingEventSink;
        sink.publish(&AuthEvent::EmailVerified { user_id: "u1".into() })
            .await
            .unwrap();
    }
}
