//! Outbound email: templates and the sender port.

pub mod brevo;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

pub use brevo::BrevoEmailSender;

/// Email errors.
#[derive(Debug, Error)]
pub enum EmailError {
    #[error("Email send failed: {0}")]
    SendFailed(String),

    #[error("Email provider not configured: {0}")]
    NotConfigured(String),
}

/// Transactional messages the session service sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmailTemplate {
    Verification { username: String, link: String },
    PasswordReset { username: String, link: String },
    Welcome { username: String },
}

/// A rendered message ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

impl EmailTemplate {
    /// Render into a message for `to`.
    pub fn render(&self, to: &str) -> EmailMessage {
        let (subject, text, html) = match self {
            EmailTemplate::Verification { username, link } => (
                "Verify your DSAGrind email".to_string(),
                format!(
                    "Hi {username},\n\nConfirm your email address by opening:\n{link}\n"
                ),
                format!(
                    "<p>Hi {username},</p><p>Confirm your email address:</p>\
                     <p><a href=\"{link}\">Verify email</a></p>"
                ),
            ),
            EmailTemplate::PasswordReset { username, link } => (
                "Reset your DSAGrind password".to_string(),
                format!(
                    "Hi {username},\n\nReset your password within the next hour:\n{link}\n\n\
                     If you did not ask for this, ignore this email.\n"
                ),
                format!(
                    "<p>Hi {username},</p><p>Reset your password within the next hour:</p>\
                     <p><a href=\"{link}\">Reset password</a></p>\
                     <p>If you did not ask for this, ignore this email.</p>"
                ),
            ),
            EmailTemplate::Welcome { username } => (
                "Welcome to DSAGrind".to_string(),
                format!("Hi {username},\n\nYour email is verified. Happy grinding!\n"),
                format!("<p>Hi {username},</p><p>Your email is verified. Happy grinding!</p>"),
            ),
        };
        EmailMessage {
            to: to.to_string(),
            subject,
            text,
            html,
        }
    }
}

/// Email delivery port.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, to: &str, template: EmailTemplate) -> Result<(), EmailError>;
}

/// Development sender: logs the message instead of delivering it.
#[derive(Debug, Default, Clone)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, to: &str, template: EmailTemplate) -> Result<(), EmailError> {
        let message = template.render(to);
        info!(to = %message.to, subject = %message.subject, body = %message.text, "email (not delivered)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_contains_link() {
        let msg = EmailTemplate::Verification {
            username: "bob".into(),
            link: "http://app/verify?token=abc".into(),
        }
        .render("bob@x.com");
        assert_eq!(msg.to, "bob@x.com");
        assert!(msg.subject.contains("Verify"));
        assert!(msg.text.contains("http://app/verify?token=abc"));
        assert!(msg.html.contains("href=\"http://app/verify?token=abc\""));
    }

    #[test]
    fn reset_mentions_expiry() {
        let msg = EmailTemplate::PasswordReset {
            username: "bob".into(),
            link: "http://app/reset?token=abc".into(),
        }
        .render("bob@x.com");
        assert!(msg.text.contains("hour"));
    }
}
