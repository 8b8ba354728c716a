//! Brevo transactional email delivery.

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use super::{EmailError, EmailSender, EmailTemplate};

const BREVO_SEND_URL: &str = "https://api.brevo.com/v3/smtp/email";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BrevoEmailAddress {
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BrevoSendEmailBody {
    sender: BrevoEmailAddress,
    to: Vec<BrevoEmailAddress>,
    subject: String,
    html_content: String,
    text_content: String,
}

/// Sends through Brevo's HTTP API.
#[derive(Debug, Clone)]
pub struct BrevoEmailSender {
    client: reqwest::Client,
    api_key: String,
    sender_email: String,
    sender_name: Option<String>,
    endpoint: String,
}

impl BrevoEmailSender {
    pub fn new(api_key: String, sender_email: String, sender_name: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            sender_email,
            sender_name,
            endpoint: BREVO_SEND_URL.to_string(),
        }
    }

    /// Point at a different endpoint (local relay or test double).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Build from `BREVO_API_KEY`, `BREVO_SENDER_EMAIL`, `BREVO_SENDER_NAME`.
    /// Returns `None` unless the key and sender are both set.
    pub fn from_env() -> Option<Self> {
        let api_key = non_empty_env("BREVO_API_KEY")?;
        let sender_email = non_empty_env("BREVO_SENDER_EMAIL")?;
        Some(Self::new(
            api_key,
            sender_email,
            non_empty_env("BREVO_SENDER_NAME"),
        ))
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl EmailSender for BrevoEmailSender {
    async fn send(&self, to: &str, template: EmailTemplate) -> Result<(), EmailError> {
        let message = template.render(to);
        let body = BrevoSendEmailBody {
            sender: BrevoEmailAddress {
                email: self.sender_email.clone(),
                name: self.sender_name.clone(),
            },
            to: vec![BrevoEmailAddress {
                email: message.to,
                name: None,
            }],
            subject: message.subject,
            html_content: message.html,
            text_content: message.text,
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .header("api-key", &self.api_key)
            .header("accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| EmailError::SendFailed(format!("brevo request: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(EmailError::SendFailed(format!(
                "brevo HTTP {status}: {text}"
            )));
        }
        debug!(to, "email sent via brevo");
        Ok(())
    }
}
