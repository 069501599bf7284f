//! Outbound email gateway.
//!
//! Workflows only see the [`Mailer`] trait. With an API key configured the
//! portal talks to a bearer-token JSON provider; without one every message is
//! written to the log so local runs never leave the machine.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::EmailConfig;

/// One outbound message. `html` falls back to the plain text body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
}

impl EmailMessage {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            text: text.into(),
            html: None,
        }
    }

    pub fn html_body(&self) -> &str {
        self.html.as_deref().unwrap_or(&self.text)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("invalid recipient address '{0}'")]
    InvalidAddress(String),
    #[error("email transport failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("email provider answered {status}: {body}")]
    Rejected { status: StatusCode, body: String },
    #[error("email provider is not configured")]
    NotConfigured,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: EmailMessage) -> Result<(), MailError>;
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is a valid regex")
    })
}

/// Basic `local@domain.tld` syntax check applied before any send.
pub fn is_valid_email(address: &str) -> bool {
    email_pattern().is_match(address.trim())
}

#[derive(Serialize)]
struct OutboundEmail<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    text: &'a str,
    html: &'a str,
}

#[derive(Serialize)]
struct SenderRegistration<'a> {
    email: &'a str,
    name: &'a str,
}

/// Client for the HTTP email provider (`POST {api}/emails`).
#[derive(Debug, Clone)]
pub struct HttpMailer {
    client: Client,
    api_url: String,
    api_key: String,
    from: String,
}

impl HttpMailer {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            from: from.into(),
        }
    }

    pub fn from_config(config: &EmailConfig) -> Result<Self, MailError> {
        let key = config.api_key.as_deref().ok_or(MailError::NotConfigured)?;
        Ok(Self::new(&config.api_url, key, &config.from))
    }

    /// Register a sending identity with the provider and return its answer.
    pub async fn register_sender(
        &self,
        name: &str,
        email: &str,
    ) -> Result<serde_json::Value, MailError> {
        if !is_valid_email(email) {
            return Err(MailError::InvalidAddress(email.to_string()));
        }

        let response = self
            .client
            .post(format!("{}/senders", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&SenderRegistration { email, name })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Rejected { status, body });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, message: EmailMessage) -> Result<(), MailError> {
        if !is_valid_email(&message.to) {
            return Err(MailError::InvalidAddress(message.to));
        }

        let payload = OutboundEmail {
            from: &self.from,
            to: [message.to.trim()],
            subject: &message.subject,
            text: &message.text,
            html: message.html_body(),
        };

        let response = self
            .client
            .post(format!("{}/emails", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Rejected { status, body });
        }

        debug!(to = %message.to, subject = %message.subject, "email accepted by provider");
        Ok(())
    }
}

/// Mailer used when no provider key is configured.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: EmailMessage) -> Result<(), MailError> {
        if !is_valid_email(&message.to) {
            return Err(MailError::InvalidAddress(message.to));
        }
        info!(
            to = %message.to,
            subject = %message.subject,
            body = %message.text,
            "email not sent (no provider key configured)"
        );
        Ok(())
    }
}

/// Pick the provider client when a key is present, the log mailer otherwise.
pub fn mailer_from_config(config: &EmailConfig) -> Arc<dyn Mailer> {
    match HttpMailer::from_config(config) {
        Ok(mailer) => Arc::new(mailer),
        Err(_) => Arc::new(LogMailer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_check_matches_basic_shape() {
        assert!(is_valid_email("awa.camara@univ.example.org"));
        assert!(is_valid_email("  dg@gopac.gn "));
        assert!(!is_valid_email("awa.camara"));
        assert!(!is_valid_email("awa camara@univ.org"));
        assert!(!is_valid_email("awa@localhost"));
    }

    #[test]
    fn html_defaults_to_text() {
        let message = EmailMessage::new("a@b.co", "Objet", "Bonjour");
        assert_eq!(message.html_body(), "Bonjour");
    }

    #[tokio::test]
    async fn log_mailer_still_refuses_malformed_recipients() {
        let err = LogMailer
            .send(EmailMessage::new("nobody", "Objet", "Bonjour"))
            .await
            .expect_err("malformed address");
        assert!(matches!(err, MailError::InvalidAddress(_)));
        LogMailer
            .send(EmailMessage::new("a@b.co", "Objet", "Bonjour"))
            .await
            .expect("well-formed address is accepted");
    }

    #[test]
    fn missing_key_selects_log_mailer() {
        let config = EmailConfig {
            api_url: "https://api.resend.com".to_string(),
            api_key: None,
            from: "GOPAC <noreply@gopac.local>".to_string(),
            budget_per_load: 5,
        };
        assert!(matches!(
            HttpMailer::from_config(&config),
            Err(MailError::NotConfigured)
        ));
    }
}
