//! Transactional mail transports.
//!
//! Each transport classifies its failures as transient (worth retrying on the same route) or
//! rejected (this route will not work; move on to the next one).

use async_trait::async_trait;
use lettre::message::header::{Header, HeaderName, HeaderValue};
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde_json::{json, Value};
use std::time::Duration;
use uuid::Uuid;

use crate::config::{SenderIdentity, SmtpSettings};

/// A fully rendered message ready for any transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub to: String,
    pub sender: SenderIdentity,
    pub reply_to: Option<String>,
    pub subject: String,
    pub html: String,
    pub text: String,
    pub tags: Vec<String>,
}

/// What the provider said when it accepted a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: Option<String>,
    pub provider_status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Connection, timeout or provider-side temporary failure.
    #[error("transient failure (status {status:?}): {message}")]
    Transient {
        status: Option<String>,
        message: String,
    },
    /// The provider refused this route (auth, relay denial, bad request).
    #[error("rejected (status {status:?}): {message}")]
    Rejected {
        status: Option<String>,
        message: String,
    },
}

impl TransportError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            status: None,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            status: None,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn status(&self) -> Option<&str> {
        match self {
            Self::Transient { status, .. } | Self::Rejected { status, .. } => status.as_deref(),
        }
    }
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Label used in logs, e.g. `brevo-http` or `smtp:smtp-relay.brevo.com:587`.
    fn name(&self) -> String;

    async fn send(&self, email: &OutboundEmail) -> Result<SendReceipt, TransportError>;
}

/// Brevo transactional email HTTP API (`POST /smtp/email`).
#[derive(Clone)]
pub struct BrevoHttpTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl BrevoHttpTransport {
    pub fn new(base_url: String, api_key: String, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::rejected(format!("Failed to create Brevo client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn payload(email: &OutboundEmail) -> Value {
        let mut sender = json!({ "email": email.sender.email });
        if let Some(name) = &email.sender.name {
            sender["name"] = json!(name);
        }

        let mut payload = json!({
            "sender": sender,
            "to": [{ "email": email.to }],
            "subject": email.subject,
            "htmlContent": email.html,
            "textContent": email.text,
        });
        if let Some(reply_to) = &email.reply_to {
            payload["replyTo"] = json!({ "email": reply_to });
        }
        if !email.tags.is_empty() {
            payload["tags"] = json!(email.tags);
        }
        payload
    }
}

#[async_trait]
impl MailTransport for BrevoHttpTransport {
    fn name(&self) -> String {
        "brevo-http".to_string()
    }

    async fn send(&self, email: &OutboundEmail) -> Result<SendReceipt, TransportError> {
        let url = format!("{}/smtp/email", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("api-key", &self.api_key)
            .header("accept", "application/json")
            .json(&Self::payload(email))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::transient(format!("Brevo request timed out: {}", e))
                } else {
                    TransportError::transient(format!("Brevo request failed: {}", e))
                }
            })?;

        let status = response.status();
        let body: Option<Value> = response.json().await.ok();

        if !status.is_success() {
            let message = body
                .as_ref()
                .and_then(|b| b.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or("Unknown error")
                .to_string();
            let status_text = Some(status.as_u16().to_string());
            tracing::error!("Brevo HTTP failed: status={}, message={}", status, message);

            return if status.is_server_error()
                || status == reqwest::StatusCode::TOO_MANY_REQUESTS
                || status == reqwest::StatusCode::REQUEST_TIMEOUT
            {
                Err(TransportError::Transient {
                    status: status_text,
                    message,
                })
            } else {
                Err(TransportError::Rejected {
                    status: status_text,
                    message,
                })
            };
        }

        let message_id = body
            .as_ref()
            .and_then(|b| b.get("messageId"))
            .and_then(|m| m.as_str())
            .map(str::to_string);

        Ok(SendReceipt {
            message_id,
            provider_status: Some(status.as_u16().to_string()),
        })
    }
}

/// Brevo's SMTP header for campaign tags.
#[derive(Debug, Clone, PartialEq, Eq)]
struct MailinTag(String);

impl Header for MailinTag {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("X-Mailin-Tag")
    }

    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

/// One SMTP relay route (host + port). 465 uses implicit TLS, other ports STARTTLS.
pub struct SmtpRelayTransport {
    host: String,
    port: u16,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpRelayTransport {
    pub fn new(
        host: &str,
        port: u16,
        login: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let builder = if port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
        }
        .map_err(|e| TransportError::rejected(format!("Invalid SMTP relay {}: {}", host, e)))?;

        let mailer = builder
            .port(port)
            .credentials(Credentials::new(login.to_string(), password.to_string()))
            .timeout(Some(timeout))
            .build();

        Ok(Self {
            host: host.to_string(),
            port,
            mailer,
        })
    }

    /// One transport per configured port, in order.
    pub fn for_each_port(settings: &SmtpSettings, timeout: Duration) -> Vec<Self> {
        settings
            .ports
            .iter()
            .filter_map(|port| {
                match Self::new(&settings.host, *port, &settings.login, &settings.password, timeout)
                {
                    Ok(transport) => Some(transport),
                    Err(e) => {
                        tracing::error!("Skipping SMTP route {}:{}: {}", settings.host, port, e);
                        None
                    }
                }
            })
            .collect()
    }

    fn build_message(&self, email: &OutboundEmail, message_id: &str) -> Result<Message, TransportError> {
        let from_address: Address = email
            .sender
            .email
            .parse()
            .map_err(|e| TransportError::rejected(format!("Invalid sender address: {}", e)))?;
        let to_address: Address = email
            .to
            .parse()
            .map_err(|e| TransportError::rejected(format!("Invalid recipient address: {}", e)))?;

        let mut builder = Message::builder()
            .from(Mailbox::new(email.sender.name.clone(), from_address))
            .to(Mailbox::new(None, to_address))
            .subject(email.subject.clone())
            .message_id(Some(message_id.to_string()));

        if let Some(reply_to) = &email.reply_to {
            let reply_address: Address = reply_to
                .parse()
                .map_err(|e| TransportError::rejected(format!("Invalid reply-to address: {}", e)))?;
            builder = builder.reply_to(Mailbox::new(None, reply_address));
        }
        if !email.tags.is_empty() {
            builder = builder.header(MailinTag(email.tags.join("|")));
        }

        builder
            .multipart(MultiPart::alternative_plain_html(
                email.text.clone(),
                email.html.clone(),
            ))
            .map_err(|e| TransportError::rejected(format!("Failed to build message: {}", e)))
    }
}

#[async_trait]
impl MailTransport for SmtpRelayTransport {
    fn name(&self) -> String {
        format!("smtp:{}:{}", self.host, self.port)
    }

    async fn send(&self, email: &OutboundEmail) -> Result<SendReceipt, TransportError> {
        let domain = email
            .sender
            .email
            .rsplit_once('@')
            .map(|(_, d)| d)
            .unwrap_or("localhost");
        let message_id = format!("<{}@{}>", Uuid::new_v4(), domain);
        let message = self.build_message(email, &message_id)?;

        match self.mailer.send(message).await {
            Ok(response) => Ok(SendReceipt {
                message_id: Some(message_id),
                provider_status: Some(response.code().to_string()),
            }),
            Err(e) => {
                let status = e.status().map(|code| code.to_string());
                if e.is_permanent() {
                    Err(TransportError::Rejected {
                        status,
                        message: e.to_string(),
                    })
                } else {
                    Err(TransportError::Transient {
                        status,
                        message: e.to_string(),
                    })
                }
            }
        }
    }
}
