//! Welcome email dispatch over an ordered list of transports.
//!
//! Each transport gets up to `max_attempts` tries for transient failures, with exponential
//! backoff between them. A rejection moves straight to the next transport. The dispatch fails
//! only once every transport has been exhausted.

use failsafe::backoff;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{EmailConfig, SenderIdentity};
use crate::email_templates::{render_welcome, select_variant, TemplateContext, TemplateFlags, Variant};
use crate::email_transport::{
    BrevoHttpTransport, MailTransport, OutboundEmail, SmtpRelayTransport, TransportError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per transport, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Hard deadline for one attempt; expiry counts as a transient failure.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(4),
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &EmailConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: config.retry_backoff,
            max_backoff: (config.retry_backoff * 8).max(config.retry_backoff),
            attempt_timeout: config.timeout,
        }
    }

    /// Doubling delays from `initial_backoff`, capped at `max_backoff`. Sub-second values are
    /// allowed, so this does not go through `backoff::exponential` (which requires >= 1s).
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let cap = self.max_backoff.max(self.initial_backoff);
        backoff::constant(self.initial_backoff)
            .zip(0u32..)
            .map(move |(base, step)| {
                let factor = 1u32.checked_shl(step).unwrap_or(u32::MAX);
                base.saturating_mul(factor).min(cap)
            })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("welcome email to {recipient} failed on all {transports_tried} transport(s): {last_error}")]
pub struct DispatchError {
    pub recipient: String,
    pub transports_tried: usize,
    pub last_error: TransportError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub message_id: Option<String>,
    pub transport: String,
    pub variant: Variant,
    /// Total attempts across all transports.
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent(DispatchReport),
    /// No provider credential configured.
    Skipped,
}

impl DispatchOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, DispatchOutcome::Sent(_))
    }
}

/// Template inputs owned by the dispatcher.
#[derive(Debug, Clone)]
pub struct WelcomeContent {
    pub sender: SenderIdentity,
    pub reply_to: Option<String>,
    pub flags: TemplateFlags,
    pub product_name: String,
    pub site_url: String,
    pub booking_url: Option<String>,
}

impl WelcomeContent {
    pub fn from_config(config: &EmailConfig) -> Self {
        Self {
            sender: config.sender.clone(),
            reply_to: config.reply_to.clone(),
            flags: config.template,
            product_name: config.product_name.clone(),
            site_url: config.site_url.clone(),
            booking_url: config.booking_url.clone(),
        }
    }
}

pub struct EmailDispatcher {
    transports: Vec<Arc<dyn MailTransport>>,
    retry: RetryPolicy,
    content: WelcomeContent,
}

impl EmailDispatcher {
    /// HTTP API first when a key is configured, then one SMTP route per configured port.
    pub fn from_config(config: &EmailConfig) -> Self {
        let mut transports: Vec<Arc<dyn MailTransport>> = Vec::new();

        if let Some(api_key) = &config.brevo_api_key {
            match BrevoHttpTransport::new(
                config.brevo_api_base_url.clone(),
                api_key.clone(),
                config.timeout,
            ) {
                Ok(transport) => transports.push(Arc::new(transport)),
                Err(e) => tracing::error!("Brevo HTTP transport disabled: {}", e),
            }
        }
        if let Some(smtp) = &config.smtp {
            for transport in SmtpRelayTransport::for_each_port(smtp, config.timeout) {
                transports.push(Arc::new(transport));
            }
        }

        tracing::info!(
            "Email dispatcher ready with {} transport(s): {:?}",
            transports.len(),
            transports.iter().map(|t| t.name()).collect::<Vec<_>>()
        );

        Self::with_transports(
            transports,
            RetryPolicy::from_config(config),
            WelcomeContent::from_config(config),
        )
    }

    pub fn with_transports(
        transports: Vec<Arc<dyn MailTransport>>,
        retry: RetryPolicy,
        content: WelcomeContent,
    ) -> Self {
        Self {
            transports,
            retry,
            content,
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.transports.is_empty()
    }

    /// Renders the welcome message for `to` without sending it.
    pub fn compose(&self, to: &str) -> (Variant, OutboundEmail) {
        let choice = select_variant(to, &self.content.flags);
        let ctx = TemplateContext {
            product_name: &self.content.product_name,
            sender_name: self.content.sender.name.as_deref(),
            site_url: &self.content.site_url,
            booking_url: self.content.booking_url.as_deref(),
            no_links: self.content.flags.no_links,
        };
        let rendered = render_welcome(choice.variant, &ctx);

        let email = OutboundEmail {
            to: to.to_string(),
            sender: self.content.sender.clone(),
            reply_to: self.content.reply_to.clone(),
            subject: rendered.subject,
            html: rendered.html,
            text: rendered.text,
            tags: choice.tags(),
        };
        (choice.variant, email)
    }

    pub async fn send_welcome_email(&self, to: &str) -> Result<DispatchOutcome, DispatchError> {
        if self.transports.is_empty() {
            tracing::warn!("No email provider configured; skipping welcome email to {}", to);
            return Ok(DispatchOutcome::Skipped);
        }

        let (variant, email) = self.compose(to);
        let mut attempts = 0u32;
        let mut last_error = TransportError::transient("no attempt made");

        for transport in &self.transports {
            let name = transport.name();
            let mut delays = self.retry.delays();

            for attempt in 1..=self.retry.max_attempts {
                attempts += 1;
                let result =
                    match tokio::time::timeout(self.retry.attempt_timeout, transport.send(&email)).await {
                        Ok(result) => result,
                        Err(_) => Err(TransportError::transient(format!(
                            "attempt timed out after {:?}",
                            self.retry.attempt_timeout
                        ))),
                    };

                match result {
                    Ok(receipt) => {
                        tracing::info!(
                            recipient = %to,
                            variant = variant.as_str(),
                            transport = %name,
                            attempt,
                            status = ?receipt.provider_status,
                            message_id = ?receipt.message_id,
                            "Welcome email sent"
                        );
                        return Ok(DispatchOutcome::Sent(DispatchReport {
                            message_id: receipt.message_id,
                            transport: name,
                            variant,
                            attempts,
                        }));
                    }
                    Err(e) if e.is_transient() => {
                        tracing::warn!(
                            recipient = %to,
                            variant = variant.as_str(),
                            transport = %name,
                            attempt,
                            status = ?e.status(),
                            "Transient email failure: {}",
                            e
                        );
                        last_error = e;
                        if attempt < self.retry.max_attempts {
                            let delay = delays.next().unwrap_or(self.retry.max_backoff);
                            tokio::time::sleep(delay).await;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            recipient = %to,
                            variant = variant.as_str(),
                            transport = %name,
                            attempt,
                            status = ?e.status(),
                            "Email transport rejected, falling back: {}",
                            e
                        );
                        last_error = e;
                        break;
                    }
                }
            }
        }

        tracing::error!(
            recipient = %to,
            variant = variant.as_str(),
            attempts,
            "Welcome email failed on every transport: {}",
            last_error
        );
        Err(DispatchError {
            recipient: to.to_string(),
            transports_tried: self.transports.len(),
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email_transport::SendReceipt;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a fixed script of results, then succeeds.
    struct ScriptedTransport {
        name: &'static str,
        script: Mutex<VecDeque<Result<SendReceipt, TransportError>>>,
        sent: Mutex<Vec<OutboundEmail>>,
    }

    impl ScriptedTransport {
        fn new(name: &'static str, script: Vec<Result<SendReceipt, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                script: Mutex::new(script.into()),
                sent: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl MailTransport for ScriptedTransport {
        fn name(&self) -> String {
            self.name.to_string()
        }

        async fn send(&self, email: &OutboundEmail) -> Result<SendReceipt, TransportError> {
            self.sent.lock().unwrap().push(email.clone());
            self.script.lock().unwrap().pop_front().unwrap_or_else(|| {
                Ok(SendReceipt {
                    message_id: Some(format!("<{}@test>", self.name)),
                    provider_status: Some("201".to_string()),
                })
            })
        }
    }

    struct HangingTransport;

    #[async_trait]
    impl MailTransport for HangingTransport {
        fn name(&self) -> String {
            "hanging".to_string()
        }

        async fn send(&self, _email: &OutboundEmail) -> Result<SendReceipt, TransportError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(TransportError::transient("unreachable"))
        }
    }

    fn content(flags: TemplateFlags) -> WelcomeContent {
        WelcomeContent {
            sender: SenderIdentity {
                email: "no-reply@invoiceqa.com".to_string(),
                name: Some("Sam".to_string()),
            },
            reply_to: None,
            flags,
            product_name: "InvoiceQA".to_string(),
            site_url: "https://invoiceqa.com".to_string(),
            booking_url: None,
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            attempt_timeout: Duration::from_millis(200),
        }
    }

    fn dispatcher(transports: &[&Arc<ScriptedTransport>]) -> EmailDispatcher {
        let transports = transports
            .iter()
            .map(|t| (*t).clone() as Arc<dyn MailTransport>)
            .collect();
        EmailDispatcher::with_transports(transports, fast_retry(), content(TemplateFlags::default()))
    }

    #[tokio::test]
    async fn test_skipped_without_transports() {
        let outcome = dispatcher(&[]).send_welcome_email("a@b.co").await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_first_transport_success() {
        let primary = ScriptedTransport::new("primary", vec![]);
        let backup = ScriptedTransport::new("backup", vec![]);
        let outcome = dispatcher(&[&primary, &backup])
            .send_welcome_email("a@b.co")
            .await
            .unwrap();

        match outcome {
            DispatchOutcome::Sent(report) => {
                assert_eq!(report.transport, "primary");
                assert_eq!(report.attempts, 1);
                assert_eq!(report.message_id.as_deref(), Some("<primary@test>"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(backup.calls(), 0);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let primary = ScriptedTransport::new(
            "primary",
            vec![
                Err(TransportError::transient("connection reset")),
                Err(TransportError::transient("timeout")),
            ],
        );
        let outcome = dispatcher(&[&primary])
            .send_welcome_email("a@b.co")
            .await
            .unwrap();

        assert!(outcome.is_sent());
        assert_eq!(primary.calls(), 3);
    }

    #[tokio::test]
    async fn test_rejection_falls_back_immediately() {
        let primary = ScriptedTransport::new(
            "smtp:587",
            vec![Err(TransportError::Rejected {
                status: Some("535".to_string()),
                message: "relay denied".to_string(),
            })],
        );
        let backup = ScriptedTransport::new("smtp:2525", vec![]);
        let outcome = dispatcher(&[&primary, &backup])
            .send_welcome_email("a@b.co")
            .await
            .unwrap();

        assert_eq!(primary.calls(), 1);
        assert_eq!(backup.calls(), 1);
        match outcome {
            DispatchOutcome::Sent(report) => {
                assert_eq!(report.transport, "smtp:2525");
                assert_eq!(report.attempts, 2);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exhausted_transports_return_error() {
        let failures = || {
            (0..3)
                .map(|_| Err(TransportError::transient("down")))
                .collect::<Vec<_>>()
        };
        let primary = ScriptedTransport::new("primary", failures());
        let backup = ScriptedTransport::new(
            "backup",
            vec![Err(TransportError::rejected("forbidden"))],
        );

        let err = dispatcher(&[&primary, &backup])
            .send_welcome_email("a@b.co")
            .await
            .unwrap_err();

        assert_eq!(primary.calls(), 3);
        assert_eq!(backup.calls(), 1);
        assert_eq!(err.transports_tried, 2);
        assert!(!err.last_error.is_transient());
    }

    #[tokio::test]
    async fn test_attempt_timeout_is_transient() {
        let backup = ScriptedTransport::new("backup", vec![]);
        let mut retry = fast_retry();
        retry.max_attempts = 1;
        retry.attempt_timeout = Duration::from_millis(20);
        let dispatcher = EmailDispatcher::with_transports(
            vec![Arc::new(HangingTransport), backup.clone() as Arc<dyn MailTransport>],
            retry,
            content(TemplateFlags::default()),
        );

        let outcome = dispatcher.send_welcome_email("a@b.co").await.unwrap();
        assert!(outcome.is_sent());
        assert_eq!(backup.calls(), 1);
    }

    #[tokio::test]
    async fn test_message_is_tagged_for_webhook() {
        let transport = ScriptedTransport::new("primary", vec![]);
        let flags = TemplateFlags {
            ab_gmail_minimal: true,
            ..Default::default()
        };
        let dispatcher =
            EmailDispatcher::with_transports(
                vec![transport.clone() as Arc<dyn MailTransport>],
                fast_retry(),
                content(flags),
            );

        dispatcher.send_welcome_email("lead@gmail.com").await.unwrap();

        let sent = transport.sent.lock().unwrap();
        assert_eq!(
            sent[0].tags,
            vec!["landing-page", "welcome-email", "variant-minimal", "ab-gmail-minimal"]
        );
        assert_eq!(sent[0].to, "lead@gmail.com");
    }

    #[test]
    fn test_default_delays_double_up_to_cap() {
        let delays: Vec<_> = RetryPolicy::default().delays().take(6).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(4),
                Duration::from_secs(4),
            ]
        );
        assert_eq!(fast_retry().delays().nth(40), Some(Duration::from_millis(4)));
    }

    #[tokio::test]
    async fn test_default_policy_retries_sub_second_backoff() {
        let primary = ScriptedTransport::new(
            "primary",
            vec![Err(TransportError::transient("connection reset"))],
        );
        let dispatcher = EmailDispatcher::with_transports(
            vec![primary.clone() as Arc<dyn MailTransport>],
            RetryPolicy::default(),
            content(TemplateFlags::default()),
        );

        let outcome = dispatcher.send_welcome_email("lead@example.com").await.unwrap();
        assert!(outcome.is_sent());
        assert_eq!(primary.calls(), 2);
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = EmailConfig {
            brevo_api_key: None,
            brevo_api_base_url: "https://api.brevo.com/v3".to_string(),
            smtp: None,
            sender: SenderIdentity::parse("no-reply@example.com"),
            reply_to: None,
            template: TemplateFlags::default(),
            site_url: "https://example.com".to_string(),
            booking_url: None,
            product_name: "Example".to_string(),
            timeout: Duration::from_secs(10),
            max_attempts: 0,
            retry_backoff: Duration::from_millis(250),
        };
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.max_backoff, Duration::from_secs(2));
        assert!(!EmailDispatcher::from_config(&config).is_configured());
    }
}
