//! Shared fixtures for router-level tests.
#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use lead_intake_api::config::{
    Config, DispatchMode, EmailConfig, RateLimitSettings, SenderIdentity, StorageBackend,
};
use lead_intake_api::email_dispatcher::{EmailDispatcher, RetryPolicy, WelcomeContent};
use lead_intake_api::email_templates::TemplateFlags;
use lead_intake_api::email_transport::{MailTransport, OutboundEmail, SendReceipt, TransportError};
use lead_intake_api::handlers::{build_router, AppState};
use lead_intake_api::lead_store::{InMemoryLeadStore, LeadStore};
use lead_intake_api::origin_guard::OriginPolicy;
use lead_intake_api::rate_limiter::TokenBucketLimiter;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

pub const SITE_ORIGIN: &str = "https://invoiceqa.com";

/// Records every message; fails with a transient error when `failing` is set.
#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<OutboundEmail>>,
    pub failing: bool,
}

impl RecordingTransport {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    pub fn recipients(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|m| m.to.clone()).collect()
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    fn name(&self) -> String {
        "recording".to_string()
    }

    async fn send(&self, email: &OutboundEmail) -> Result<SendReceipt, TransportError> {
        self.sent.lock().unwrap().push(email.clone());
        if self.failing {
            return Err(TransportError::transient("provider unavailable"));
        }
        Ok(SendReceipt {
            message_id: Some("<recorded@test>".to_string()),
            provider_status: Some("201".to_string()),
        })
    }
}

pub fn email_config() -> EmailConfig {
    EmailConfig {
        brevo_api_key: None,
        brevo_api_base_url: "http://127.0.0.1:9".to_string(),
        smtp: None,
        sender: SenderIdentity::parse("InvoiceQA <no-reply@invoiceqa.com>"),
        reply_to: Some("support@invoiceqa.com".to_string()),
        template: TemplateFlags::default(),
        site_url: SITE_ORIGIN.to_string(),
        booking_url: None,
        product_name: "InvoiceQA".to_string(),
        timeout: Duration::from_secs(2),
        max_attempts: 2,
        retry_backoff: Duration::from_millis(1),
    }
}

pub fn test_config() -> Config {
    Config {
        port: 0,
        storage: StorageBackend::Memory,
        origins: OriginPolicy::allow_list(vec![SITE_ORIGIN.to_string()]),
        rate_limit: RateLimitSettings::default(),
        email: email_config(),
        dispatch_mode: DispatchMode::Sync,
        webhook_secret: None,
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<InMemoryLeadStore>,
    pub transport: Arc<RecordingTransport>,
}

impl TestApp {
    pub fn new(config: Config) -> Self {
        Self::with_transport(config, RecordingTransport::default())
    }

    pub fn with_transport(config: Config, transport: RecordingTransport) -> Self {
        let store = Arc::new(InMemoryLeadStore::new());
        let transport = Arc::new(transport);
        let dispatcher = EmailDispatcher::with_transports(
            vec![transport.clone() as Arc<dyn MailTransport>],
            RetryPolicy {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(2),
                attempt_timeout: Duration::from_secs(2),
            },
            WelcomeContent::from_config(&config.email),
        );

        let state = AppState {
            rate_limiter: Arc::new(TokenBucketLimiter::new(config.rate_limit)),
            store: Some(store.clone() as Arc<dyn LeadStore>),
            dispatcher: Arc::new(dispatcher),
            config,
        };

        Self {
            router: build_router(Arc::new(state)),
            store,
            transport,
        }
    }

    /// Router whose state has no lead store, as when DATABASE_URL is missing.
    pub fn without_store(config: Config) -> Router {
        let dispatcher = EmailDispatcher::with_transports(
            vec![],
            RetryPolicy::default(),
            WelcomeContent::from_config(&config.email),
        );
        let state = AppState {
            rate_limiter: Arc::new(TokenBucketLimiter::new(config.rate_limit)),
            store: None,
            dispatcher: Arc::new(dispatcher),
            config,
        };
        build_router(Arc::new(state))
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        send(&self.router, request).await
    }
}

pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, headers, body)
}

/// JSON POST from the landing page origin, keyed to `client_ip` for rate limiting.
pub fn post_json(uri: &str, client_ip: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("origin", SITE_ORIGIN)
        .header("content-type", "application/json")
        .header("x-forwarded-for", client_ip)
        .header("user-agent", "integration-test")
        .body(Body::from(body.to_string()))
        .unwrap()
}
