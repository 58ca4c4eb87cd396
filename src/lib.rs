//! Landing-page lead intake API library.
//!
//! Captures early-access signups, sends the welcome email over a chain of Brevo transports and
//! reconciles delivery webhooks back onto the lead.
//!
//! # Modules
//!
//! - `api`: API definitions.
//! - `core`: Core business logic.
//! - `data`: Data access layer.
//! - `integrations`: External service integrations.
//! - `obs`: Observability and logging.
//! - `config`: Configuration management.
//! - `db`: Database connection and pool management.
//! - `email_dispatcher`: Retry and fallback policy over mail transports.
//! - `email_templates`: Welcome email variants.
//! - `email_transport`: Brevo HTTP API and SMTP relay transports.
//! - `errors`: Error handling types.
//! - `handlers`: Shared state, router and small handlers.
//! - `lead_handler`: `POST /lead` intake pipeline.
//! - `lead_store`: Lead persistence.
//! - `models`: Core data models.
//! - `origin_guard`: CORS origin policy.
//! - `rate_limiter`: Per-client token bucket.
//! - `unsubscribe_handler`: `POST /unsubscribe`.
//! - `validator`: Lead payload validation.
//! - `webhook_handler`: Delivery webhook handler.
//! - `webhook_models`: Delivery event normalization.

pub mod api;
pub mod core;
pub mod data;
pub mod integrations;
pub mod obs;

// Re-export primary modules for shared use in tests and other binaries
pub mod config;
pub mod db;
pub mod email_dispatcher;
pub mod email_templates;
pub mod email_transport;
pub mod errors;
pub mod handlers;
pub mod lead_handler;
pub mod lead_store;
pub mod models;
pub mod origin_guard;
pub mod rate_limiter;
pub mod unsubscribe_handler;
pub mod validator;
pub mod webhook_handler;
pub mod webhook_models;
