use once_cell::sync::Lazy;
use regex::Regex;
use std::str::FromStr;
use std::time::Duration;

use crate::email_templates::TemplateFlags;
use crate::origin_guard::OriginPolicy;

const DEFAULT_EMAIL_FROM: &str = "InvoiceQA <no-reply@invoiceqa.com>";
const DEFAULT_REPLY_TO: &str = "support@invoiceqa.com";
const DEFAULT_SITE_URL: &str = "https://invoiceqa.com";
const DEFAULT_BREVO_API_BASE_URL: &str = "https://api.brevo.com/v3";
const DEFAULT_SMTP_HOST: &str = "smtp-relay.brevo.com";
const DEFAULT_SMTP_PORTS: &[u16] = &[587, 2525, 465];

static SENDER_ADDRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<?([^<>@\s]+@[^<>@\s]+)>?").expect("valid sender address regex"));
static SENDER_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([^<]+)<").expect("valid sender name regex"));

/// Whether the welcome email is awaited inside the request or sent in the background.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Await the dispatch and report `emailSent` in the response.
    Sync,
    /// Spawn the dispatch and respond immediately.
    Background,
}

impl DispatchMode {
    /// Resolves the mode from an explicit `EMAIL_DISPATCH_MODE` value, falling back to the
    /// deployment environment (`production` means synchronous).
    pub fn resolve(explicit: Option<&str>, app_env: Option<&str>) -> anyhow::Result<Self> {
        match explicit.map(|s| s.trim().to_ascii_lowercase()) {
            Some(mode) if mode == "sync" => Ok(Self::Sync),
            Some(mode) if mode == "background" || mode == "async" => Ok(Self::Background),
            Some(other) => {
                anyhow::bail!("EMAIL_DISPATCH_MODE must be 'sync' or 'background', got '{}'", other)
            }
            None => match app_env {
                Some(env) if env.eq_ignore_ascii_case("production") => Ok(Self::Sync),
                _ => Ok(Self::Background),
            },
        }
    }
}

/// Where leads are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres(String),
    /// Process-local store for local development.
    Memory,
    /// No datastore credential; storage-backed endpoints answer 500.
    Unconfigured,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSettings {
    pub capacity: u32,
    pub window: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            capacity: 5,
            window: Duration::from_secs(60),
        }
    }
}

/// Sender mailbox for outbound mail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderIdentity {
    pub email: String,
    pub name: Option<String>,
}

impl SenderIdentity {
    /// Parses `Display Name <address>` or a bare address.
    pub fn parse(raw: &str) -> Self {
        let email = SENDER_ADDRESS
            .captures(raw)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| raw.trim().to_string());
        let name = SENDER_NAME
            .captures(raw)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|n| !n.is_empty());

        Self { email, name }
    }
}

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    /// Tried in order; 465 uses implicit TLS, everything else STARTTLS.
    pub ports: Vec<u16>,
    pub login: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub brevo_api_key: Option<String>,
    pub brevo_api_base_url: String,
    pub smtp: Option<SmtpSettings>,
    pub sender: SenderIdentity,
    pub reply_to: Option<String>,
    pub template: TemplateFlags,
    pub site_url: String,
    pub booking_url: Option<String>,
    pub product_name: String,
    /// Hard per-attempt timeout.
    pub timeout: Duration,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
}

impl EmailConfig {
    pub fn has_provider_credentials(&self) -> bool {
        self.brevo_api_key.is_some() || self.smtp.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub storage: StorageBackend,
    pub origins: OriginPolicy,
    pub rate_limit: RateLimitSettings,
    pub email: EmailConfig,
    pub dispatch_mode: DispatchMode,
    pub webhook_secret: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let site_url = env_opt("PUBLIC_SITE_URL")
            .or_else(|| env_opt("NEXT_PUBLIC_SITE_URL"))
            .unwrap_or_else(|| DEFAULT_SITE_URL.to_string());
        let site = url::Url::parse(&site_url)
            .map_err(|e| anyhow::anyhow!("PUBLIC_SITE_URL must be an absolute URL: {}", e))?;

        let origins = match env_opt("ALLOWED_ORIGINS") {
            Some(raw) => OriginPolicy::parse(&raw),
            None => OriginPolicy::allow_list(vec![site.origin().ascii_serialization()]),
        };

        let storage = match env_opt("LEAD_STORE").as_deref() {
            Some("memory") => StorageBackend::Memory,
            Some("postgres") | None => {
                match env_opt("DB_URL").or_else(|| env_opt("DATABASE_URL")) {
                    Some(url) => {
                        if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                            anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                        }
                        StorageBackend::Postgres(url)
                    }
                    None => StorageBackend::Unconfigured,
                }
            }
            Some(other) => anyhow::bail!("LEAD_STORE must be 'postgres' or 'memory', got '{}'", other),
        };

        let rate_limit = RateLimitSettings {
            capacity: env_parse("RATE_LIMIT_CAPACITY", 5u32)?,
            window: Duration::from_secs(env_parse("RATE_LIMIT_WINDOW_SECS", 60u64)?),
        };
        if rate_limit.capacity == 0 || rate_limit.window.is_zero() {
            anyhow::bail!("RATE_LIMIT_CAPACITY and RATE_LIMIT_WINDOW_SECS must be positive");
        }

        let email_from = env_opt("EMAIL_FROM").unwrap_or_else(|| DEFAULT_EMAIL_FROM.to_string());
        let parsed_sender = SenderIdentity::parse(&email_from);
        let sender = SenderIdentity {
            email: env_opt("BREVO_SENDER_EMAIL").unwrap_or(parsed_sender.email),
            name: env_opt("BREVO_SENDER_NAME").or(parsed_sender.name),
        };

        let smtp = match (env_opt("BREVO_SMTP_LOGIN"), env_opt("BREVO_SMTP_KEY")) {
            (Some(login), Some(password)) => Some(SmtpSettings {
                host: env_opt("BREVO_SMTP_HOST").unwrap_or_else(|| DEFAULT_SMTP_HOST.to_string()),
                ports: match env_opt("BREVO_SMTP_PORTS") {
                    Some(raw) => parse_ports(&raw)?,
                    None => DEFAULT_SMTP_PORTS.to_vec(),
                },
                login,
                password,
            }),
            _ => None,
        };

        let email = EmailConfig {
            brevo_api_key: env_opt("BREVO_API_KEY"),
            brevo_api_base_url: env_opt("BREVO_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BREVO_API_BASE_URL.to_string()),
            smtp,
            sender,
            reply_to: Some(env_opt("EMAIL_REPLY_TO").unwrap_or_else(|| DEFAULT_REPLY_TO.to_string())),
            template: TemplateFlags {
                ab_gmail_minimal: env_flag("EMAIL_WELCOME_AB_GMAIL_MINIMAL"),
                force_minimal: env_flag("EMAIL_WELCOME_MINIMAL"),
                no_links: env_flag("EMAIL_WELCOME_NO_LINKS"),
            },
            site_url: site_url.trim_end_matches('/').to_string(),
            booking_url: env_opt("BOOKING_URL").or_else(|| env_opt("NEXT_PUBLIC_CALENDLY_URL")),
            product_name: env_opt("PRODUCT_NAME").unwrap_or_else(|| "InvoiceQA".to_string()),
            timeout: Duration::from_secs(require_positive(
                "EMAIL_TIMEOUT_SECS",
                env_parse("EMAIL_TIMEOUT_SECS", 10u64)?,
            )?),
            max_attempts: env_parse("EMAIL_MAX_ATTEMPTS", 3u32)?.max(1),
            retry_backoff: Duration::from_millis(env_parse("EMAIL_RETRY_BACKOFF_MS", 500u64)?),
        };

        let dispatch_mode = DispatchMode::resolve(
            env_opt("EMAIL_DISPATCH_MODE").as_deref(),
            env_opt("APP_ENV").as_deref(),
        )?;

        let config = Self {
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            storage,
            origins,
            rate_limit,
            email,
            dispatch_mode,
            webhook_secret: env_opt("EMAIL_WEBHOOK_SECRET"),
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        match &config.storage {
            StorageBackend::Postgres(url) => {
                tracing::debug!("Database URL: {}...", url_prefix(url))
            }
            StorageBackend::Memory => tracing::warn!("Using in-memory lead store (LEAD_STORE=memory)"),
            StorageBackend::Unconfigured => tracing::error!(
                "DATABASE_URL not set: lead capture, webhook and unsubscribe will answer 500"
            ),
        }
        if !config.email.has_provider_credentials() {
            tracing::warn!("No email provider credentials configured; welcome emails will be skipped");
        }
        if config.webhook_secret.is_none() {
            tracing::warn!("EMAIL_WEBHOOK_SECRET not set; delivery webhook is unauthenticated");
        }
        tracing::debug!("Dispatch mode: {:?}", config.dispatch_mode);
        tracing::debug!("Allowed origins: {:?}", config.origins);
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_flag(key: &str) -> bool {
    env_opt(key)
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false)
}

fn require_positive(key: &str, value: u64) -> anyhow::Result<u64> {
    if value == 0 {
        anyhow::bail!("{} must be positive", key);
    }
    Ok(value)
}

/// First 20 characters, safe on multi-byte input.
fn url_prefix(url: &str) -> String {
    url.chars().take(20).collect()
}

fn env_parse<T: FromStr>(key: &str, default: T) -> anyhow::Result<T> {
    match env_opt(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: '{}'", key, raw)),
        None => Ok(default),
    }
}

fn parse_ports(raw: &str) -> anyhow::Result<Vec<u16>> {
    let ports = raw
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            p.parse::<u16>()
                .map_err(|_| anyhow::anyhow!("BREVO_SMTP_PORTS contains an invalid port: '{}'", p))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    if ports.is_empty() {
        anyhow::bail!("BREVO_SMTP_PORTS must list at least one port");
    }
    Ok(ports)
}
