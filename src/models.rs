use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tags every welcome email carries. Delivery events without all of them are ignored so that
/// other transactional traffic on the same provider account cannot touch lead state.
pub const REQUIRED_CAMPAIGN_TAGS: [&str; 2] = ["landing-page", "welcome-email"];

/// Lowercased, whitespace-trimmed email; the natural key of a lead.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Attribution captured by the landing page at submission time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtmParams {
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub utm_term: Option<String>,
    pub utm_content: Option<String>,
}

/// A validated form submission. `email` is already normalized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LeadSubmission {
    pub email: String,
    pub company: Option<String>,
    pub invoices_per_month: Option<String>,
    pub role: Option<String>,
    pub accounting_system: Option<String>,
    pub country: Option<String>,
    pub utm: UtmParams,
    /// Honeypot field. Humans never see it, so any content means a bot filled the form.
    pub website: Option<String>,
}

impl LeadSubmission {
    pub fn is_honeypot_tripped(&self) -> bool {
        self.website
            .as_deref()
            .map(|w| !w.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Where the request came from, captured once at creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestProvenance {
    pub user_agent: Option<String>,
    pub ip: Option<String>,
    pub referer: Option<String>,
}

/// Row written by `LeadStore::insert`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLead {
    pub email: String,
    pub company: Option<String>,
    pub invoices_per_month: Option<String>,
    pub role: Option<String>,
    pub accounting_system: Option<String>,
    pub country: Option<String>,
    pub utm: UtmParams,
    pub provenance: RequestProvenance,
}

impl NewLead {
    pub fn from_submission(submission: LeadSubmission, provenance: RequestProvenance) -> Self {
        Self {
            email: normalize_email(&submission.email),
            company: submission.company,
            invoices_per_month: submission.invoices_per_month,
            role: submission.role,
            accounting_system: submission.accounting_system,
            country: submission.country,
            utm: submission.utm,
            provenance,
        }
    }
}

/// Outcome of the delivery reconciliation for a lead's address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailValidation {
    Unknown,
    Valid,
    Invalid,
}

impl From<Option<bool>> for EmailValidation {
    fn from(value: Option<bool>) -> Self {
        match value {
            None => Self::Unknown,
            Some(true) => Self::Valid,
            Some(false) => Self::Invalid,
        }
    }
}

impl EmailValidation {
    pub fn as_option(self) -> Option<bool> {
        match self {
            Self::Unknown => None,
            Self::Valid => Some(true),
            Self::Invalid => Some(false),
        }
    }
}

/// A persisted lead as read back from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct LeadRecord {
    pub id: Uuid,
    pub email: String,
    pub company: Option<String>,
    pub invoices_per_month: Option<String>,
    pub role: Option<String>,
    pub accounting_system: Option<String>,
    pub country: Option<String>,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub utm_term: Option<String>,
    pub utm_content: Option<String>,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
    pub referer: Option<String>,
    pub email_validated: Option<bool>,
    pub unsubscribed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LeadRecord {
    pub fn from_new(lead: &NewLead, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: lead.email.clone(),
            company: lead.company.clone(),
            invoices_per_month: lead.invoices_per_month.clone(),
            role: lead.role.clone(),
            accounting_system: lead.accounting_system.clone(),
            country: lead.country.clone(),
            utm_source: lead.utm.utm_source.clone(),
            utm_medium: lead.utm.utm_medium.clone(),
            utm_campaign: lead.utm.utm_campaign.clone(),
            utm_term: lead.utm.utm_term.clone(),
            utm_content: lead.utm.utm_content.clone(),
            user_agent: lead.provenance.user_agent.clone(),
            ip: lead.provenance.ip.clone(),
            referer: lead.provenance.referer.clone(),
            email_validated: None,
            unsubscribed: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validation(&self) -> EmailValidation {
        EmailValidation::from(self.email_validated)
    }
}

/// Success body of `POST /lead`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_sent: Option<bool>,
}

impl LeadResponse {
    pub fn accepted() -> Self {
        Self {
            ok: true,
            ..Default::default()
        }
    }

    pub fn duplicate() -> Self {
        Self {
            ok: true,
            duplicate: Some(true),
            email_sent: None,
        }
    }

    pub fn with_email_sent(email_sent: bool) -> Self {
        Self {
            ok: true,
            duplicate: None,
            email_sent: Some(email_sent),
        }
    }
}
