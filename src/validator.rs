//! Schema validation for lead submissions.
//!
//! Works on an already-parsed `serde_json::Value` so that a wrong type in one field is reported
//! as a field error rather than failing the whole body.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::models::{normalize_email, LeadSubmission, UtmParams};

pub const MAX_EMAIL_LENGTH: usize = 254;
pub const MAX_FIELD_LENGTH: usize = 256;

const OPTIONAL_FIELDS: [&str; 5] = [
    "company",
    "invoices_per_month",
    "role",
    "accounting_system",
    "country",
];
const UTM_FIELDS: [&str; 5] = [
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
];

static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$",
    )
    .expect("valid email regex")
});

/// One problem with one field of the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub path: Vec<String>,
    pub message: String,
}

impl FieldError {
    fn new(path: &[&str], message: impl Into<String>) -> Self {
        Self {
            path: path.iter().map(|p| p.to_string()).collect(),
            message: message.into(),
        }
    }
}

/// Address grammar check: `local@domain.tld`, no leading, trailing or doubled dots in the local part.
pub fn is_valid_email(email: &str) -> bool {
    if email.is_empty() || email.len() > MAX_EMAIL_LENGTH {
        return false;
    }
    let Some((local, _domain)) = email.rsplit_once('@') else {
        return false;
    };
    if local.starts_with('.') || local.ends_with('.') || local.contains("..") {
        return false;
    }
    EMAIL_REGEX.is_match(email)
}

/// Anything in the honeypot counts, whatever its type.
fn honeypot_value(body: &Map<String, Value>) -> Option<String> {
    match body.get("website") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}

/// True when the raw payload fills the honeypot, checked before any schema validation so a bot
/// never sees field errors.
pub fn is_honeypot_tripped(raw: &Value) -> bool {
    raw.as_object()
        .and_then(honeypot_value)
        .map(|w| !w.trim().is_empty())
        .unwrap_or(false)
}

/// Validates a raw lead payload. Either every field is acceptable or nothing is returned.
pub fn validate(raw: &Value) -> Result<LeadSubmission, Vec<FieldError>> {
    let Some(body) = raw.as_object() else {
        return Err(vec![FieldError::new(&[], "Expected object")]);
    };

    let mut errors = Vec::new();
    let mut submission = LeadSubmission::default();

    match body.get("email") {
        None | Some(Value::Null) => errors.push(FieldError::new(&["email"], "Required")),
        Some(Value::String(email)) => {
            let normalized = normalize_email(email);
            if normalized.len() > MAX_EMAIL_LENGTH {
                errors.push(FieldError::new(
                    &["email"],
                    format!("Must be at most {} characters", MAX_EMAIL_LENGTH),
                ));
            } else if !is_valid_email(&normalized) {
                errors.push(FieldError::new(&["email"], "Invalid email"));
            } else {
                submission.email = normalized;
            }
        }
        Some(_) => errors.push(FieldError::new(&["email"], "Expected string")),
    }

    for field in OPTIONAL_FIELDS {
        let value = optional_string(body, field, &[field], &mut errors);
        match field {
            "company" => submission.company = value,
            "invoices_per_month" => submission.invoices_per_month = value,
            "role" => submission.role = value,
            "accounting_system" => submission.accounting_system = value,
            "country" => submission.country = value,
            _ => {}
        }
    }

    match body.get("utm") {
        None | Some(Value::Null) => {}
        Some(Value::Object(utm)) => submission.utm = validate_utm(utm, &mut errors),
        Some(_) => errors.push(FieldError::new(&["utm"], "Expected object")),
    }

    submission.website = honeypot_value(body);

    if errors.is_empty() {
        Ok(submission)
    } else {
        Err(errors)
    }
}

fn validate_utm(utm: &Map<String, Value>, errors: &mut Vec<FieldError>) -> UtmParams {
    let mut params = UtmParams::default();
    for field in UTM_FIELDS {
        let value = optional_string(utm, field, &["utm", field], errors);
        match field {
            "utm_source" => params.utm_source = value,
            "utm_medium" => params.utm_medium = value,
            "utm_campaign" => params.utm_campaign = value,
            "utm_term" => params.utm_term = value,
            "utm_content" => params.utm_content = value,
            _ => {}
        }
    }
    params
}

/// Absent, null and empty strings all become `None`.
fn optional_string(
    object: &Map<String, Value>,
    key: &str,
    path: &[&str],
    errors: &mut Vec<FieldError>,
) -> Option<String> {
    match object.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.chars().count() > MAX_FIELD_LENGTH {
                errors.push(FieldError::new(
                    path,
                    format!("Must be at most {} characters", MAX_FIELD_LENGTH),
                ));
                None
            } else if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Some(_) => {
            errors.push(FieldError::new(path, "Expected string"));
            None
        }
    }
}
