use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::models::{normalize_email, REQUIRED_CAMPAIGN_TAGS};

/// Provider delivery callback in canonical form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryEvent {
    /// Normalized (trimmed, lowercased) recipient.
    pub email: String,
    pub event: String,
    pub message_id: Option<String>,
    pub reason: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
}

impl DeliveryEvent {
    /// Coerces one loosely-shaped event. `None` when it has no usable email or event name.
    pub fn from_value(raw: &Value) -> Option<Self> {
        let object = raw.as_object()?;

        let email = string_field(raw, "email").map(|e| normalize_email(&e))?;
        if email.is_empty() {
            return None;
        }
        let event = string_field(raw, "event")?;

        let message_id = string_field(raw, "messageId")
            .or_else(|| string_field(raw, "message-id"))
            .or_else(|| string_field(raw, "message_id"));
        let date = string_field(raw, "date")
            .and_then(|d| parse_event_date(&d))
            .or_else(|| {
                object
                    .get("ts_event")
                    .or_else(|| object.get("ts"))
                    .and_then(parse_epoch)
            });

        let tags = object
            .get("tags")
            .or_else(|| object.get("tag"))
            .map(parse_tags)
            .unwrap_or_default();

        Some(Self {
            email,
            event,
            message_id,
            reason: string_field(raw, "reason"),
            date,
            tags,
        })
    }

    pub fn class(&self) -> DeliveryClass {
        DeliveryClass::classify(&self.event)
    }

    /// True when every campaign tag is present (extra tags are fine).
    pub fn has_required_tags(&self) -> bool {
        REQUIRED_CAMPAIGN_TAGS
            .iter()
            .all(|required| self.tags.iter().any(|t| t == required))
    }
}

/// Accepts a single event or an array of events. Each entry that cannot be coerced becomes
/// `None` so the caller can count it without failing the batch.
pub fn normalize_payload(raw: &Value) -> Vec<Option<DeliveryEvent>> {
    match raw {
        Value::Array(events) => events.iter().map(DeliveryEvent::from_value).collect(),
        other => vec![DeliveryEvent::from_value(other)],
    }
}

/// What a delivery event means for the lead's address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryClass {
    Delivered,
    Bounced,
    Ignored,
}

impl DeliveryClass {
    /// Case-insensitive; `hard_bounce`, `hard-bounce` and `hardBounce` are the same event.
    pub fn classify(event: &str) -> Self {
        let key: String = event
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .flat_map(char::to_lowercase)
            .collect();

        match key.as_str() {
            "delivered" | "sent" | "queued" | "processed" | "request" | "requests" => {
                DeliveryClass::Delivered
            }
            "hardbounce" | "hardbounces" | "softbounce" | "softbounces" | "blocked" | "invalid"
            | "invalidemail" | "deferred" | "error" => DeliveryClass::Bounced,
            _ => DeliveryClass::Ignored,
        }
    }

    /// Value written to `email_validated`; `None` means leave the lead alone.
    pub fn validation(self) -> Option<bool> {
        match self {
            DeliveryClass::Delivered => Some(true),
            DeliveryClass::Bounced => Some(false),
            DeliveryClass::Ignored => None,
        }
    }
}

/// Response sent back to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WebhookResponse {
    pub ok: bool,
    pub updated: usize,
    pub skipped: usize,
}

impl WebhookResponse {
    pub fn empty() -> Self {
        Self {
            ok: true,
            updated: 0,
            skipped: 0,
        }
    }
}

fn string_field(raw: &Value, key: &str) -> Option<String> {
    raw.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_tags(raw: &Value) -> Vec<String> {
    match raw {
        Value::Array(items) => items
            .iter()
            .filter_map(|t| t.as_str())
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        Value::String(joined) => joined
            .split('|')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

fn parse_event_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|ndt| Utc.from_utc_datetime(&ndt))
        })
}

fn parse_epoch(raw: &Value) -> Option<DateTime<Utc>> {
    let seconds = match raw {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }?;
    Utc.timestamp_opt(seconds, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_object_and_array() {
        let single = json!({"email": "a@b.co", "event": "delivered"});
        assert_eq!(normalize_payload(&single).len(), 1);

        let batch = json!([
            {"email": "a@b.co", "event": "delivered"},
            {"email": "c@d.co", "event": "hard_bounce"}
        ]);
        let events = normalize_payload(&batch);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(Option::is_some));
    }

    #[test]
    fn test_tag_encodings() {
        let array = DeliveryEvent::from_value(&json!({
            "email": "a@b.co", "event": "delivered", "tags": ["landing-page", "welcome-email"]
        }))
        .unwrap();
        assert!(array.has_required_tags());

        let piped = DeliveryEvent::from_value(&json!({
            "email": "a@b.co", "event": "delivered", "tag": "landing-page|welcome-email|variant-rich"
        }))
        .unwrap();
        assert!(piped.has_required_tags());
        assert_eq!(piped.tags.len(), 3);

        let partial = DeliveryEvent::from_value(&json!({
            "email": "a@b.co", "event": "delivered", "tags": ["landing-page"]
        }))
        .unwrap();
        assert!(!partial.has_required_tags());
    }

    #[test]
    fn test_email_is_normalized() {
        let event =
            DeliveryEvent::from_value(&json!({"email": "  X@Y.COM ", "event": "sent"})).unwrap();
        assert_eq!(event.email, "x@y.com");
    }

    #[test]
    fn test_malformed_events_are_none() {
        assert!(DeliveryEvent::from_value(&json!("delivered")).is_none());
        assert!(DeliveryEvent::from_value(&json!({"event": "delivered"})).is_none());
        assert!(DeliveryEvent::from_value(&json!({"email": "a@b.co"})).is_none());
        assert!(DeliveryEvent::from_value(&json!({"email": 7, "event": "delivered"})).is_none());
        assert!(DeliveryEvent::from_value(&json!({"email": "  ", "event": "delivered"})).is_none());
    }

    #[test]
    fn test_classification() {
        for name in ["delivered", "SENT", "queued", "processed", "requests", "request"] {
            assert_eq!(DeliveryClass::classify(name), DeliveryClass::Delivered, "{}", name);
        }
        for name in [
            "hard_bounce",
            "soft_bounce",
            "hardBounce",
            "softBounces",
            "blocked",
            "invalid",
            "invalid_email",
            "invalidEmail",
            "deferred",
            "error",
        ] {
            assert_eq!(DeliveryClass::classify(name), DeliveryClass::Bounced, "{}", name);
        }
        for name in ["opened", "click", "spam", "unsubscribed", ""] {
            assert_eq!(DeliveryClass::classify(name), DeliveryClass::Ignored, "{}", name);
        }
    }

    #[test]
    fn test_event_dates() {
        let event = DeliveryEvent::from_value(&json!({
            "email": "a@b.co", "event": "delivered", "date": "2024-03-01 10:15:00"
        }))
        .unwrap();
        assert_eq!(event.date.unwrap().to_rfc3339(), "2024-03-01T10:15:00+00:00");

        let event = DeliveryEvent::from_value(&json!({
            "email": "a@b.co", "event": "delivered", "ts_event": 1709288100
        }))
        .unwrap();
        assert_eq!(event.date.unwrap().timestamp(), 1709288100);

        let event = DeliveryEvent::from_value(&json!({
            "email": "a@b.co", "event": "delivered", "date": "last tuesday"
        }))
        .unwrap();
        assert!(event.date.is_none());
    }

    #[test]
    fn test_message_id_and_reason() {
        let event = DeliveryEvent::from_value(&json!({
            "email": "a@b.co",
            "event": "soft_bounce",
            "message-id": "<abc@smtp>",
            "reason": "mailbox full"
        }))
        .unwrap();
        assert_eq!(event.message_id.as_deref(), Some("<abc@smtp>"));
        assert_eq!(event.reason.as_deref(), Some("mailbox full"));
        assert_eq!(event.class().validation(), Some(false));
    }
}
