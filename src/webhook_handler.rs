use crate::errors::AppError;
use crate::handlers::AppState;
use crate::lead_store::LeadStore;
use crate::webhook_models::{normalize_payload, DeliveryClass, WebhookResponse};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::Value;
use std::sync::Arc;

/// Email delivery webhook.
///
/// Receives Brevo delivery events and reconciles `email_validated` on the matching lead.
/// Only events carrying the campaign tags touch lead state; everything else is counted as
/// skipped. Always answers 200 once the body parses.
///
/// Expected payload: single event object OR array of events.
/// Authentication: X-Webhook-Token header must match EMAIL_WEBHOOK_SECRET when it is set.
pub async fn email_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<WebhookResponse>), AppError> {
    tracing::info!("Received email delivery webhook");

    validate_webhook_secret(&state, &headers)?;

    let payload: Value = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!("Webhook body is not valid JSON: {}", e);
        AppError::BadRequest("Invalid JSON".to_string())
    })?;

    let store = state.store.as_ref().ok_or_else(|| {
        AppError::Configuration("Lead store not configured for delivery webhook".to_string())
    })?;

    let summary = process(store.as_ref(), &payload).await;

    Ok((StatusCode::OK, Json(summary)))
}

/// Applies every event in the payload. One bad event never fails the batch.
pub async fn process(store: &dyn LeadStore, payload: &Value) -> WebhookResponse {
    let events = normalize_payload(payload);
    let total_received = events.len();
    tracing::info!("Processing {} delivery event(s)", total_received);

    let mut summary = WebhookResponse::empty();

    for event in events {
        let Some(event) = event else {
            tracing::debug!("Skipped malformed delivery event");
            summary.skipped += 1;
            continue;
        };

        if !event.has_required_tags() {
            tracing::debug!(
                "Skipped untagged delivery event: email={}, event={}, tags={:?}",
                event.email,
                event.event,
                event.tags
            );
            summary.skipped += 1;
            continue;
        }

        let class = event.class();
        let Some(validated) = class.validation() else {
            tracing::debug!("Ignored delivery event '{}' for {}", event.event, event.email);
            summary.skipped += 1;
            continue;
        };

        match store.update_validation(&event.email, validated).await {
            Ok(rows) => {
                if rows == 0 {
                    tracing::debug!("No lead yet for {}; nothing to update", event.email);
                }
                if class == DeliveryClass::Bounced {
                    tracing::warn!(
                        "Bounce for {}: event={}, reason={:?}, message_id={:?}, date={:?}",
                        event.email,
                        event.event,
                        event.reason,
                        event.message_id,
                        event.date
                    );
                } else {
                    tracing::info!(
                        "Delivery confirmed for {}: event={}, message_id={:?}",
                        event.email,
                        event.event,
                        event.message_id
                    );
                }
                summary.updated += 1;
            }
            Err(e) => {
                tracing::error!("Failed to update validation for {}: {}", event.email, e);
                summary.skipped += 1;
            }
        }
    }

    tracing::info!(
        "Webhook processing complete: {} received, {} updated, {} skipped",
        total_received,
        summary.updated,
        summary.skipped
    );

    summary
}

/// Validate webhook secret from X-Webhook-Token header
fn validate_webhook_secret(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(ref expected_secret) = state.config.webhook_secret else {
        return Ok(());
    };

    let token = headers
        .get("x-webhook-token")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing X-Webhook-Token header".to_string()))?;

    if !constant_time_compare(token, expected_secret) {
        return Err(AppError::Unauthorized("Invalid webhook token".to_string()));
    }

    Ok(())
}

/// Constant-time string comparison
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.as_bytes()
        .iter()
        .zip(b.as_bytes().iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lead_store::InMemoryLeadStore;
    use crate::models::{EmailValidation, NewLead, RequestProvenance, UtmParams};
    use serde_json::json;

    async fn store_with(emails: &[&str]) -> InMemoryLeadStore {
        let store = InMemoryLeadStore::new();
        for email in emails {
            store
                .insert(&NewLead {
                    email: email.to_string(),
                    company: None,
                    invoices_per_month: None,
                    role: None,
                    accounting_system: None,
                    country: None,
                    utm: UtmParams::default(),
                    provenance: RequestProvenance::default(),
                })
                .await
                .unwrap();
        }
        store
    }

    async fn validation_of(store: &InMemoryLeadStore, email: &str) -> EmailValidation {
        store.find_by_email(email).await.unwrap().unwrap().validation()
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("secret", "secret"));
        assert!(!constant_time_compare("secret", "secreT"));
        assert!(!constant_time_compare("secret", "secret-longer"));
    }

    #[tokio::test]
    async fn test_tagged_delivered_sets_valid() {
        let store = store_with(&["x@y.com"]).await;
        let summary = process(
            &store,
            &json!({"email": "X@y.com", "event": "delivered", "tags": ["landing-page", "welcome-email"]}),
        )
        .await;

        assert_eq!(summary, WebhookResponse { ok: true, updated: 1, skipped: 0 });
        assert_eq!(validation_of(&store, "x@y.com").await, EmailValidation::Valid);
    }

    #[tokio::test]
    async fn test_untagged_event_does_not_mutate() {
        let store = store_with(&["x@y.com"]).await;
        let summary = process(
            &store,
            &json!({"email": "x@y.com", "event": "hard_bounce", "tags": ["newsletter"]}),
        )
        .await;

        assert_eq!(summary, WebhookResponse { ok: true, updated: 0, skipped: 1 });
        assert_eq!(validation_of(&store, "x@y.com").await, EmailValidation::Unknown);
    }

    #[tokio::test]
    async fn test_ignored_class_is_skipped() {
        let store = store_with(&["x@y.com"]).await;
        let summary = process(
            &store,
            &json!({"email": "x@y.com", "event": "opened", "tag": "landing-page|welcome-email"}),
        )
        .await;

        assert_eq!(summary.skipped, 1);
        assert_eq!(validation_of(&store, "x@y.com").await, EmailValidation::Unknown);
    }

    #[tokio::test]
    async fn test_event_for_unknown_lead_counts_as_update() {
        let store = store_with(&[]).await;
        let summary = process(
            &store,
            &json!({"email": "later@y.com", "event": "delivered", "tags": ["landing-page", "welcome-email"]}),
        )
        .await;

        assert_eq!(summary.updated, 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_non_object_entries_are_skipped() {
        let store = store_with(&["x@y.com"]).await;
        let summary = process(
            &store,
            &json!([
                42,
                {"email": "x@y.com", "event": "delivered", "tags": ["landing-page", "welcome-email"]}
            ]),
        )
        .await;

        assert_eq!(summary, WebhookResponse { ok: true, updated: 1, skipped: 1 });
    }
}
