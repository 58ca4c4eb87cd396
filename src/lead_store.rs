//! Lead persistence. Email is the natural key; the datastore's unique constraint, not
//! application locking, decides which of two racing inserts wins.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{normalize_email, LeadRecord, NewLead};

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result of an insert. A duplicate is a success that changed nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Created,
    Duplicate,
}

impl InsertOutcome {
    pub fn is_duplicate(self) -> bool {
        matches!(self, InsertOutcome::Duplicate)
    }
}

#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Creates the lead unless one with the same normalized email exists.
    async fn insert(&self, lead: &NewLead) -> Result<InsertOutcome, StoreError>;

    /// Sets `email_validated`. Returns the number of rows touched; zero is not an error.
    async fn update_validation(&self, email: &str, validated: bool) -> Result<u64, StoreError>;

    /// Flags the lead as unsubscribed. Returns whether a lead matched.
    async fn mark_unsubscribed(&self, email: &str) -> Result<bool, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<LeadRecord>, StoreError>;
}

/// Postgres-backed store over the `leads` table.
#[derive(Clone)]
pub struct PgLeadStore {
    pool: PgPool,
}

impl PgLeadStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LeadStore for PgLeadStore {
    async fn insert(&self, lead: &NewLead) -> Result<InsertOutcome, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO leads (
                id, email, company, invoices_per_month, role, accounting_system, country,
                utm_source, utm_medium, utm_campaign, utm_term, utm_content,
                user_agent, ip, referer
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (email) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(normalize_email(&lead.email))
        .bind(&lead.company)
        .bind(&lead.invoices_per_month)
        .bind(&lead.role)
        .bind(&lead.accounting_system)
        .bind(&lead.country)
        .bind(&lead.utm.utm_source)
        .bind(&lead.utm.utm_medium)
        .bind(&lead.utm.utm_campaign)
        .bind(&lead.utm.utm_term)
        .bind(&lead.utm.utm_content)
        .bind(&lead.provenance.user_agent)
        .bind(&lead.provenance.ip)
        .bind(&lead.provenance.referer)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => Ok(InsertOutcome::Duplicate),
            Ok(_) => Ok(InsertOutcome::Created),
            Err(e) if is_unique_violation(&e) => Ok(InsertOutcome::Duplicate),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    async fn update_validation(&self, email: &str, validated: bool) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE leads
            SET email_validated = $2, updated_at = now()
            WHERE email = $1
            "#,
        )
        .bind(normalize_email(email))
        .bind(validated)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn mark_unsubscribed(&self, email: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE leads
            SET unsubscribed = true, updated_at = now()
            WHERE email = $1
            "#,
        )
        .bind(normalize_email(email))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<LeadRecord>, StoreError> {
        let record = sqlx::query_as::<_, LeadRecord>("SELECT * FROM leads WHERE email = $1")
            .bind(normalize_email(email))
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db| db.is_unique_violation() || db.code().as_deref() == Some(UNIQUE_VIOLATION))
        .unwrap_or(false)
}

/// Process-local store for local development and tests.
#[derive(Default)]
pub struct InMemoryLeadStore {
    leads: RwLock<HashMap<String, LeadRecord>>,
}

impl InMemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.leads.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.leads.read().await.is_empty()
    }
}

#[async_trait]
impl LeadStore for InMemoryLeadStore {
    async fn insert(&self, lead: &NewLead) -> Result<InsertOutcome, StoreError> {
        let key = normalize_email(&lead.email);
        let mut leads = self.leads.write().await;
        if leads.contains_key(&key) {
            return Ok(InsertOutcome::Duplicate);
        }

        let mut record = LeadRecord::from_new(lead, Utc::now());
        record.email = key.clone();
        leads.insert(key, record);
        Ok(InsertOutcome::Created)
    }

    async fn update_validation(&self, email: &str, validated: bool) -> Result<u64, StoreError> {
        let mut leads = self.leads.write().await;
        match leads.get_mut(&normalize_email(email)) {
            Some(record) => {
                record.email_validated = Some(validated);
                record.updated_at = Utc::now();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn mark_unsubscribed(&self, email: &str) -> Result<bool, StoreError> {
        let mut leads = self.leads.write().await;
        match leads.get_mut(&normalize_email(email)) {
            Some(record) => {
                record.unsubscribed = true;
                record.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<LeadRecord>, StoreError> {
        Ok(self.leads.read().await.get(&normalize_email(email)).cloned())
    }
}
