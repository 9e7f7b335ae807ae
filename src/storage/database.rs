//! SQLite database client for persistent storage.
//!
//! Single source of truth for campaigns, leads and stage-run history. Writes
//! are per-row upserts so concurrent stage workers touching different leads
//! never interfere, and collector re-runs merge instead of duplicating.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use uuid::Uuid;

use crate::leads::types::{
    Campaign, CampaignStatus, InferredProfile, Lead, LeadStatus, PersonalizedMessage, ResearchData,
};

use super::migrations::MigrationRunner;

/// Errors that can occur during database operations.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Connection to the database failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    /// Record not found.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Serialization/deserialization error for JSON payload columns.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value could not be interpreted.
    #[error("Invalid stored value: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(#[from] super::migrations::MigrationError),
}

/// Record of one stage execution, kept as a durable audit trail.
#[derive(Debug, Clone)]
pub struct StageRunRecord {
    /// Campaign the stage ran for.
    pub campaign_id: Uuid,
    /// Stage name (e.g. "validation").
    pub stage: String,
    /// Outcome: "completed", "failed" or "skipped".
    pub status: String,
    /// Wall-clock duration, when the stage actually ran.
    pub duration_seconds: Option<f64>,
    /// Leads handed to the stage.
    pub processed_count: u32,
    /// Leads the stage succeeded for.
    pub success_count: u32,
    /// Leads the stage failed for.
    pub error_count: u32,
    /// Error or skip reason.
    pub error_message: Option<String>,
    /// When the record was written.
    pub recorded_at: DateTime<Utc>,
}

/// Aggregate lead statistics for one campaign.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CampaignStats {
    /// Total lead rows.
    pub total_leads: u32,
    /// Leads with email_valid = true.
    pub valid_emails: u32,
    /// Leads with phone_valid = true.
    pub valid_phones: u32,
    /// Leads with an inferred profile.
    pub enriched_leads: u32,
    /// Leads with research attached.
    pub researched_leads: u32,
    /// Leads with a personalized message.
    pub personalized_leads: u32,
    /// Leads in submitted status.
    pub submitted_leads: u32,
}

/// SQLite database client.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connects to the database and returns a new client.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string (e.g. "sqlite://leads.db")
    ///
    /// The database file is created when missing.
    pub async fn connect(database_url: &str) -> Result<Self, DatabaseError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Opens an in-memory database, mainly for tests.
    ///
    /// Uses a single connection: each SQLite in-memory connection is its own
    /// database, so pooling more would lose data between queries.
    pub async fn in_memory() -> Result<Self, DatabaseError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Creates a new database client from an existing pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Runs database migrations.
    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let runner = MigrationRunner::new(self.pool.clone());
        runner.run_migrations().await?;
        Ok(())
    }

    // =========================================================================
    // Campaign Operations
    // =========================================================================

    /// Inserts or fully updates a campaign row.
    pub async fn upsert_campaign(&self, campaign: &Campaign) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO campaigns (
                id, name, query, location, requested_count, from_email, status,
                total_leads, validated_leads, enriched_leads, personalized_leads,
                error_message, created_at, updated_at, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                query = excluded.query,
                location = excluded.location,
                requested_count = excluded.requested_count,
                from_email = excluded.from_email,
                status = excluded.status,
                total_leads = excluded.total_leads,
                validated_leads = excluded.validated_leads,
                enriched_leads = excluded.enriched_leads,
                personalized_leads = excluded.personalized_leads,
                error_message = excluded.error_message,
                updated_at = excluded.updated_at,
                completed_at = excluded.completed_at
            "#,
        )
        .bind(campaign.id.to_string())
        .bind(&campaign.name)
        .bind(&campaign.query)
        .bind(&campaign.location)
        .bind(campaign.requested_count as i64)
        .bind(&campaign.from_email)
        .bind(campaign.status.as_str())
        .bind(campaign.total_leads as i64)
        .bind(campaign.validated_leads as i64)
        .bind(campaign.enriched_leads as i64)
        .bind(campaign.personalized_leads as i64)
        .bind(&campaign.error_message)
        .bind(campaign.created_at)
        .bind(Utc::now())
        .bind(campaign.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Sets a campaign's status, stamping completion for terminal states.
    pub async fn set_campaign_status(
        &self,
        campaign_id: Uuid,
        status: CampaignStatus,
        error_message: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let completed_at = match status {
            CampaignStatus::Completed | CampaignStatus::Failed => Some(Utc::now()),
            _ => None,
        };

        sqlx::query(
            r#"
            UPDATE campaigns
            SET status = ?, error_message = ?, updated_at = ?, completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(error_message)
        .bind(Utc::now())
        .bind(completed_at)
        .bind(campaign_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Updates a campaign's aggregate lead counters.
    pub async fn set_campaign_counts(
        &self,
        campaign_id: Uuid,
        total: u32,
        validated: u32,
        enriched: u32,
        personalized: u32,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            UPDATE campaigns
            SET total_leads = ?, validated_leads = ?, enriched_leads = ?,
                personalized_leads = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(total as i64)
        .bind(validated as i64)
        .bind(enriched as i64)
        .bind(personalized as i64)
        .bind(Utc::now())
        .bind(campaign_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Retrieves a campaign by id. Returns `None` if it does not exist.
    pub async fn get_campaign(&self, campaign_id: Uuid) -> Result<Option<Campaign>, DatabaseError> {
        let row = sqlx::query("SELECT * FROM campaigns WHERE id = ?")
            .bind(campaign_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| campaign_from_row(&r)).transpose()
    }

    /// Lists campaigns, most recently created first.
    pub async fn list_campaigns(&self, limit: u32) -> Result<Vec<Campaign>, DatabaseError> {
        let rows = sqlx::query("SELECT * FROM campaigns ORDER BY created_at DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(campaign_from_row).collect()
    }

    // =========================================================================
    // Lead Operations
    // =========================================================================

    /// Inserts a batch of leads, merging rows that already exist.
    ///
    /// Upserts are keyed by (campaign_id, place_id): re-collecting the same
    /// business refreshes its directory fields but keeps validation flags,
    /// payloads and pipeline status intact.
    pub async fn insert_leads(&self, leads: &[Lead]) -> Result<(), DatabaseError> {
        if leads.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for lead in leads {
            sqlx::query(
                r#"
                INSERT INTO leads (
                    id, campaign_id, place_id, name, address, city, state,
                    postal_code, country, phone, email, website, category,
                    rating, reviews_count, latitude, longitude, status,
                    email_valid, phone_valid, company_valid,
                    profile, research, message, failure_reason,
                    created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (campaign_id, place_id) DO UPDATE SET
                    name = excluded.name,
                    address = excluded.address,
                    city = excluded.city,
                    state = excluded.state,
                    postal_code = excluded.postal_code,
                    country = excluded.country,
                    phone = excluded.phone,
                    email = COALESCE(excluded.email, leads.email),
                    website = excluded.website,
                    category = excluded.category,
                    rating = excluded.rating,
                    reviews_count = excluded.reviews_count,
                    latitude = excluded.latitude,
                    longitude = excluded.longitude,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(lead.id.to_string())
            .bind(lead.campaign_id.to_string())
            .bind(&lead.place_id)
            .bind(&lead.name)
            .bind(&lead.address)
            .bind(&lead.city)
            .bind(&lead.state)
            .bind(&lead.postal_code)
            .bind(&lead.country)
            .bind(&lead.phone)
            .bind(&lead.email)
            .bind(&lead.website)
            .bind(&lead.category)
            .bind(lead.rating)
            .bind(lead.reviews_count)
            .bind(lead.latitude)
            .bind(lead.longitude)
            .bind(lead.status.as_str())
            .bind(lead.email_valid)
            .bind(lead.phone_valid)
            .bind(lead.company_valid)
            .bind(to_json(&lead.profile)?)
            .bind(to_json(&lead.research)?)
            .bind(to_json(&lead.message)?)
            .bind(&lead.failure_reason)
            .bind(lead.created_at)
            .bind(lead.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Writes a lead's mutable fields back to its row.
    pub async fn update_lead(&self, lead: &Lead) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            UPDATE leads SET
                status = ?, email = ?, email_valid = ?, phone_valid = ?,
                company_valid = ?, profile = ?, research = ?, message = ?,
                failure_reason = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(lead.status.as_str())
        .bind(&lead.email)
        .bind(lead.email_valid)
        .bind(lead.phone_valid)
        .bind(lead.company_valid)
        .bind(to_json(&lead.profile)?)
        .bind(to_json(&lead.research)?)
        .bind(to_json(&lead.message)?)
        .bind(&lead.failure_reason)
        .bind(Utc::now())
        .bind(lead.id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Retrieves all leads for a campaign, optionally filtered by status.
    pub async fn get_leads_by_campaign(
        &self,
        campaign_id: Uuid,
        status: Option<LeadStatus>,
    ) -> Result<Vec<Lead>, DatabaseError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT * FROM leads WHERE campaign_id = ? AND status = ? ORDER BY created_at, id",
                )
                .bind(campaign_id.to_string())
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM leads WHERE campaign_id = ? ORDER BY created_at, id")
                    .bind(campaign_id.to_string())
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter().map(lead_from_row).collect()
    }

    /// Counts leads belonging to a campaign.
    pub async fn count_leads(&self, campaign_id: Uuid) -> Result<u32, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM leads WHERE campaign_id = ?")
            .bind(campaign_id.to_string())
            .fetch_one(&self.pool)
            .await?;

        Ok(count as u32)
    }

    // =========================================================================
    // Stage History & Statistics
    // =========================================================================

    /// Records one stage execution in the history table.
    pub async fn record_stage_run(&self, record: &StageRunRecord) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO stage_runs (
                campaign_id, stage, status, duration_seconds,
                processed_count, success_count, error_count, error_message,
                recorded_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.campaign_id.to_string())
        .bind(&record.stage)
        .bind(&record.status)
        .bind(record.duration_seconds)
        .bind(record.processed_count as i64)
        .bind(record.success_count as i64)
        .bind(record.error_count as i64)
        .bind(&record.error_message)
        .bind(record.recorded_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Returns the stage history for a campaign, oldest first.
    pub async fn get_stage_runs(
        &self,
        campaign_id: Uuid,
    ) -> Result<Vec<StageRunRecord>, DatabaseError> {
        let rows = sqlx::query("SELECT * FROM stage_runs WHERE campaign_id = ? ORDER BY id")
            .bind(campaign_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(StageRunRecord {
                    campaign_id: parse_uuid(row.try_get("campaign_id")?)?,
                    stage: row.try_get("stage")?,
                    status: row.try_get("status")?,
                    duration_seconds: row.try_get("duration_seconds")?,
                    processed_count: row.try_get::<i64, _>("processed_count")? as u32,
                    success_count: row.try_get::<i64, _>("success_count")? as u32,
                    error_count: row.try_get::<i64, _>("error_count")? as u32,
                    error_message: row.try_get("error_message")?,
                    recorded_at: row.try_get("recorded_at")?,
                })
            })
            .collect()
    }

    /// Computes aggregate lead statistics for a campaign.
    pub async fn campaign_stats(&self, campaign_id: Uuid) -> Result<CampaignStats, DatabaseError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total_leads,
                SUM(CASE WHEN email_valid = 1 THEN 1 ELSE 0 END) AS valid_emails,
                SUM(CASE WHEN phone_valid = 1 THEN 1 ELSE 0 END) AS valid_phones,
                SUM(CASE WHEN profile IS NOT NULL THEN 1 ELSE 0 END) AS enriched_leads,
                SUM(CASE WHEN research IS NOT NULL THEN 1 ELSE 0 END) AS researched_leads,
                SUM(CASE WHEN message IS NOT NULL THEN 1 ELSE 0 END) AS personalized_leads,
                SUM(CASE WHEN status = 'submitted' THEN 1 ELSE 0 END) AS submitted_leads
            FROM leads
            WHERE campaign_id = ?
            "#,
        )
        .bind(campaign_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        let get = |name: &str| -> Result<u32, DatabaseError> {
            let value: Option<i64> = row.try_get(name)?;
            Ok(value.unwrap_or(0) as u32)
        };

        Ok(CampaignStats {
            total_leads: row.try_get::<i64, _>("total_leads")? as u32,
            valid_emails: get("valid_emails")?,
            valid_phones: get("valid_phones")?,
            enriched_leads: get("enriched_leads")?,
            researched_leads: get("researched_leads")?,
            personalized_leads: get("personalized_leads")?,
            submitted_leads: get("submitted_leads")?,
        })
    }
}

/// Serializes an optional payload to its JSON column form.
fn to_json<T: serde::Serialize>(value: &Option<T>) -> Result<Option<String>, DatabaseError> {
    value
        .as_ref()
        .map(|v| serde_json::to_string(v))
        .transpose()
        .map_err(DatabaseError::from)
}

/// Deserializes an optional JSON column.
fn from_json<T: serde::de::DeserializeOwned>(
    value: Option<String>,
) -> Result<Option<T>, DatabaseError> {
    value
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(DatabaseError::from)
}

fn parse_uuid(raw: String) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(&raw).map_err(|e| DatabaseError::InvalidData(format!("uuid '{}': {}", raw, e)))
}

fn parse_campaign_status(raw: String) -> Result<CampaignStatus, DatabaseError> {
    CampaignStatus::parse(&raw)
        .ok_or_else(|| DatabaseError::InvalidData(format!("campaign status '{}'", raw)))
}

fn parse_lead_status(raw: String) -> Result<LeadStatus, DatabaseError> {
    LeadStatus::parse(&raw)
        .ok_or_else(|| DatabaseError::InvalidData(format!("lead status '{}'", raw)))
}

fn campaign_from_row(row: &SqliteRow) -> Result<Campaign, DatabaseError> {
    Ok(Campaign {
        id: parse_uuid(row.try_get("id")?)?,
        name: row.try_get("name")?,
        query: row.try_get("query")?,
        location: row.try_get("location")?,
        requested_count: row.try_get::<i64, _>("requested_count")? as u32,
        from_email: row.try_get("from_email")?,
        status: parse_campaign_status(row.try_get("status")?)?,
        total_leads: row.try_get::<i64, _>("total_leads")? as u32,
        validated_leads: row.try_get::<i64, _>("validated_leads")? as u32,
        enriched_leads: row.try_get::<i64, _>("enriched_leads")? as u32,
        personalized_leads: row.try_get::<i64, _>("personalized_leads")? as u32,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn lead_from_row(row: &SqliteRow) -> Result<Lead, DatabaseError> {
    Ok(Lead {
        id: parse_uuid(row.try_get("id")?)?,
        campaign_id: parse_uuid(row.try_get("campaign_id")?)?,
        place_id: row.try_get("place_id")?,
        name: row.try_get("name")?,
        address: row.try_get("address")?,
        city: row.try_get("city")?,
        state: row.try_get("state")?,
        postal_code: row.try_get("postal_code")?,
        country: row.try_get("country")?,
        phone: row.try_get("phone")?,
        email: row.try_get("email")?,
        website: row.try_get("website")?,
        category: row.try_get("category")?,
        rating: row.try_get("rating")?,
        reviews_count: row.try_get("reviews_count")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        status: parse_lead_status(row.try_get("status")?)?,
        email_valid: row.try_get("email_valid")?,
        phone_valid: row.try_get("phone_valid")?,
        company_valid: row.try_get("company_valid")?,
        profile: from_json::<InferredProfile>(row.try_get("profile")?)?,
        research: from_json::<ResearchData>(row.try_get("research")?)?,
        message: from_json::<PersonalizedMessage>(row.try_get("message")?)?,
        failure_reason: row.try_get("failure_reason")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
