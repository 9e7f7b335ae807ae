//! Database schema constants.
//!
//! All SQL schema definitions for the SQLite storage backend. Statements are
//! individually executable so the migration runner can apply and track them
//! one at a time.

/// SQL schema for creating the campaigns table.
pub const CREATE_CAMPAIGNS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS campaigns (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    query TEXT NOT NULL,
    location TEXT NOT NULL,
    requested_count INTEGER NOT NULL,
    from_email TEXT NULL,
    status TEXT NOT NULL DEFAULT 'created',
    total_leads INTEGER NOT NULL DEFAULT 0,
    validated_leads INTEGER NOT NULL DEFAULT 0,
    enriched_leads INTEGER NOT NULL DEFAULT 0,
    personalized_leads INTEGER NOT NULL DEFAULT 0,
    error_message TEXT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    completed_at TEXT NULL
)
"#;

/// SQL schema for creating the leads table.
///
/// The (campaign_id, place_id) unique constraint makes collector re-runs
/// idempotent: the same external id upserts into the same row.
pub const CREATE_LEADS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS leads (
    id TEXT PRIMARY KEY,
    campaign_id TEXT NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
    place_id TEXT NOT NULL,
    name TEXT NOT NULL,
    address TEXT NULL,
    city TEXT NULL,
    state TEXT NULL,
    postal_code TEXT NULL,
    country TEXT NULL,
    phone TEXT NULL,
    email TEXT NULL,
    website TEXT NULL,
    category TEXT NULL,
    rating REAL NULL,
    reviews_count INTEGER NULL,
    latitude REAL NULL,
    longitude REAL NULL,
    status TEXT NOT NULL DEFAULT 'collected',
    email_valid INTEGER NULL,
    phone_valid INTEGER NULL,
    company_valid INTEGER NULL,
    profile TEXT NULL,
    research TEXT NULL,
    message TEXT NULL,
    failure_reason TEXT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(campaign_id, place_id)
)
"#;

/// SQL schema for creating the stage_runs history table.
pub const CREATE_STAGE_RUNS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS stage_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    campaign_id TEXT NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
    stage TEXT NOT NULL,
    status TEXT NOT NULL,
    duration_seconds REAL NULL,
    processed_count INTEGER NOT NULL DEFAULT 0,
    success_count INTEGER NOT NULL DEFAULT 0,
    error_count INTEGER NOT NULL DEFAULT 0,
    error_message TEXT NULL,
    recorded_at TEXT NOT NULL
)
"#;

/// Index creation statements.
pub const CREATE_INDEX_LEADS_CAMPAIGN: &str =
    "CREATE INDEX IF NOT EXISTS idx_leads_campaign ON leads(campaign_id)";
pub const CREATE_INDEX_LEADS_STATUS: &str =
    "CREATE INDEX IF NOT EXISTS idx_leads_status ON leads(status)";
pub const CREATE_INDEX_CAMPAIGNS_STATUS: &str =
    "CREATE INDEX IF NOT EXISTS idx_campaigns_status ON campaigns(status)";
pub const CREATE_INDEX_STAGE_RUNS_CAMPAIGN: &str =
    "CREATE INDEX IF NOT EXISTS idx_stage_runs_campaign ON stage_runs(campaign_id)";

/// Returns all schema creation statements in the correct order.
pub fn all_schema_statements() -> Vec<&'static str> {
    vec![
        CREATE_CAMPAIGNS_TABLE,
        CREATE_LEADS_TABLE,
        CREATE_STAGE_RUNS_TABLE,
        CREATE_INDEX_LEADS_CAMPAIGN,
        CREATE_INDEX_LEADS_STATUS,
        CREATE_INDEX_CAMPAIGNS_STATUS,
        CREATE_INDEX_STAGE_RUNS_CAMPAIGN,
    ]
}

/// Table names in the schema.
pub mod tables {
    /// Campaigns table name.
    pub const CAMPAIGNS: &str = "campaigns";
    /// Leads table name.
    pub const LEADS: &str = "leads";
    /// Stage run history table name.
    pub const STAGE_RUNS: &str = "stage_runs";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statements_are_ordered_tables_first() {
        let statements = all_schema_statements();
        assert_eq!(statements.len(), 7);
        assert!(statements[0].contains("campaigns"));
        assert!(statements[1].contains("leads"));
        assert!(statements[2].contains("stage_runs"));
        for index_stmt in &statements[3..] {
            assert!(index_stmt.starts_with("CREATE INDEX"));
        }
    }

    #[test]
    fn leads_table_enforces_source_uniqueness() {
        assert!(CREATE_LEADS_TABLE.contains("UNIQUE(campaign_id, place_id)"));
    }
}
