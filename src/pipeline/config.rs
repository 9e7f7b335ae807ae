//! Pipeline configuration.
//!
//! Collects API credentials, stage toggles, worker-pool sizing, rate-limit
//! floors and retry policy in one place. Values come from the environment
//! with builder overrides for tests and embedding.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for the pipeline orchestrator.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    // Capability credentials
    /// API key for the places directory (mandatory capability).
    pub google_places_api_key: Option<String>,
    /// API key for the research service.
    pub perplexity_api_key: Option<String>,
    /// API key for the personalization service.
    pub anthropic_api_key: Option<String>,
    /// API key for the campaign platform.
    pub instantly_api_key: Option<String>,
    /// Default sender address for campaign submission.
    pub from_email: Option<String>,

    // Stage toggles
    /// Whether to run profile inference on validated leads.
    pub enable_profile_inference: bool,
    /// Whether to run the research stage when configured.
    pub enable_research: bool,
    /// Whether to run the personalization stage when configured.
    pub enable_personalization: bool,
    /// Whether to submit validated leads to the campaign platform.
    pub enable_campaign_submission: bool,
    /// Whether personalization requires research output for a lead's
    /// campaign. When false (the default), personalization only depends on
    /// validation having run.
    pub personalization_requires_research: bool,
    /// Whether to export a CSV at the end of each run.
    pub enable_export: bool,

    // Worker pools
    /// Concurrent validation calls.
    pub validation_workers: usize,
    /// Concurrent research calls.
    pub research_workers: usize,
    /// Concurrent personalization calls.
    pub personalization_workers: usize,
    /// Concurrent submission calls.
    pub submission_workers: usize,

    // Per-capability rate-limit floors (minimum delay between calls)
    /// Floor for validation probes.
    pub validation_delay: Duration,
    /// Floor for research calls.
    pub research_delay: Duration,
    /// Floor for personalization calls.
    pub personalization_delay: Duration,
    /// Floor for submission calls.
    pub submission_delay: Duration,

    // Timeouts and retry policy
    /// Timeout for one validation call.
    pub validation_timeout: Duration,
    /// Timeout for one research call.
    pub research_timeout: Duration,
    /// Timeout for one personalization call.
    pub personalization_timeout: Duration,
    /// Timeout for one submission call.
    pub submission_timeout: Duration,
    /// Wall-clock budget for a whole stage; unscheduled leads are failed
    /// once it elapses.
    pub stage_budget: Duration,
    /// Attempts per lead before a stage failure is permanent.
    pub max_attempts: u32,
    /// Base delay for exponential retry backoff.
    pub retry_base_delay: Duration,

    // Validation behavior
    /// Whether the company check may probe websites over the network.
    pub check_websites: bool,

    // Storage and export
    /// SQLite connection string.
    pub database_url: String,
    /// Directory for exported files.
    pub export_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            google_places_api_key: None,
            perplexity_api_key: None,
            anthropic_api_key: None,
            instantly_api_key: None,
            from_email: None,

            enable_profile_inference: true,
            enable_research: true,
            enable_personalization: true,
            enable_campaign_submission: false,
            personalization_requires_research: false,
            enable_export: true,

            validation_workers: 10,
            research_workers: 4,
            personalization_workers: 3,
            submission_workers: 5,

            validation_delay: Duration::from_millis(100),
            research_delay: Duration::from_secs(1),
            personalization_delay: Duration::from_secs(1),
            submission_delay: Duration::from_millis(500),

            validation_timeout: Duration::from_secs(5),
            research_timeout: Duration::from_secs(30),
            personalization_timeout: Duration::from_secs(20),
            submission_timeout: Duration::from_secs(15),
            stage_budget: Duration::from_secs(300),
            max_attempts: 3,
            retry_base_delay: Duration::from_secs(1),

            check_websites: true,

            database_url: "sqlite://leads.db".to_string(),
            export_dir: PathBuf::from("./data"),
        }
    }
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `GOOGLE_PLACES_API_KEY`: places directory key (mandatory capability)
    /// - `PERPLEXITY_API_KEY`: research service key
    /// - `ANTHROPIC_API_KEY`: personalization service key
    /// - `INSTANTLY_API_KEY`: campaign platform key
    /// - `INSTANTLY_FROM_EMAIL`: default sender address
    /// - `DATABASE_URL`: SQLite connection string (default: sqlite://leads.db)
    /// - `LEADFORGE_EXPORT_DIR`: export directory (default: ./data)
    /// - `LEADFORGE_VALIDATION_WORKERS`: validation pool size (default: 10)
    /// - `LEADFORGE_RESEARCH_WORKERS`: research pool size (default: 4)
    /// - `LEADFORGE_PERSONALIZATION_WORKERS`: personalization pool size (default: 3)
    /// - `LEADFORGE_STAGE_BUDGET_SECS`: stage wall-clock budget (default: 300)
    /// - `LEADFORGE_MAX_ATTEMPTS`: per-lead attempt budget (default: 3)
    /// - `LEADFORGE_CHECK_WEBSITES`: enable website probes (default: true)
    /// - `LEADFORGE_PERSONALIZATION_REQUIRES_RESEARCH`: gate personalization
    ///   on research having run (default: false)
    ///
    /// Campaign submission is enabled automatically when both the platform
    /// key and a sender address are present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        config.google_places_api_key = env_opt("GOOGLE_PLACES_API_KEY");
        config.perplexity_api_key = env_opt("PERPLEXITY_API_KEY");
        config.anthropic_api_key = env_opt("ANTHROPIC_API_KEY");
        config.instantly_api_key = env_opt("INSTANTLY_API_KEY");
        config.from_email = env_opt("INSTANTLY_FROM_EMAIL");

        if let Ok(val) = std::env::var("DATABASE_URL") {
            config.database_url = val;
        }
        if let Ok(val) = std::env::var("LEADFORGE_EXPORT_DIR") {
            config.export_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("LEADFORGE_VALIDATION_WORKERS") {
            config.validation_workers = parse_env_value(&val, "LEADFORGE_VALIDATION_WORKERS")?;
        }
        if let Ok(val) = std::env::var("LEADFORGE_RESEARCH_WORKERS") {
            config.research_workers = parse_env_value(&val, "LEADFORGE_RESEARCH_WORKERS")?;
        }
        if let Ok(val) = std::env::var("LEADFORGE_PERSONALIZATION_WORKERS") {
            config.personalization_workers =
                parse_env_value(&val, "LEADFORGE_PERSONALIZATION_WORKERS")?;
        }
        if let Ok(val) = std::env::var("LEADFORGE_STAGE_BUDGET_SECS") {
            let secs: u64 = parse_env_value(&val, "LEADFORGE_STAGE_BUDGET_SECS")?;
            config.stage_budget = Duration::from_secs(secs);
        }
        if let Ok(val) = std::env::var("LEADFORGE_MAX_ATTEMPTS") {
            config.max_attempts = parse_env_value(&val, "LEADFORGE_MAX_ATTEMPTS")?;
        }
        if let Ok(val) = std::env::var("LEADFORGE_CHECK_WEBSITES") {
            config.check_websites = parse_env_bool(&val, "LEADFORGE_CHECK_WEBSITES")?;
        }
        if let Ok(val) = std::env::var("LEADFORGE_PERSONALIZATION_REQUIRES_RESEARCH") {
            config.personalization_requires_research =
                parse_env_bool(&val, "LEADFORGE_PERSONALIZATION_REQUIRES_RESEARCH")?;
        }

        // Submission needs both a key and a sender address.
        if config.instantly_api_key.is_some() && config.from_email.is_some() {
            config.enable_campaign_submission = true;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.validation_workers == 0 || self.validation_workers > 20 {
            return Err(ConfigError::ValidationFailed(
                "validation_workers must be between 1 and 20".to_string(),
            ));
        }
        if self.research_workers == 0 || self.research_workers > 10 {
            return Err(ConfigError::ValidationFailed(
                "research_workers must be between 1 and 10".to_string(),
            ));
        }
        if self.personalization_workers == 0 || self.personalization_workers > 5 {
            return Err(ConfigError::ValidationFailed(
                "personalization_workers must be between 1 and 5".to_string(),
            ));
        }
        if self.submission_workers == 0 {
            return Err(ConfigError::ValidationFailed(
                "submission_workers must be greater than 0".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_attempts must be greater than 0".to_string(),
            ));
        }
        if self.stage_budget.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "stage_budget must be greater than 0".to_string(),
            ));
        }
        if self.database_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "database_url cannot be empty".to_string(),
            ));
        }
        if self.enable_campaign_submission && self.from_email.is_none() {
            return Err(ConfigError::ValidationFailed(
                "campaign submission requires a from_email".to_string(),
            ));
        }
        Ok(())
    }

    /// Builder method to set the places directory API key.
    pub fn with_google_places_api_key(mut self, key: impl Into<String>) -> Self {
        self.google_places_api_key = Some(key.into());
        self
    }

    /// Builder method to set the research API key.
    pub fn with_perplexity_api_key(mut self, key: impl Into<String>) -> Self {
        self.perplexity_api_key = Some(key.into());
        self
    }

    /// Builder method to set the personalization API key.
    pub fn with_anthropic_api_key(mut self, key: impl Into<String>) -> Self {
        self.anthropic_api_key = Some(key.into());
        self
    }

    /// Builder method to set the campaign platform API key.
    pub fn with_instantly_api_key(mut self, key: impl Into<String>) -> Self {
        self.instantly_api_key = Some(key.into());
        self
    }

    /// Builder method to set the default sender address.
    pub fn with_from_email(mut self, email: impl Into<String>) -> Self {
        self.from_email = Some(email.into());
        self
    }

    /// Builder method to enable or disable campaign submission.
    pub fn with_campaign_submission(mut self, enabled: bool) -> Self {
        self.enable_campaign_submission = enabled;
        self
    }

    /// Builder method to gate personalization on research.
    pub fn with_personalization_requires_research(mut self, required: bool) -> Self {
        self.personalization_requires_research = required;
        self
    }

    /// Builder method to set the database URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    /// Builder method to set the export directory.
    pub fn with_export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.export_dir = dir.into();
        self
    }

    /// Builder method to set the stage wall-clock budget.
    pub fn with_stage_budget(mut self, budget: Duration) -> Self {
        self.stage_budget = budget;
        self
    }

    /// Builder method to set the per-lead attempt budget.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Builder method to set the retry base delay.
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Builder method to enable or disable website probing.
    pub fn with_check_websites(mut self, enabled: bool) -> Self {
        self.check_websites = enabled;
        self
    }
}

/// Reads an environment variable, treating empty values as unset.
fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}
