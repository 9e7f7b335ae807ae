//! External capability interfaces and their production clients.
//!
//! Each pipeline stage depends on a capability trait, not a concrete client,
//! so the orchestrator can be exercised with test doubles and so that missing
//! configuration cleanly disables optional stages. The concrete clients wrap
//! one external service each.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::leads::types::{Lead, PersonalizedMessage, ResearchData};
use crate::pipeline::config::PipelineConfig;

pub mod campaigns;
pub mod personalizer;
pub mod places;
pub mod research;

pub use campaigns::InstantlyClient;
pub use personalizer::AnthropicPersonalizer;
pub use places::{GooglePlacesClient, PlaceRecord};
pub use research::PerplexityResearcher;

/// Errors that can occur when calling an external capability.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// The capability has no configuration (API key missing).
    #[error("{capability} is not configured")]
    NotConfigured {
        /// Name of the capability.
        capability: &'static str,
    },

    /// HTTP transport failure (connect error, request timeout).
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The service rejected our credentials.
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    /// The service is down or refusing all calls.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Call quota exhausted.
    #[error("rate limited: retry after {retry_after:?} seconds")]
    RateLimited {
        /// Optional retry-after hint in seconds.
        retry_after: Option<u64>,
    },

    /// The service answered with something we could not interpret.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CapabilityError {
    /// Whether this error indicates the whole capability is unusable.
    ///
    /// Unavailability is not retried per lead; the orchestrator skips the
    /// stage entirely when every call fails this way.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            CapabilityError::NotConfigured { .. }
                | CapabilityError::AuthRejected(_)
                | CapabilityError::Unavailable(_)
        )
    }

    /// Whether a retry with backoff is worthwhile.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CapabilityError::Http(_) | CapabilityError::RateLimited { .. }
        )
    }
}

/// Result type alias for capability calls.
pub type CapabilityResult<T> = Result<T, CapabilityError>;

/// Directory of businesses searchable by category and location.
///
/// This is the mandatory collection capability; a pipeline cannot start
/// without it.
#[async_trait]
pub trait PlacesDirectory: Send + Sync {
    /// Searches for businesses matching `query` near `location`.
    ///
    /// Returns at most `max_results` records. An empty result is not an
    /// error; the orchestrator decides how to treat it.
    async fn search(
        &self,
        query: &str,
        location: &str,
        max_results: usize,
    ) -> CapabilityResult<Vec<PlaceRecord>>;
}

/// AI-backed company research service.
#[async_trait]
pub trait CompanyResearcher: Send + Sync {
    /// Produces a research summary for a single lead.
    async fn research(&self, lead: &Lead) -> CapabilityResult<ResearchData>;
}

/// AI-backed outreach message generator.
#[async_trait]
pub trait MessagePersonalizer: Send + Sync {
    /// Produces a personalized outreach message for a single lead.
    async fn personalize(&self, lead: &Lead) -> CapabilityResult<PersonalizedMessage>;
}

/// External email campaign platform.
#[async_trait]
pub trait CampaignPlatform: Send + Sync {
    /// Creates (or reuses) a platform campaign and returns its identifier.
    async fn ensure_campaign(&self, name: &str, from_email: &str) -> CapabilityResult<String>;

    /// Adds one lead to a platform campaign.
    ///
    /// Submission is at-least-once: the platform deduplicates by email, so
    /// retried calls are safe.
    async fn submit_lead(&self, platform_campaign_id: &str, lead: &Lead) -> CapabilityResult<()>;
}

/// The set of capabilities available to the orchestrator.
///
/// Built once from configuration; optional stages are planned out when their
/// capability is `None`.
#[derive(Clone, Default)]
pub struct CapabilitySet {
    /// Mandatory collection capability.
    pub places: Option<Arc<dyn PlacesDirectory>>,
    /// Optional research capability.
    pub researcher: Option<Arc<dyn CompanyResearcher>>,
    /// Optional personalization capability.
    pub personalizer: Option<Arc<dyn MessagePersonalizer>>,
    /// Optional campaign submission capability.
    pub campaigns: Option<Arc<dyn CampaignPlatform>>,
}

impl CapabilitySet {
    /// Builds production clients for every configured capability.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let places = config
            .google_places_api_key
            .as_ref()
            .map(|key| Arc::new(GooglePlacesClient::new(key.clone())) as Arc<dyn PlacesDirectory>);

        let researcher = config.perplexity_api_key.as_ref().map(|key| {
            Arc::new(PerplexityResearcher::new(key.clone())) as Arc<dyn CompanyResearcher>
        });

        let personalizer = config.anthropic_api_key.as_ref().map(|key| {
            Arc::new(AnthropicPersonalizer::new(key.clone())) as Arc<dyn MessagePersonalizer>
        });

        let campaigns = config
            .instantly_api_key
            .as_ref()
            .map(|key| Arc::new(InstantlyClient::new(key.clone())) as Arc<dyn CampaignPlatform>);

        Self {
            places,
            researcher,
            personalizer,
            campaigns,
        }
    }

    /// Computes the configuration status snapshot exposed by `configCheck`.
    pub fn status(&self) -> ConfigStatus {
        let mut missing = Vec::new();
        if self.places.is_none() {
            missing.push("GOOGLE_PLACES_API_KEY".to_string());
        }
        if self.researcher.is_none() {
            missing.push("PERPLEXITY_API_KEY".to_string());
        }
        if self.personalizer.is_none() {
            missing.push("ANTHROPIC_API_KEY".to_string());
        }
        if self.campaigns.is_none() {
            missing.push("INSTANTLY_API_KEY".to_string());
        }

        ConfigStatus {
            places: self.places.is_some(),
            // Validation is built in and needs no external credentials.
            validation: true,
            research: self.researcher.is_some(),
            personalization: self.personalizer.is_some(),
            campaigns: self.campaigns.is_some(),
            missing,
        }
    }
}

/// Snapshot of which capabilities are configured.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigStatus {
    /// Places directory configured.
    pub places: bool,
    /// Validation available (always true; built in).
    pub validation: bool,
    /// Research service configured.
    pub research: bool,
    /// Personalization service configured.
    pub personalization: bool,
    /// Campaign platform configured.
    pub campaigns: bool,
    /// Environment variables that are missing.
    pub missing: Vec<String>,
}

impl ConfigStatus {
    /// Ready to collect leads (collection only).
    pub fn ready_for_scraping(&self) -> bool {
        self.places
    }

    /// Ready to run the core pipeline (collection + validation).
    pub fn ready_for_pipeline(&self) -> bool {
        self.places && self.validation
    }

    /// Ready to submit campaigns (collection + validation + submission).
    pub fn ready_for_campaigns(&self) -> bool {
        self.ready_for_pipeline() && self.campaigns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(CapabilityError::AuthRejected("bad key".into()).is_unavailable());
        assert!(CapabilityError::Unavailable("down".into()).is_unavailable());
        assert!(CapabilityError::NotConfigured { capability: "places" }.is_unavailable());
        assert!(!CapabilityError::Http("reset".into()).is_unavailable());

        assert!(CapabilityError::Http("reset".into()).is_retryable());
        assert!(CapabilityError::RateLimited { retry_after: None }.is_retryable());
        assert!(!CapabilityError::AuthRejected("bad key".into()).is_retryable());
        assert!(!CapabilityError::InvalidResponse("garbage".into()).is_retryable());
    }

    #[test]
    fn empty_capability_set_reports_missing() {
        let set = CapabilitySet::default();
        let status = set.status();

        assert!(!status.places);
        assert!(status.validation);
        assert!(!status.ready_for_scraping());
        assert!(!status.ready_for_pipeline());
        assert!(!status.ready_for_campaigns());
        assert_eq!(status.missing.len(), 4);
        assert!(status.missing.contains(&"GOOGLE_PLACES_API_KEY".to_string()));
    }

    #[test]
    fn readiness_is_composite() {
        let status = ConfigStatus {
            places: true,
            validation: true,
            research: false,
            personalization: false,
            campaigns: false,
            missing: vec![],
        };
        assert!(status.ready_for_scraping());
        assert!(status.ready_for_pipeline());
        assert!(!status.ready_for_campaigns());

        let status = ConfigStatus {
            campaigns: true,
            ..status
        };
        assert!(status.ready_for_campaigns());
    }
}
