//! Core domain types for campaigns and leads.
//!
//! A `Campaign` represents one lead-generation request; `Lead` is a single
//! candidate business tracked through the pipeline stages. Both are durable
//! rows owned by the storage layer.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capabilities::places::PlaceRecord;

/// Lifecycle status of a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    /// Campaign row created, pipeline not yet started.
    Created,
    /// Pipeline is executing.
    Running,
    /// Pipeline finished successfully.
    Completed,
    /// Pipeline aborted with an error.
    Failed,
}

impl CampaignStatus {
    /// Returns the status as its stored string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Created => "created",
            CampaignStatus::Running => "running",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Failed => "failed",
        }
    }

    /// Parses a stored status string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(CampaignStatus::Created),
            "running" => Some(CampaignStatus::Running),
            "completed" => Some(CampaignStatus::Completed),
            "failed" => Some(CampaignStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One lead-generation request and its resulting lead set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    /// Stable, externally addressable identifier.
    pub id: Uuid,
    /// Human-readable campaign name.
    pub name: String,
    /// Business category query (e.g. "dentists").
    pub query: String,
    /// Target location (e.g. "Austin, TX").
    pub location: String,
    /// Number of leads requested.
    pub requested_count: u32,
    /// Sender address for campaign submission, if any.
    pub from_email: Option<String>,
    /// Current campaign status.
    pub status: CampaignStatus,
    /// Total leads collected so far.
    pub total_leads: u32,
    /// Leads that passed email validation.
    pub validated_leads: u32,
    /// Leads with an inferred profile attached.
    pub enriched_leads: u32,
    /// Leads with a personalized message attached.
    pub personalized_leads: u32,
    /// Error message for failed campaigns.
    pub error_message: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Completion timestamp, set on terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Campaign {
    /// Creates a new campaign from a generation request.
    pub fn new(request: &GenerationRequest) -> Self {
        let now = Utc::now();
        let name = request
            .campaign_name
            .clone()
            .unwrap_or_else(|| format!("{} in {}", request.query, request.location));

        Self {
            id: Uuid::new_v4(),
            name,
            query: request.query.clone(),
            location: request.location.clone(),
            requested_count: request.count,
            from_email: request.from_email.clone(),
            status: CampaignStatus::Created,
            total_leads: 0,
            validated_leads: 0,
            enriched_leads: 0,
            personalized_leads: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// Lifecycle status of a lead.
///
/// The status only ever advances forward through the pipeline, or moves to
/// `Failed`; it never regresses to an earlier stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    /// Discovered by the collector, not yet validated.
    Collected,
    /// Contact fields have been validated.
    Validated,
    /// Profile inference attached.
    Enriched,
    /// Company research attached.
    Researched,
    /// Personalized message attached.
    Personalized,
    /// Pushed to the external campaign platform.
    Submitted,
    /// A stage failed permanently for this lead.
    Failed,
}

impl LeadStatus {
    /// Pipeline position used to enforce forward-only transitions.
    fn rank(&self) -> u8 {
        match self {
            LeadStatus::Collected => 0,
            LeadStatus::Validated => 1,
            LeadStatus::Enriched => 2,
            LeadStatus::Researched => 3,
            LeadStatus::Personalized => 4,
            LeadStatus::Submitted => 5,
            // Failed is absorbing, not part of the forward ordering.
            LeadStatus::Failed => u8::MAX,
        }
    }

    /// Returns the status as its stored string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::Collected => "collected",
            LeadStatus::Validated => "validated",
            LeadStatus::Enriched => "enriched",
            LeadStatus::Researched => "researched",
            LeadStatus::Personalized => "personalized",
            LeadStatus::Submitted => "submitted",
            LeadStatus::Failed => "failed",
        }
    }

    /// Parses a stored status string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "collected" => Some(LeadStatus::Collected),
            "validated" => Some(LeadStatus::Validated),
            "enriched" => Some(LeadStatus::Enriched),
            "researched" => Some(LeadStatus::Researched),
            "personalized" => Some(LeadStatus::Personalized),
            "submitted" => Some(LeadStatus::Submitted),
            "failed" => Some(LeadStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Inferred company profile attached by the enrichment stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferredProfile {
    /// Always true; the profile is inferred, not scraped.
    pub inferred: bool,
    /// Company name the profile was inferred from.
    pub company_name: String,
    /// Industry derived from the lead's category.
    pub industry: Option<String>,
    /// City derived from the lead's address.
    pub location: Option<String>,
    /// Confidence in the inference (0.0 - 1.0).
    pub confidence: f64,
    /// Public profile URL when one could be derived.
    pub profile_url: Option<String>,
}

/// Company research summary attached by the research stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchData {
    /// Short overview of the company.
    pub overview: String,
    /// Insights about the company's industry.
    pub industry_insights: String,
    /// Notable challenges or opportunities surfaced by research.
    pub highlights: Vec<String>,
    /// When the research was performed.
    pub researched_at: DateTime<Utc>,
    /// Model or source that produced the research.
    pub source: String,
}

/// Outreach message produced by the personalization stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonalizedMessage {
    /// Email subject line.
    pub subject: String,
    /// Email body.
    pub body: String,
    /// Template family the message was derived from.
    pub template: String,
    /// When the message was generated.
    pub created_at: DateTime<Utc>,
}

/// One candidate business tracked through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    /// Internal identifier.
    pub id: Uuid,
    /// Owning campaign.
    pub campaign_id: Uuid,
    /// External source identifier; upsert key together with `campaign_id`.
    pub place_id: String,
    /// Business name.
    pub name: String,
    /// Full formatted address.
    pub address: Option<String>,
    /// City parsed from the address.
    pub city: Option<String>,
    /// State or region parsed from the address.
    pub state: Option<String>,
    /// Postal code parsed from the address.
    pub postal_code: Option<String>,
    /// Country parsed from the address.
    pub country: Option<String>,
    /// Phone number as reported by the directory.
    pub phone: Option<String>,
    /// Contact email, when known.
    pub email: Option<String>,
    /// Website URL.
    pub website: Option<String>,
    /// Primary business category.
    pub category: Option<String>,
    /// Directory rating (e.g. 4.5).
    pub rating: Option<f64>,
    /// Number of directory reviews.
    pub reviews_count: Option<i64>,
    /// Latitude of the business location.
    pub latitude: Option<f64>,
    /// Longitude of the business location.
    pub longitude: Option<f64>,
    /// Pipeline lifecycle status.
    pub status: LeadStatus,
    /// Email validation result; `None` until validation ran.
    pub email_valid: Option<bool>,
    /// Phone validation result; `None` until validation ran.
    pub phone_valid: Option<bool>,
    /// Company validation result; `None` until validation ran.
    pub company_valid: Option<bool>,
    /// Inferred profile payload, set by enrichment.
    pub profile: Option<InferredProfile>,
    /// Research payload, set by the research stage.
    pub research: Option<ResearchData>,
    /// Personalized message payload, set by personalization.
    pub message: Option<PersonalizedMessage>,
    /// Why the lead failed, when `status` is `Failed`.
    pub failure_reason: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    /// Creates a lead from a collected place record.
    pub fn from_place(campaign_id: Uuid, place: PlaceRecord) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            place_id: place.place_id,
            name: place.name,
            address: place.address,
            city: place.city,
            state: place.state,
            postal_code: place.postal_code,
            country: place.country,
            phone: place.phone,
            email: place.email,
            website: place.website,
            category: place.category,
            rating: place.rating,
            reviews_count: place.reviews_count,
            latitude: place.latitude,
            longitude: place.longitude,
            status: LeadStatus::Collected,
            email_valid: None,
            phone_valid: None,
            company_valid: None,
            profile: None,
            research: None,
            message: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Advances the lifecycle status, never regressing.
    ///
    /// A `Failed` lead stays failed; attempts to move backwards are ignored.
    pub fn advance_to(&mut self, status: LeadStatus) {
        if self.status == LeadStatus::Failed {
            return;
        }
        if status == LeadStatus::Failed || status.rank() > self.status.rank() {
            self.status = status;
            self.updated_at = Utc::now();
        }
    }

    /// Marks the lead permanently failed with a reason.
    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.status = LeadStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.updated_at = Utc::now();
    }

    /// Whether an inferred profile has been attached.
    pub fn linkedin_enriched(&self) -> bool {
        self.profile.is_some()
    }

    /// Whether company research has been attached.
    pub fn research_completed(&self) -> bool {
        self.research.is_some()
    }

    /// Whether a personalized message has been attached.
    pub fn message_personalized(&self) -> bool {
        self.message.is_some()
    }

    /// Whether the lead passed validation and may be submitted.
    pub fn validation_passed(&self) -> bool {
        self.email_valid == Some(true)
    }
}

/// A request to generate leads for a business category in a location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Business category to search for.
    pub query: String,
    /// Location to search in.
    pub location: String,
    /// Number of leads to collect (1..=100).
    pub count: u32,
    /// Optional campaign name; derived from query/location when absent.
    pub campaign_name: Option<String>,
    /// Optional sender address for campaign submission.
    pub from_email: Option<String>,
    /// Whether to run the research stage (when configured).
    pub include_research: bool,
    /// Whether to run the personalization stage (when configured).
    pub include_personalization: bool,
}

impl GenerationRequest {
    /// Maximum number of leads a single request may ask for.
    pub const MAX_COUNT: u32 = 100;

    /// Creates a request with default stage options.
    pub fn new(query: impl Into<String>, location: impl Into<String>, count: u32) -> Self {
        Self {
            query: query.into(),
            location: location.into(),
            count,
            campaign_name: None,
            from_email: None,
            include_research: true,
            include_personalization: true,
        }
    }

    /// Sets the campaign name.
    pub fn with_campaign_name(mut self, name: impl Into<String>) -> Self {
        self.campaign_name = Some(name.into());
        self
    }

    /// Sets the sender address.
    pub fn with_from_email(mut self, email: impl Into<String>) -> Self {
        self.from_email = Some(email.into());
        self
    }

    /// Enables or disables the research stage.
    pub fn with_research(mut self, enabled: bool) -> Self {
        self.include_research = enabled;
        self
    }

    /// Enables or disables the personalization stage.
    pub fn with_personalization(mut self, enabled: bool) -> Self {
        self.include_personalization = enabled;
        self
    }

    /// Validates the request fields.
    ///
    /// Returns a human-readable description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.query.trim().is_empty() {
            return Err("query must not be empty".to_string());
        }
        if self.location.trim().is_empty() {
            return Err("location must not be empty".to_string());
        }
        if self.count == 0 || self.count > Self::MAX_COUNT {
            return Err(format!(
                "count must be between 1 and {}, got {}",
                Self::MAX_COUNT,
                self.count
            ));
        }
        if let Some(email) = &self.from_email {
            if !crate::leads::validator::is_valid_email_format(email) {
                return Err(format!("from_email '{}' is not a valid address", email));
            }
        }
        Ok(())
    }
}
