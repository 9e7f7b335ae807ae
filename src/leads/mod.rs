//! Lead domain model, validation and enrichment primitives.

pub mod profile;
pub mod types;
pub mod validator;

pub use types::{Campaign, CampaignStatus, GenerationRequest, Lead, LeadStatus};
pub use validator::{LeadValidator, ValidationOutcome, ValidatorConfig};
