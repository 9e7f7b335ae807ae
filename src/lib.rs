//! leadforge: lead generation pipeline.
//!
//! Discovers candidate businesses for a category/location query, then
//! advances each lead through validation, enrichment, research,
//! personalization and campaign submission, persisting every step.

// Core modules
pub mod capabilities;
pub mod cli;
pub mod export;
pub mod leads;
pub mod pipeline;
pub mod registry;
pub mod storage;

// Re-export commonly used types
pub use capabilities::{CapabilityError, CapabilitySet, ConfigStatus};
pub use export::{ExportError, ExportFormat};
pub use leads::{Campaign, GenerationRequest, Lead, LeadStatus};
pub use pipeline::{PipelineConfig, PipelineError, PipelineOrchestrator};
pub use registry::{PipelineRun, RunRegistry, RunStatus};
pub use storage::{Database, DatabaseError};
