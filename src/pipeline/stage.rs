//! Stage identities, plans and outcomes.
//!
//! The orchestrator computes a `StagePlan` once at run start from the
//! capability set, configuration and request options; each entry says whether
//! the stage will run or why it is skipped. Stage results are tagged
//! `StageOutcome` values rather than loosely-shaped maps.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capabilities::CapabilitySet;
use crate::leads::types::GenerationRequest;

use super::config::PipelineConfig;
use super::worker::StageSummary;

/// One transformation step applied to leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Discover candidate businesses via the places directory.
    Collection,
    /// Validate email/phone/company fields.
    Validation,
    /// Attach an inferred company profile.
    Enrichment,
    /// Attach AI research.
    Research,
    /// Attach a personalized outreach message.
    Personalization,
    /// Push validated leads to the campaign platform.
    Submission,
    /// Export results to a file.
    Export,
}

impl Stage {
    /// Stage name used in logs and the stage_runs table.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Collection => "collection",
            Stage::Validation => "validation",
            Stage::Enrichment => "enrichment",
            Stage::Research => "research",
            Stage::Personalization => "personalization",
            Stage::Submission => "submission",
            Stage::Export => "export",
        }
    }

    /// Human-readable progress label shown to polling clients.
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Collection => "collecting businesses",
            Stage::Validation => "validating leads",
            Stage::Enrichment => "inferring profiles",
            Stage::Research => "researching companies",
            Stage::Personalization => "personalizing messages",
            Stage::Submission => "submitting to campaign platform",
            Stage::Export => "exporting results",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of running (or not running) one stage.
#[derive(Debug, Clone)]
pub enum StageOutcome {
    /// The stage ran; partial per-lead failures are inside the summary.
    Completed(StageSummary),
    /// The stage was planned out before the run started.
    Skipped {
        /// Why the stage did not run.
        reason: String,
    },
    /// The capability rejected every call; treated like a skip.
    Unavailable {
        /// What the capability reported.
        reason: String,
    },
}

impl StageOutcome {
    /// Whether the stage actually processed leads.
    pub fn ran(&self) -> bool {
        matches!(self, StageOutcome::Completed(_))
    }
}

/// A stage together with its planning decision.
#[derive(Debug, Clone)]
pub struct PlannedStage {
    /// The stage.
    pub stage: Stage,
    /// Why the stage is skipped, or `None` when it will run.
    pub skip_reason: Option<String>,
}

impl PlannedStage {
    fn active(stage: Stage) -> Self {
        Self {
            stage,
            skip_reason: None,
        }
    }

    fn skipped(stage: Stage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            skip_reason: Some(reason.into()),
        }
    }

    /// Whether the stage will run.
    pub fn is_active(&self) -> bool {
        self.skip_reason.is_none()
    }
}

/// The active stage plan for one run.
#[derive(Debug, Clone)]
pub struct StagePlan {
    entries: Vec<PlannedStage>,
}

impl StagePlan {
    /// Computes the plan from capabilities, configuration and request options.
    ///
    /// Collection and validation are always planned; the optional stages are
    /// skipped when their capability is unconfigured or disabled.
    pub fn compute(
        capabilities: &CapabilitySet,
        config: &PipelineConfig,
        request: &GenerationRequest,
    ) -> Self {
        let mut entries = vec![
            PlannedStage::active(Stage::Collection),
            PlannedStage::active(Stage::Validation),
        ];

        entries.push(if !config.enable_profile_inference {
            PlannedStage::skipped(Stage::Enrichment, "disabled by configuration")
        } else {
            PlannedStage::active(Stage::Enrichment)
        });

        entries.push(if !config.enable_research {
            PlannedStage::skipped(Stage::Research, "disabled by configuration")
        } else if !request.include_research {
            PlannedStage::skipped(Stage::Research, "disabled by request")
        } else if capabilities.researcher.is_none() {
            PlannedStage::skipped(Stage::Research, "research capability not configured")
        } else {
            PlannedStage::active(Stage::Research)
        });

        let research_active = entries
            .iter()
            .any(|e| e.stage == Stage::Research && e.is_active());

        entries.push(if !config.enable_personalization {
            PlannedStage::skipped(Stage::Personalization, "disabled by configuration")
        } else if !request.include_personalization {
            PlannedStage::skipped(Stage::Personalization, "disabled by request")
        } else if capabilities.personalizer.is_none() {
            PlannedStage::skipped(
                Stage::Personalization,
                "personalization capability not configured",
            )
        } else if config.personalization_requires_research && !research_active {
            PlannedStage::skipped(
                Stage::Personalization,
                "personalization requires research, which is not running",
            )
        } else {
            PlannedStage::active(Stage::Personalization)
        });

        entries.push(if !config.enable_campaign_submission {
            PlannedStage::skipped(Stage::Submission, "campaign submission not requested")
        } else if capabilities.campaigns.is_none() {
            PlannedStage::skipped(Stage::Submission, "campaign capability not configured")
        } else {
            PlannedStage::active(Stage::Submission)
        });

        entries.push(if config.enable_export {
            PlannedStage::active(Stage::Export)
        } else {
            PlannedStage::skipped(Stage::Export, "disabled by configuration")
        });

        Self { entries }
    }

    /// All planned stages in execution order.
    pub fn entries(&self) -> &[PlannedStage] {
        &self.entries
    }

    /// The planning decision for one stage.
    pub fn entry(&self, stage: Stage) -> Option<&PlannedStage> {
        self.entries.iter().find(|e| e.stage == stage)
    }

    /// Whether a stage will run.
    pub fn is_active(&self, stage: Stage) -> bool {
        self.entry(stage).map(|e| e.is_active()).unwrap_or(false)
    }

    /// Number of stages that will actually run.
    pub fn active_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_active()).count()
    }

    /// Progress percentage after `completed` active stages have finished.
    pub fn progress_after(&self, completed: usize) -> u8 {
        let total = self.active_count().max(1);
        ((completed.min(total) * 100) / total) as u8
    }
}
