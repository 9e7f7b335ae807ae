//! Run status records and cancellation tokens.
//!
//! A `PipelineRun` is the mutable status record one orchestrator task writes
//! and many status queries read. Updates go through `RunUpdate`, an atomic
//! partial merge applied under the entry's lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Execution status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Accepted, not yet executing.
    Pending,
    /// Run body is executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Stopped by a delete request.
    Cancelled,
}

impl RunStatus {
    /// Whether the status is terminal (absorbing).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    /// Returns the status as its display string.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Summary attached to a completed run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunResults {
    /// Distinct leads collected.
    pub total_leads: u32,
    /// Leads that passed email validation.
    pub validated_leads: u32,
    /// Leads with an inferred profile.
    pub enriched_leads: u32,
    /// Leads with research attached.
    pub researched_leads: u32,
    /// Leads with a personalized message.
    pub personalized_leads: u32,
    /// Leads pushed to the campaign platform.
    pub submitted_leads: u32,
    /// Path of the exported CSV file, when export ran.
    pub export_path: Option<String>,
    /// Wall-clock duration of the run in seconds.
    pub duration_secs: f64,
}

/// Status record for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Run identifier handed back to the client.
    pub run_id: Uuid,
    /// Campaign this run is processing.
    pub campaign_id: Uuid,
    /// Current status.
    pub status: RunStatus,
    /// Progress percentage, 0..=100, non-decreasing.
    pub progress: u8,
    /// Label of the step currently executing.
    pub current_step: Option<String>,
    /// Total leads in the campaign, once known.
    pub total_leads: Option<u32>,
    /// Leads processed by the most recent stage.
    pub processed_leads: Option<u32>,
    /// Results summary, set on completion.
    pub results: Option<RunResults>,
    /// Error message, set on failure.
    pub error_message: Option<String>,
    /// When the run was accepted.
    pub created_at: DateTime<Utc>,
    /// When the run body started executing.
    pub started_at: Option<DateTime<Utc>>,
    /// When the run reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    /// Creates a new pending run record.
    pub fn new(run_id: Uuid, campaign_id: Uuid) -> Self {
        Self {
            run_id,
            campaign_id,
            status: RunStatus::Pending,
            progress: 0,
            current_step: None,
            total_leads: None,
            processed_leads: None,
            results: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Applies a partial update, preserving the record's invariants.
    ///
    /// Progress never decreases, `processed_leads` is clamped to
    /// `total_leads`, and terminal statuses are absorbing.
    pub fn apply(&mut self, update: RunUpdate) {
        if let Some(status) = update.status {
            if !self.status.is_terminal() {
                self.status = status;
                if status.is_terminal() {
                    self.completed_at = Some(Utc::now());
                }
            }
        }
        if let Some(progress) = update.progress {
            self.progress = self.progress.max(progress.min(100));
        }
        if let Some(step) = update.current_step {
            self.current_step = Some(step);
        }
        if let Some(total) = update.total_leads {
            self.total_leads = Some(total);
        }
        if let Some(processed) = update.processed_leads {
            let clamped = match self.total_leads {
                Some(total) => processed.min(total),
                None => processed,
            };
            self.processed_leads = Some(clamped);
        }
        if let Some(results) = update.results {
            self.results = Some(results);
        }
        if let Some(message) = update.error_message {
            self.error_message = Some(message);
        }
        if let Some(started) = update.started_at {
            self.started_at = Some(started);
        }
    }
}

/// Partial update merged into a `PipelineRun`.
#[derive(Debug, Clone, Default)]
pub struct RunUpdate {
    /// New status, if changing.
    pub status: Option<RunStatus>,
    /// New progress percentage.
    pub progress: Option<u8>,
    /// New current-step label.
    pub current_step: Option<String>,
    /// Total lead count.
    pub total_leads: Option<u32>,
    /// Processed lead count.
    pub processed_leads: Option<u32>,
    /// Results summary.
    pub results: Option<RunResults>,
    /// Error message.
    pub error_message: Option<String>,
    /// Start timestamp.
    pub started_at: Option<DateTime<Utc>>,
}

impl RunUpdate {
    /// Creates an empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the status.
    pub fn status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the progress percentage.
    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Sets the current-step label.
    pub fn current_step(mut self, step: impl Into<String>) -> Self {
        self.current_step = Some(step.into());
        self
    }

    /// Sets the total lead count.
    pub fn total_leads(mut self, total: u32) -> Self {
        self.total_leads = Some(total);
        self
    }

    /// Sets the processed lead count.
    pub fn processed_leads(mut self, processed: u32) -> Self {
        self.processed_leads = Some(processed);
        self
    }

    /// Sets the results summary.
    pub fn results(mut self, results: RunResults) -> Self {
        self.results = Some(results);
        self
    }

    /// Sets the error message.
    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Marks the run as started now.
    pub fn started_now(mut self) -> Self {
        self.started_at = Some(Utc::now());
        self
    }
}

/// Cooperative cancellation signal for one run.
///
/// The worker checks the token before dispatching each lead; in-flight calls
/// are allowed to drain.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been signalled.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
