//! Pipeline orchestrator for lead generation runs.
//!
//! This module provides the main `PipelineOrchestrator` that coordinates:
//! - Campaign and run creation
//! - Business collection via the places directory
//! - Bounded-concurrency stage workers (validation, enrichment, research,
//!   personalization, submission)
//! - Run Registry status tracking for polling clients
//! - Persistent storage of every lead mutation

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::capabilities::{
    CapabilityError, CapabilitySet, ConfigStatus, PlacesDirectory,
};
use crate::export::{ExportError, ExportFormat, LeadExporter};
use crate::leads::profile::infer_profile;
use crate::leads::types::{Campaign, CampaignStatus, GenerationRequest, Lead, LeadStatus};
use crate::leads::validator::{LeadValidator, ValidatorConfig};
use crate::registry::{PipelineRun, RegistryError, RunRegistry, RunResults, RunStatus, RunUpdate};
use crate::registry::CancelToken;
use crate::storage::{Database, DatabaseError, StageRunRecord};

use super::config::{ConfigError, PipelineConfig};
use super::stage::{Stage, StageOutcome, StagePlan};
use super::worker::{ItemOutcome, StageError, StageWorker, WorkerConfig};

/// Errors that can occur during pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A mandatory capability is missing.
    #[error("{capability} capability is not configured")]
    CapabilityNotConfigured {
        /// Name of the missing capability.
        capability: &'static str,
    },

    /// The generation request was malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The collection stage failed outright.
    #[error("Collection failed: {0}")]
    Collection(String),

    /// The directory returned no candidates.
    #[error("no results found for '{query}' in '{location}'")]
    NoResults {
        /// The category that was searched.
        query: String,
        /// The location that was searched.
        location: String,
    },

    /// Database error; fatal to a run, never silently dropped.
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Export error.
    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    /// Registry error.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Unknown run id.
    #[error("run {0} not found")]
    RunNotFound(Uuid),

    /// Unknown campaign id.
    #[error("campaign {0} not found")]
    CampaignNotFound(Uuid),

    /// The run was cancelled by a delete request.
    #[error("run cancelled")]
    Cancelled,
}

/// Main orchestrator that sequences stages and tracks run state.
///
/// Cloning is cheap: the configuration is shared by value and everything
/// else sits behind `Arc`s, which is what lets the run body move into a
/// spawned task.
#[derive(Clone)]
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    capabilities: CapabilitySet,
    database: Arc<Database>,
    registry: Arc<RunRegistry>,
    validator: Arc<LeadValidator>,
    exporter: Arc<LeadExporter>,
}

impl PipelineOrchestrator {
    /// Creates an orchestrator from parts.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Config` when the configuration is invalid.
    pub fn new(
        config: PipelineConfig,
        capabilities: CapabilitySet,
        database: Arc<Database>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;

        let validator = Arc::new(LeadValidator::new(ValidatorConfig {
            check_websites: config.check_websites,
            probe_timeout: config.validation_timeout,
        }));
        let exporter = Arc::new(LeadExporter::new(config.export_dir.clone()));

        Ok(Self {
            config,
            capabilities,
            database,
            registry: Arc::new(RunRegistry::new()),
            validator,
            exporter,
        })
    }

    /// Creates an orchestrator with production clients, connecting to the
    /// configured database and running migrations.
    pub async fn from_config(config: PipelineConfig) -> Result<Self, PipelineError> {
        let database = Database::connect(&config.database_url).await?;
        database.run_migrations().await?;
        let capabilities = CapabilitySet::from_config(&config);
        Self::new(config, capabilities, Arc::new(database))
    }

    /// Gets the current configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Gets a reference to the database.
    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    /// Gets a reference to the run registry.
    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    // =========================================================================
    // Request surface
    // =========================================================================

    /// Accepts a generation request and returns immediately with a run id.
    ///
    /// The run body executes as a background task; clients poll `status`.
    ///
    /// # Errors
    ///
    /// - `PipelineError::InvalidRequest` for malformed input.
    /// - `PipelineError::CapabilityNotConfigured` when the places directory
    ///   is missing.
    pub async fn generate(&self, request: GenerationRequest) -> Result<Uuid, PipelineError> {
        request.validate().map_err(PipelineError::InvalidRequest)?;

        let places = self
            .capabilities
            .places
            .clone()
            .ok_or(PipelineError::CapabilityNotConfigured {
                capability: "places directory",
            })?;

        let mut request = request;
        if request.from_email.is_none() {
            request.from_email = self.config.from_email.clone();
        }

        let campaign = Campaign::new(&request);
        self.database.upsert_campaign(&campaign).await?;

        let run_id = Uuid::new_v4();
        let cancel = self
            .registry
            .create(PipelineRun::new(run_id, campaign.id))
            .await?;

        info!(
            run_id = %run_id,
            campaign_id = %campaign.id,
            query = %request.query,
            location = %request.location,
            count = request.count,
            "Generation request accepted"
        );

        let this = self.clone();
        tokio::spawn(async move {
            this.run_pipeline(run_id, campaign, request, places, cancel)
                .await;
        });

        Ok(run_id)
    }

    /// Returns a snapshot of a run's status.
    pub async fn status(&self, run_id: Uuid) -> Result<PipelineRun, PipelineError> {
        self.registry
            .get(run_id)
            .await
            .map_err(|_| PipelineError::RunNotFound(run_id))
    }

    /// Lists all known runs, most recent first.
    pub async fn list_runs(&self) -> Vec<PipelineRun> {
        self.registry.list().await
    }

    /// Deletes a run, cancelling it first if still active.
    pub async fn delete_run(&self, run_id: Uuid) -> Result<(), PipelineError> {
        self.registry
            .delete(run_id)
            .await
            .map_err(|_| PipelineError::RunNotFound(run_id))
    }

    /// Reports which capabilities are configured.
    pub fn config_check(&self) -> ConfigStatus {
        self.capabilities.status()
    }

    /// Exports a campaign's leads to a file.
    pub async fn export_leads(
        &self,
        campaign_id: Uuid,
        format: ExportFormat,
    ) -> Result<PathBuf, PipelineError> {
        let campaign = self
            .database
            .get_campaign(campaign_id)
            .await?
            .ok_or(PipelineError::CampaignNotFound(campaign_id))?;
        let leads = self.database.get_leads_by_campaign(campaign_id, None).await?;
        Ok(self.exporter.export(&campaign, &leads, format)?)
    }

    // =========================================================================
    // Run body
    // =========================================================================

    /// Executes the run body and writes the terminal status exactly once.
    async fn run_pipeline(
        &self,
        run_id: Uuid,
        campaign: Campaign,
        request: GenerationRequest,
        places: Arc<dyn PlacesDirectory>,
        cancel: CancelToken,
    ) {
        let started = Instant::now();
        info!(run_id = %run_id, campaign_id = %campaign.id, "Pipeline run starting");

        let _ = self
            .registry
            .update(
                run_id,
                RunUpdate::new()
                    .status(RunStatus::Running)
                    .started_now()
                    .current_step(Stage::Collection.label()),
            )
            .await;
        if let Err(e) = self
            .database
            .set_campaign_status(campaign.id, CampaignStatus::Running, None)
            .await
        {
            error!(run_id = %run_id, error = %e, "Failed to mark campaign running");
        }

        match self
            .execute_run(run_id, &campaign, &request, places, &cancel, started)
            .await
        {
            Ok(results) => {
                info!(
                    run_id = %run_id,
                    total_leads = results.total_leads,
                    validated = results.validated_leads,
                    duration_secs = results.duration_secs,
                    "Pipeline run completed"
                );
                if let Err(e) = self
                    .database
                    .set_campaign_status(campaign.id, CampaignStatus::Completed, None)
                    .await
                {
                    error!(run_id = %run_id, error = %e, "Failed to mark campaign completed");
                }
                let _ = self
                    .registry
                    .update(
                        run_id,
                        RunUpdate::new()
                            .status(RunStatus::Completed)
                            .progress(100)
                            .current_step("completed")
                            .results(results),
                    )
                    .await;
            }
            Err(PipelineError::Cancelled) => {
                info!(run_id = %run_id, "Pipeline run cancelled");
                if let Err(e) = self
                    .database
                    .set_campaign_status(campaign.id, CampaignStatus::Failed, Some("run cancelled"))
                    .await
                {
                    error!(run_id = %run_id, error = %e, "Failed to mark campaign cancelled");
                }
                // The registry entry is usually gone already; ignore NotFound.
                let _ = self
                    .registry
                    .update(
                        run_id,
                        RunUpdate::new()
                            .status(RunStatus::Cancelled)
                            .error_message("run cancelled"),
                    )
                    .await;
            }
            Err(e) => {
                error!(run_id = %run_id, error = %e, "Pipeline run failed");
                if let Err(db_err) = self
                    .database
                    .set_campaign_status(campaign.id, CampaignStatus::Failed, Some(&e.to_string()))
                    .await
                {
                    error!(run_id = %run_id, error = %db_err, "Failed to mark campaign failed");
                }
                let _ = self
                    .registry
                    .update(
                        run_id,
                        RunUpdate::new()
                            .status(RunStatus::Failed)
                            .error_message(e.to_string()),
                    )
                    .await;
            }
        }
    }

    /// Runs every planned stage in order.
    async fn execute_run(
        &self,
        run_id: Uuid,
        campaign: &Campaign,
        request: &GenerationRequest,
        places: Arc<dyn PlacesDirectory>,
        cancel: &CancelToken,
        started: Instant,
    ) -> Result<RunResults, PipelineError> {
        let plan = StagePlan::compute(&self.capabilities, &self.config, request);
        let mut completed_stages = 0usize;
        let mut export_path: Option<String> = None;

        // --- Collection (mandatory; failure is fatal to the run) ---
        let mut leads = self
            .collect_leads(run_id, campaign, request, places, cancel)
            .await?;
        completed_stages += 1;
        let total = leads.len() as u32;
        self.database
            .set_campaign_counts(campaign.id, total, 0, 0, 0)
            .await?;
        let _ = self
            .registry
            .update(
                run_id,
                RunUpdate::new()
                    .progress(plan.progress_after(completed_stages))
                    .total_leads(total)
                    .processed_leads(total),
            )
            .await;

        // --- Validation (mandatory) ---
        {
            let validator = Arc::clone(&self.validator);
            let eligible = pending_leads(&leads);
            let outcome = self
                .apply_stage(
                    run_id,
                    campaign.id,
                    Stage::Validation,
                    &mut leads,
                    eligible,
                    self.worker_config(Stage::Validation),
                    cancel,
                    move |mut lead: Lead| {
                        let validator = Arc::clone(&validator);
                        async move {
                            let result = validator.validate(&lead).await;
                            lead.email_valid = Some(result.email_valid);
                            lead.phone_valid = Some(result.phone_valid);
                            lead.company_valid = Some(result.company_valid);
                            lead.advance_to(LeadStatus::Validated);
                            Ok(lead)
                        }
                    },
                )
                .await?;
            if outcome.ran() {
                completed_stages += 1;
            }
            self.report_stage_progress(run_id, &plan, completed_stages, &outcome)
                .await;
        }

        // --- Enrichment (profile inference) ---
        if let Some(reason) = self.skip_reason(&plan, Stage::Enrichment) {
            self.record_skip(campaign.id, Stage::Enrichment, &reason).await?;
        } else {
            let eligible = pending_leads(&leads);
            let outcome = self
                .apply_stage(
                    run_id,
                    campaign.id,
                    Stage::Enrichment,
                    &mut leads,
                    eligible,
                    self.worker_config(Stage::Enrichment),
                    cancel,
                    |mut lead: Lead| async move {
                        lead.profile = Some(infer_profile(&lead));
                        lead.advance_to(LeadStatus::Enriched);
                        Ok(lead)
                    },
                )
                .await?;
            if outcome.ran() {
                completed_stages += 1;
            }
            self.report_stage_progress(run_id, &plan, completed_stages, &outcome)
                .await;
        }

        // --- Research ---
        if let Some(reason) = self.skip_reason(&plan, Stage::Research) {
            self.record_skip(campaign.id, Stage::Research, &reason).await?;
        } else if let Some(researcher) = self.capabilities.researcher.clone() {
            let eligible = pending_leads(&leads);
            let outcome = self
                .apply_stage(
                    run_id,
                    campaign.id,
                    Stage::Research,
                    &mut leads,
                    eligible,
                    self.worker_config(Stage::Research),
                    cancel,
                    move |mut lead: Lead| {
                        let researcher = Arc::clone(&researcher);
                        async move {
                            let research = researcher.research(&lead).await?;
                            lead.research = Some(research);
                            lead.advance_to(LeadStatus::Researched);
                            Ok(lead)
                        }
                    },
                )
                .await?;
            if outcome.ran() {
                completed_stages += 1;
            }
            self.report_stage_progress(run_id, &plan, completed_stages, &outcome)
                .await;
        }

        // --- Personalization ---
        if let Some(reason) = self.skip_reason(&plan, Stage::Personalization) {
            self.record_skip(campaign.id, Stage::Personalization, &reason)
                .await?;
        } else if let Some(personalizer) = self.capabilities.personalizer.clone() {
            let eligible = pending_leads(&leads);
            let outcome = self
                .apply_stage(
                    run_id,
                    campaign.id,
                    Stage::Personalization,
                    &mut leads,
                    eligible,
                    self.worker_config(Stage::Personalization),
                    cancel,
                    move |mut lead: Lead| {
                        let personalizer = Arc::clone(&personalizer);
                        async move {
                            let message = personalizer.personalize(&lead).await?;
                            lead.message = Some(message);
                            lead.advance_to(LeadStatus::Personalized);
                            Ok(lead)
                        }
                    },
                )
                .await?;
            if outcome.ran() {
                completed_stages += 1;
            }
            self.report_stage_progress(run_id, &plan, completed_stages, &outcome)
                .await;
        }

        // --- Submission (only leads whose validation passed) ---
        if let Some(reason) = self.skip_reason(&plan, Stage::Submission) {
            self.record_skip(campaign.id, Stage::Submission, &reason).await?;
        } else if let Some(platform) = self.capabilities.campaigns.clone() {
            match request.from_email.clone() {
                None => {
                    self.record_skip(campaign.id, Stage::Submission, "no sender address")
                        .await?;
                }
                Some(from_email) => {
                    let eligible: Vec<Lead> = leads
                        .iter()
                        .filter(|l| l.status != LeadStatus::Failed && l.validation_passed())
                        .cloned()
                        .collect();

                    if eligible.is_empty() {
                        self.record_skip(campaign.id, Stage::Submission, "no validated leads")
                            .await?;
                    } else {
                        match platform.ensure_campaign(&campaign.name, &from_email).await {
                            Err(e) if e.is_unavailable() => {
                                warn!(run_id = %run_id, error = %e, "Campaign platform unavailable");
                                self.record_skip(campaign.id, Stage::Submission, &e.to_string())
                                    .await?;
                            }
                            Err(e) => {
                                self.record_skip(campaign.id, Stage::Submission, &e.to_string())
                                    .await?;
                            }
                            Ok(platform_campaign_id) => {
                                let platform_campaign_id = Arc::new(platform_campaign_id);
                                let outcome = self
                                    .apply_stage(
                                        run_id,
                                        campaign.id,
                                        Stage::Submission,
                                        &mut leads,
                                        eligible,
                                        self.worker_config(Stage::Submission),
                                        cancel,
                                        move |mut lead: Lead| {
                                            let platform = Arc::clone(&platform);
                                            let platform_campaign_id =
                                                Arc::clone(&platform_campaign_id);
                                            async move {
                                                platform
                                                    .submit_lead(&platform_campaign_id, &lead)
                                                    .await?;
                                                lead.advance_to(LeadStatus::Submitted);
                                                Ok(lead)
                                            }
                                        },
                                    )
                                    .await?;
                                if outcome.ran() {
                                    completed_stages += 1;
                                }
                                self.report_stage_progress(
                                    run_id,
                                    &plan,
                                    completed_stages,
                                    &outcome,
                                )
                                .await;
                            }
                        }
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        // --- Export ---
        if plan.is_active(Stage::Export) {
            self.set_step(run_id, Stage::Export).await;
            let stage_started = Instant::now();
            let all_leads = self.database.get_leads_by_campaign(campaign.id, None).await?;
            let path = self
                .exporter
                .export(campaign, &all_leads, ExportFormat::Csv)?;
            export_path = Some(path.display().to_string());
            self.database
                .record_stage_run(&stage_record(
                    campaign.id,
                    Stage::Export,
                    "completed",
                    Some(stage_started.elapsed().as_secs_f64()),
                    all_leads.len() as u32,
                    all_leads.len() as u32,
                    0,
                    None,
                ))
                .await?;
            completed_stages += 1;
            let _ = self
                .registry
                .update(
                    run_id,
                    RunUpdate::new().progress(plan.progress_after(completed_stages)),
                )
                .await;
        }

        // --- Final accounting ---
        let stats = self.database.campaign_stats(campaign.id).await?;
        self.database
            .set_campaign_counts(
                campaign.id,
                stats.total_leads,
                stats.valid_emails,
                stats.enriched_leads,
                stats.personalized_leads,
            )
            .await?;

        Ok(RunResults {
            total_leads: stats.total_leads,
            validated_leads: stats.valid_emails,
            enriched_leads: stats.enriched_leads,
            researched_leads: stats.researched_leads,
            personalized_leads: stats.personalized_leads,
            submitted_leads: stats.submitted_leads,
            export_path,
            duration_secs: started.elapsed().as_secs_f64(),
        })
    }

    /// Collects candidate businesses and persists the initial lead rows.
    async fn collect_leads(
        &self,
        run_id: Uuid,
        campaign: &Campaign,
        request: &GenerationRequest,
        places: Arc<dyn PlacesDirectory>,
        cancel: &CancelToken,
    ) -> Result<Vec<Lead>, PipelineError> {
        self.set_step(run_id, Stage::Collection).await;
        let stage_started = Instant::now();

        let records = match places
            .search(&request.query, &request.location, request.count as usize)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                self.database
                    .record_stage_run(&stage_record(
                        campaign.id,
                        Stage::Collection,
                        "failed",
                        Some(stage_started.elapsed().as_secs_f64()),
                        0,
                        0,
                        0,
                        Some(&e.to_string()),
                    ))
                    .await?;
                return Err(PipelineError::Collection(e.to_string()));
            }
        };

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        if records.is_empty() {
            self.database
                .record_stage_run(&stage_record(
                    campaign.id,
                    Stage::Collection,
                    "failed",
                    Some(stage_started.elapsed().as_secs_f64()),
                    0,
                    0,
                    0,
                    Some("no results"),
                ))
                .await?;
            return Err(PipelineError::NoResults {
                query: request.query.clone(),
                location: request.location.clone(),
            });
        }

        let fresh: Vec<Lead> = records
            .into_iter()
            .map(|record| Lead::from_place(campaign.id, record))
            .collect();
        self.database.insert_leads(&fresh).await?;

        // Re-read so upsert-merged rows are authoritative.
        let leads = self.database.get_leads_by_campaign(campaign.id, None).await?;

        self.database
            .record_stage_run(&stage_record(
                campaign.id,
                Stage::Collection,
                "completed",
                Some(stage_started.elapsed().as_secs_f64()),
                leads.len() as u32,
                leads.len() as u32,
                0,
                None,
            ))
            .await?;

        info!(run_id = %run_id, count = leads.len(), "Leads collected");
        Ok(leads)
    }

    /// Runs one worker-backed stage, persists every mutation, and records
    /// the stage in the history table.
    #[allow(clippy::too_many_arguments)]
    async fn apply_stage<F, Fut>(
        &self,
        run_id: Uuid,
        campaign_id: Uuid,
        stage: Stage,
        leads: &mut [Lead],
        eligible: Vec<Lead>,
        worker_config: WorkerConfig,
        cancel: &CancelToken,
        op: F,
    ) -> Result<StageOutcome, PipelineError>
    where
        F: Fn(Lead) -> Fut,
        Fut: Future<Output = Result<Lead, CapabilityError>>,
    {
        if eligible.is_empty() {
            self.record_skip(campaign_id, stage, "no eligible leads").await?;
            return Ok(StageOutcome::Skipped {
                reason: "no eligible leads".to_string(),
            });
        }

        self.set_step(run_id, stage).await;
        let stage_started = Instant::now();
        let worker = StageWorker::new(worker_config);
        let result = worker.run(eligible, cancel, op).await;

        // A delete request may have landed while the pool drained; stop
        // before any further store writes.
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let report = match result {
            Err(StageError::Unavailable(reason)) => {
                warn!(stage = %stage, reason = %reason, "Capability unavailable, skipping stage");
                self.database
                    .record_stage_run(&stage_record(
                        campaign_id,
                        stage,
                        "skipped",
                        Some(stage_started.elapsed().as_secs_f64()),
                        0,
                        0,
                        0,
                        Some(&reason),
                    ))
                    .await?;
                return Ok(StageOutcome::Unavailable { reason });
            }
            Ok(report) => report,
        };

        for outcome in report.outcomes {
            match outcome {
                ItemOutcome::Succeeded(updated) => {
                    self.database.update_lead(&updated).await?;
                    replace_lead(leads, updated);
                }
                ItemOutcome::Failed { mut lead, error }
                | ItemOutcome::Unavailable { mut lead, error } => {
                    lead.mark_failed(format!("{} failed: {}", stage, error));
                    self.database.update_lead(&lead).await?;
                    replace_lead(leads, lead);
                }
                ItemOutcome::Skipped { .. } => {}
            }
        }

        self.database
            .record_stage_run(&stage_record(
                campaign_id,
                stage,
                "completed",
                Some(stage_started.elapsed().as_secs_f64()),
                report.summary.processed,
                report.summary.succeeded,
                report.summary.failed,
                None,
            ))
            .await?;

        info!(
            stage = %stage,
            processed = report.summary.processed,
            succeeded = report.summary.succeeded,
            failed = report.summary.failed,
            "Stage completed"
        );

        Ok(StageOutcome::Completed(report.summary))
    }

    /// Updates progress and processed counts after a stage.
    async fn report_stage_progress(
        &self,
        run_id: Uuid,
        plan: &StagePlan,
        completed_stages: usize,
        outcome: &StageOutcome,
    ) {
        let mut update = RunUpdate::new().progress(plan.progress_after(completed_stages));
        if let StageOutcome::Completed(summary) = outcome {
            update = update.processed_leads(summary.processed + summary.skipped);
        }
        let _ = self.registry.update(run_id, update).await;
    }

    /// Sets the current-step label for polling clients.
    async fn set_step(&self, run_id: Uuid, stage: Stage) {
        let _ = self
            .registry
            .update(run_id, RunUpdate::new().current_step(stage.label()))
            .await;
    }

    /// Returns the plan's skip reason for a stage, if it was planned out.
    fn skip_reason(&self, plan: &StagePlan, stage: Stage) -> Option<String> {
        plan.entry(stage).and_then(|e| e.skip_reason.clone())
    }

    /// Records a skipped stage in the history table.
    async fn record_skip(
        &self,
        campaign_id: Uuid,
        stage: Stage,
        reason: &str,
    ) -> Result<(), PipelineError> {
        info!(stage = %stage, reason = %reason, "Stage skipped");
        self.database
            .record_stage_run(&stage_record(
                campaign_id, stage, "skipped", None, 0, 0, 0, Some(reason),
            ))
            .await?;
        Ok(())
    }

    /// Worker configuration for one stage.
    fn worker_config(&self, stage: Stage) -> WorkerConfig {
        let (concurrency, min_call_interval, call_timeout) = match stage {
            Stage::Validation => (
                self.config.validation_workers,
                self.config.validation_delay,
                self.config.validation_timeout,
            ),
            Stage::Research => (
                self.config.research_workers,
                self.config.research_delay,
                self.config.research_timeout,
            ),
            Stage::Personalization => (
                self.config.personalization_workers,
                self.config.personalization_delay,
                self.config.personalization_timeout,
            ),
            Stage::Submission => (
                self.config.submission_workers,
                self.config.submission_delay,
                self.config.submission_timeout,
            ),
            // Enrichment is local inference; collection and export never go
            // through a worker pool.
            _ => (
                self.config.validation_workers,
                std::time::Duration::ZERO,
                self.config.validation_timeout,
            ),
        };

        WorkerConfig {
            concurrency,
            min_call_interval,
            call_timeout,
            stage_budget: self.config.stage_budget,
            max_attempts: self.config.max_attempts,
            retry_base_delay: self.config.retry_base_delay,
        }
    }
}

/// Leads still moving through the pipeline (not failed).
fn pending_leads(leads: &[Lead]) -> Vec<Lead> {
    leads
        .iter()
        .filter(|l| l.status != LeadStatus::Failed)
        .cloned()
        .collect()
}

/// Replaces a lead in the working set by id.
fn replace_lead(leads: &mut [Lead], updated: Lead) {
    if let Some(slot) = leads.iter_mut().find(|l| l.id == updated.id) {
        *slot = updated;
    }
}

/// Builds a stage history record.
#[allow(clippy::too_many_arguments)]
fn stage_record(
    campaign_id: Uuid,
    stage: Stage,
    status: &str,
    duration_seconds: Option<f64>,
    processed: u32,
    succeeded: u32,
    failed: u32,
    error_message: Option<&str>,
) -> StageRunRecord {
    StageRunRecord {
        campaign_id,
        stage: stage.as_str().to_string(),
        status: status.to_string(),
        duration_seconds,
        processed_count: processed,
        success_count: succeeded,
        error_count: failed,
        error_message: error_message.map(str::to_string),
        recorded_at: chrono::Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_error_display() {
        let err = PipelineError::CapabilityNotConfigured {
            capability: "places directory",
        };
        assert!(err.to_string().contains("places directory"));

        let err = PipelineError::NoResults {
            query: "dentists".to_string(),
            location: "Austin, TX".to_string(),
        };
        assert!(err.to_string().contains("no results"));
        assert!(err.to_string().contains("dentists"));

        let err = PipelineError::InvalidRequest("count must be between 1 and 100".to_string());
        assert!(err.to_string().contains("count"));
    }

    #[test]
    fn pending_leads_excludes_failed() {
        use crate::capabilities::places::PlaceRecord;

        let campaign_id = Uuid::new_v4();
        let place = |id: &str| PlaceRecord {
            place_id: id.to_string(),
            name: format!("Biz {}", id),
            address: None,
            city: None,
            state: None,
            postal_code: None,
            country: None,
            phone: None,
            email: None,
            website: None,
            category: None,
            rating: None,
            reviews_count: None,
            latitude: None,
            longitude: None,
        };

        let mut leads = vec![
            Lead::from_place(campaign_id, place("a")),
            Lead::from_place(campaign_id, place("b")),
        ];
        leads[1].mark_failed("boom");

        let pending = pending_leads(&leads);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].place_id, "a");
    }
}
