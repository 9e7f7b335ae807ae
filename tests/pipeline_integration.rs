//! End-to-end pipeline tests against an in-memory store and mock
//! capabilities.
//!
//! These tests drive the orchestrator exactly like the request surface does:
//! submit a generation request, poll the run registry, then inspect the
//! durable rows.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use leadforge::capabilities::places::PlaceRecord;
use leadforge::capabilities::{
    CampaignPlatform, CapabilityError, CapabilityResult, CapabilitySet, CompanyResearcher,
    MessagePersonalizer, PlacesDirectory,
};
use leadforge::leads::types::{Lead, LeadStatus, PersonalizedMessage, ResearchData};
use leadforge::pipeline::{PipelineConfig, PipelineError, PipelineOrchestrator};
use leadforge::registry::RunStatus;
use leadforge::leads::{CampaignStatus, GenerationRequest};
use leadforge::{Database, PipelineRun};

// ---------------------------------------------------------------------------
// Mock capabilities
// ---------------------------------------------------------------------------

fn place(id: &str, email: Option<&str>) -> PlaceRecord {
    PlaceRecord {
        place_id: id.to_string(),
        name: format!("Business {}", id),
        address: Some(format!("{} Congress Ave, Austin, TX 78701, USA", id)),
        city: Some("Austin".to_string()),
        state: Some("TX".to_string()),
        postal_code: Some("78701".to_string()),
        country: Some("USA".to_string()),
        phone: Some("+1 512-555-0100".to_string()),
        email: email.map(str::to_string),
        website: Some("https://example.com".to_string()),
        category: Some("Dentist".to_string()),
        rating: Some(4.5),
        reviews_count: Some(42),
        latitude: Some(30.2672),
        longitude: Some(-97.7431),
    }
}

struct StaticPlaces {
    records: Vec<PlaceRecord>,
}

#[async_trait]
impl PlacesDirectory for StaticPlaces {
    async fn search(
        &self,
        _query: &str,
        _location: &str,
        max_results: usize,
    ) -> CapabilityResult<Vec<PlaceRecord>> {
        Ok(self.records.iter().take(max_results).cloned().collect())
    }
}

struct EmptyPlaces;

#[async_trait]
impl PlacesDirectory for EmptyPlaces {
    async fn search(
        &self,
        _query: &str,
        _location: &str,
        _max_results: usize,
    ) -> CapabilityResult<Vec<PlaceRecord>> {
        Ok(Vec::new())
    }
}

struct StubResearcher {
    delay: Duration,
}

#[async_trait]
impl CompanyResearcher for StubResearcher {
    async fn research(&self, lead: &Lead) -> CapabilityResult<ResearchData> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(ResearchData {
            overview: format!("{} is a local business.", lead.name),
            industry_insights: "Competitive local market.".to_string(),
            highlights: vec!["Recently renovated".to_string()],
            researched_at: Utc::now(),
            source: "stub".to_string(),
        })
    }
}

struct RejectingResearcher;

#[async_trait]
impl CompanyResearcher for RejectingResearcher {
    async fn research(&self, _lead: &Lead) -> CapabilityResult<ResearchData> {
        Err(CapabilityError::AuthRejected("invalid api key".to_string()))
    }
}

struct StubPersonalizer;

#[async_trait]
impl MessagePersonalizer for StubPersonalizer {
    async fn personalize(&self, lead: &Lead) -> CapabilityResult<PersonalizedMessage> {
        Ok(PersonalizedMessage {
            subject: format!("Partnership opportunity for {}", lead.name),
            body: "Hello, we should talk.".to_string(),
            template: "professional".to_string(),
            created_at: Utc::now(),
        })
    }
}

#[derive(Default)]
struct RecordingPlatform {
    submitted: Mutex<Vec<String>>,
}

#[async_trait]
impl CampaignPlatform for RecordingPlatform {
    async fn ensure_campaign(&self, _name: &str, _from_email: &str) -> CapabilityResult<String> {
        Ok("platform-campaign-1".to_string())
    }

    async fn submit_lead(&self, _platform_campaign_id: &str, lead: &Lead) -> CapabilityResult<()> {
        let email = lead.email.clone().expect("submitted lead must have email");
        self.submitted.lock().await.push(email);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn fast_config(export_dir: &std::path::Path) -> PipelineConfig {
    let mut config = PipelineConfig::default()
        .with_check_websites(false)
        .with_export_dir(export_dir)
        .with_retry_base_delay(Duration::from_millis(1));
    config.validation_delay = Duration::ZERO;
    config.research_delay = Duration::ZERO;
    config.personalization_delay = Duration::ZERO;
    config.submission_delay = Duration::ZERO;
    config
}

async fn orchestrator_with(
    config: PipelineConfig,
    capabilities: CapabilitySet,
) -> PipelineOrchestrator {
    let database = Database::in_memory().await.unwrap();
    database.run_migrations().await.unwrap();
    PipelineOrchestrator::new(config, capabilities, Arc::new(database)).unwrap()
}

fn full_capabilities(records: Vec<PlaceRecord>) -> CapabilitySet {
    CapabilitySet {
        places: Some(Arc::new(StaticPlaces { records })),
        researcher: Some(Arc::new(StubResearcher {
            delay: Duration::ZERO,
        })),
        personalizer: Some(Arc::new(StubPersonalizer)),
        campaigns: None,
    }
}

/// Polls the run until it reaches a terminal status.
async fn wait_terminal(orchestrator: &PipelineOrchestrator, run_id: Uuid) -> PipelineRun {
    for _ in 0..400 {
        let run = orchestrator.status(run_id).await.expect("run must exist");
        if run.status.is_terminal() {
            return run;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("run {} did not reach a terminal status", run_id);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_pipeline_reaches_completed() {
    let dir = tempfile::tempdir().unwrap();
    let records = vec![
        place("a", Some("a@example.com")),
        place("b", Some("b@example.com")),
        place("c", None),
    ];
    let orchestrator =
        orchestrator_with(fast_config(dir.path()), full_capabilities(records)).await;

    let run_id = orchestrator
        .generate(GenerationRequest::new("dentists", "Austin, TX", 10))
        .await
        .unwrap();

    // Snapshot invariants while the run executes.
    let mut last_progress = 0u8;
    let run = loop {
        let run = orchestrator.status(run_id).await.unwrap();
        assert!(run.progress >= last_progress, "progress regressed");
        last_progress = run.progress;
        if let (Some(processed), Some(total)) = (run.processed_leads, run.total_leads) {
            assert!(processed <= total, "processed exceeded total");
        }
        if run.status.is_terminal() {
            break run;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.progress, 100);
    let results = run.results.expect("completed run carries results");
    assert_eq!(results.total_leads, 3);
    assert_eq!(results.validated_leads, 2);
    assert_eq!(results.researched_leads, 3);
    assert_eq!(results.personalized_leads, 3);
    assert!(results.export_path.is_some());

    // Every lead has definite validation flags and full enrichment.
    let leads = orchestrator
        .database()
        .get_leads_by_campaign(run.campaign_id, None)
        .await
        .unwrap();
    assert_eq!(leads.len(), 3);
    for lead in &leads {
        assert!(lead.email_valid.is_some(), "email_valid still unknown");
        assert!(lead.phone_valid.is_some(), "phone_valid still unknown");
        assert!(lead.company_valid.is_some(), "company_valid still unknown");
        assert!(lead.research_completed());
        assert!(lead.message_personalized());
        assert_eq!(lead.status, LeadStatus::Personalized);
    }

    // The campaign row reached its terminal status too.
    let campaign = orchestrator
        .database()
        .get_campaign(run.campaign_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(campaign.status, CampaignStatus::Completed);
    assert_eq!(campaign.total_leads, 3);

    // Stage history covers collection through export.
    let stages: Vec<String> = orchestrator
        .database()
        .get_stage_runs(run.campaign_id)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.stage)
        .collect();
    for expected in ["collection", "validation", "enrichment", "research", "personalization", "export"] {
        assert!(stages.contains(&expected.to_string()), "missing stage {}", expected);
    }
}

#[tokio::test]
async fn research_unconfigured_still_completes() {
    let dir = tempfile::tempdir().unwrap();
    let mut capabilities = full_capabilities(vec![place("a", Some("a@example.com"))]);
    capabilities.researcher = None;
    let orchestrator = orchestrator_with(fast_config(dir.path()), capabilities).await;

    let run_id = orchestrator
        .generate(GenerationRequest::new("dentists", "Austin, TX", 5))
        .await
        .unwrap();
    let run = wait_terminal(&orchestrator, run_id).await;

    assert_eq!(run.status, RunStatus::Completed);
    let leads = orchestrator
        .database()
        .get_leads_by_campaign(run.campaign_id, None)
        .await
        .unwrap();
    for lead in &leads {
        assert!(!lead.research_completed());
        // Personalization only depends on validation by default.
        assert!(lead.message_personalized());
    }

    // The skip is visible in the stage history.
    let research_row = orchestrator
        .database()
        .get_stage_runs(run.campaign_id)
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.stage == "research")
        .expect("research row recorded");
    assert_eq!(research_row.status, "skipped");
}

#[tokio::test]
async fn rejecting_research_capability_degrades_to_skip() {
    let dir = tempfile::tempdir().unwrap();
    let mut capabilities = full_capabilities(vec![
        place("a", Some("a@example.com")),
        place("b", Some("b@example.com")),
    ]);
    capabilities.researcher = Some(Arc::new(RejectingResearcher));
    let orchestrator = orchestrator_with(fast_config(dir.path()), capabilities).await;

    let run_id = orchestrator
        .generate(GenerationRequest::new("dentists", "Austin, TX", 5))
        .await
        .unwrap();
    let run = wait_terminal(&orchestrator, run_id).await;

    // Whole-capability rejection must not fail the run.
    assert_eq!(run.status, RunStatus::Completed);
    let leads = orchestrator
        .database()
        .get_leads_by_campaign(run.campaign_id, None)
        .await
        .unwrap();
    for lead in &leads {
        assert!(!lead.research_completed());
        assert_ne!(lead.status, LeadStatus::Failed);
        assert!(lead.message_personalized());
    }
}

#[tokio::test]
async fn personalization_gated_on_research_when_configured() {
    let dir = tempfile::tempdir().unwrap();
    let mut capabilities = full_capabilities(vec![place("a", Some("a@example.com"))]);
    capabilities.researcher = None;
    let config = fast_config(dir.path()).with_personalization_requires_research(true);
    let orchestrator = orchestrator_with(config, capabilities).await;

    let run_id = orchestrator
        .generate(GenerationRequest::new("dentists", "Austin, TX", 5))
        .await
        .unwrap();
    let run = wait_terminal(&orchestrator, run_id).await;

    assert_eq!(run.status, RunStatus::Completed);
    let leads = orchestrator
        .database()
        .get_leads_by_campaign(run.campaign_id, None)
        .await
        .unwrap();
    for lead in &leads {
        assert!(!lead.research_completed());
        assert!(!lead.message_personalized());
    }
}

#[tokio::test]
async fn zero_collection_results_fail_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let capabilities = CapabilitySet {
        places: Some(Arc::new(EmptyPlaces)),
        ..CapabilitySet::default()
    };
    let orchestrator = orchestrator_with(fast_config(dir.path()), capabilities).await;

    let run_id = orchestrator
        .generate(GenerationRequest::new("unicorn wranglers", "Nowhere, KS", 5))
        .await
        .unwrap();
    let run = wait_terminal(&orchestrator, run_id).await;

    assert_eq!(run.status, RunStatus::Failed);
    let message = run.error_message.expect("failed run carries a message");
    assert!(message.contains("no results"), "unexpected message: {}", message);

    let campaign = orchestrator
        .database()
        .get_campaign(run.campaign_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(campaign.status, CampaignStatus::Failed);
}

#[tokio::test]
async fn missing_places_capability_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator =
        orchestrator_with(fast_config(dir.path()), CapabilitySet::default()).await;

    let result = orchestrator
        .generate(GenerationRequest::new("dentists", "Austin, TX", 5))
        .await;
    assert!(matches!(
        result,
        Err(PipelineError::CapabilityNotConfigured { .. })
    ));
}

#[tokio::test]
async fn malformed_requests_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator_with(
        fast_config(dir.path()),
        full_capabilities(vec![place("a", Some("a@example.com"))]),
    )
    .await;

    for request in [
        GenerationRequest::new("dentists", "Austin, TX", 0),
        GenerationRequest::new("dentists", "Austin, TX", 101),
        GenerationRequest::new("", "Austin, TX", 5),
        GenerationRequest::new("dentists", "Austin, TX", 5).with_from_email("nope"),
    ] {
        assert!(matches!(
            orchestrator.generate(request).await,
            Err(PipelineError::InvalidRequest(_))
        ));
    }
}

#[tokio::test]
async fn invalid_leads_are_never_submitted() {
    let dir = tempfile::tempdir().unwrap();
    let platform = Arc::new(RecordingPlatform::default());
    let mut capabilities = full_capabilities(vec![
        place("good", Some("good@example.com")),
        place("bad", None),
    ]);
    capabilities.campaigns = Some(platform.clone());

    let config = fast_config(dir.path())
        .with_campaign_submission(true)
        .with_from_email("sales@example.com");
    let orchestrator = orchestrator_with(config, capabilities).await;

    let run_id = orchestrator
        .generate(GenerationRequest::new("dentists", "Austin, TX", 5))
        .await
        .unwrap();
    let run = wait_terminal(&orchestrator, run_id).await;
    assert_eq!(run.status, RunStatus::Completed);

    let submitted = platform.submitted.lock().await.clone();
    assert_eq!(submitted, vec!["good@example.com".to_string()]);

    let leads = orchestrator
        .database()
        .get_leads_by_campaign(run.campaign_id, None)
        .await
        .unwrap();
    let good = leads.iter().find(|l| l.place_id == "good").unwrap();
    let bad = leads.iter().find(|l| l.place_id == "bad").unwrap();
    assert_eq!(good.status, LeadStatus::Submitted);
    assert_ne!(bad.status, LeadStatus::Submitted);
    assert_eq!(run.results.unwrap().submitted_leads, 1);
}

#[tokio::test]
async fn deleting_a_running_run_cancels_it() {
    let dir = tempfile::tempdir().unwrap();
    let mut capabilities = full_capabilities(vec![
        place("a", Some("a@example.com")),
        place("b", Some("b@example.com")),
        place("c", Some("c@example.com")),
    ]);
    // Slow research keeps the run alive long enough to delete it.
    capabilities.researcher = Some(Arc::new(StubResearcher {
        delay: Duration::from_secs(2),
    }));
    let orchestrator = orchestrator_with(fast_config(dir.path()), capabilities).await;

    let run_id = orchestrator
        .generate(GenerationRequest::new("dentists", "Austin, TX", 5))
        .await
        .unwrap();
    let campaign_id = orchestrator.status(run_id).await.unwrap().campaign_id;

    tokio::time::sleep(Duration::from_millis(300)).await;
    orchestrator.delete_run(run_id).await.unwrap();

    // Status queries now miss.
    assert!(matches!(
        orchestrator.status(run_id).await,
        Err(PipelineError::RunNotFound(_))
    ));

    // The run body notices the cancellation and closes out the campaign.
    let mut campaign = None;
    for _ in 0..400 {
        let loaded = orchestrator
            .database()
            .get_campaign(campaign_id)
            .await
            .unwrap()
            .unwrap();
        if loaded.status == CampaignStatus::Failed {
            campaign = Some(loaded);
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    let campaign = campaign.expect("campaign should end failed after cancellation");
    assert_eq!(campaign.error_message.as_deref(), Some("run cancelled"));
}

#[tokio::test]
async fn runs_are_independent_and_listed_most_recent_first() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator_with(
        fast_config(dir.path()),
        full_capabilities(vec![place("a", Some("a@example.com"))]),
    )
    .await;

    let first = orchestrator
        .generate(GenerationRequest::new("dentists", "Austin, TX", 5))
        .await
        .unwrap();
    let first_run = wait_terminal(&orchestrator, first).await;

    let second = orchestrator
        .generate(GenerationRequest::new("dentists", "Austin, TX", 5))
        .await
        .unwrap();
    let second_run = wait_terminal(&orchestrator, second).await;

    // Same query and location, but independent campaigns.
    assert_ne!(first, second);
    assert_ne!(first_run.campaign_id, second_run.campaign_id);

    let runs = orchestrator.list_runs().await;
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].run_id, second);
    assert_eq!(runs[1].run_id, first);

    // Deleting a finished run removes it from the registry.
    orchestrator.delete_run(first).await.unwrap();
    assert_eq!(orchestrator.list_runs().await.len(), 1);
    assert!(matches!(
        orchestrator.status(first).await,
        Err(PipelineError::RunNotFound(_))
    ));
}

#[tokio::test]
async fn config_check_reflects_capabilities() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator_with(
        fast_config(dir.path()),
        full_capabilities(vec![place("a", Some("a@example.com"))]),
    )
    .await;

    let status = orchestrator.config_check();
    assert!(status.places);
    assert!(status.research);
    assert!(status.personalization);
    assert!(!status.campaigns);
    assert!(status.ready_for_pipeline());
    assert!(!status.ready_for_campaigns());
}
