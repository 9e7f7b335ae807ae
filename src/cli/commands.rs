//! CLI command definitions for leadforge.
//!
//! The CLI is a thin front door: each command translates arguments into one
//! orchestrator or storage call and prints the result.

use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::Parser;
use uuid::Uuid;

use crate::export::ExportFormat;
use crate::leads::types::GenerationRequest;
use crate::pipeline::{PipelineConfig, PipelineOrchestrator};
use crate::registry::RunStatus;

/// How often the generate command polls run status.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Lead generation pipeline: discover, validate, enrich and personalize
/// business leads.
#[derive(Parser)]
#[command(name = "leadforge")]
#[command(about = "Generate enriched business leads from a category and location")]
#[command(version)]
#[command(
    long_about = "leadforge discovers businesses via a places directory and runs each lead \
through validation, profile inference, AI research, message personalization and optional \
campaign submission.\n\nExample usage:\n  leadforge generate \"dentists\" \"Austin, TX\" --count 10"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the full lead generation pipeline and wait for completion.
    #[command(alias = "gen")]
    Generate(GenerateArgs),

    /// List recent campaigns.
    Campaigns(CampaignsArgs),

    /// Show one campaign's status, counters and stage history.
    Status(StatusArgs),

    /// Export a campaign's leads to a file.
    Export(ExportArgs),

    /// Check which capabilities are configured.
    Check,
}

/// Arguments for `leadforge generate`.
#[derive(Parser, Debug)]
pub struct GenerateArgs {
    /// Business category to search for (e.g. "dentists").
    pub query: String,

    /// Location to search in (e.g. "Austin, TX").
    pub location: String,

    /// Number of leads to collect (1-100).
    #[arg(short = 'n', long, default_value = "25")]
    pub count: u32,

    /// Campaign name (default: "<query> in <location>").
    #[arg(long)]
    pub campaign_name: Option<String>,

    /// Sender address for campaign submission.
    #[arg(long, env = "INSTANTLY_FROM_EMAIL")]
    pub from_email: Option<String>,

    /// Skip the AI research stage.
    #[arg(long)]
    pub no_research: bool,

    /// Skip the message personalization stage.
    #[arg(long)]
    pub no_personalization: bool,

    /// Output the final run record as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `leadforge campaigns`.
#[derive(Parser, Debug)]
pub struct CampaignsArgs {
    /// Maximum number of campaigns to list.
    #[arg(short = 'l', long, default_value = "50")]
    pub limit: u32,
}

/// Arguments for `leadforge status`.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Campaign identifier.
    pub campaign_id: Uuid,
}

/// Arguments for `leadforge export`.
#[derive(Parser, Debug)]
pub struct ExportArgs {
    /// Campaign identifier.
    pub campaign_id: Uuid,

    /// Export format: csv or json.
    #[arg(short = 'f', long, default_value = "csv")]
    pub format: String,
}

/// Parses CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parses CLI arguments and runs the selected command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Runs the selected command with already-parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = PipelineConfig::from_env().context("loading configuration")?;
    let orchestrator = PipelineOrchestrator::from_config(config)
        .await
        .context("initializing pipeline")?;

    match cli.command {
        Commands::Generate(args) => generate(&orchestrator, args).await,
        Commands::Campaigns(args) => campaigns(&orchestrator, args).await,
        Commands::Status(args) => status(&orchestrator, args).await,
        Commands::Export(args) => export(&orchestrator, args).await,
        Commands::Check => check(&orchestrator),
    }
}

async fn generate(orchestrator: &PipelineOrchestrator, args: GenerateArgs) -> anyhow::Result<()> {
    let mut request = GenerationRequest::new(args.query, args.location, args.count)
        .with_research(!args.no_research)
        .with_personalization(!args.no_personalization);
    if let Some(name) = args.campaign_name {
        request = request.with_campaign_name(name);
    }
    if let Some(email) = args.from_email {
        request = request.with_from_email(email);
    }

    let run_id = orchestrator.generate(request).await?;
    println!("run accepted: {}", run_id);

    let mut last_step = String::new();
    let run = loop {
        let run = orchestrator.status(run_id).await?;
        if let Some(step) = &run.current_step {
            if *step != last_step {
                println!("[{:>3}%] {}", run.progress, step);
                last_step = step.clone();
            }
        }
        if run.status.is_terminal() {
            break run;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&run)?);
    } else if let Some(results) = &run.results {
        println!();
        println!("campaign:     {}", run.campaign_id);
        println!("total leads:  {}", results.total_leads);
        println!("validated:    {}", results.validated_leads);
        println!("enriched:     {}", results.enriched_leads);
        println!("researched:   {}", results.researched_leads);
        println!("personalized: {}", results.personalized_leads);
        println!("submitted:    {}", results.submitted_leads);
        if let Some(path) = &results.export_path {
            println!("export:       {}", path);
        }
        println!("duration:     {:.1}s", results.duration_secs);
    }

    match run.status {
        RunStatus::Completed => Ok(()),
        status => Err(anyhow!(
            "run {} ended {}: {}",
            run_id,
            status,
            run.error_message.unwrap_or_else(|| "unknown error".to_string())
        )),
    }
}

async fn campaigns(orchestrator: &PipelineOrchestrator, args: CampaignsArgs) -> anyhow::Result<()> {
    let campaigns = orchestrator.database().list_campaigns(args.limit).await?;
    if campaigns.is_empty() {
        println!("no campaigns");
        return Ok(());
    }

    for campaign in campaigns {
        println!(
            "{}  {:<10} {:>4} leads  {}",
            campaign.id, campaign.status, campaign.total_leads, campaign.name
        );
    }
    Ok(())
}

async fn status(orchestrator: &PipelineOrchestrator, args: StatusArgs) -> anyhow::Result<()> {
    let campaign = orchestrator
        .database()
        .get_campaign(args.campaign_id)
        .await?
        .ok_or_else(|| anyhow!("campaign {} not found", args.campaign_id))?;
    let stats = orchestrator.database().campaign_stats(args.campaign_id).await?;
    let stage_runs = orchestrator.database().get_stage_runs(args.campaign_id).await?;

    println!("campaign:     {}", campaign.id);
    println!("name:         {}", campaign.name);
    println!("status:       {}", campaign.status);
    if let Some(error) = &campaign.error_message {
        println!("error:        {}", error);
    }
    println!("total leads:  {}", stats.total_leads);
    println!("valid emails: {}", stats.valid_emails);
    println!("enriched:     {}", stats.enriched_leads);
    println!("researched:   {}", stats.researched_leads);
    println!("personalized: {}", stats.personalized_leads);
    println!("submitted:    {}", stats.submitted_leads);

    if !stage_runs.is_empty() {
        println!();
        println!("stage history:");
        for record in stage_runs {
            let detail = record
                .error_message
                .map(|m| format!(" ({})", m))
                .unwrap_or_default();
            println!(
                "  {:<16} {:<10} {}/{} ok{}",
                record.stage, record.status, record.success_count, record.processed_count, detail
            );
        }
    }
    Ok(())
}

async fn export(orchestrator: &PipelineOrchestrator, args: ExportArgs) -> anyhow::Result<()> {
    let format = ExportFormat::parse(&args.format)?;
    let path = orchestrator.export_leads(args.campaign_id, format).await?;
    println!("{}", path.display());
    Ok(())
}

fn check(orchestrator: &PipelineOrchestrator) -> anyhow::Result<()> {
    let status = orchestrator.config_check();

    let mark = |configured: bool| if configured { "ok" } else { "missing" };
    println!("places directory:  {}", mark(status.places));
    println!("validation:        {}", mark(status.validation));
    println!("research:          {}", mark(status.research));
    println!("personalization:   {}", mark(status.personalization));
    println!("campaign platform: {}", mark(status.campaigns));
    println!();
    println!("ready for scraping:  {}", status.ready_for_scraping());
    println!("ready for pipeline:  {}", status.ready_for_pipeline());
    println!("ready for campaigns: {}", status.ready_for_campaigns());

    if !status.missing.is_empty() {
        println!();
        println!("missing configuration: {}", status.missing.join(", "));
    }
    Ok(())
}
