use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use opinio_cli::dataset::{COMPANY_COLUMN, SENTIMENT_COLUMN};
use opinio_cli::{AnalyzeArgs, Command, Config, Dataset};
use opinio_client::{BrandwatchClient, completion_client};
use opinio_core::{
    AppError, BpeTokenCounter, HttpConfig, ModelRegistry, PipelineEvent, ProgressPlan,
    ProgressRange, ProgressReporter, RunConfig, RunSummary, SentimentPipeline, TracingReporter,
    UploadConfig, UploadDispatcher, UploadSummary, load_models_config,
};

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    let config = Config::parse();

    let default_level = if config.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<AppError>() {
                Some(app) => eprintln!("\nError: {}", app.user_message()),
                None => eprintln!("\nError: {:#}", err),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let registry = load_registry(&config)?;

    match &config.command {
        Command::Analyze(args) => analyze(&config, &registry, args).await,
        Command::Upload { input } => {
            let dataset = Dataset::read_path(input)?;
            dataset.require_column(SENTIMENT_COLUMN)?;
            info!("Loaded {} rows from {}", dataset.len(), input.display());
            let summary = upload(
                &config,
                &dataset.mentions(),
                ProgressRange::new(0.0, 100.0),
            )
            .await?;
            print_upload_summary(&summary);
            TracingReporter.report(PipelineEvent::Progress(100.0));
            Ok(())
        }
        Command::Models => {
            list_models(&registry);
            Ok(())
        }
    }
}

fn load_registry(config: &Config) -> anyhow::Result<ModelRegistry> {
    let registry = match load_models_config(config.models_config.clone())? {
        Some(models) => ModelRegistry::with_overrides(models),
        None => ModelRegistry::default(),
    };
    Ok(registry)
}

async fn analyze(
    config: &Config,
    registry: &ModelRegistry,
    args: &AnalyzeArgs,
) -> anyhow::Result<()> {
    let run_config = RunConfig::builder(&args.model)
        .with_prompt(args.prompt())
        .with_temperature(args.temperature)
        .with_max_output_tokens(args.max_output_tokens)
        .with_logprobs(args.logprobs)
        .with_upload(args.upload)
        .build(registry)?;

    let dataset = Dataset::read_path(&args.input)?;
    let mentions = dataset.mentions();
    info!("Loaded {} rows from {}", dataset.len(), args.input.display());

    if args.per_record_company {
        dataset.require_column(COMPANY_COLUMN)?;
    }

    // Fail on missing credentials before any request goes out.
    let client = completion_client(&run_config, &config.api_keys())?;
    if args.upload {
        brandwatch_client(config)?;
    }
    let counter = BpeTokenCounter::for_config(&run_config)?;

    info!(
        "Classifying with {} ({}), {} tokens / {} requests per window",
        run_config.model,
        run_config.family,
        run_config.limits.token_budget,
        run_config.limits.request_budget
    );

    let reporter = TracingReporter;
    let plan = ProgressPlan::new(args.upload);
    let pipeline = SentimentPipeline::new(client, counter, run_config);
    let output = pipeline.run(mentions, &reporter).await?;
    print_run_summary(&output.summary);

    let output_path = args.output_path();
    dataset
        .write_results_path(&output_path, &output.mentions, args.logprobs)
        .context("Failed to write results")?;
    info!("Results saved to {}", output_path.display());

    if args.upload {
        let summary = upload(config, &output.mentions, plan.upload).await?;
        print_upload_summary(&summary);
    }

    plan.finish(&reporter);
    Ok(())
}

fn brandwatch_client(config: &Config) -> Result<BrandwatchClient, AppError> {
    BrandwatchClient::new(
        config.brandwatch_api_token.as_deref().unwrap_or_default(),
        config.brandwatch_project_id.as_deref().unwrap_or_default(),
        &HttpConfig::default(),
    )
}

async fn upload(
    config: &Config,
    mentions: &[opinio_core::Mention],
    range: ProgressRange,
) -> anyhow::Result<UploadSummary> {
    let client = brandwatch_client(config)?;
    info!("Uploading to {}", client.mentions_url());
    let dispatcher = UploadDispatcher::new(client, UploadConfig::default());
    let summary = dispatcher
        .upload_mentions(mentions, range, &TracingReporter)
        .await?;
    Ok(summary)
}

fn print_run_summary(summary: &RunSummary) {
    info!("");
    info!("═══════════════════════════════════════════════════════");
    info!("CLASSIFICATION COMPLETE");
    info!("═══════════════════════════════════════════════════════");
    if let Some(started) = summary.first_batch_started_at {
        info!("  Started:             {}", started.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    info!("  Records classified:  {}", summary.processed);
    info!("  Removed (no text):   {}", summary.removed_invalid);
    info!("  Estimated tokens:    {}", summary.total_tokens);
    info!("  Batches:             {}", summary.batches);
    info!("  Main pass errors:    {}", summary.main_pass_errors);
    info!("  Reprocessed:         {}", summary.reprocessed);
    info!("───────────────────────────────────────────────────────");
    info!("  Residual errors:     {}", summary.residual_errors);
    info!("═══════════════════════════════════════════════════════");

    if summary.residual_errors > 0 {
        warn!(
            "{} records could not be classified and are marked 'Final Error'",
            summary.residual_errors
        );
    }
}

fn print_upload_summary(summary: &UploadSummary) {
    info!("");
    info!("═══════════════════════════════════════════════════════");
    info!("UPLOAD COMPLETE");
    info!("═══════════════════════════════════════════════════════");
    info!("  Uploaded:            {} / {}", summary.uploaded, summary.total);
    info!("  Excluded:            {}", summary.excluded);
    info!("  Dropped:             {}", summary.dropped);
    info!("  Abandoned:           {}", summary.abandoned);
    info!("  Rounds:              {}", summary.rounds);
    info!("═══════════════════════════════════════════════════════");

    if summary.dropped + summary.abandoned > 0 {
        error!(
            "{} records were not uploaded",
            summary.dropped + summary.abandoned
        );
    }
}

fn list_models(registry: &ModelRegistry) {
    println!("\n{:<24} {:<10} {:>14} {:>16}", "MODEL", "FAMILY", "TOKEN BUDGET", "REQUEST BUDGET");
    for entry in registry.models() {
        println!(
            "{:<24} {:<10} {:>14} {:>16}",
            entry.name,
            entry.family.to_string(),
            entry.token_budget,
            entry.request_budget
        );
    }
    if let Some(path) = opinio_core::default_config_path() {
        println!("\nAdd or override models in {}", path.display());
    }
    println!();
}
