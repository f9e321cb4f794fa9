use cyanic_core::contributor::{Batch, PromptMode, Prompts, Sampling, Seed};
use cyanic_core::document::MemoryDocument;
use cyanic_core::settings::JsonSettings;
use cyanic_core::types::{Region, RequestKind, Size};
use cyanic_headless::config::HeadlessConfig;
use cyanic_headless::output;
use cyanic_orchestrator::config::OrchestratorConfig;
use cyanic_orchestrator::executor::{Orchestrator, Submission};
use cyanic_orchestrator::job::JobOutcome;
use cyanic_sdapi::api::SdApi;
use cyanic_sdapi::readiness::{wait_until_ready, ReadinessConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cyanic_headless=debug,cyanic_orchestrator=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = HeadlessConfig::from_env();
    tracing::info!(host = %config.host, width = config.width, height = config.height, "Loaded headless configuration");

    let settings = match &config.settings_path {
        Some(path) => JsonSettings::load(path).expect("Failed to load settings file"),
        None => JsonSettings::with_defaults(),
    };

    // --- Shutdown ---
    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received SIGINT (Ctrl-C), cancelling");
                shutdown.cancel();
            }
        }
    });

    // --- Server ---
    let api = SdApi::new(&config.host);
    if !wait_until_ready(&api, &ReadinessConfig::default(), &shutdown).await {
        tracing::warn!(base_url = api.base_url(), "Server never became ready, exiting");
        return;
    }
    let profile = api.detect_profile().await.expect("Failed to read server options");

    // --- Orchestrator ---
    let document = MemoryDocument::open(Size::new(config.width, config.height));
    let orchestrator = Orchestrator::new(api, document, OrchestratorConfig::from_settings(&settings), profile);

    let canceller = orchestrator.canceller();
    let cancel_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown.cancelled().await;
            canceller.cancel();
        }
    });

    let submission = Submission::new(RequestKind::TextToImage)
        .with_contributor(Prompts::new(
            PromptMode::TextToImage,
            config.prompt.as_str(),
            config.negative_prompt.as_str(),
        ))
        .with_contributor(Seed::from_text(&config.seed, "", 0.0))
        .with_contributor(Batch::from_settings(&settings))
        .with_contributor(Sampling::from_settings(&settings))
        .with_region(Region::new(0, 0, config.width, config.height));

    let report = orchestrator.submit(submission).await.expect("Orchestrator is idle at startup");
    cancel_task.abort();

    let elapsed_ms = (report.finished_at - report.started_at).num_milliseconds();
    match report.outcome {
        JobOutcome::Completed { layers, .. } => {
            let written = orchestrator.with_document(|doc| output::write_layers(doc, &layers, &config.output_dir));
            match written {
                Ok(paths) => tracing::info!(job_id = %report.job_id, files = paths.len(), elapsed_ms, "Job completed"),
                Err(e) => tracing::error!(job_id = %report.job_id, error = %e, "Failed to write results"),
            }
        }
        JobOutcome::Cancelled => {
            tracing::info!(job_id = %report.job_id, elapsed_ms, "Job cancelled");
        }
        JobOutcome::Failed(e) => {
            tracing::error!(job_id = %report.job_id, error = %e, elapsed_ms, "Job failed");
        }
    }
}
