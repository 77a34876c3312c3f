mod ai;
mod config;
mod error;
mod executor;
mod models;
mod orchestrator;
mod pipeline;
mod report;
mod sampler;
mod server;
mod static_analysis;
mod test_runner;
mod workspace;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::ai::OpenAiReview;
use crate::config::AppConfig;
use crate::orchestrator::Orchestrator;
use crate::pipeline::Pipeline;
use crate::report::TextReportWriter;
use crate::server::{router, AppState};
use crate::static_analysis::BuildDiagnostics;
use crate::test_runner::DotnetTestRunner;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("assessor=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let config = AppConfig::from_env();
    info!("Starting Assessment Worker...");
    info!(
        toolchain = %config.toolchain.command,
        reports_dir = %config.reports_dir.display(),
        "Loaded configuration"
    );
    if config.openai_api_key.is_none() {
        info!("OPENAI_API_KEY not set; AI review will report a task failure");
    }

    let pipeline = Arc::new(Pipeline::new(config.toolchain.clone()));
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(OpenAiReview::new(config.openai_api_key.clone())),
        Arc::new(BuildDiagnostics::new(config.toolchain.clone())),
        pipeline.clone(),
        Arc::new(DotnetTestRunner::new(
            config.toolchain.clone(),
            config.test_template_dir.clone(),
        )),
        Arc::new(TextReportWriter::new(config.reports_dir.clone())),
    ));

    let app = router(AppState {
        pipeline,
        orchestrator,
    });

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", addr);
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
