//! `genpod-worker` -- run a single ComfyUI job.
//!
//! Reads a job document (`{"id": "...", "input": {"workflow": {...}}}`)
//! from stdin, runs it against the configured ComfyUI instance and writes
//! the JSON response to stdout. Logs go to stderr.
//!
//! See [`WorkerConfig::from_env`] for the environment variables read.

use anyhow::Context;
use tokio::io::AsyncReadExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use genpod_worker::config::WorkerConfig;
use genpod_worker::handler::{JobHandler, JobRequest};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "genpod_worker=info,genpod_comfyui=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = WorkerConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    tracing::info!(
        api_url = %config.api_url(),
        probe_attempts = config.probe.max_attempts,
        "Starting genpod-worker",
    );

    if let Err(e) = run(&config).await {
        tracing::error!(error = %format!("{e:#}"), "Worker failed");
        std::process::exit(1);
    }
}

async fn run(config: &WorkerConfig) -> anyhow::Result<()> {
    let mut raw = String::new();
    tokio::io::stdin()
        .read_to_string(&mut raw)
        .await
        .context("failed to read job document from stdin")?;

    // An unparseable document still gets a structured response: the
    // validator reports it as malformed input.
    let request = serde_json::from_str::<JobRequest>(&raw).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Job document is not valid JSON");
        JobRequest {
            id: None,
            input: serde_json::Value::String(raw.clone()),
        }
    });

    let handler = JobHandler::from_config(config);
    let output = handler.handle(request).await;

    let body = serde_json::to_string(&output).context("failed to serialize job output")?;
    println!("{body}");
    Ok(())
}
