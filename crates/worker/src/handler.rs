//! Job orchestration.
//!
//! [`JobHandler`] runs one job end to end:
//! validate -> probe -> upload images -> open channel -> submit ->
//! monitor -> collect. Every outcome, including failures, is turned into
//! a [`JobOutput`]; nothing escapes as an error.

use genpod_comfyui::api::ComfyUIApi;
use genpod_comfyui::client::{ChannelConnector, ComfyUIClient};
use genpod_comfyui::monitor::{CompletionMonitor, CompletionOutcome, EventSource};
use genpod_comfyui::probe::{wait_until_available, ProbeConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::Instrument;

use crate::collector::{collect, EncodedImage};
use crate::config::WorkerConfig;
use crate::error::JobError;
use crate::input::{validate, ValidatedJob};
use crate::upload::upload_images;

/// A job as delivered by the serverless platform.
#[derive(Debug, Clone, Deserialize)]
pub struct JobRequest {
    /// Platform job ID, used for log correlation only.
    #[serde(default)]
    pub id: Option<String>,
    /// Raw job input, validated by [`validate`].
    #[serde(default)]
    pub input: Value,
}

/// Response returned for a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum JobOutput {
    /// The workflow ran. `images` is always present, possibly empty;
    /// `errors` lists execution and per-artifact failures and is omitted
    /// when there are none.
    Completed {
        images: Vec<EncodedImage>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        errors: Vec<String>,
    },
    /// The job could not run or its result could not be determined.
    Failed { error: String },
}

impl JobOutput {
    fn failed(err: &JobError) -> Self {
        Self::Failed {
            error: err.to_string(),
        }
    }
}

/// Runs jobs against a single ComfyUI instance.
pub struct JobHandler<C = ComfyUIClient> {
    http: reqwest::Client,
    api: ComfyUIApi,
    connector: C,
    health_url: String,
    probe: ProbeConfig,
}

impl JobHandler<ComfyUIClient> {
    /// Handler using the WebSocket event channel described by `config`.
    pub fn from_config(config: &WorkerConfig) -> Self {
        let connector =
            ComfyUIClient::new(config.ws_url()).with_receive_timeout(config.receive_timeout);
        Self::new(config, connector)
    }
}

impl<C: ChannelConnector> JobHandler<C> {
    /// Handler using a caller-supplied event channel connector.
    pub fn new(config: &WorkerConfig, connector: C) -> Self {
        let http = reqwest::Client::new();
        let api = ComfyUIApi::with_client(http.clone(), config.api_url())
            .with_timeouts(config.timeouts.clone());

        Self {
            http,
            api,
            connector,
            health_url: config.health_url(),
            probe: config.probe.clone(),
        }
    }

    /// Run a platform job inside a span carrying its ID.
    pub async fn handle(&self, request: JobRequest) -> JobOutput {
        let job_id = request
            .id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let span = tracing::info_span!("job", job_id = %job_id);

        self.run(&request.input).instrument(span).await
    }

    /// Run a job from its raw input.
    pub async fn run(&self, input: &Value) -> JobOutput {
        match self.execute(input).await {
            Ok(output) => output,
            Err(e) => {
                tracing::error!(error = %e, "Job failed");
                JobOutput::failed(&e)
            }
        }
    }

    async fn execute(&self, input: &Value) -> Result<JobOutput, JobError> {
        let job = validate(input)?;
        tracing::info!(
            nodes = job.workflow.node_count(),
            images = job.images.len(),
            "Job input validated",
        );

        if !wait_until_available(&self.http, &self.health_url, &self.probe).await {
            return Err(JobError::Unavailable {
                url: self.health_url.clone(),
                attempts: self.probe.max_attempts,
            });
        }

        if !job.images.is_empty() {
            let report = upload_images(&self.api, &job.images).await;
            if !report.is_success() {
                return Err(JobError::Upload(report.errors));
            }
        }

        let client_id = uuid::Uuid::new_v4().to_string();
        let mut channel = self.connector.open(&client_id).await?;

        let result = self.track(&job, &client_id, &mut channel).await;
        channel.close().await;
        result
    }

    /// Submit, wait for completion and collect, with `channel` already open.
    async fn track(
        &self,
        job: &ValidatedJob,
        client_id: &str,
        channel: &mut C::Source,
    ) -> Result<JobOutput, JobError> {
        let prompt_id = self
            .api
            .submit_workflow(job.workflow.as_json(), client_id)
            .await?;

        let outcome = CompletionMonitor::new(prompt_id.as_str())
            .wait(channel)
            .await?;

        match outcome {
            CompletionOutcome::Completed => {
                let results = collect(&self.api, &prompt_id).await?;
                Ok(JobOutput::Completed {
                    images: results.images,
                    errors: results.errors,
                })
            }
            CompletionOutcome::Failed(failure) => {
                // Nodes that ran before the failure may still have saved files.
                let mut errors = vec![failure.to_string()];
                let images = match collect(&self.api, &prompt_id).await {
                    Ok(results) => {
                        errors.extend(results.errors);
                        results.images
                    }
                    Err(e) => {
                        errors.push(e.to_string());
                        Vec::new()
                    }
                };
                Ok(JobOutput::Completed { images, errors })
            }
        }
    }
}
