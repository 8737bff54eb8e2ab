//! Builds the pipeline from a validated [`RunConfig`] and maps failures to
//! process exit codes.

use std::sync::Arc;

use chrono::Utc;
use relay_core::Recipient;
use relay_engine::{
    build_client, AnalysisError, AnalysisStage, ArtifactFetcher, CiOutputCredentialStore,
    CredentialError, CredentialStore, DeliveryError, ExportDriver, ExportError, FetchSettings,
    FileCredentialStore, GeminiAnalyzer, HttpSettings, MessageDispatcher, Pipeline,
    PipelineError, RunPlan, RunReport, SaveOutcome, StampFn, TokenRefreshError, TokenRefresher,
};
use relay_logging::relay_info;
use thiserror::Error;

use crate::config::{CredentialSource, RunConfig};

pub const EXIT_CONFIG: u8 = 2;
pub const EXIT_CREDENTIAL_STORE: u8 = 3;
pub const EXIT_TOKEN_REFRESH: u8 = 4;
pub const EXIT_EXPORT: u8 = 5;
pub const EXIT_DELIVERY: u8 = 6;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("cannot build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("invalid token endpoint: {0}")]
    TokenSetup(TokenRefreshError),
    #[error("invalid export endpoint: {0}")]
    ExportSetup(ExportError),
    #[error("invalid messaging endpoint: {0}")]
    DeliverySetup(DeliveryError),
    #[error("invalid analysis endpoint: {0}")]
    AnalysisSetup(AnalysisError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl RunError {
    pub fn exit_code(&self) -> u8 {
        match self {
            RunError::Client(_)
            | RunError::TokenSetup(_)
            | RunError::ExportSetup(_)
            | RunError::DeliverySetup(_)
            | RunError::AnalysisSetup(_) => EXIT_CONFIG,
            RunError::Pipeline(PipelineError::Credential(CredentialError::MissingCredential(
                _,
            ))) => EXIT_CONFIG,
            RunError::Pipeline(PipelineError::Credential(_)) => EXIT_CREDENTIAL_STORE,
            RunError::Pipeline(PipelineError::TokenRefresh(_)) => EXIT_TOKEN_REFRESH,
            RunError::Pipeline(PipelineError::Export(_)) => EXIT_EXPORT,
            RunError::Pipeline(PipelineError::Delivery(_)) => EXIT_DELIVERY,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            RunError::Pipeline(err) => err.is_retryable(),
            _ => false,
        }
    }
}

fn credential_store(source: &CredentialSource) -> Box<dyn CredentialStore> {
    match source {
        CredentialSource::File(path) => Box::new(FileCredentialStore::new(path.clone())),
        CredentialSource::Environment { token, ci_output } => Box::new(
            CiOutputCredentialStore::new(Some(token.clone()), ci_output.clone()),
        ),
    }
}

fn wall_clock_stamp() -> StampFn {
    Arc::new(|| Utc::now().timestamp_millis().to_string())
}

pub fn build_pipeline(config: &RunConfig) -> Result<Pipeline, RunError> {
    let client = build_client(&HttpSettings::default())?;
    let api = &config.endpoints;

    let analysis = match &config.analysis {
        Some(settings) => Some(AnalysisStage {
            fetcher: ArtifactFetcher::new(client.clone(), FetchSettings::default()),
            analyzer: Box::new(
                GeminiAnalyzer::new(
                    client.clone(),
                    &api.gemini_api_base,
                    &settings.model,
                    settings.api_key.clone(),
                )
                .map_err(RunError::AnalysisSetup)?,
            ),
            instruction: settings.prompt.clone(),
            delay: settings.delay,
        }),
        None => None,
    };

    Ok(Pipeline {
        store: credential_store(&config.credential_source),
        refresher: TokenRefresher::new(client.clone(), &api.canva_api_base)
            .map_err(RunError::TokenSetup)?,
        exporter: ExportDriver::new(client.clone(), &api.canva_api_base, config.poll)
            .map_err(RunError::ExportSetup)?,
        dispatcher: MessageDispatcher::new(
            client,
            &api.line_api_base,
            config.channel_token.clone(),
            config.dispatch,
            wall_clock_stamp(),
        )
        .map_err(RunError::DeliverySetup)?,
        analysis,
    })
}

pub async fn execute(config: &RunConfig) -> Result<RunReport, RunError> {
    let pipeline = build_pipeline(config)?;
    relay_info!("Credential store: {}", pipeline.store.describe());
    let plan = RunPlan {
        client: config.client.clone(),
        export: config.export.clone(),
        text: config.message.clone(),
        recipient: config.recipient.clone(),
    };
    Ok(pipeline.run(&plan).await?)
}

/// One-line outcome for the run log.
pub fn summarize(report: &RunReport) -> String {
    let rotation = match report.rotation {
        SaveOutcome::Unchanged => "not rotated",
        SaveOutcome::Persisted => "rotated and persisted",
        SaveOutcome::Unpersisted => "rotated but NOT persisted",
    };
    let target = match &report.delivery.recipient {
        Recipient::Broadcast => "broadcast".to_string(),
        Recipient::Push(id) => format!("push to {id}"),
    };
    let mut line = format!(
        "Run complete: job {}, {} artifact(s), {} message(s) sent via {}, refresh token {}",
        report.job_id.as_deref().unwrap_or("-"),
        report.artifact_count,
        report.delivery.sent,
        target,
        rotation
    );
    if report.delivery.dropped_images > 0 {
        line.push_str(&format!(
            ", {} image(s) dropped",
            report.delivery.dropped_images
        ));
    }
    if report.summary_included {
        line.push_str(", analysis summary included");
    }
    line
}
