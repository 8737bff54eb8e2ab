use std::time::Duration;

use relay_core::{ExportRequest, Recipient};
use relay_logging::{relay_info, relay_warn};
use thiserror::Error;

use crate::analysis::{summarize_artifacts, Analyzer};
use crate::credential_store::{CredentialError, CredentialStore, SaveOutcome};
use crate::dispatch::{DeliveryError, DispatchReport, MessageDispatcher};
use crate::export::{ExportDriver, ExportError};
use crate::fetch::ArtifactFetcher;
use crate::token::{acquire_access_token, AuthError, ClientCredentials, TokenRefreshError, TokenRefresher};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("credential store: {0}")]
    Credential(#[from] CredentialError),
    #[error("token refresh: {0}")]
    TokenRefresh(#[from] TokenRefreshError),
    #[error("export: {0}")]
    Export(#[from] ExportError),
    #[error("delivery: {0}")]
    Delivery(#[from] DeliveryError),
}

impl From<AuthError> for PipelineError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Credential(err) => PipelineError::Credential(err),
            AuthError::Refresh(err) => PipelineError::TokenRefresh(err),
        }
    }
}

impl PipelineError {
    /// Whether a later scheduled run could plausibly succeed unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Credential(_) => false,
            PipelineError::TokenRefresh(err) => err.is_retryable(),
            PipelineError::Export(err) => err.is_retryable(),
            PipelineError::Delivery(err) => err.is_retryable(),
        }
    }
}

/// Optional image-understanding step between export and delivery.
pub struct AnalysisStage {
    pub fetcher: ArtifactFetcher,
    pub analyzer: Box<dyn Analyzer>,
    pub instruction: String,
    /// Pause before each artifact download.
    pub delay: Duration,
}

/// Inputs of one run.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub client: ClientCredentials,
    /// `None` skips the export and delivers text only.
    pub export: Option<ExportRequest>,
    pub text: Option<String>,
    pub recipient: Recipient,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub rotation: SaveOutcome,
    pub job_id: Option<String>,
    pub artifact_count: usize,
    pub summary_included: bool,
    pub delivery: DispatchReport,
}

/// Credential store → token refresh → export → analysis → delivery.
pub struct Pipeline {
    pub store: Box<dyn CredentialStore>,
    pub refresher: TokenRefresher,
    pub exporter: ExportDriver,
    pub dispatcher: MessageDispatcher,
    pub analysis: Option<AnalysisStage>,
}

impl Pipeline {
    /// Execute one run. Stops at the first fatal error; a rotation committed
    /// before that point stays committed.
    pub async fn run(&self, plan: &RunPlan) -> Result<RunReport, PipelineError> {
        let authorized =
            acquire_access_token(self.store.as_ref(), &self.refresher, &plan.client).await?;

        let (job_id, urls) = match &plan.export {
            Some(request) => {
                let outcome = self
                    .exporter
                    .export_design(&authorized.access_token, request)
                    .await?;
                (Some(outcome.job_id), outcome.urls)
            }
            None => {
                relay_info!("Text-only run: export skipped");
                (None, Vec::new())
            }
        };

        let summary = match (&self.analysis, urls.is_empty()) {
            (Some(stage), false) => {
                let summary = summarize_artifacts(
                    &stage.fetcher,
                    stage.analyzer.as_ref(),
                    &urls,
                    &stage.instruction,
                    stage.delay,
                )
                .await;
                if summary.is_none() {
                    relay_warn!("No analysis summary available; sending without it");
                }
                summary
            }
            _ => None,
        };

        let summary_included = summary.is_some();
        let text = compose_text(plan.text.as_deref(), summary.as_deref());
        let delivery = self
            .dispatcher
            .dispatch(text.as_deref(), &urls, &plan.recipient)
            .await?;

        Ok(RunReport {
            rotation: authorized.rotation,
            job_id,
            artifact_count: urls.len(),
            summary_included,
            delivery,
        })
    }
}

fn compose_text(base: Option<&str>, summary: Option<&str>) -> Option<String> {
    let parts: Vec<&str> = [base, summary]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n\n"))
    }
}
