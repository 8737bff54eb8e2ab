use std::time::Duration;

use relay_core::{
    AccessToken, ExportEvent, ExportJob, ExportRequest, ExportState, JobObservation, JobStatus,
    ResultProblem,
};
use relay_logging::{relay_debug, relay_info, relay_warn};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::http::{describe_reqwest_error, endpoint, is_retryable_status, read_failure};

const EXPORTS_PATH: &str = "exports";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_attempts: 20,
        }
    }
}

impl PollSettings {
    /// Longest the poll loop can wait before giving up.
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("export submission rejected with status {status}: {body}")]
    Submit { status: u16, body: String },
    #[error("status poll for export job {job_id} rejected with status {status}: {body}")]
    Poll {
        job_id: String,
        status: u16,
        body: String,
    },
    #[error("export job {job_id} failed: {reason}")]
    JobFailed { job_id: String, reason: String },
    #[error("export job {job_id} not finished after {attempts} polls ({waited:?})")]
    Timeout {
        job_id: String,
        attempts: u32,
        waited: Duration,
    },
    #[error("export job {job_id} returned an unusable result: {problem}")]
    InvalidResult {
        job_id: String,
        problem: ResultProblem,
    },
    #[error("export request failed: {0}")]
    Network(String),
    #[error("unexpected export response: {0}")]
    Decode(String),
    #[error("invalid export endpoint: {0}")]
    Endpoint(String),
}

impl ExportError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ExportError::Submit { status, .. } | ExportError::Poll { status, .. } => {
                is_retryable_status(*status)
            }
            ExportError::Timeout { .. } | ExportError::Network(_) => true,
            ExportError::JobFailed { .. }
            | ExportError::InvalidResult { .. }
            | ExportError::Decode(_)
            | ExportError::Endpoint(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOutcome {
    pub job_id: String,
    /// One URL per rendered page, in requested page order.
    pub urls: Vec<String>,
    pub polls: u32,
}

#[derive(Debug, Deserialize)]
struct JobEnvelope {
    job: JobBody,
}

#[derive(Debug, Deserialize)]
struct JobBody {
    id: Option<String>,
    status: Option<String>,
    #[serde(default)]
    urls: Vec<String>,
    error: Option<JobErrorBody>,
}

#[derive(Debug, Deserialize)]
struct JobErrorBody {
    code: Option<String>,
    message: Option<String>,
}

impl JobBody {
    fn observation(self) -> JobObservation {
        let status = self
            .status
            .as_deref()
            .map(JobStatus::from_wire)
            .unwrap_or(JobStatus::Pending);
        let error = self
            .error
            .and_then(|e| e.message.filter(|m| !m.is_empty()).or(e.code));
        JobObservation {
            status,
            urls: self.urls,
            error,
        }
    }
}

/// Submits export jobs and polls them to a terminal state.
#[derive(Debug, Clone)]
pub struct ExportDriver {
    client: reqwest::Client,
    exports_url: Url,
    poll: PollSettings,
}

impl ExportDriver {
    pub fn new(
        client: reqwest::Client,
        api_base: &Url,
        poll: PollSettings,
    ) -> Result<Self, ExportError> {
        let exports_url =
            endpoint(api_base, EXPORTS_PATH).map_err(|e| ExportError::Endpoint(e.to_string()))?;
        Ok(Self {
            client,
            exports_url,
            poll,
        })
    }

    pub fn poll_settings(&self) -> PollSettings {
        self.poll
    }

    /// Run one export to completion. No partial result is ever returned.
    pub async fn export_design(
        &self,
        token: &AccessToken,
        request: &ExportRequest,
    ) -> Result<ExportOutcome, ExportError> {
        let (job_id, initial) = self.submit(token, request).await?;
        relay_info!(
            "Export job {} submitted for design {} ({}{})",
            job_id,
            request.design_id,
            request.format.kind,
            request
                .pages
                .as_ref()
                .map(|p| format!(", pages {:?}", p.pages()))
                .unwrap_or_default()
        );

        let mut job = ExportJob::new(&job_id, request.expected_pages(), self.poll.max_attempts);
        job.apply(ExportEvent::Submitted(initial));
        while job.is_pending() {
            tokio::time::sleep(self.poll.interval).await;
            let observation = self.poll_once(token, &job_id).await?;
            relay_debug!(
                "Export job {} poll {}/{}: {:?}",
                job_id,
                job.polls() + 1,
                job.max_polls(),
                observation.status
            );
            job.apply(ExportEvent::Polled(observation));
        }

        let polls = job.polls();
        match job.into_state() {
            ExportState::Succeeded(urls) => {
                if let Some(pages) = &request.pages {
                    for (page, url) in pages.pages().iter().zip(&urls) {
                        relay_debug!("Export job {} page {} -> {}", job_id, page, url);
                    }
                }
                relay_info!(
                    "Export job {} finished with {} url(s) after {} poll(s)",
                    job_id,
                    urls.len(),
                    polls
                );
                Ok(ExportOutcome {
                    job_id,
                    urls,
                    polls,
                })
            }
            ExportState::Failed(reason) => Err(ExportError::JobFailed { job_id, reason }),
            ExportState::Invalid(problem) => {
                relay_warn!("Export job {} result rejected: {}", job_id, problem);
                Err(ExportError::InvalidResult { job_id, problem })
            }
            ExportState::TimedOut => Err(ExportError::Timeout {
                job_id,
                attempts: polls,
                waited: self.poll.interval * polls,
            }),
            ExportState::Pending => Err(ExportError::Decode(
                "poll loop ended with a pending job".to_string(),
            )),
        }
    }

    async fn submit(
        &self,
        token: &AccessToken,
        request: &ExportRequest,
    ) -> Result<(String, JobObservation), ExportError> {
        let response = self
            .client
            .post(self.exports_url.clone())
            .bearer_auth(token.expose())
            .json(request)
            .send()
            .await
            .map_err(|err| ExportError::Network(describe_reqwest_error(&err)))?;

        if !response.status().is_success() {
            let (status, body) = read_failure(response).await;
            return Err(ExportError::Submit { status, body });
        }

        let envelope: JobEnvelope = response
            .json()
            .await
            .map_err(|err| ExportError::Decode(err.to_string()))?;
        let job_id = envelope
            .job
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ExportError::Decode("submission response has no job id".to_string()))?;
        Ok((job_id, envelope.job.observation()))
    }

    async fn poll_once(
        &self,
        token: &AccessToken,
        job_id: &str,
    ) -> Result<JobObservation, ExportError> {
        let url = self.job_url(job_id)?;
        let response = self
            .client
            .get(url)
            .bearer_auth(token.expose())
            .send()
            .await
            .map_err(|err| ExportError::Network(describe_reqwest_error(&err)))?;

        if !response.status().is_success() {
            let (status, body) = read_failure(response).await;
            return Err(ExportError::Poll {
                job_id: job_id.to_string(),
                status,
                body,
            });
        }

        let envelope: JobEnvelope = response
            .json()
            .await
            .map_err(|err| ExportError::Decode(err.to_string()))?;
        Ok(envelope.job.observation())
    }

    fn job_url(&self, job_id: &str) -> Result<Url, ExportError> {
        let mut url = self.exports_url.clone();
        url.path_segments_mut()
            .map_err(|_| ExportError::Endpoint(self.exports_url.to_string()))?
            .pop_if_empty()
            .push(job_id);
        Ok(url)
    }
}
