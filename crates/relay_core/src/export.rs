use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Jpg,
    Png,
}

impl FromStr for ImageKind {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(ImageKind::Jpg),
            "png" => Ok(ImageKind::Png),
            other => Err(FormatError::UnknownKind(other.to_string())),
        }
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageKind::Jpg => write!(f, "jpg"),
            ImageKind::Png => write!(f, "png"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("unknown export type `{0}` (expected jpg or png)")]
    UnknownKind(String),
    #[error("jpg quality must be between 1 and 100, got {0}")]
    QualityOutOfRange(u16),
    #[error("quality is only supported for jpg exports")]
    QualityNotSupported,
    #[error("invalid page selector `{0}`")]
    InvalidPage(String),
    #[error("page {0} is requested more than once")]
    DuplicatePage(u32),
    #[error("page selector is empty")]
    EmptyPages,
}

/// Rasterization type plus optional quality, serialized as the `format` object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExportFormat {
    #[serde(rename = "type")]
    pub kind: ImageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
}

impl ExportFormat {
    pub fn new(kind: ImageKind, quality: Option<u16>) -> Result<Self, FormatError> {
        match (kind, quality) {
            (ImageKind::Png, Some(_)) => Err(FormatError::QualityNotSupported),
            (ImageKind::Jpg, Some(q)) if !(1..=100).contains(&q) => {
                Err(FormatError::QualityOutOfRange(q))
            }
            (_, q) => Ok(Self {
                kind,
                quality: q.map(|q| q as u8),
            }),
        }
    }

    pub fn jpg(quality: u16) -> Result<Self, FormatError> {
        Self::new(ImageKind::Jpg, Some(quality))
    }

    pub fn png() -> Self {
        Self {
            kind: ImageKind::Png,
            quality: None,
        }
    }
}

/// Ordered, 1-based page numbers. Order is preserved as given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PageSelection(Vec<u32>);

impl PageSelection {
    pub fn new(pages: Vec<u32>) -> Result<Self, FormatError> {
        if pages.is_empty() {
            return Err(FormatError::EmptyPages);
        }
        let mut seen = Vec::with_capacity(pages.len());
        for &page in &pages {
            if page == 0 {
                return Err(FormatError::InvalidPage(page.to_string()));
            }
            if seen.contains(&page) {
                return Err(FormatError::DuplicatePage(page));
            }
            seen.push(page);
        }
        Ok(Self(pages))
    }

    pub fn pages(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for PageSelection {
    type Err = FormatError;

    /// Parses a comma-separated list such as `"3,1,2"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let pages = s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.parse::<u32>()
                    .map_err(|_| FormatError::InvalidPage(part.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(pages)
    }
}

/// Body of the export submission request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportRequest {
    pub design_id: String,
    pub format: ExportFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages: Option<PageSelection>,
}

impl ExportRequest {
    pub fn expected_pages(&self) -> Option<usize> {
        self.pages.as_ref().map(PageSelection::len)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Success,
    Failed,
}

impl JobStatus {
    /// Anything other than the two terminal values counts as still pending.
    pub fn from_wire(status: &str) -> Self {
        match status {
            "success" => JobStatus::Success,
            "failed" => JobStatus::Failed,
            _ => JobStatus::Pending,
        }
    }
}

/// What one status response said about the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobObservation {
    pub status: JobStatus,
    pub urls: Vec<String>,
    pub error: Option<String>,
}

impl JobObservation {
    pub fn pending() -> Self {
        Self {
            status: JobStatus::Pending,
            urls: Vec::new(),
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportEvent {
    /// Status reported inline by the submission response. Does not use poll budget.
    Submitted(JobObservation),
    /// Status returned by one poll.
    Polled(JobObservation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultProblem {
    EmptyResult,
    PageCountMismatch { expected: usize, actual: usize },
}

impl fmt::Display for ResultProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultProblem::EmptyResult => write!(f, "export succeeded without any urls"),
            ResultProblem::PageCountMismatch { expected, actual } => {
                write!(f, "requested {expected} pages but received {actual} urls")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportState {
    Pending,
    Succeeded(Vec<String>),
    Failed(String),
    Invalid(ResultProblem),
    TimedOut,
}

impl ExportState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExportState::Pending)
    }
}

/// Client-side view of one export job.
///
/// The job stays `Pending` until a terminal observation arrives or the poll
/// budget runs out. Terminal states absorb every further event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportJob {
    job_id: String,
    expected_pages: Option<usize>,
    max_polls: u32,
    polls: u32,
    state: ExportState,
}

impl ExportJob {
    pub fn new(job_id: impl Into<String>, expected_pages: Option<usize>, max_polls: u32) -> Self {
        Self {
            job_id: job_id.into(),
            expected_pages,
            max_polls: max_polls.max(1),
            polls: 0,
            state: ExportState::Pending,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }

    pub fn max_polls(&self) -> u32 {
        self.max_polls
    }

    pub fn state(&self) -> &ExportState {
        &self.state
    }

    pub fn is_pending(&self) -> bool {
        !self.state.is_terminal()
    }

    pub fn apply(&mut self, event: ExportEvent) {
        if self.state.is_terminal() {
            return;
        }
        let observation = match event {
            ExportEvent::Submitted(observation) => observation,
            ExportEvent::Polled(observation) => {
                self.polls += 1;
                observation
            }
        };
        self.state = self.resolve(observation);
        if !self.state.is_terminal() && self.polls >= self.max_polls {
            self.state = ExportState::TimedOut;
        }
    }

    pub fn into_state(self) -> ExportState {
        self.state
    }

    fn resolve(&self, observation: JobObservation) -> ExportState {
        match observation.status {
            JobStatus::Pending => ExportState::Pending,
            JobStatus::Failed => ExportState::Failed(
                observation
                    .error
                    .filter(|reason| !reason.trim().is_empty())
                    .unwrap_or_else(|| "unknown".to_string()),
            ),
            JobStatus::Success => {
                let urls = observation.urls;
                if urls.is_empty() {
                    return ExportState::Invalid(ResultProblem::EmptyResult);
                }
                match self.expected_pages {
                    Some(expected) if expected != urls.len() => {
                        ExportState::Invalid(ResultProblem::PageCountMismatch {
                            expected,
                            actual: urls.len(),
                        })
                    }
                    _ => ExportState::Succeeded(urls),
                }
            }
        }
    }
}
