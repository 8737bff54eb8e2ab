//! Relay core: pure domain types and state machines, free of IO.
mod batch;
mod cache;
mod credential;
mod export;
mod message;

pub use batch::{plan_batch, BatchError, BatchPolicy, DeliveryBatch, DEFAULT_MAX_MESSAGES};
pub use cache::{cache_defeat, CACHE_DEFEAT_PARAM};
pub use credential::{AccessToken, Credential};
pub use export::{
    ExportEvent, ExportFormat, ExportJob, ExportRequest, ExportState, FormatError, ImageKind,
    JobObservation, JobStatus, PageSelection, ResultProblem,
};
pub use message::{OutboundMessage, Recipient, TextPlacement};
