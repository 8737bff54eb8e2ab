//! Relay engine: network and storage IO around the pure core.
mod analysis;
mod credential_store;
mod dispatch;
mod export;
mod fetch;
mod http;
mod persist;
mod pipeline;
mod token;

pub use analysis::{summarize_artifacts, AnalysisError, Analyzer, GeminiAnalyzer};
pub use credential_store::{
    CiOutputCredentialStore, CredentialError, CredentialStore, FileCredentialStore, SaveOutcome,
    DEFAULT_OUTPUT_KEY,
};
pub use dispatch::{
    DeliveryError, DispatchReport, DispatchSettings, MessageDispatcher, StampFn,
};
pub use export::{ExportDriver, ExportError, ExportOutcome, PollSettings};
pub use fetch::{ArtifactFetcher, FetchError, FetchSettings, FetchedArtifact};
pub use http::{build_client, endpoint, HttpSettings};
pub use persist::{write_atomically, PersistError};
pub use pipeline::{AnalysisStage, Pipeline, PipelineError, RunPlan, RunReport};
pub use token::{
    acquire_access_token, basic_auth_header, AuthError, Authorized, ClientCredentials,
    TokenGrant, TokenRefreshError, TokenRefresher,
};
