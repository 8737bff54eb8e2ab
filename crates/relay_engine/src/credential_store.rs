use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use relay_core::Credential;
use relay_logging::{mask_secret, relay_info, relay_warn};
use thiserror::Error;

use crate::persist::{write_atomically, PersistError};

/// Output variable name the CI workflow reads the rotated token from.
pub const DEFAULT_OUTPUT_KEY: &str = "new_refresh_token";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no refresh token available from {0}")]
    MissingCredential(String),
    #[error("failed to read refresh token from {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to persist refresh token: {0}")]
    Persist(#[from] PersistError),
    #[error("failed to write CI output {path}: {source}")]
    CiOutput { path: PathBuf, source: io::Error },
    #[error("refresh token contains a line break and cannot be written as a CI output")]
    Unrepresentable,
}

/// What `save` did with the offered credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Same value as the one already held; nothing written.
    Unchanged,
    /// New value committed to durable storage.
    Persisted,
    /// New value accepted for this process, but no durable channel exists.
    Unpersisted,
}

/// Holder of the single live refresh token.
pub trait CredentialStore: Send + Sync {
    /// Human-readable location, used in errors and logs.
    fn describe(&self) -> String;

    fn load(&self) -> Result<Credential, CredentialError>;

    /// Commit `credential` if it differs from the held value.
    fn save(&self, credential: &Credential) -> Result<SaveOutcome, CredentialError>;
}

/// Refresh token kept in a file between runs.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_current(&self) -> Result<Option<Credential>, CredentialError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(Credential::parse(&text)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(CredentialError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

impl CredentialStore for FileCredentialStore {
    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }

    fn load(&self) -> Result<Credential, CredentialError> {
        self.read_current()?
            .ok_or_else(|| CredentialError::MissingCredential(self.describe()))
    }

    fn save(&self, credential: &Credential) -> Result<SaveOutcome, CredentialError> {
        // An unreadable old value must not block committing the new one.
        let current = self.read_current().unwrap_or(None);
        if current.as_ref() == Some(credential) {
            return Ok(SaveOutcome::Unchanged);
        }
        write_atomically(&self.path, &format!("{}\n", credential.expose()))?;
        relay_info!(
            "Stored rotated refresh token {} in {:?}",
            mask_secret(credential.expose()),
            self.path
        );
        Ok(SaveOutcome::Persisted)
    }
}

/// Refresh token injected per run (for example as a CI secret).
///
/// A rotated value is surfaced through the CI step output file so the
/// workflow can write it back to its secret store. Before that, an
/// `::add-mask::` command is emitted on the command channel so the runner
/// masks the value in every later log line.
pub struct CiOutputCredentialStore {
    current: Mutex<Option<Credential>>,
    output: Option<PathBuf>,
    output_key: String,
    commands: Mutex<Box<dyn Write + Send>>,
}

impl CiOutputCredentialStore {
    pub fn new(initial: Option<Credential>, output: Option<PathBuf>) -> Self {
        Self {
            current: Mutex::new(initial),
            output,
            output_key: DEFAULT_OUTPUT_KEY.to_string(),
            commands: Mutex::new(Box::new(io::stdout())),
        }
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = key.into();
        self
    }

    /// Redirect workflow commands (defaults to stdout).
    pub fn with_command_sink(mut self, sink: Box<dyn Write + Send>) -> Self {
        self.commands = Mutex::new(sink);
        self
    }

    fn emit_mask(&self, credential: &Credential) -> Result<(), io::Error> {
        let mut sink = self.commands.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(sink, "::add-mask::{}", credential.expose())?;
        sink.flush()
    }

    fn append_output(&self, path: &Path, credential: &Credential) -> Result<(), io::Error> {
        let line = format!("{}={}\n", self.output_key, credential.expose());
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        // Single write so a reader never sees half a line.
        file.write_all(line.as_bytes())?;
        file.sync_all()
    }
}

impl CredentialStore for CiOutputCredentialStore {
    fn describe(&self) -> String {
        "environment".to_string()
    }

    fn load(&self) -> Result<Credential, CredentialError> {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| CredentialError::MissingCredential(self.describe()))
    }

    fn save(&self, credential: &Credential) -> Result<SaveOutcome, CredentialError> {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if current.as_ref() == Some(credential) {
            return Ok(SaveOutcome::Unchanged);
        }
        if credential.expose().contains(['\n', '\r']) {
            return Err(CredentialError::Unrepresentable);
        }

        let outcome = match &self.output {
            Some(path) => {
                self.emit_mask(credential)
                    .map_err(|source| CredentialError::CiOutput {
                        path: path.clone(),
                        source,
                    })?;
                self.append_output(path, credential)
                    .map_err(|source| CredentialError::CiOutput {
                        path: path.clone(),
                        source,
                    })?;
                relay_info!(
                    "Published rotated refresh token {} as CI output `{}`",
                    mask_secret(credential.expose()),
                    self.output_key
                );
                SaveOutcome::Persisted
            }
            None => {
                relay_warn!(
                    "Refresh token rotated to {} but no CI output channel is configured; \
                     the next run must be given the new value by other means",
                    mask_secret(credential.expose())
                );
                SaveOutcome::Unpersisted
            }
        };
        *current = Some(credential.clone());
        Ok(outcome)
    }
}
