//! Command-line and environment configuration.
//!
//! Everything is parsed once into [`RunConfig`] before any network call is
//! made; the components receive the pieces they need from it.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use log::LevelFilter;
use relay_core::{
    BatchPolicy, Credential, ExportFormat, ExportRequest, FormatError, ImageKind, PageSelection,
    Recipient, TextPlacement, DEFAULT_MAX_MESSAGES,
};
use relay_engine::{ClientCredentials, DispatchSettings, PollSettings};
use thiserror::Error;
use url::Url;

const DEFAULT_CANVA_API: &str = "https://api.canva.com/rest/v1/";
const DEFAULT_LINE_API: &str = "https://api.line.me/";
const DEFAULT_GEMINI_API: &str = "https://generativelanguage.googleapis.com/";
const DEFAULT_ANALYSIS_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_ANALYSIS_PROMPT: &str =
    "Summarize the key information in this image in a few short sentences.";
const DEFAULT_MESSAGE: &str = "Scheduled update for design {design_id}.";
const DESIGN_ID_PLACEHOLDER: &str = "{design_id}";
const DEFAULT_JPG_QUALITY: u16 = 100;

#[derive(Parser, Clone)]
#[command(
    name = "design-relay",
    version,
    about = "Export a design and deliver it to messaging subscribers"
)]
pub struct Cli {
    /// OAuth client id of the design-hosting integration
    #[arg(long, env = "CANVA_CLIENT_ID")]
    pub client_id: Option<String>,

    /// OAuth client secret (prefer the environment variable)
    #[arg(long, hide = true, env = "CANVA_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Refresh token injected for this run; rotations go to the CI output
    #[arg(long, hide = true, env = "CANVA_REFRESH_TOKEN", hide_env_values = true)]
    pub refresh_token: Option<String>,

    /// File holding the refresh token (takes precedence over the environment)
    #[arg(long, env = "CANVA_REFRESH_TOKEN_FILE", value_name = "PATH")]
    pub refresh_token_file: Option<PathBuf>,

    /// CI step output file that receives a rotated refresh token
    #[arg(long, env = "GITHUB_OUTPUT", value_name = "PATH")]
    pub ci_output: Option<PathBuf>,

    #[arg(long, env = "CANVA_DESIGN_ID")]
    pub design_id: Option<String>,

    /// Export type: jpg or png
    #[arg(long, env = "EXPORT_FORMAT", default_value = "jpg")]
    pub format: String,

    /// JPEG quality 1-100 (defaults to 100)
    #[arg(long, env = "EXPORT_QUALITY")]
    pub quality: Option<u16>,

    /// Comma-separated 1-based pages, in the order they should be delivered
    #[arg(long, env = "EXPORT_PAGES")]
    pub pages: Option<String>,

    /// Messaging channel access token (prefer the environment variable)
    #[arg(long, hide = true, env = "LINE_CHANNEL_ACCESS_TOKEN", hide_env_values = true)]
    pub channel_token: Option<String>,

    /// Push to this recipient id instead of broadcasting
    #[arg(long, env = "LINE_RECIPIENT_ID")]
    pub recipient: Option<String>,

    /// Text message; `{design_id}` is replaced with the design id
    #[arg(long, env = "RELAY_MESSAGE")]
    pub message: Option<String>,

    /// Send images without a text message
    #[arg(long)]
    pub no_text: bool,

    /// Place the text message after the images
    #[arg(long)]
    pub text_after_images: bool,

    /// Skip the export and send the text message only
    #[arg(long)]
    pub text_only: bool,

    /// Messages per delivery call (provider maximum is 5)
    #[arg(long, default_value_t = DEFAULT_MAX_MESSAGES)]
    pub max_messages: usize,

    /// Do not append the cache-defeat query parameter to image URLs
    #[arg(long)]
    pub no_cache_bust: bool,

    #[arg(long, default_value_t = 3)]
    pub poll_interval_secs: u64,

    #[arg(long, default_value_t = 20)]
    pub poll_attempts: u32,

    /// Enables image analysis when set
    #[arg(long, hide = true, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub analysis_key: Option<String>,

    #[arg(long, default_value = DEFAULT_ANALYSIS_PROMPT)]
    pub analysis_prompt: String,

    #[arg(long, default_value = DEFAULT_ANALYSIS_MODEL)]
    pub analysis_model: String,

    /// Pause before each artifact download during analysis
    #[arg(long, default_value_t = 1000)]
    pub analysis_delay_ms: u64,

    #[arg(long, default_value = DEFAULT_CANVA_API)]
    pub canva_api_base: String,

    #[arg(long, default_value = DEFAULT_LINE_API)]
    pub line_api_base: String,

    #[arg(long, default_value = DEFAULT_GEMINI_API)]
    pub gemini_api_base: String,

    /// off, error, warn, info, debug or trace
    #[arg(long, env = "RELAY_LOG", default_value = "info", value_parser = parse_level)]
    pub log_level: LevelFilter,

    /// Also write logs to this file
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid export settings: {0}")]
    Format(#[from] FormatError),
    #[error("invalid URL for {setting}: {source}")]
    InvalidUrl {
        setting: &'static str,
        source: url::ParseError,
    },
    #[error("invalid value for {setting}: {reason}")]
    Invalid {
        setting: &'static str,
        reason: String,
    },
    #[error("--text-only together with --no-text leaves nothing to send")]
    NothingToSend,
}

/// Where the refresh token comes from and where its rotation goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    File(PathBuf),
    Environment {
        token: Credential,
        ci_output: Option<PathBuf>,
    },
}

#[derive(Clone)]
pub struct AnalysisConfig {
    pub api_key: String,
    pub model: String,
    pub prompt: String,
    pub delay: Duration,
}

impl fmt::Debug for AnalysisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisConfig")
            .field("model", &self.model)
            .field("prompt", &self.prompt)
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub canva_api_base: Url,
    pub line_api_base: Url,
    pub gemini_api_base: Url,
}

/// Validated settings for one run.
#[derive(Clone)]
pub struct RunConfig {
    pub client: ClientCredentials,
    pub credential_source: CredentialSource,
    pub export: Option<ExportRequest>,
    pub message: Option<String>,
    pub recipient: Recipient,
    pub channel_token: String,
    pub dispatch: DispatchSettings,
    pub poll: PollSettings,
    pub analysis: Option<AnalysisConfig>,
    pub endpoints: Endpoints,
}

impl fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunConfig")
            .field("client", &self.client)
            .field("credential_source", &self.credential_source)
            .field("export", &self.export)
            .field("message", &self.message)
            .field("recipient", &self.recipient)
            .field("dispatch", &self.dispatch)
            .field("poll", &self.poll)
            .field("analysis", &self.analysis)
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}

impl RunConfig {
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let client_id = required(cli.client_id, "CANVA_CLIENT_ID")?;
        let client_secret = required(cli.client_secret, "CANVA_CLIENT_SECRET")?;
        let channel_token = required(cli.channel_token, "LINE_CHANNEL_ACCESS_TOKEN")?;

        let credential_source = match cli.refresh_token_file {
            Some(path) => CredentialSource::File(path),
            None => {
                let token = cli
                    .refresh_token
                    .as_deref()
                    .and_then(Credential::parse)
                    .ok_or(ConfigError::Missing(
                        "CANVA_REFRESH_TOKEN or CANVA_REFRESH_TOKEN_FILE",
                    ))?;
                CredentialSource::Environment {
                    token,
                    ci_output: cli.ci_output.filter(|p| !p.as_os_str().is_empty()),
                }
            }
        };

        if cli.text_only && cli.no_text {
            return Err(ConfigError::NothingToSend);
        }

        let design_id = optional(cli.design_id);
        let export = if cli.text_only {
            None
        } else {
            let design_id = design_id.clone().ok_or(ConfigError::Missing("CANVA_DESIGN_ID"))?;
            Some(build_export(design_id, &cli.format, cli.quality, cli.pages.as_deref())?)
        };

        let message = if cli.no_text {
            None
        } else {
            let template = optional(cli.message).unwrap_or_else(|| DEFAULT_MESSAGE.to_string());
            Some(render_message(&template, design_id.as_deref())?)
        };

        if !(1..=DEFAULT_MAX_MESSAGES).contains(&cli.max_messages) {
            return Err(ConfigError::Invalid {
                setting: "--max-messages",
                reason: format!("must be between 1 and {DEFAULT_MAX_MESSAGES}"),
            });
        }
        if cli.poll_attempts == 0 {
            return Err(ConfigError::Invalid {
                setting: "--poll-attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if cli.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                setting: "--poll-interval-secs",
                reason: "must be at least 1".to_string(),
            });
        }

        let recipient = match optional(cli.recipient) {
            Some(id) => Recipient::Push(id),
            None => Recipient::Broadcast,
        };

        let dispatch = DispatchSettings {
            policy: BatchPolicy {
                max_messages: cli.max_messages,
                text_placement: if cli.text_after_images {
                    TextPlacement::After
                } else {
                    TextPlacement::Before
                },
            },
            cache_defeat: !cli.no_cache_bust,
        };

        let analysis = optional(cli.analysis_key).map(|api_key| AnalysisConfig {
            api_key,
            model: cli.analysis_model,
            prompt: cli.analysis_prompt,
            delay: Duration::from_millis(cli.analysis_delay_ms),
        });

        let endpoints = Endpoints {
            canva_api_base: parse_url(&cli.canva_api_base, "--canva-api-base")?,
            line_api_base: parse_url(&cli.line_api_base, "--line-api-base")?,
            gemini_api_base: parse_url(&cli.gemini_api_base, "--gemini-api-base")?,
        };

        Ok(Self {
            client: ClientCredentials::new(client_id, client_secret),
            credential_source,
            export,
            message,
            recipient,
            channel_token,
            dispatch,
            poll: PollSettings {
                interval: Duration::from_secs(cli.poll_interval_secs),
                max_attempts: cli.poll_attempts,
            },
            analysis,
            endpoints,
        })
    }
}

/// Blank values (for example an empty CI variable) count as unset.
fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(value: Option<String>, name: &'static str) -> Result<String, ConfigError> {
    optional(value).ok_or(ConfigError::Missing(name))
}

fn build_export(
    design_id: String,
    format: &str,
    quality: Option<u16>,
    pages: Option<&str>,
) -> Result<ExportRequest, ConfigError> {
    let kind: ImageKind = format.parse()?;
    let quality = match (kind, quality) {
        (ImageKind::Jpg, None) => Some(DEFAULT_JPG_QUALITY),
        (_, q) => q,
    };
    let pages = pages
        .filter(|p| !p.trim().is_empty())
        .map(str::parse::<PageSelection>)
        .transpose()?;
    Ok(ExportRequest {
        design_id,
        format: ExportFormat::new(kind, quality)?,
        pages,
    })
}

fn render_message(template: &str, design_id: Option<&str>) -> Result<String, ConfigError> {
    if !template.contains(DESIGN_ID_PLACEHOLDER) {
        return Ok(template.to_string());
    }
    let design_id = design_id.ok_or(ConfigError::Missing("CANVA_DESIGN_ID"))?;
    Ok(template.replace(DESIGN_ID_PLACEHOLDER, design_id))
}

fn parse_level(raw: &str) -> Result<LevelFilter, String> {
    raw.parse()
        .map_err(|_| format!("unknown log level '{raw}'"))
}

fn parse_url(raw: &str, setting: &'static str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|source| ConfigError::InvalidUrl { setting, source })
}
