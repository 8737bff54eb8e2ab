use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use relay_core::{AccessToken, Credential};
use relay_logging::{mask_secret, relay_debug, relay_info};
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::credential_store::{CredentialError, CredentialStore, SaveOutcome};
use crate::http::{describe_reqwest_error, endpoint, is_retryable_status, read_failure};

const TOKEN_PATH: &str = "oauth/token";

/// OAuth client id and secret. The secret never appears in `Debug` output.
#[derive(Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    client_secret: String,
}

impl ClientCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// `Basic` authorization value for `client_id:client_secret`.
pub fn basic_auth_header(client_id: &str, client_secret: &str) -> String {
    let raw = format!("{client_id}:{client_secret}");
    format!("Basic {}", STANDARD.encode(raw.as_bytes()))
}

#[derive(Debug, Error)]
pub enum TokenRefreshError {
    #[error("token exchange rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("token exchange failed: {0}")]
    Network(String),
    #[error("unexpected token response: {0}")]
    Decode(String),
    #[error("invalid token endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
}

impl TokenRefreshError {
    pub fn is_retryable(&self) -> bool {
        match self {
            TokenRefreshError::Rejected { status, .. } => is_retryable_status(*status),
            TokenRefreshError::Network(_) => true,
            TokenRefreshError::Decode(_) | TokenRefreshError::Endpoint(_) => false,
        }
    }
}

/// Result of a successful exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: AccessToken,
    /// Present only when the provider issued a different refresh token.
    pub rotated: Option<Credential>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct TokenRefresher {
    client: reqwest::Client,
    token_url: Url,
}

impl TokenRefresher {
    pub fn new(client: reqwest::Client, api_base: &Url) -> Result<Self, TokenRefreshError> {
        Ok(Self {
            client,
            token_url: endpoint(api_base, TOKEN_PATH)?,
        })
    }

    /// Exchange `credential` for an access token. No retries.
    pub async fn refresh(
        &self,
        client: &ClientCredentials,
        credential: &Credential,
    ) -> Result<TokenGrant, TokenRefreshError> {
        relay_debug!(
            "Exchanging refresh token {} at {}",
            mask_secret(credential.expose()),
            self.token_url
        );
        let response = self
            .client
            .post(self.token_url.clone())
            .header(
                AUTHORIZATION,
                basic_auth_header(&client.client_id, &client.client_secret),
            )
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", credential.expose()),
            ])
            .send()
            .await
            .map_err(|err| TokenRefreshError::Network(describe_reqwest_error(&err)))?;

        if !response.status().is_success() {
            let (status, body) = read_failure(response).await;
            return Err(TokenRefreshError::Rejected { status, body });
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|err| TokenRefreshError::Decode(err.to_string()))?;

        let access_token = body
            .access_token
            .filter(|token| !token.is_empty())
            .map(AccessToken::new)
            .ok_or_else(|| TokenRefreshError::Decode("missing access_token".to_string()))?;
        let rotated = body
            .refresh_token
            .as_deref()
            .and_then(Credential::parse)
            .filter(|fresh| fresh != credential);

        if let Some(expires_in) = body.expires_in {
            relay_debug!("Access token valid for {}s", expires_in);
        }
        Ok(TokenGrant {
            access_token,
            rotated,
        })
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Refresh(#[from] TokenRefreshError),
}

#[derive(Debug)]
pub struct Authorized {
    pub access_token: AccessToken,
    pub rotation: SaveOutcome,
}

/// Load, exchange, and commit any rotation before handing out the access token.
///
/// The old refresh token may already be invalid once the exchange succeeds,
/// so the rotated one is saved first. The credential is always re-loaded from
/// the store; nothing is cached between calls.
pub async fn acquire_access_token(
    store: &dyn CredentialStore,
    refresher: &TokenRefresher,
    client: &ClientCredentials,
) -> Result<Authorized, AuthError> {
    let credential = store.load()?;
    relay_info!(
        "Refreshing access token using refresh token {} from {}",
        mask_secret(credential.expose()),
        store.describe()
    );
    let grant = refresher.refresh(client, &credential).await?;

    let rotation = match &grant.rotated {
        Some(fresh) => store.save(fresh)?,
        None => {
            relay_info!("Provider kept the existing refresh token");
            SaveOutcome::Unchanged
        }
    };

    Ok(Authorized {
        access_token: grant.access_token,
        rotation,
    })
}
