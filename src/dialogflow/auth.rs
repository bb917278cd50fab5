//! Backend credentials and OAuth bearer tokens.
//!
//! Resolution order (first hit wins):
//! 1) Explicit file: `credentials.file`, else `GOOGLE_APPLICATION_CREDENTIALS`
//! 2) Inline JSON blob in `GCP_CREDENTIALS`
//! 3) Well-known files in the working directory, then the gcloud ADC file
//! 4) Ambient: `GOOGLE_OAUTH_ACCESS_TOKEN`, else the GCE metadata server
//!
//! Resolution runs once at startup; any failure is a configuration error.

use crate::config::CredentialsConfig;
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const DEFAULT_METADATA_HOST: &str = "169.254.169.254";
const METADATA_TOKEN_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/token";
const METADATA_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
/// Refresh this many seconds before a token expires
const EXPIRY_SAFETY_WINDOW: i64 = 300;

/// Files looked up in the working directory, in order
pub const WELL_KNOWN_FILES: &[&str] = &[
    "service-account.json",
    "credentials.json",
    "gcp-credentials.json",
];

/// Environment variables consulted during resolution
const CREDENTIAL_ENV_VARS: &[&str] = &[
    "GOOGLE_APPLICATION_CREDENTIALS",
    "GCP_CREDENTIALS",
    "GOOGLE_OAUTH_ACCESS_TOKEN",
    "GCE_METADATA_HOST",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub token_uri: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizedUserKey {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

/// Shapes of a Google credentials JSON document, keyed by its `type` field
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CredentialsDocument {
    ServiceAccount(ServiceAccountKey),
    AuthorizedUser(AuthorizedUserKey),
}

/// Resolved backend credentials
#[derive(Debug, Clone)]
pub enum Credentials {
    ServiceAccount(ServiceAccountKey),
    AuthorizedUser(AuthorizedUserKey),
    /// Pre-minted access token from the environment
    AccessToken(String),
    /// Tokens fetched from the instance metadata server
    Metadata { token_url: String },
}

/// Where resolution looks; `from_environment` snapshots the real process state
#[derive(Debug, Clone, Default)]
pub struct CredentialSearch {
    pub explicit_file: Option<String>,
    pub env: HashMap<String, String>,
    pub search_dir: PathBuf,
    pub gcloud_adc_file: Option<PathBuf>,
}

impl CredentialSearch {
    pub fn from_environment(config: &CredentialsConfig) -> Self {
        let env = CREDENTIAL_ENV_VARS
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|v| (key.to_string(), v)))
            .collect();

        Self {
            explicit_file: config.file.clone(),
            env,
            search_dir: PathBuf::from("."),
            gcloud_adc_file: Some(PathBuf::from(
                shellexpand::tilde("~/.config/gcloud/application_default_credentials.json")
                    .into_owned(),
            )),
        }
    }

    fn var(&self, key: &str) -> Option<&str> {
        self.env
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}

impl Credentials {
    /// Walk the resolution order and return the first usable credentials.
    pub async fn resolve(search: &CredentialSearch) -> Result<Self> {
        let explicit = search
            .explicit_file
            .as_deref()
            .or_else(|| search.var("GOOGLE_APPLICATION_CREDENTIALS"));
        if let Some(path) = explicit {
            let path = shellexpand::tilde(path).into_owned();
            info!("Using credentials file {}", path);
            return Self::from_file(Path::new(&path));
        }

        if let Some(blob) = search.var("GCP_CREDENTIALS") {
            info!("Using inline credentials from GCP_CREDENTIALS");
            return Self::from_json(blob);
        }

        let candidates = WELL_KNOWN_FILES
            .iter()
            .map(|name| search.search_dir.join(name))
            .chain(search.gcloud_adc_file.clone());
        for candidate in candidates {
            if candidate.is_file() {
                info!("Using credentials file {}", candidate.display());
                return Self::from_file(&candidate);
            }
        }

        if let Some(token) = search.var("GOOGLE_OAUTH_ACCESS_TOKEN") {
            info!("Using access token from GOOGLE_OAUTH_ACCESS_TOKEN");
            return Ok(Self::AccessToken(token.to_string()));
        }

        let host = search.var("GCE_METADATA_HOST").unwrap_or(DEFAULT_METADATA_HOST);
        let token_url = format!("http://{}{}", host, METADATA_TOKEN_PATH);
        if probe_metadata(&token_url).await {
            info!("Using ambient credentials from metadata server at {}", host);
            return Ok(Self::Metadata { token_url });
        }

        Err(AgentError::configuration(
            "no backend credentials found: set credentials.file, GOOGLE_APPLICATION_CREDENTIALS \
             or GCP_CREDENTIALS, place service-account.json in the working directory, \
             or run where a metadata server is reachable",
        ))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            AgentError::configuration(format!(
                "cannot read credentials file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&json)
    }

    /// Parse a credentials document; service account keys are checked for a usable PEM key.
    pub fn from_json(json: &str) -> Result<Self> {
        let document: CredentialsDocument = serde_json::from_str(json).map_err(|e| {
            AgentError::configuration(format!("invalid credentials JSON: {}", e))
        })?;

        match document {
            CredentialsDocument::ServiceAccount(key) => {
                EncodingKey::from_rsa_pem(key.private_key.as_bytes()).map_err(|e| {
                    AgentError::configuration(format!(
                        "service account private key is not a valid RSA PEM: {}",
                        e
                    ))
                })?;
                Ok(Self::ServiceAccount(key))
            }
            CredentialsDocument::AuthorizedUser(key) => Ok(Self::AuthorizedUser(key)),
        }
    }

    /// Short label for logs; never includes secret material.
    pub fn describe(&self) -> String {
        match self {
            Self::ServiceAccount(key) => format!("service account {}", key.client_email),
            Self::AuthorizedUser(key) => format!("authorized user (client {})", key.client_id),
            Self::AccessToken(_) => "static access token".to_string(),
            Self::Metadata { .. } => "metadata server".to_string(),
        }
    }

    pub fn into_token_provider(self, http: reqwest::Client) -> Arc<dyn TokenProvider> {
        let grant = match self {
            Self::AccessToken(token) => return Arc::new(StaticTokenProvider::new(token)),
            Self::ServiceAccount(key) => Grant::ServiceAccount(key),
            Self::AuthorizedUser(key) => Grant::AuthorizedUser(key),
            Self::Metadata { token_url } => Grant::Metadata { token_url },
        };

        Arc::new(OAuthTokenProvider {
            http,
            grant,
            cache: TokenCache::default(),
        })
    }
}

async fn probe_metadata(token_url: &str) -> bool {
    let client = match reqwest::Client::builder()
        .timeout(METADATA_PROBE_TIMEOUT)
        .build()
    {
        Ok(client) => client,
        Err(_) => return false,
    };

    match client
        .get(token_url)
        .header("Metadata-Flavor", "Google")
        .send()
        .await
    {
        Ok(resp) => resp.status().is_success(),
        Err(e) => {
            debug!("Metadata server probe failed: {}", e);
            false
        }
    }
}

/// Supplies `Authorization: Bearer` tokens for backend calls
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String>;
}

pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self) -> Result<String> {
        Ok(self.token.clone())
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    /// Unix timestamp seconds when token expires
    exp_unix: i64,
}

/// Single-slot token cache; holding the lock across a fetch serializes refreshes
#[derive(Default)]
struct TokenCache {
    slot: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    async fn get_or_fetch<F, Fut>(&self, fetch: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(String, i64)>>,
    {
        let mut slot = self.slot.lock().await;
        let now = chrono::Utc::now().timestamp();

        if let Some(cached) = slot.as_ref() {
            if cached.exp_unix - EXPIRY_SAFETY_WINDOW > now {
                return Ok(cached.token.clone());
            }
        }

        let (token, expires_in) = fetch().await?;
        *slot = Some(CachedToken {
            token: token.clone(),
            exp_unix: now + expires_in,
        });
        Ok(token)
    }
}

enum Grant {
    ServiceAccount(ServiceAccountKey),
    AuthorizedUser(AuthorizedUserKey),
    Metadata { token_url: String },
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

/// Token provider for the grant types that mint expiring tokens
struct OAuthTokenProvider {
    http: reqwest::Client,
    grant: Grant,
    cache: TokenCache,
}

impl OAuthTokenProvider {
    async fn fetch(&self) -> Result<(String, i64)> {
        let request = match &self.grant {
            Grant::ServiceAccount(key) => {
                let token_uri = key.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);
                let assertion = sign_assertion(key, token_uri)?;
                self.http.post(token_uri).form(&[
                    ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                    ("assertion", assertion.as_str()),
                ])
            }
            Grant::AuthorizedUser(key) => self.http.post(DEFAULT_TOKEN_URI).form(&[
                ("grant_type", "refresh_token"),
                ("client_id", key.client_id.as_str()),
                ("client_secret", key.client_secret.as_str()),
                ("refresh_token", key.refresh_token.as_str()),
            ]),
            Grant::Metadata { token_url } => self
                .http
                .get(token_url)
                .header("Metadata-Flavor", "Google"),
        };

        let resp = request
            .send()
            .await
            .map_err(|e| AgentError::backend(format!("token request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| AgentError::backend(format!("token endpoint returned error: {}", e)))?;

        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| AgentError::backend(format!("invalid token response: {}", e)))?;

        debug!(expires_in = body.expires_in, "Fetched backend access token");
        Ok((body.access_token, body.expires_in))
    }
}

#[async_trait]
impl TokenProvider for OAuthTokenProvider {
    async fn token(&self) -> Result<String> {
        self.cache.get_or_fetch(|| self.fetch()).await
    }
}

fn sign_assertion(key: &ServiceAccountKey, audience: &str) -> Result<String> {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        iss: &key.client_email,
        scope: CLOUD_PLATFORM_SCOPE,
        aud: audience,
        iat: now,
        exp: now + 3600,
    };

    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|e| AgentError::configuration(format!("invalid RSA private key: {}", e)))?;

    encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
        .map_err(|e| AgentError::configuration(format!("failed to sign JWT: {}", e)))
}
