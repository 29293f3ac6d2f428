//! google-auth: Google service-account credentials and OAuth2 access tokens.
//!
//! Purpose
//! - Load a service-account JSON key file (the file `GOOGLE_APPLICATION_CREDENTIALS`
//!   points at).
//! - Mint short-lived OAuth2 access tokens with the JWT-bearer grant: sign an
//!   RS256 assertion with the account's private key and exchange it at the
//!   key's `token_uri`.
//! - Cache the token and refresh it shortly before it expires.
//!
//! API
//! - `ServiceAccountKey::from_file(path)` → `Result<ServiceAccountKey, AuthError>`
//! - `TokenProvider::new(key, scopes, http)` then `token().await` → bearer token
//!
//! Notes
//! - Key problems are reported when the provider is built, not on first use.

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// OAuth2 scope granting read/write access to Cloud Datastore.
pub const DATASTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME: Duration = Duration::from_secs(3600);
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("cannot read credentials file: {0}")]
    Io(String),
    #[error("malformed service account key: {0}")]
    MalformedKey(String),
    #[error("failed to sign token assertion: {0}")]
    Signing(String),
    #[error("token endpoint unreachable: {0}")]
    Network(String),
    #[error("token endpoint returned {status}: {body}")]
    TokenEndpoint { status: u16, body: String },
}

impl AuthError {
    /// Failures worth retrying: network trouble, throttling, and server errors.
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::Network(_) => true,
            AuthError::TokenEndpoint { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Parsed service-account key file.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(rename = "type")]
    pub key_type: String,
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

// The private key stays out of logs.
impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .field("token_uri", &self.token_uri)
            .field("project_id", &self.project_id)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AuthError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AuthError::Io(format!("{}: {e}", path.display())))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, AuthError> {
        let key: ServiceAccountKey =
            serde_json::from_str(raw).map_err(|e| AuthError::MalformedKey(e.to_string()))?;
        if key.key_type != "service_account" {
            return Err(AuthError::MalformedKey(format!(
                "unsupported credential type `{}`",
                key.key_type
            )));
        }
        if key.client_email.is_empty() {
            return Err(AuthError::MalformedKey("empty client_email".into()));
        }
        Ok(key)
    }
}

/// Bearer token plus its expiry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: SystemTime,
}

impl AccessToken {
    /// Usable at `now` with at least the refresh margin left.
    pub fn is_fresh(&self, now: SystemTime) -> bool {
        now + REFRESH_MARGIN < self.expires_at
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Mints and caches access tokens for one service account.
pub struct TokenProvider {
    key: ServiceAccountKey,
    signing_key: EncodingKey,
    scope: String,
    http: reqwest::Client,
    cached: Mutex<Option<AccessToken>>,
}

impl fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenProvider")
            .field("key", &self.key)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl TokenProvider {
    pub fn new(
        key: ServiceAccountKey,
        scopes: &[&str],
        http: reqwest::Client,
    ) -> Result<Self, AuthError> {
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| AuthError::MalformedKey(format!("private_key: {e}")))?;
        Ok(Self {
            key,
            signing_key,
            scope: scopes.join(" "),
            http,
            cached: Mutex::new(None),
        })
    }

    pub fn client_email(&self) -> &str {
        &self.key.client_email
    }

    /// Signed JWT-bearer assertion issued at `now`.
    pub fn assertion(&self, now: SystemTime) -> Result<String, AuthError> {
        let iat = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        let claims = AssertionClaims {
            iss: self.key.client_email.clone(),
            scope: self.scope.clone(),
            aud: self.key.token_uri.clone(),
            iat,
            exp: iat + ASSERTION_LIFETIME.as_secs(),
        };
        let header = Header {
            alg: Algorithm::RS256,
            kid: self.key.private_key_id.clone(),
            ..Default::default()
        };
        encode(&header, &claims, &self.signing_key).map_err(|e| AuthError::Signing(e.to_string()))
    }

    /// Current bearer token, fetching a new one when the cached token is stale.
    pub async fn token(&self) -> Result<String, AuthError> {
        let mut cached = self.cached.lock().await;
        let now = SystemTime::now();
        if let Some(tok) = cached.as_ref().filter(|t| t.is_fresh(now)) {
            trace!("google-auth: using cached access token");
            return Ok(tok.token.clone());
        }

        let fresh = self.fetch(now).await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    async fn fetch(&self, now: SystemTime) -> Result<AccessToken, AuthError> {
        let assertion = self.assertion(now)?;
        debug!(
            client_email = %self.key.client_email,
            token_uri = %self.key.token_uri,
            "google-auth: requesting access token"
        );
        let resp = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::TokenEndpoint {
                status: status.as_u16(),
                body,
            });
        }

        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| AuthError::Network(format!("token response: {e}")))?;
        let lifetime = body
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(ASSERTION_LIFETIME);
        Ok(AccessToken {
            token: body.access_token,
            expires_at: now + lifetime,
        })
    }
}
