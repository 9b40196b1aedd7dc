//! Credential bundle, refresh updates and OAuth client keyfiles.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
pub const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_CERTS_URI: &str = "https://www.googleapis.com/oauth2/v1/certs";
pub const SYNTHETIC_PROJECT_ID: &str = "gtasks-mcp";
pub const SYNTHETIC_REDIRECT_URI: &str = "http://localhost:3000/oauth2callback";

/// Access tokens expiring within this window are treated as stale.
pub const EXPIRY_SKEW_MS: i64 = 5 * 60 * 1000;

/// Persisted delegated-access credentials.
///
/// Field names match what Google's token endpoint returns, with
/// `expiry_date` in milliseconds since the epoch. Unknown fields are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialBundle {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CredentialBundle {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expiry_date: None,
            scope: None,
            token_type: None,
            id_token: None,
            extra: Map::new(),
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_expiry_date(mut self, expiry_date: i64) -> Self {
        self.expiry_date = Some(expiry_date);
        self
    }

    /// Build a bundle from an update. Requires an access token.
    pub fn from_update(update: &TokenUpdate) -> Option<Self> {
        let access_token = update.access_token.clone()?;
        let mut bundle = Self::new(access_token);
        bundle.merge(update);
        Some(bundle)
    }

    /// Missing expiry counts as fresh.
    pub fn is_stale_at(&self, now_ms: i64) -> bool {
        if self.access_token.is_empty() {
            return true;
        }
        match self.expiry_date {
            Some(expiry) => expiry <= now_ms + EXPIRY_SKEW_MS,
            None => false,
        }
    }

    pub fn is_stale(&self) -> bool {
        self.is_stale_at(now_millis())
    }

    /// Overwrite only the fields present in `update`. A refresh that does not
    /// carry a refresh token keeps the stored one.
    pub fn merge(&mut self, update: &TokenUpdate) {
        if let Some(access_token) = &update.access_token {
            self.access_token = access_token.clone();
        }
        if let Some(refresh_token) = &update.refresh_token {
            self.refresh_token = Some(refresh_token.clone());
        }
        if let Some(expiry_date) = update.expiry_date {
            self.expiry_date = Some(expiry_date);
        }
        if let Some(scope) = &update.scope {
            self.scope = Some(scope.clone());
        }
        if let Some(token_type) = &update.token_type {
            self.token_type = Some(token_type.clone());
        }
        if let Some(id_token) = &update.id_token {
            self.id_token = Some(id_token.clone());
        }
    }
}

/// Fields emitted by a token refresh. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl TokenUpdate {
    /// An update with neither token is not worth persisting.
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none()
    }
}

/// Raw token endpoint response (authorization_code and refresh_token grants).
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
}

impl TokenResponse {
    pub fn into_update(self, now_ms: i64) -> TokenUpdate {
        TokenUpdate {
            access_token: Some(self.access_token),
            refresh_token: self.refresh_token,
            expiry_date: self.expires_in.map(|secs| now_ms + secs * 1000),
            scope: self.scope,
            token_type: self.token_type,
            id_token: self.id_token,
        }
    }
}

/// OAuth client registration, as found in a downloaded `*.keys.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_provider_x509_cert_url: Option<String>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

fn default_auth_uri() -> String {
    GOOGLE_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.to_string()
}

impl ClientSecrets {
    /// Registration synthesized from a bare client id/secret pair.
    pub fn synthesized(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: Some(client_secret.into()),
            project_id: Some(SYNTHETIC_PROJECT_ID.to_string()),
            auth_uri: GOOGLE_AUTH_URI.to_string(),
            token_uri: GOOGLE_TOKEN_URI.to_string(),
            auth_provider_x509_cert_url: Some(GOOGLE_CERTS_URI.to_string()),
            redirect_uris: vec![SYNTHETIC_REDIRECT_URI.to_string()],
        }
    }

    /// Parse a keyfile with either an `installed` or a `web` section.
    pub fn from_keyfile_json(raw: &str) -> Result<Self, String> {
        let keyfile: Keyfile =
            serde_json::from_str(raw).map_err(|e| format!("invalid keyfile JSON: {e}"))?;
        keyfile
            .installed
            .or(keyfile.web)
            .ok_or_else(|| "keyfile has neither an 'installed' nor a 'web' section".to_string())
    }
}

/// On-disk keyfile wrapper.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed: Option<ClientSecrets>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web: Option<ClientSecrets>,
}

impl Keyfile {
    pub fn installed(secrets: ClientSecrets) -> Self {
        Self {
            installed: Some(secrets),
            web: None,
        }
    }
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
