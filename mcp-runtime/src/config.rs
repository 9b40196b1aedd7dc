use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::google::GoogleEndpoints;
use crate::oauth::CONSENT_TIMEOUT;

pub const CONFIG_DIR_NAME: &str = "gtasks-mcp";
pub const CREDENTIALS_FILE: &str = "credentials.json";
pub const LOCAL_KEYFILE: &str = "gcp-oauth.keys.json";
pub const EPHEMERAL_KEYFILE: &str = "temp-oauth.keys.json";

/// Filesystem locations and collaborator settings for one server process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Durable token store
    pub credentials_path: PathBuf,
    /// Keyfile tried second when bootstrapping
    pub local_keyfile_path: PathBuf,
    /// Where a keyfile synthesized from GOOGLE_CLIENT_ID/SECRET is written
    /// for the duration of the consent flow
    pub ephemeral_keyfile_path: PathBuf,
    pub endpoints: GoogleEndpoints,
    pub open_browser: bool,
    pub auth_timeout: Duration,
}

impl RuntimeConfig {
    /// `<platform config dir>/gtasks-mcp`, or `./gtasks-mcp` when the platform has none.
    pub fn default_dir() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join(CONFIG_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR_NAME))
    }

    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            credentials_path: dir.join(CREDENTIALS_FILE),
            local_keyfile_path: dir.join(LOCAL_KEYFILE),
            ephemeral_keyfile_path: dir.join(EPHEMERAL_KEYFILE),
            endpoints: GoogleEndpoints::default(),
            open_browser: true,
            auth_timeout: CONSENT_TIMEOUT,
        }
    }

    pub fn with_credentials_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_path = path.into();
        self
    }

    pub fn with_local_keyfile(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_keyfile_path = path.into();
        self
    }

    pub fn with_open_browser(mut self, open_browser: bool) -> Self {
        self.open_browser = open_browser;
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::from_dir(Self::default_dir())
    }
}
