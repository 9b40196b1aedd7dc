//! Bootstrap source selection and keyfile materialization.
//!
//! Sources are tried in a fixed order: an explicit keyfile path from the
//! environment, the local keyfile, then a keyfile synthesized from a client
//! id/secret pair. The synthesized keyfile is the only file this module
//! creates, and its guard removes it on drop.

use std::path::{Path, PathBuf};

use gtasks_core::credentials::{ClientSecrets, Keyfile};
use tracing::{debug, warn};

use crate::store::write_private;

pub const GOOGLE_OAUTH_CREDENTIALS: &str = "GOOGLE_OAUTH_CREDENTIALS";
pub const GOOGLE_CLIENT_ID: &str = "GOOGLE_CLIENT_ID";
pub const GOOGLE_CLIENT_SECRET: &str = "GOOGLE_CLIENT_SECRET";

/// Snapshot of the bootstrap-relevant environment. Empty values count as unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapEnv {
    pub oauth_credentials: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl BootstrapEnv {
    pub fn from_process() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        Self {
            oauth_credentials: read(GOOGLE_OAUTH_CREDENTIALS),
            client_id: read(GOOGLE_CLIENT_ID),
            client_secret: read(GOOGLE_CLIENT_SECRET),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapSource {
    EnvKeyfilePath(PathBuf),
    LocalKeyfilePath(PathBuf),
    SyntheticFromEnvPair {
        client_id: String,
        client_secret: String,
    },
}

impl BootstrapSource {
    pub fn describe(&self) -> &'static str {
        match self {
            BootstrapSource::EnvKeyfilePath(_) => "env_keyfile_path",
            BootstrapSource::LocalKeyfilePath(_) => "local_keyfile_path",
            BootstrapSource::SyntheticFromEnvPair { .. } => "synthetic_from_env_pair",
        }
    }

    /// Produce a keyfile on disk for the authenticator. Only the synthetic
    /// source writes anything, and only to `ephemeral_path`.
    pub fn materialize(&self, ephemeral_path: &Path) -> std::io::Result<MaterializedKeyfile> {
        match self {
            BootstrapSource::EnvKeyfilePath(path) | BootstrapSource::LocalKeyfilePath(path) => {
                Ok(MaterializedKeyfile::Existing(path.clone()))
            }
            BootstrapSource::SyntheticFromEnvPair {
                client_id,
                client_secret,
            } => {
                let keyfile = Keyfile::installed(ClientSecrets::synthesized(
                    client_id.as_str(),
                    client_secret.as_str(),
                ));
                EphemeralKeyfile::create(ephemeral_path, &keyfile).map(MaterializedKeyfile::Ephemeral)
            }
        }
    }

    /// Client registration for in-memory use (token refresh). Never touches disk
    /// for the synthetic source.
    pub fn client_secrets(&self) -> Result<ClientSecrets, String> {
        match self {
            BootstrapSource::EnvKeyfilePath(path) | BootstrapSource::LocalKeyfilePath(path) => {
                let raw = std::fs::read_to_string(path)
                    .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
                ClientSecrets::from_keyfile_json(&raw)
            }
            BootstrapSource::SyntheticFromEnvPair {
                client_id,
                client_secret,
            } => Ok(ClientSecrets::synthesized(
                client_id.as_str(),
                client_secret.as_str(),
            )),
        }
    }
}

/// Ordered credential sources, evaluated against a fixed environment snapshot.
#[derive(Debug, Clone)]
pub struct BootstrapChain {
    env: BootstrapEnv,
    local_keyfile: PathBuf,
    ephemeral_keyfile: PathBuf,
}

impl BootstrapChain {
    pub fn new(
        env: BootstrapEnv,
        local_keyfile: impl Into<PathBuf>,
        ephemeral_keyfile: impl Into<PathBuf>,
    ) -> Self {
        Self {
            env,
            local_keyfile: local_keyfile.into(),
            ephemeral_keyfile: ephemeral_keyfile.into(),
        }
    }

    pub fn ephemeral_keyfile(&self) -> &Path {
        &self.ephemeral_keyfile
    }

    /// First source whose precondition holds, if any.
    pub fn select(&self) -> Option<BootstrapSource> {
        if let Some(path) = &self.env.oauth_credentials {
            return Some(BootstrapSource::EnvKeyfilePath(PathBuf::from(path)));
        }
        if self.local_keyfile.is_file() {
            return Some(BootstrapSource::LocalKeyfilePath(self.local_keyfile.clone()));
        }
        match (&self.env.client_id, &self.env.client_secret) {
            (Some(client_id), Some(client_secret)) => Some(BootstrapSource::SyntheticFromEnvPair {
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
            }),
            _ => None,
        }
    }

    pub fn client_secrets(&self) -> Option<ClientSecrets> {
        let source = self.select()?;
        match source.client_secrets() {
            Ok(secrets) => Some(secrets),
            Err(err) => {
                warn!(source = source.describe(), error = %err, "client registration unavailable for token refresh");
                None
            }
        }
    }
}

/// A keyfile path handed to the authenticator. Dropping an ephemeral one
/// deletes it.
#[derive(Debug)]
pub enum MaterializedKeyfile {
    Existing(PathBuf),
    Ephemeral(EphemeralKeyfile),
}

impl MaterializedKeyfile {
    pub fn path(&self) -> &Path {
        match self {
            MaterializedKeyfile::Existing(path) => path,
            MaterializedKeyfile::Ephemeral(file) => file.path(),
        }
    }
}

#[derive(Debug)]
pub struct EphemeralKeyfile {
    path: PathBuf,
}

impl EphemeralKeyfile {
    pub fn create(path: &Path, keyfile: &Keyfile) -> std::io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec(keyfile).map_err(std::io::Error::other)?;
        // Construct the guard before writing so a partial write is still removed.
        let guard = Self {
            path: path.to_path_buf(),
        };
        write_private(&guard.path, &data)?;
        debug!(path = %guard.path.display(), "synthesized keyfile written");
        Ok(guard)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for EphemeralKeyfile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "synthesized keyfile removed"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "failed to remove synthesized keyfile")
            }
        }
    }
}
