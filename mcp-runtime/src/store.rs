use std::io::Write;
use std::path::{Path, PathBuf};

use gtasks_core::credentials::{CredentialBundle, TokenUpdate};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("credential file {path} is not a valid credential bundle: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Durable single-record credential store at a fixed path.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn load(&self) -> Result<Option<CredentialBundle>, StoreError> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        serde_json::from_str(&data)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                path: self.path.clone(),
                source,
            })
    }

    /// Atomic replace: write a 0600 sibling, then rename over the record.
    pub fn save(&self, bundle: &CredentialBundle) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let data = serde_json::to_string_pretty(bundle).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        let staging = self.staging_path();
        let written = write_private(&staging, data.as_bytes())
            .and_then(|()| std::fs::rename(&staging, &self.path));
        if let Err(err) = written {
            let _ = std::fs::remove_file(&staging);
            return Err(io_err(err));
        }
        debug!(path = %self.path.display(), "credential bundle persisted");
        Ok(())
    }

    /// Read-modify-write: merge a refresh into the stored record so fields
    /// the refresh did not carry (typically the refresh token) survive.
    pub fn apply_update(&self, update: &TokenUpdate) -> Result<Option<CredentialBundle>, StoreError> {
        if update.is_empty() {
            return Ok(None);
        }
        let merged = match self.load()? {
            Some(mut existing) => {
                existing.merge(update);
                existing
            }
            None => match CredentialBundle::from_update(update) {
                Some(bundle) => bundle,
                None => return Ok(None),
            },
        };
        self.save(&merged)?;
        Ok(Some(merged))
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

/// Create or truncate `path` with owner-only permissions and write `data`.
pub(crate) fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(data)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

#[cfg(not(unix))]
trait OpenOptionsExt {
    fn mode(&mut self, _mode: u32) -> &mut Self;
}

#[cfg(not(unix))]
impl OpenOptionsExt for std::fs::OpenOptions {
    fn mode(&mut self, _mode: u32) -> &mut Self {
        self
    }
}
