//! Local artifact store with atomic, first-writer-wins publication.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use tsf_core::{Error, Result};

use crate::stage::StageId;

/// Environment variable naming the store root.
pub const STORE_ENV: &str = "TSF_LOCAL_STORE";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Directory tree holding stage artifacts.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store rooted at `$TSF_LOCAL_STORE`.
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(STORE_ENV) {
            Some(root) if !root.is_empty() => Ok(Self::new(PathBuf::from(root))),
            _ => Err(Error::Config(format!("{} is not set", STORE_ENV))),
        }
    }

    /// Store root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Artifact location of `id`.
    pub fn target(&self, id: &StageId) -> Target {
        Target { path: self.root.join(id.relative_path()), id: id.clone() }
    }
}

/// Outcome of [`Target::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Publish {
    /// This call published the artifact.
    Written,
    /// Another producer published first; this call changed nothing.
    AlreadyPresent,
}

/// The artifact of one stage identity.
#[derive(Debug, Clone)]
pub struct Target {
    id: StageId,
    path: PathBuf,
}

/// Removes the temp file unless it was consumed by `rename`.
struct TempFile {
    path: PathBuf,
}

impl Drop for TempFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

impl Target {
    /// Owning stage identity.
    pub fn id(&self) -> &StageId {
        &self.id
    }

    /// Absolute artifact path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `true` when a non-empty artifact is published.
    pub fn exists(&self) -> bool {
        fs::metadata(&self.path).map(|m| m.is_file() && m.len() > 0).unwrap_or(false)
    }

    /// Artifact bytes.
    pub fn read(&self) -> Result<Vec<u8>> {
        fs::read(&self.path).map_err(|e| {
            Error::Data(format!("cannot read artifact {}: {}", self.path.display(), e))
        })
    }

    /// Artifact parsed as JSON.
    pub fn load_json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.read()?)?)
    }

    /// Publish `bytes` atomically.
    ///
    /// The bytes go to a hidden temp file next to the artifact, are flushed,
    /// and are then hard-linked to the final name. If an artifact is already
    /// published the temp file is discarded and [`Publish::AlreadyPresent`]
    /// is returned. On failure no artifact appears.
    pub fn write(&self, bytes: &[u8]) -> Result<Publish> {
        if bytes.is_empty() {
            return Err(Error::Data(format!("refusing to publish empty artifact {}", self.id)));
        }
        let dir = self.path.parent().ok_or_else(|| {
            Error::Config(format!("artifact path {} has no parent", self.path.display()))
        })?;
        fs::create_dir_all(dir)?;

        let fingerprint = self.id.fingerprint();
        let temp = TempFile {
            path: dir.join(format!(
                ".{}.{}.{}.{}.tmp",
                self.id.artifact(),
                &fingerprint[..16],
                std::process::id(),
                TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
            )),
        };
        {
            let mut file = fs::File::create(&temp.path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }

        match fs::hard_link(&temp.path, &self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                tracing::debug!(stage = %self.id, "artifact already published, discarding");
                return Ok(Publish::AlreadyPresent);
            }
            Err(e) if matches!(e.kind(), ErrorKind::Unsupported | ErrorKind::PermissionDenied) => {
                tracing::warn!(
                    stage = %self.id,
                    error = %e,
                    "hard links unavailable, publishing by rename"
                );
                if self.exists() {
                    return Ok(Publish::AlreadyPresent);
                }
                fs::rename(&temp.path, &self.path)?;
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            stage = %self.id,
            fingerprint = %&fingerprint[..16],
            bytes = bytes.len(),
            path = %self.path.display(),
            "artifact published"
        );
        Ok(Publish::Written)
    }
}
