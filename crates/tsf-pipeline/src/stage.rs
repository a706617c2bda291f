//! Stage identity and the stage trait.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tsf_core::{Error, Result};

use crate::store::Target;

fn check_part(what: &str, value: &str) -> Result<()> {
    if value.is_empty()
        || value == "."
        || value == ".."
        || value.contains('/')
        || value.contains('\\')
        || value.contains('\0')
    {
        return Err(Error::Config(format!("invalid {} '{}' in stage identity", what, value)));
    }
    Ok(())
}

/// Identity of a stage: `kind`, `version`, `config`, an ordered parameter
/// tuple and the artifact file name.
///
/// The artifact lives at `<kind>/<config>/<parts...>/<version>/<artifact>`
/// below the store root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId {
    kind: String,
    version: String,
    config: String,
    parts: Vec<String>,
    artifact: String,
}

impl StageId {
    /// Identity without parameters; add them with [`with_part`](Self::with_part).
    pub fn new(kind: &str, version: &str, config: &str, artifact: &str) -> Result<Self> {
        check_part("kind", kind)?;
        check_part("version", version)?;
        check_part("config", config)?;
        check_part("artifact", artifact)?;
        Ok(Self {
            kind: kind.to_string(),
            version: version.to_string(),
            config: config.to_string(),
            parts: Vec::new(),
            artifact: artifact.to_string(),
        })
    }

    /// Append one parameter to the tuple.
    pub fn with_part(mut self, part: impl Into<String>) -> Result<Self> {
        let part = part.into();
        check_part("parameter", &part)?;
        self.parts.push(part);
        Ok(self)
    }

    /// Stage kind.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Version tag.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Config name.
    pub fn config(&self) -> &str {
        &self.config
    }

    /// Ordered parameter tuple.
    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    /// Artifact file name.
    pub fn artifact(&self) -> &str {
        &self.artifact
    }

    /// Canonical key, `kind/config/parts.../version/artifact`.
    pub fn key(&self) -> String {
        let mut segments = vec![self.kind.as_str(), self.config.as_str()];
        segments.extend(self.parts.iter().map(String::as_str));
        segments.push(self.version.as_str());
        segments.push(self.artifact.as_str());
        segments.join("/")
    }

    /// SHA-256 of the canonical key, hex encoded.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.key().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Artifact path relative to the store root.
    pub fn relative_path(&self) -> PathBuf {
        let mut path = PathBuf::from(&self.kind);
        path.push(&self.config);
        for part in &self.parts {
            path.push(part);
        }
        path.push(&self.version);
        path.push(&self.artifact);
        path
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Published artifacts of a stage's requirements, in `requires()` order.
#[derive(Debug, Clone, Default)]
pub struct Inputs {
    targets: Vec<Target>,
}

impl Inputs {
    /// Wrap targets.
    pub fn new(targets: Vec<Target>) -> Self {
        Self { targets }
    }

    /// All input targets.
    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Input by position.
    pub fn get(&self, index: usize) -> Result<&Target> {
        self.targets.get(index).ok_or_else(|| {
            Error::Validation(format!("stage input {} requested, {} available", index, self.targets.len()))
        })
    }

    /// Number of inputs.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// `true` without inputs.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// A unit of memoized work producing exactly one artifact.
///
/// `run` must be deterministic in its identity and inputs; it is called at
/// most once per identity and store, and only when the artifact is missing.
pub trait Stage: Send + Sync {
    /// Identity; fixes the artifact location.
    fn id(&self) -> &StageId;

    /// Upstream stages whose artifacts this stage reads.
    fn requires(&self) -> Result<Vec<Arc<dyn Stage>>> {
        Ok(Vec::new())
    }

    /// Compute the artifact bytes.
    fn run(&self, inputs: &Inputs) -> Result<Vec<u8>>;
}
