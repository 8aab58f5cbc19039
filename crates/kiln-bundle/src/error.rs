//! Build errors and the per-asset failure report.

use std::fmt;
use std::path::PathBuf;

use kiln_resolve::ResolveError;
use kiln_transform::ChainError;

/// One asset that failed to resolve or transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetFailure {
    /// Asset that failed, or the importer for resolution failures
    pub path: PathBuf,
    /// Stage that reported the failure (`resolve`, `sass`, `script`, ...)
    pub stage: String,
    pub message: String,
}

impl AssetFailure {
    pub fn new(path: impl Into<PathBuf>, stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            stage: stage.into(),
            message: message.into(),
        }
    }

    pub fn resolution(importer: impl Into<PathBuf>, err: &ResolveError) -> Self {
        Self::new(importer, "resolve", err.to_string())
    }
}

impl From<ChainError> for AssetFailure {
    fn from(err: ChainError) -> Self {
        Self::new(err.path, err.stage, err.error.to_string())
    }
}

impl fmt::Display for AssetFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.path.display(), self.stage, self.message)
    }
}

/// Every failure collected during one build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub failures: Vec<AssetFailure>,
}

impl BuildReport {
    pub fn push(&mut self, failure: AssetFailure) {
        self.failures.push(failure);
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Order failures by path then stage so reports are stable across runs.
    pub fn sort(&mut self) {
        self.failures.sort_by(|a, b| {
            a.path
                .cmp(&b.path)
                .then_with(|| a.stage.cmp(&b.stage))
                .then_with(|| a.message.cmp(&b.message))
        });
        self.failures.dedup();
    }
}

impl fmt::Display for BuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "  {failure}")?;
        }
        Ok(())
    }
}

/// Errors that can occur during build.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Build failed with {n} error(s):\n{0}", n = .0.len())]
    Failed(BuildReport),

    #[error("Entry '{name}' could not be resolved: {message}")]
    MissingEntry { name: String, message: String },

    #[error("Failed to assemble {}: {message}", .path.display())]
    Assembly { path: PathBuf, message: String },

    #[error("Failed to render HTML shell: {0}")]
    Template(String),

    #[error("Failed to generate icons: {0}")]
    Icon(String),

    #[error("Failed to write output {}: {message}", .path.display())]
    Write { path: PathBuf, message: String },
}

impl BuildError {
    pub(crate) fn write(path: impl Into<PathBuf>, err: impl fmt::Display) -> Self {
        Self::Write {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// The per-asset report, when this is a collected failure.
    pub fn report(&self) -> Option<&BuildReport> {
        match self {
            Self::Failed(report) => Some(report),
            _ => None,
        }
    }
}
