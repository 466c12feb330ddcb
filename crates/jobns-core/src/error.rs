//! Error types for jobns-core

use crate::stepd::StepId;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JobnsError {
    #[error("no shared temporary directories configured")]
    ConfigurationMissing,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{op} failed on {}: {source}", path.display())]
    Syscall {
        op: &'static str,
        path: PathBuf,
        source: nix::Error,
    },

    #[error("namespace error: {0}")]
    Namespace(String),

    #[error("failed to create directory {}: {source}", path.display())]
    DirectoryCreate {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("registry lookup failed: {0}")]
    RegistryLookup(String),

    #[error("step {0} does not exist on this node")]
    StepNotFound(StepId),

    #[error("user lookup failed: {0}")]
    UserLookup(String),

    #[error("connection to step {step} failed: {source}")]
    Connection {
        step: StepId,
        source: std::io::Error,
    },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("refusing to cross device boundary at {}: expected device {expected}, found {found}", path.display())]
    CrossDevice {
        path: PathBuf,
        expected: u64,
        found: u64,
    },

    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("session adoption denied: {0}")]
    AdoptionDenied(String),
}

impl JobnsError {
    /// Whether the job launch must be aborted when isolation hits this error.
    ///
    /// A missing configuration only means isolation is switched off.
    #[must_use]
    pub const fn is_fatal_to_isolation(&self) -> bool {
        !matches!(self, Self::ConfigurationMissing)
    }

    /// Registry misses mean "nothing there", not a broken node.
    #[must_use]
    pub const fn is_registry_miss(&self) -> bool {
        matches!(
            self,
            Self::RegistryLookup(_) | Self::StepNotFound(_) | Self::UserLookup(_)
        )
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
