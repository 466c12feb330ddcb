//! Mount namespace handles

use crate::{JobnsError, Result};
use nix::sched::CloneFlags;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Move the calling thread into a new mount namespace holding a private copy
/// of the current mount table
pub fn unshare_mount_namespace() -> Result<()> {
    nix::sched::unshare(CloneFlags::CLONE_NEWNS).map_err(|e| {
        JobnsError::Namespace(format!("failed to unshare mount namespace: {e}"))
    })?;
    tracing::debug!("mount namespace unshared");
    Ok(())
}

/// An open reference to a live mount namespace
#[derive(Debug)]
pub struct MountNamespace {
    file: File,
    path: PathBuf,
}

impl MountNamespace {
    /// Open a namespace reference file read-only
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::open(&path).map_err(|e| JobnsError::io(&path, e))?;
        Ok(Self { file, path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Switch the calling thread into this namespace
    pub fn enter(&self) -> Result<()> {
        nix::sched::setns(&self.file, CloneFlags::CLONE_NEWNS).map_err(|source| {
            JobnsError::Syscall {
                op: "setns",
                path: self.path.clone(),
                source,
            }
        })?;
        tracing::debug!(ns = ?self.path, "entered mount namespace");
        Ok(())
    }
}

/// Lookup of per-process namespace references in the process table
#[derive(Debug, Clone)]
pub struct ProcTable {
    root: PathBuf,
}

impl Default for ProcTable {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_PROC_ROOT)
    }
}

impl ProcTable {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<proc>/<pid>/ns/mnt`
    #[must_use]
    pub fn mount_ns_path(&self, pid: u32) -> PathBuf {
        self.root.join(pid.to_string()).join("ns").join("mnt")
    }

    /// Open the mount namespace of `pid`
    pub fn mount_namespace(&self, pid: u32) -> Result<MountNamespace> {
        MountNamespace::open(self.mount_ns_path(pid))
    }
}
