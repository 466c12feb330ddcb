//! Per-job mount namespace isolation
//!
//! - `namespace` - unshare/setns and the process-table namespace lookup
//! - `mounts` - propagation changes and bind mounts behind `MountOps`
//!
//! A job's first process calls [`isolate_job`] before user code runs. Each
//! configured shared root then resolves to `<root>/<subdir>/<user>/<job>`
//! inside that process's namespace only.

pub mod mounts;
pub mod namespace;

pub use self::mounts::{HostMounts, MountOps};
pub use self::namespace::{MountNamespace, ProcTable};

use crate::config::TmpDirectorySet;
use crate::owner::JobOwner;
use crate::{JobnsError, Result};
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

/// Mode of the per-user and per-job directories
pub const PRIVATE_DIR_MODE: u32 = 0o700;

/// Mode of `<root>/<subdir>`; only root traverses it
pub const PRIVATE_BASE_MODE: u32 = 0o700;

/// A job's private tree under one shared root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateJobDirectory {
    /// Shared root the tree is mounted over
    pub root: PathBuf,
    /// `<root>/<subdir>/<user>/<job>`
    pub path: PathBuf,
}

/// Give the calling process a private view of every shared root.
///
/// Any failure is fatal: the job must not start unisolated. Directories that
/// were already created are left in place; creation is idempotent so a retry
/// is safe.
pub fn isolate_job(
    tmp_dirs: &TmpDirectorySet,
    owner: &JobOwner,
    job_id: u32,
    mounts: &impl MountOps,
) -> Result<Vec<PrivateJobDirectory>> {
    if tmp_dirs.is_empty() {
        return Err(JobnsError::ConfigurationMissing);
    }

    mounts.unshare_mount_ns()?;
    // Host mounts still propagate in, nothing done here propagates out.
    mounts.make_rslave(Path::new("/"))?;
    tracing::info!(job_id, uid = owner.uid, "mount namespace created");

    let mut private = Vec::with_capacity(tmp_dirs.roots.len());
    for root in &tmp_dirs.roots {
        mounts::ensure_private(mounts, root)?;

        ensure_dir(&tmp_dirs.private_base(root), PRIVATE_BASE_MODE, None)?;
        ensure_dir(&tmp_dirs.user_dir(root, &owner.user), PRIVATE_DIR_MODE, Some(owner))?;
        let job_dir = tmp_dirs.job_dir(root, &owner.user, job_id);
        ensure_dir(&job_dir, PRIVATE_DIR_MODE, Some(owner))?;

        mounts.bind(&job_dir, root)?;
        tracing::debug!(job_id, ?root, path = ?job_dir, "private directory mounted");

        private.push(PrivateJobDirectory {
            root: root.clone(),
            path: job_dir,
        });
    }

    tracing::info!(job_id, roots = private.len(), "job isolated");
    Ok(private)
}

/// Node-level preparation, run once when the hooks are loaded.
///
/// Every shared root is made private in the host namespace and receives its
/// private subdirectory.
pub fn prepare_node(tmp_dirs: &TmpDirectorySet, mounts: &impl MountOps) -> Result<()> {
    if tmp_dirs.is_empty() {
        return Err(JobnsError::ConfigurationMissing);
    }

    for root in &tmp_dirs.roots {
        mounts::ensure_private(mounts, root)?;
        ensure_dir(&tmp_dirs.private_base(root), PRIVATE_BASE_MODE, None)?;
    }

    tracing::info!(roots = tmp_dirs.roots.len(), subdir = %tmp_dirs.subdir, "node prepared");
    Ok(())
}

/// Create `path` unless a directory already exists there, then apply ownership.
///
/// Symlinks are not followed.
pub fn ensure_dir(path: &Path, mode: u32, owner: Option<&JobOwner>) -> Result<()> {
    let create_err = |source| JobnsError::DirectoryCreate {
        path: path.to_path_buf(),
        source,
    };

    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {
            tracing::debug!(?path, "directory already exists");
        }
        Ok(_) => {
            return Err(create_err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "path exists and is not a directory",
            )));
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            match std::fs::DirBuilder::new().mode(mode).create(path) {
                Ok(()) => tracing::debug!(?path, mode = %format!("{mode:o}"), "created directory"),
                // Lost a race with another job of the same user
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && path.is_dir() => {}
                Err(e) => return Err(create_err(e)),
            }
        }
        Err(e) => return Err(create_err(e)),
    }

    if let Some(owner) = owner {
        std::os::unix::fs::lchown(path, Some(owner.uid), Some(owner.gid)).map_err(create_err)?;
    }
    Ok(())
}
