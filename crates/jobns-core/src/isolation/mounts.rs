//! Mount syscalls used by isolation and adoption

use super::namespace::{self, MountNamespace};
use crate::{JobnsError, Result};
use nix::mount::{MsFlags, mount};
use std::path::Path;

/// Mount-table operations.
///
/// `HostMounts` performs the real syscalls. Callers take `&impl MountOps` so
/// that tests can record the sequence without privileges.
pub trait MountOps {
    /// Detach the caller into a new mount namespace
    fn unshare_mount_ns(&self) -> Result<()>;

    /// `mount --make-rslave <path>`
    fn make_rslave(&self, path: &Path) -> Result<()>;

    /// `mount --make-private <path>`
    fn make_private(&self, path: &Path) -> Result<()>;

    /// `mount --bind <src> <dst>`
    fn bind(&self, src: &Path, dst: &Path) -> Result<()>;

    /// Switch the caller into `ns`
    fn enter_mount_ns(&self, ns: &MountNamespace) -> Result<()>;
}

/// Real mount syscalls
#[derive(Debug, Clone, Copy, Default)]
pub struct HostMounts;

impl MountOps for HostMounts {
    fn unshare_mount_ns(&self) -> Result<()> {
        namespace::unshare_mount_namespace()
    }

    fn make_rslave(&self, path: &Path) -> Result<()> {
        tracing::debug!(?path, "make rslave");
        set_propagation(path, MsFlags::MS_REC | MsFlags::MS_SLAVE, "make-rslave")
    }

    fn make_private(&self, path: &Path) -> Result<()> {
        tracing::debug!(?path, "make private");
        set_propagation(path, MsFlags::MS_PRIVATE, "make-private")
    }

    fn bind(&self, src: &Path, dst: &Path) -> Result<()> {
        tracing::debug!(?src, ?dst, "bind mount");
        mount(
            Some(src),
            dst,
            None::<&str>,
            MsFlags::MS_BIND,
            None::<&str>,
        )
        .map_err(|source| JobnsError::Syscall {
            op: "bind mount",
            path: dst.to_path_buf(),
            source,
        })
    }

    fn enter_mount_ns(&self, ns: &MountNamespace) -> Result<()> {
        ns.enter()
    }
}

fn set_propagation(path: &Path, flags: MsFlags, op: &'static str) -> Result<()> {
    mount(None::<&str>, path, None::<&str>, flags, None::<&str>).map_err(|source| {
        JobnsError::Syscall {
            op,
            path: path.to_path_buf(),
            source,
        }
    })
}

/// Make `root` non-propagating.
///
/// A directory that is not a mount point cannot change propagation, so on
/// failure it is bound onto itself and the change retried.
pub fn ensure_private(mounts: &impl MountOps, root: &Path) -> Result<()> {
    if let Err(e) = mounts.make_private(root) {
        tracing::debug!(?root, error = %e, "root is not a mount point, binding onto itself");
        mounts.bind(root, root)?;
        mounts.make_private(root)?;
    }
    Ok(())
}
