//! Removal of a job's private trees once its last step ends

use crate::config::TmpDirectorySet;
use crate::owner::user_dir_name;
use crate::stepd::StepDirectory;
use crate::{JobnsError, Result};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

/// Result of a cleanup request
#[derive(Debug)]
pub enum CleanupOutcome {
    /// No shared temporary directories are configured
    Disabled,
    /// No step of the job is registered any more
    JobGone,
    /// Other steps still use the private directories
    StepsRemaining(usize),
    /// The terminating step was the last one; trees were removed
    Cleaned(CleanupReport),
}

/// Per-root removal results
#[derive(Debug)]
pub struct CleanupReport {
    pub job_id: u32,
    pub uid: u32,
    pub roots: Vec<RootCleanup>,
}

impl CleanupReport {
    /// Total bytes reclaimed across roots, including partially cleaned ones
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.roots.iter().map(|r| r.bytes).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &RootCleanup> {
        self.roots.iter().filter(|r| r.error.is_some())
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// Removal of one job directory
#[derive(Debug)]
pub struct RootCleanup {
    pub root: PathBuf,
    pub path: PathBuf,
    /// Bytes reclaimed, also when removal stopped part way
    pub bytes: u64,
    pub error: Option<JobnsError>,
}

/// Called when a step of `job_id` terminates.
///
/// The private trees are removed only when exactly one step, the one that is
/// terminating, is still registered. A step registering at the same moment
/// can still lose its directory; the registry offers no way to close that
/// window.
pub fn cleanup_job(
    tmp_dirs: &TmpDirectorySet,
    registry: &StepDirectory,
    node_name: &str,
    job_id: u32,
) -> Result<CleanupOutcome> {
    if tmp_dirs.is_empty() {
        return Err(JobnsError::ConfigurationMissing);
    }

    let steps = registry.steps_for_job(node_name, job_id)?;

    let mut uid = None;
    for step in &steps {
        match registry.with_connection(step, |conn| conn.owner_uid()) {
            Ok(found) => {
                uid = Some(found);
                break;
            }
            Err(e) => {
                tracing::debug!(step = %step.id, error = %e, "unable to query step owner");
            }
        }
    }

    match steps.len() {
        0 => {
            tracing::debug!(job_id, "no steps registered, nothing to clean");
            return Ok(CleanupOutcome::JobGone);
        }
        1 => {}
        n => {
            tracing::debug!(job_id, steps = n, "job still has running steps");
            return Ok(CleanupOutcome::StepsRemaining(n));
        }
    }

    let uid = uid.ok_or_else(|| {
        JobnsError::RegistryLookup(format!("no step of job {job_id} reported its owner"))
    })?;
    let user = user_dir_name(uid);

    let mut roots = Vec::with_capacity(tmp_dirs.roots.len());
    for root in &tmp_dirs.roots {
        let path = tmp_dirs.job_dir(root, &user, job_id);
        let mut bytes = 0;
        let error = remove_job_dir(&path, &mut bytes).err();
        if let Some(e) = &error {
            tracing::error!(job_id, ?path, bytes, error = %e, "failed to remove job temporary files");
        }
        roots.push(RootCleanup {
            root: root.clone(),
            path,
            bytes,
            error,
        });
    }

    let report = CleanupReport { job_id, uid, roots };
    tracing::info!(
        job_id,
        bytes = report.bytes(),
        failures = report.failures().count(),
        "temporary files purged"
    );
    Ok(CleanupOutcome::Cleaned(report))
}

/// Remove one job directory, pinned to the device it lives on now
fn remove_job_dir(path: &Path, bytes: &mut u64) -> Result<()> {
    let device = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta.dev(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(?path, "job directory does not exist");
            return Ok(());
        }
        Err(e) => return Err(JobnsError::io(path, e)),
    };
    remove_dir_bounded(path, bytes, device)
}

/// Recursively delete `path`, never leaving device `device`.
///
/// Sizes of removed entries are added to `bytes` as they go, so on error it
/// holds what the processed prefix reclaimed. An entry on another device is
/// neither removed nor descended into and fails the whole call.
pub fn remove_dir_bounded(path: &Path, bytes: &mut u64, device: u64) -> Result<()> {
    let meta = std::fs::symlink_metadata(path).map_err(|e| JobnsError::io(path, e))?;
    check_device(path, &meta, device)?;
    if !meta.is_dir() {
        return Err(JobnsError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::NotADirectory, "not a directory"),
        ));
    }

    let entries = std::fs::read_dir(path).map_err(|e| JobnsError::io(path, e))?;
    for entry in entries {
        let child = entry.map_err(|e| JobnsError::io(path, e))?.path();
        let meta = std::fs::symlink_metadata(&child).map_err(|e| JobnsError::io(&child, e))?;

        if meta.is_dir() {
            remove_dir_bounded(&child, bytes, device)?;
        } else {
            check_device(&child, &meta, device)?;
            std::fs::remove_file(&child).map_err(|e| JobnsError::io(&child, e))?;
            *bytes += meta.len();
        }
    }

    let size = std::fs::symlink_metadata(path)
        .map_err(|e| JobnsError::io(path, e))?
        .len();
    std::fs::remove_dir(path).map_err(|e| JobnsError::io(path, e))?;
    *bytes += size;
    Ok(())
}

fn check_device(path: &Path, meta: &std::fs::Metadata, device: u64) -> Result<()> {
    if meta.dev() == device {
        Ok(())
    } else {
        Err(JobnsError::CrossDevice {
            path: path.to_path_buf(),
            expected: device,
            found: meta.dev(),
        })
    }
}
