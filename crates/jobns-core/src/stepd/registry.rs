//! Node-local registry of running steps
//!
//! Step daemons register by creating a socket named `<node>_<job>.<step>`
//! in the step directory. Enumeration re-reads the directory every time.

use super::protocol::PROTOCOL_VERSION;
use super::{StepDaemonConnection, StepId};
use crate::{JobnsError, Result};
use serde::Serialize;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

/// One registered step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepDescriptor {
    pub id: StepId,
    pub node_name: String,
    /// Protocol version to offer when connecting
    pub protocol_version: u16,
    /// Socket of the step daemon
    pub socket: PathBuf,
}

impl StepDescriptor {
    /// Open a connection to this step's daemon
    pub fn connect(&self) -> Result<StepDaemonConnection> {
        StepDaemonConnection::connect(self)
    }
}

/// Directory of step daemon sockets
#[derive(Debug, Clone)]
pub struct StepDirectory {
    dir: PathBuf,
}

impl StepDirectory {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Socket name of a step
    #[must_use]
    pub fn socket_name(node_name: &str, id: StepId) -> String {
        format!("{node_name}_{}.{}", id.job_id, id.step_id)
    }

    /// Descriptor for a step whether or not it is currently registered
    #[must_use]
    pub fn locate(&self, node_name: &str, id: StepId) -> StepDescriptor {
        StepDescriptor {
            id,
            node_name: node_name.to_string(),
            protocol_version: PROTOCOL_VERSION,
            socket: self.dir.join(Self::socket_name(node_name, id)),
        }
    }

    /// All steps registered for `node_name`, ordered by (job id, step id).
    ///
    /// A missing step directory means no steps are running.
    pub fn list_steps(&self, node_name: &str) -> Result<Vec<StepDescriptor>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(dir = ?self.dir, "step directory does not exist");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(JobnsError::RegistryLookup(format!(
                    "failed to read {}: {e}",
                    self.dir.display()
                )));
            }
        };

        let mut steps = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                JobnsError::RegistryLookup(format!("failed to read {}: {e}", self.dir.display()))
            })?;

            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some((node, id)) = parse_socket_name(name) else {
                continue;
            };
            if node != node_name {
                continue;
            }
            match entry.file_type() {
                Ok(ft) if ft.is_socket() => {}
                _ => continue,
            }

            steps.push(StepDescriptor {
                id,
                node_name: node.to_string(),
                protocol_version: PROTOCOL_VERSION,
                socket: entry.path(),
            });
        }

        steps.sort_by_key(|s| s.id);
        Ok(steps)
    }

    /// Registered steps of one job
    pub fn steps_for_job(&self, node_name: &str, job_id: u32) -> Result<Vec<StepDescriptor>> {
        let mut steps = self.list_steps(node_name)?;
        steps.retain(|s| s.id.job_id == job_id);
        Ok(steps)
    }

    /// Connect to a step, run `f`, and close the connection whatever the outcome
    pub fn with_connection<T>(
        &self,
        step: &StepDescriptor,
        f: impl FnOnce(&mut StepDaemonConnection) -> Result<T>,
    ) -> Result<T> {
        let mut conn = step.connect()?;
        let result = f(&mut conn);
        conn.close();
        result
    }
}

/// Split `<node>_<job>.<step>`
fn parse_socket_name(name: &str) -> Option<(&str, StepId)> {
    let (node, ids) = name.rsplit_once('_')?;
    let (job, step) = ids.split_once('.')?;
    if node.is_empty() {
        return None;
    }
    Some((node, StepId::new(job.parse().ok()?, step.parse().ok()?)))
}
