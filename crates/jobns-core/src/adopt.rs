//! Session adoption into a running job's mount namespace
//!
//! When a user opens an interactive session on a node, the session is moved
//! into the mount namespace of one of that user's running jobs so it sees the
//! same private temporary directories as the job.

use crate::config::AdoptionPolicy;
use crate::isolation::{MountOps, ProcTable};
use crate::owner::uid_for_user;
use crate::stepd::{StepDescriptor, StepDirectory, StepId};
use crate::{JobnsError, Result};
use std::path::PathBuf;

/// A session that was moved into a job namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adoption {
    /// Step whose namespace was joined
    pub step: StepId,
    /// Job process whose namespace reference was opened
    pub target_pid: u32,
    pub namespace: PathBuf,
}

/// What the session stack should do with the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Continue without isolation
    Proceed,
    /// Continue inside the job's namespace
    ProceedIsolated(Adoption),
}

impl SessionOutcome {
    #[must_use]
    pub const fn is_isolated(&self) -> bool {
        matches!(self, Self::ProceedIsolated(_))
    }
}

/// Finds the job a session belongs to and joins its namespace
pub struct AdoptionAgent<'a, M> {
    registry: &'a StepDirectory,
    procs: &'a ProcTable,
    mounts: &'a M,
    node_name: &'a str,
    policy: AdoptionPolicy,
}

impl<'a, M: MountOps> AdoptionAgent<'a, M> {
    #[must_use]
    pub const fn new(
        registry: &'a StepDirectory,
        procs: &'a ProcTable,
        mounts: &'a M,
        node_name: &'a str,
        policy: AdoptionPolicy,
    ) -> Self {
        Self {
            registry,
            procs,
            mounts,
            node_name,
            policy,
        }
    }

    /// Session-open entry point.
    ///
    /// Failures follow the configured policy: fail-open lets the session
    /// through unisolated, fail-closed refuses it.
    pub fn open_session(&self, pid: u32, user: Option<&str>) -> Result<SessionOutcome> {
        match self.adopt_session(pid, user) {
            Ok(adoption) => {
                tracing::info!(
                    pid,
                    step = %adoption.step,
                    target_pid = adoption.target_pid,
                    "session adopted into job mount namespace"
                );
                Ok(SessionOutcome::ProceedIsolated(adoption))
            }
            Err(e) => apply_policy(self.policy, pid, user, &e),
        }
    }

    /// Join the session into its job's namespace, failing on any miss
    pub fn adopt_session(&self, pid: u32, user: Option<&str>) -> Result<Adoption> {
        let steps = self.registry.list_steps(self.node_name)?;

        let job_id = self.job_for_session(&steps, pid, user)?;
        let job_steps: Vec<&StepDescriptor> =
            steps.iter().filter(|s| s.id.job_id == job_id).collect();

        let fallback;
        let step = match select_step(&job_steps) {
            Some(step) => step,
            None => {
                fallback = self.registry.locate(self.node_name, StepId::new(job_id, 0));
                &fallback
            }
        };

        let pids = self
            .registry
            .with_connection(step, |conn| conn.list_pids())?;
        let target_pid = first_foreign_pid(&pids, pid).ok_or_else(|| {
            JobnsError::RegistryLookup(format!("step {} has no process besides {pid}", step.id))
        })?;

        let ns = self.procs.mount_namespace(target_pid)?;
        self.mounts.enter_mount_ns(&ns)?;

        Ok(Adoption {
            step: step.id,
            target_pid,
            namespace: ns.path().to_path_buf(),
        })
    }

    /// Job of the connecting process, or else the first job of `user`
    fn job_for_session(&self, steps: &[StepDescriptor], pid: u32, user: Option<&str>) -> Result<u32> {
        for step in steps {
            match self.registry.with_connection(step, |conn| conn.list_pids()) {
                Ok(pids) if pids.contains(&pid) => {
                    tracing::debug!(pid, step = %step.id, "session process belongs to job");
                    return Ok(step.id.job_id);
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(step = %step.id, error = %e, "skipping step"),
            }
        }

        let Some(user) = user else {
            return Err(JobnsError::RegistryLookup(format!("no job contains pid {pid}")));
        };
        let uid = uid_for_user(user)?;

        for step in steps {
            match self.registry.with_connection(step, |conn| conn.owner_uid()) {
                Ok(owner) if owner == uid => {
                    tracing::debug!(user, uid, step = %step.id, "found running job of user");
                    return Ok(step.id.job_id);
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(step = %step.id, error = %e, "skipping step"),
            }
        }

        Err(JobnsError::RegistryLookup(format!(
            "no running job for user {user} on this node"
        )))
    }
}

/// Outcome of a session that could not be adopted
pub fn apply_policy(
    policy: AdoptionPolicy,
    pid: u32,
    user: Option<&str>,
    error: &JobnsError,
) -> Result<SessionOutcome> {
    match policy {
        AdoptionPolicy::FailOpen => {
            tracing::warn!(pid, user, %error, "session not adopted, proceeding unisolated");
            Ok(SessionOutcome::Proceed)
        }
        AdoptionPolicy::FailClosed => {
            tracing::warn!(pid, user, %error, "session not adopted, refusing");
            Err(JobnsError::AdoptionDenied(error.to_string()))
        }
    }
}

/// First numbered step, else the extern step, else whatever sentinel remains.
///
/// Steps are taken in registry order.
#[must_use]
pub fn select_step<'s>(job_steps: &[&'s StepDescriptor]) -> Option<&'s StepDescriptor> {
    job_steps
        .iter()
        .find(|s| !s.id.is_sentinel())
        .or_else(|| job_steps.iter().find(|s| s.id.is_extern()))
        .or_else(|| job_steps.first())
        .copied()
}

/// First pid in listed order that is not the session's own
#[must_use]
pub fn first_foreign_pid(pids: &[u32], session_pid: u32) -> Option<u32> {
    pids.iter().copied().find(|&p| p != session_pid)
}
