//! Lifecycle hooks called by the workload manager and the session stack

use crate::adopt::{self, AdoptionAgent, SessionOutcome};
use crate::cleanup::{self, CleanupOutcome};
use crate::config::JobnsConfig;
use crate::isolation::{self, HostMounts, MountOps, PrivateJobDirectory, ProcTable};
use crate::owner::JobOwner;
use crate::stepd::StepDirectory;
use crate::{JobnsError, Result};

/// Entry points for job start, step termination and session open.
///
/// Holds no state beyond its configuration; every call re-queries the step
/// registry.
#[derive(Debug, Clone)]
pub struct Lifecycle<M = HostMounts> {
    config: JobnsConfig,
    mounts: M,
}

impl Lifecycle<HostMounts> {
    #[must_use]
    pub const fn new(config: JobnsConfig) -> Self {
        Self {
            config,
            mounts: HostMounts,
        }
    }

    /// Hooks configured from `JOBNS_*` environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(JobnsConfig::from_env()?))
    }
}

impl<M: MountOps> Lifecycle<M> {
    pub const fn with_mounts(config: JobnsConfig, mounts: M) -> Self {
        Self { config, mounts }
    }

    #[must_use]
    pub const fn config(&self) -> &JobnsConfig {
        &self.config
    }

    #[must_use]
    pub const fn mounts(&self) -> &M {
        &self.mounts
    }

    #[must_use]
    pub fn registry(&self) -> StepDirectory {
        StepDirectory::new(&self.config.stepd_dir)
    }

    /// Canonical name of this node
    pub fn node_name(&self) -> Result<String> {
        resolve_node_name(self.config.node_name.as_deref())
    }

    /// Node preparation; a node without shared roots has nothing to prepare
    pub fn prepare_node(&self) -> Result<()> {
        match isolation::prepare_node(&self.config.tmp_dirs, &self.mounts) {
            Err(JobnsError::ConfigurationMissing) => {
                tracing::info!("no temporary directories configured, isolation disabled");
                Ok(())
            }
            other => other,
        }
    }

    /// Runs in the job's first process before user code.
    ///
    /// An error here must abort the job launch. Without configured roots
    /// isolation is skipped and the list is empty.
    pub fn on_job_first_process_start(
        &self,
        uid: u32,
        gid: u32,
        job_id: u32,
    ) -> Result<Vec<PrivateJobDirectory>> {
        let owner = JobOwner::resolve(uid, gid);
        match isolation::isolate_job(&self.config.tmp_dirs, &owner, job_id, &self.mounts) {
            Err(JobnsError::ConfigurationMissing) => {
                tracing::info!(job_id, "no temporary directories configured, job not isolated");
                Ok(Vec::new())
            }
            Err(e) => {
                tracing::error!(job_id, uid, error = %e, "job isolation failed");
                Err(e)
            }
            ok => ok,
        }
    }

    /// Runs when a step of `job_id` ends.
    ///
    /// Registry misses mean there is nothing to clean. Per-root failures are
    /// in the report and never fail the call.
    pub fn on_step_terminate(&self, job_id: u32) -> Result<CleanupOutcome> {
        let node_name = self.node_name()?;
        match cleanup::cleanup_job(&self.config.tmp_dirs, &self.registry(), &node_name, job_id) {
            Err(JobnsError::ConfigurationMissing) => Ok(CleanupOutcome::Disabled),
            Err(e) if e.is_registry_miss() => {
                tracing::warn!(job_id, error = %e, "nothing to clean up");
                Ok(CleanupOutcome::JobGone)
            }
            other => other,
        }
    }

    /// Runs when a session opens for `user` from process `pid`
    pub fn on_session_open(&self, pid: u32, user: Option<&str>) -> Result<SessionOutcome> {
        let policy = self.config.adoption_policy;
        let node_name = match self.node_name() {
            Ok(name) => name,
            Err(e) => return adopt::apply_policy(policy, pid, user, &e),
        };

        let registry = self.registry();
        let procs = ProcTable::new(&self.config.proc_root);
        AdoptionAgent::new(&registry, &procs, &self.mounts, &node_name, policy)
            .open_session(pid, user)
    }
}

/// Configured node name, else the short hostname.
///
/// There is no loopback fallback. Test setups whose step sockets are
/// registered under `localhost` set `JOBNS_NODE_NAME=localhost` instead.
pub fn resolve_node_name(configured: Option<&str>) -> Result<String> {
    if let Some(name) = configured.map(str::trim).filter(|n| !n.is_empty()) {
        return Ok(name.to_string());
    }

    let host = nix::unistd::gethostname()
        .map_err(|e| JobnsError::Config(format!("failed to read hostname: {e}")))?;
    let host = host
        .into_string()
        .map_err(|_| JobnsError::Config("hostname is not valid UTF-8".into()))?;
    let short = host.split('.').next().unwrap_or_default();
    if short.is_empty() {
        return Err(JobnsError::Config("hostname is empty".into()));
    }
    Ok(short.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isolation::mounts::testing::RecordingMounts;

    #[test]
    fn configured_node_name_wins() {
        assert_eq!(resolve_node_name(Some(" node017 ")).unwrap(), "node017");
        assert_eq!(resolve_node_name(Some("localhost")).unwrap(), "localhost");
        assert_ne!(resolve_node_name(Some("  ")).unwrap(), "");
    }

    #[test]
    fn hostname_is_shortened() {
        let name = resolve_node_name(None).unwrap();
        assert!(!name.is_empty());
        assert!(!name.contains('.'));
    }

    #[test]
    fn unconfigured_hooks_are_no_ops() {
        let hooks = Lifecycle::with_mounts(
            JobnsConfig::builder().node_name("localhost").build(),
            RecordingMounts::default(),
        );
        hooks.prepare_node().unwrap();
        assert!(hooks.on_job_first_process_start(1000, 1000, 42).unwrap().is_empty());
        assert!(matches!(
            hooks.on_step_terminate(42).unwrap(),
            CleanupOutcome::Disabled
        ));
    }

    #[test]
    fn session_without_registry_proceeds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let hooks = Lifecycle::with_mounts(
            JobnsConfig::builder()
                .node_name("localhost")
                .stepd_dir(dir.path().join("stepd"))
                .build(),
            RecordingMounts::default(),
        );
        assert_eq!(
            hooks.on_session_open(1234, Some("root")).unwrap(),
            SessionOutcome::Proceed
        );
    }
}
