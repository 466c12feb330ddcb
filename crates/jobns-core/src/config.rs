//! jobns configuration

use crate::{JobnsError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default name of the private subdirectory under each shared root
pub const DEFAULT_TMP_SUBDIR: &str = ".jobns";

/// Default directory holding the step daemon sockets
pub const DEFAULT_STEPD_DIR: &str = "/run/jobns/stepd";

/// Default process table mount point
pub const DEFAULT_PROC_ROOT: &str = "/proc";

/// Shared temporary roots and the subdirectory used for private job trees
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TmpDirectorySet {
    /// Shared roots, in configuration order
    pub roots: Vec<PathBuf>,

    /// Subdirectory created under every root for the private trees
    pub subdir: String,
}

impl Default for TmpDirectorySet {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            subdir: DEFAULT_TMP_SUBDIR.to_string(),
        }
    }
}

impl TmpDirectorySet {
    /// Parse a comma-separated root list such as `"/tmp, /dev/shm"`.
    ///
    /// Whitespace around entries is ignored and empty entries are dropped.
    pub fn parse(dirs: &str, subdir: &str) -> Result<Self> {
        let subdir = subdir.trim();
        if subdir.is_empty() || subdir.contains('/') || subdir == "." || subdir == ".." {
            return Err(JobnsError::Config(format!(
                "invalid private subdirectory name: {subdir:?}"
            )));
        }

        let mut roots = Vec::new();
        for entry in dirs.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let root = PathBuf::from(entry);
            if !root.is_absolute() {
                return Err(JobnsError::Config(format!(
                    "temporary root must be an absolute path: {entry}"
                )));
            }
            roots.push(root);
        }

        Ok(Self {
            roots,
            subdir: subdir.to_string(),
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// `<root>/<subdir>`
    #[must_use]
    pub fn private_base(&self, root: &Path) -> PathBuf {
        root.join(&self.subdir)
    }

    /// `<root>/<subdir>/<user>`
    #[must_use]
    pub fn user_dir(&self, root: &Path, user: &str) -> PathBuf {
        self.private_base(root).join(user)
    }

    /// `<root>/<subdir>/<user>/<job_id>`
    #[must_use]
    pub fn job_dir(&self, root: &Path, user: &str, job_id: u32) -> PathBuf {
        self.user_dir(root, user).join(job_id.to_string())
    }
}

/// What a session does when it cannot be joined to a job namespace
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdoptionPolicy {
    /// Let the session proceed without isolation
    #[default]
    FailOpen,
    /// Refuse the session
    FailClosed,
}

impl std::str::FromStr for AdoptionPolicy {
    type Err = JobnsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "fail-open" | "open" => Ok(Self::FailOpen),
            "fail-closed" | "closed" => Ok(Self::FailClosed),
            other => Err(JobnsError::Config(format!("unknown adoption policy: {other}"))),
        }
    }
}

impl AdoptionPolicy {
    /// Policy from `JOBNS_ADOPT_POLICY` alone.
    ///
    /// Lets the session hook honour the policy when the rest of the
    /// configuration fails to load.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        lookup("JOBNS_ADOPT_POLICY").map_or_else(|| Ok(Self::default()), |p| p.parse())
    }
}

/// Configuration for every jobns entry point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobnsConfig {
    /// Shared temporary roots
    pub tmp_dirs: TmpDirectorySet,

    /// Directory holding one socket per running step
    pub stepd_dir: PathBuf,

    /// Canonical node name, resolved from the hostname when unset
    pub node_name: Option<String>,

    /// Process table root
    pub proc_root: PathBuf,

    /// Behaviour of session adoption on failure
    pub adoption_policy: AdoptionPolicy,
}

impl Default for JobnsConfig {
    fn default() -> Self {
        Self {
            tmp_dirs: TmpDirectorySet::default(),
            stepd_dir: PathBuf::from(DEFAULT_STEPD_DIR),
            node_name: None,
            proc_root: PathBuf::from(DEFAULT_PROC_ROOT),
            adoption_policy: AdoptionPolicy::default(),
        }
    }
}

impl JobnsConfig {
    /// Create a new config builder
    #[must_use]
    pub fn builder() -> JobnsConfigBuilder {
        JobnsConfigBuilder::default()
    }

    /// Load configuration from `JOBNS_*` environment variables.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        let subdir = lookup("JOBNS_TMP_SUBDIR").unwrap_or_else(|| DEFAULT_TMP_SUBDIR.into());
        let dirs = lookup("JOBNS_TMP_DIRS").unwrap_or_default();
        config.tmp_dirs = TmpDirectorySet::parse(&dirs, &subdir)?;

        if let Some(dir) = lookup("JOBNS_STEPD_DIR") {
            config.stepd_dir = PathBuf::from(dir);
        }
        config.node_name = lookup("JOBNS_NODE_NAME").filter(|n| !n.trim().is_empty());
        if let Some(root) = lookup("JOBNS_PROC_ROOT") {
            config.proc_root = PathBuf::from(root);
        }
        config.adoption_policy = AdoptionPolicy::from_lookup(&lookup)?;

        Ok(config)
    }
}

/// Builder for JobnsConfig
#[derive(Debug, Default)]
pub struct JobnsConfigBuilder {
    config: JobnsConfig,
}

impl JobnsConfigBuilder {
    #[must_use]
    pub fn tmp_dirs(mut self, tmp_dirs: TmpDirectorySet) -> Self {
        self.config.tmp_dirs = tmp_dirs;
        self
    }

    #[must_use]
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.tmp_dirs.roots.push(root.into());
        self
    }

    #[must_use]
    pub fn subdir(mut self, subdir: impl Into<String>) -> Self {
        self.config.tmp_dirs.subdir = subdir.into();
        self
    }

    #[must_use]
    pub fn stepd_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.stepd_dir = dir.into();
        self
    }

    #[must_use]
    pub fn node_name(mut self, name: impl Into<String>) -> Self {
        self.config.node_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn proc_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.proc_root = root.into();
        self
    }

    #[must_use]
    pub const fn adoption_policy(mut self, policy: AdoptionPolicy) -> Self {
        self.config.adoption_policy = policy;
        self
    }

    #[must_use]
    pub fn build(self) -> JobnsConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn parse_keeps_order_and_trims_entries() {
        let set = TmpDirectorySet::parse("/tmp, /dev/shm,,  /scratch ", "private").unwrap();
        assert_eq!(
            set.roots,
            vec![
                PathBuf::from("/tmp"),
                PathBuf::from("/dev/shm"),
                PathBuf::from("/scratch")
            ]
        );
        assert_eq!(set.subdir, "private");
    }

    #[test]
    fn parse_empty_list_yields_empty_set() {
        let set = TmpDirectorySet::parse("  ", "private").unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn parse_rejects_relative_roots_and_bad_subdirs() {
        assert!(TmpDirectorySet::parse("tmp", "private").is_err());
        assert!(TmpDirectorySet::parse("/tmp", "a/b").is_err());
        assert!(TmpDirectorySet::parse("/tmp", "..").is_err());
        assert!(TmpDirectorySet::parse("/tmp", "").is_err());
    }

    #[test]
    fn job_dir_layout() {
        let set = TmpDirectorySet::parse("/scratch", "private").unwrap();
        assert_eq!(
            set.job_dir(Path::new("/scratch"), "alice", 42),
            PathBuf::from("/scratch/private/alice/42")
        );
        assert_eq!(
            set.user_dir(Path::new("/scratch"), "alice"),
            PathBuf::from("/scratch/private/alice")
        );
    }

    #[test]
    fn env_lookup_overrides_defaults() {
        let vars: HashMap<&str, &str> = [
            ("JOBNS_TMP_DIRS", "/tmp,/dev/shm"),
            ("JOBNS_STEPD_DIR", "/var/spool/stepd"),
            ("JOBNS_NODE_NAME", "node017"),
            ("JOBNS_ADOPT_POLICY", "fail-closed"),
        ]
        .into_iter()
        .collect();

        let config = JobnsConfig::from_lookup(|k| vars.get(k).map(|v| (*v).to_string())).unwrap();
        assert_eq!(config.tmp_dirs.roots.len(), 2);
        assert_eq!(config.tmp_dirs.subdir, DEFAULT_TMP_SUBDIR);
        assert_eq!(config.stepd_dir, PathBuf::from("/var/spool/stepd"));
        assert_eq!(config.node_name.as_deref(), Some("node017"));
        assert_eq!(config.proc_root, PathBuf::from(DEFAULT_PROC_ROOT));
        assert_eq!(config.adoption_policy, AdoptionPolicy::FailClosed);
    }

    #[test]
    fn env_lookup_rejects_unknown_policy() {
        let result = JobnsConfig::from_lookup(|k| {
            (k == "JOBNS_ADOPT_POLICY").then(|| "sometimes".to_string())
        });
        assert!(matches!(result, Err(JobnsError::Config(_))));
    }

    #[test]
    fn policy_loads_without_the_rest_of_the_config() {
        let lookup = |k: &str| -> Option<String> {
            match k {
                "JOBNS_TMP_DIRS" => Some("relative/scratch".into()),
                "JOBNS_ADOPT_POLICY" => Some("closed".into()),
                _ => None,
            }
        };
        assert!(JobnsConfig::from_lookup(lookup).is_err());
        assert_eq!(AdoptionPolicy::from_lookup(lookup).unwrap(), AdoptionPolicy::FailClosed);
        assert_eq!(AdoptionPolicy::from_lookup(|_| None).unwrap(), AdoptionPolicy::FailOpen);
    }

    #[test]
    fn builder_collects_roots() {
        let config = JobnsConfig::builder()
            .root("/tmp")
            .root("/scratch")
            .subdir("private")
            .node_name("localhost")
            .build();
        assert_eq!(config.tmp_dirs.roots.len(), 2);
        assert_eq!(config.tmp_dirs.subdir, "private");
        assert_eq!(config.adoption_policy, AdoptionPolicy::FailOpen);
    }
}
