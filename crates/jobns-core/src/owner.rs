//! Job ownership and user name resolution

use crate::{JobnsError, Result};
use nix::unistd::{Uid, User};

/// The user a job runs as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOwner {
    pub uid: u32,
    pub gid: u32,
    /// Name of the per-user directory under each private subdirectory
    pub user: String,
}

impl JobOwner {
    #[must_use]
    pub fn new(uid: u32, gid: u32, user: impl Into<String>) -> Self {
        Self {
            uid,
            gid,
            user: user.into(),
        }
    }

    /// Build an owner, naming its directory after the uid's login name
    #[must_use]
    pub fn resolve(uid: u32, gid: u32) -> Self {
        Self::new(uid, gid, user_dir_name(uid))
    }
}

/// Login name for `uid`, or the numeric uid when there is no passwd entry
#[must_use]
pub fn user_dir_name(uid: u32) -> String {
    match User::from_uid(Uid::from_raw(uid)) {
        Ok(Some(user)) => user.name,
        Ok(None) => uid.to_string(),
        Err(e) => {
            tracing::debug!(uid, error = %e, "passwd lookup failed, using numeric uid");
            uid.to_string()
        }
    }
}

/// Uid of the named user
pub fn uid_for_user(name: &str) -> Result<u32> {
    match User::from_name(name) {
        Ok(Some(user)) => Ok(user.uid.as_raw()),
        Ok(None) => Err(JobnsError::UserLookup(format!("no such user: {name}"))),
        Err(e) => Err(JobnsError::UserLookup(format!("lookup of {name} failed: {e}"))),
    }
}
