//! Step daemon directory and IPC client
//!
//! Every running step on a node is supervised by a step daemon listening on a
//! Unix socket in the step directory. This module only consumes that
//! protocol:
//! - `registry` - enumerate the steps registered for a node
//! - `client` - connect to one step daemon and query it
//! - `protocol` - framing and message types

pub mod client;
pub mod protocol;
pub mod registry;

pub use self::client::StepDaemonConnection;
pub use self::registry::{StepDescriptor, StepDirectory};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved step id of the extern/adoption container
pub const EXTERN_STEP: u32 = 0xFFFF_FFFC;
/// Reserved step id of the batch script step
pub const BATCH_STEP: u32 = 0xFFFF_FFFE;
/// Reserved step id of an interactive allocation step
pub const INTERACTIVE_STEP: u32 = 0xFFFF_FFFA;

/// (job id, step id) pair identifying one step
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StepId {
    pub job_id: u32,
    pub step_id: u32,
}

impl StepId {
    #[must_use]
    pub const fn new(job_id: u32, step_id: u32) -> Self {
        Self { job_id, step_id }
    }

    #[must_use]
    pub const fn extern_step(job_id: u32) -> Self {
        Self::new(job_id, EXTERN_STEP)
    }

    /// Whether the step id is one of the reserved sentinel values
    #[must_use]
    pub const fn is_sentinel(&self) -> bool {
        matches!(self.step_id, EXTERN_STEP | BATCH_STEP | INTERACTIVE_STEP)
    }

    #[must_use]
    pub const fn is_extern(&self) -> bool {
        self.step_id == EXTERN_STEP
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.step_id {
            EXTERN_STEP => write!(f, "{}.extern", self.job_id),
            BATCH_STEP => write!(f, "{}.batch", self.job_id),
            INTERACTIVE_STEP => write!(f, "{}.interactive", self.job_id),
            step => write!(f, "{}.{step}", self.job_id),
        }
    }
}
