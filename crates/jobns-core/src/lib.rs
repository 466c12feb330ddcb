//! # jobns-core
//!
//! Per-job filesystem isolation for batch-scheduled compute nodes.
//!
//! This crate provides:
//! - Mount namespace isolation: a job's first process gets private bind
//!   mounts over every shared temporary root
//! - Cleanup: bounded-device removal of a job's private trees once its last
//!   step ends
//! - Session adoption: interactive sessions join the mount namespace of the
//!   user's running job
//! - A client for the node-local step daemon registry that ties jobs, steps,
//!   owners and pids together

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod adopt;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod hooks;
pub mod isolation;
pub mod owner;
pub mod stepd;

pub use adopt::SessionOutcome;
pub use cleanup::CleanupOutcome;
pub use config::{AdoptionPolicy, JobnsConfig, TmpDirectorySet};
pub use error::JobnsError;
pub use hooks::Lifecycle;

/// Crate-level result type
pub type Result<T> = std::result::Result<T, JobnsError>;
