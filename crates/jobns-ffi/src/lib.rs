//! C ABI for the jobns lifecycle hooks
//!
//! The workload manager plugin and the session module are thin C shims that
//! call into this library. Every call re-reads its configuration from the
//! `JOBNS_*` environment.
//!
//! # Example (C)
//! ```c
//! #include <jobns.h>
//!
//! if (jobns_job_start(uid, gid, job_id) < 0) {
//!     fprintf(stderr, "isolation failed: %s\n", jobns_last_error());
//!     return -1;
//! }
//! ```

#![allow(clippy::missing_safety_doc)]

use jobns_core::adopt;
use jobns_core::cleanup::CleanupOutcome;
use jobns_core::{AdoptionPolicy, JobnsError, Lifecycle, SessionOutcome};
use libc::{c_char, c_int, pid_t};
use once_cell::sync::Lazy;
use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::ptr;

/// Return codes
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobnsStatus {
    /// Success, or proceed without isolation
    Ok = 0,
    /// Proceed inside the job's namespace
    Isolated = 1,
    /// Null pointer argument
    NullPointer = -1,
    /// Invalid UTF-8 argument
    InvalidUtf8 = -2,
    /// Configuration could not be loaded
    Config = -3,
    /// The operation failed
    Failed = -4,
    /// Session refused by the fail-closed policy
    Denied = -5,
}

impl From<&JobnsError> for JobnsStatus {
    fn from(err: &JobnsError) -> Self {
        match err {
            JobnsError::Config(_) => Self::Config,
            JobnsError::AdoptionDenied(_) => Self::Denied,
            _ => Self::Failed,
        }
    }
}

// Thread-local error message
thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

fn set_last_error(msg: String) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = Some(msg);
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| e.borrow_mut().take());
}

/// Record `err` and map it to its return code
fn fail(err: &JobnsError) -> c_int {
    set_last_error(err.to_string());
    JobnsStatus::from(err) as c_int
}

fn hooks() -> Result<Lifecycle, c_int> {
    Lifecycle::from_env().map_err(|e| fail(&e))
}

/// Get the last error message
///
/// Returns NULL if the last call on this thread succeeded. The returned
/// string is valid until the next jobns call on this thread.
#[unsafe(no_mangle)]
pub extern "C" fn jobns_last_error() -> *const c_char {
    thread_local! {
        static ERROR_BUF: RefCell<Option<CString>> = const { RefCell::new(None) };
    }

    LAST_ERROR.with(|e| {
        let err = e.borrow();
        match &*err {
            Some(msg) => ERROR_BUF.with(|buf| {
                let cstr = CString::new(msg.as_str()).unwrap_or_default();
                let ptr = cstr.as_ptr();
                *buf.borrow_mut() = Some(cstr);
                ptr
            }),
            None => ptr::null(),
        }
    })
}

/// Prepare the node once at plugin load
#[unsafe(no_mangle)]
pub extern "C" fn jobns_prepare() -> c_int {
    clear_last_error();
    let hooks = match hooks() {
        Ok(hooks) => hooks,
        Err(code) => return code,
    };
    match hooks.prepare_node() {
        Ok(()) => JobnsStatus::Ok as c_int,
        Err(e) => fail(&e),
    }
}

/// Isolate the calling process before the job's user code runs.
///
/// A negative return must abort the job launch.
#[unsafe(no_mangle)]
pub extern "C" fn jobns_job_start(uid: u32, gid: u32, job_id: u32) -> c_int {
    clear_last_error();
    let hooks = match hooks() {
        Ok(hooks) => hooks,
        Err(code) => return code,
    };
    match hooks.on_job_first_process_start(uid, gid, job_id) {
        Ok(_) => JobnsStatus::Ok as c_int,
        Err(e) => fail(&e),
    }
}

/// Clean up after a terminating step of `job_id`.
///
/// Per-root removal failures are logged and leave the return code at 0 with
/// the last error set.
#[unsafe(no_mangle)]
pub extern "C" fn jobns_step_terminate(job_id: u32) -> c_int {
    clear_last_error();
    let hooks = match hooks() {
        Ok(hooks) => hooks,
        Err(code) => return code,
    };
    match hooks.on_step_terminate(job_id) {
        Ok(CleanupOutcome::Cleaned(report)) => {
            if let Some(error) = report.failures().find_map(|r| r.error.as_ref()) {
                set_last_error(error.to_string());
            }
            JobnsStatus::Ok as c_int
        }
        Ok(_) => JobnsStatus::Ok as c_int,
        Err(e) => fail(&e),
    }
}

/// Session open for process `pid`; `user` may be NULL.
///
/// Returns 0 to proceed unisolated, 1 when the caller now runs inside the
/// job's namespace, negative when the session must be refused. Only the
/// fail-closed policy refuses; otherwise every failure proceeds with the last
/// error set.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jobns_session_open(pid: pid_t, user: *const c_char) -> c_int {
    clear_last_error();

    let Ok(session_pid) = u32::try_from(pid) else {
        let err = JobnsError::RegistryLookup(format!("invalid session pid {pid}"));
        return session_not_adopted(0, None, &err);
    };
    let user = if user.is_null() {
        None
    } else {
        // SAFETY: Caller guarantees user is a valid C string
        match unsafe { CStr::from_ptr(user) }.to_str() {
            Ok(s) => Some(s),
            Err(_) => {
                let err = JobnsError::UserLookup("user name is not valid UTF-8".into());
                return session_not_adopted(session_pid, None, &err);
            }
        }
    };

    let hooks = match Lifecycle::from_env() {
        Ok(hooks) => hooks,
        Err(e) => return session_not_adopted(session_pid, user, &e),
    };
    match hooks.on_session_open(session_pid, user) {
        Ok(SessionOutcome::ProceedIsolated(_)) => JobnsStatus::Isolated as c_int,
        Ok(SessionOutcome::Proceed) => JobnsStatus::Ok as c_int,
        Err(e) => fail(&e),
    }
}

/// Apply the adoption policy to a session that failed before adoption began.
///
/// The policy is read on its own so a configuration error elsewhere cannot
/// refuse a fail-open session.
fn session_not_adopted(pid: u32, user: Option<&str>, err: &JobnsError) -> c_int {
    set_last_error(err.to_string());
    let policy = AdoptionPolicy::from_env().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "unreadable adoption policy, using the default");
        AdoptionPolicy::default()
    });
    match adopt::apply_policy(policy, pid, user, err) {
        Ok(_) => JobnsStatus::Ok as c_int,
        Err(denied) => fail(&denied),
    }
}

/// Get library version
#[unsafe(no_mangle)]
pub extern "C" fn jobns_version() -> *const c_char {
    static VERSION: Lazy<CString> =
        Lazy::new(|| CString::new(env!("CARGO_PKG_VERSION")).unwrap_or_default());
    VERSION.as_ptr()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, PoisonError};

    fn last_error() -> Option<String> {
        let ptr = jobns_last_error();
        if ptr.is_null() {
            None
        } else {
            // SAFETY: non-null pointers come from the thread-local buffer
            Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
        }
    }

    #[test]
    fn version_matches_package() {
        // SAFETY: VERSION lives for the whole program
        let version = unsafe { CStr::from_ptr(jobns_version()) };
        assert_eq!(version.to_str().unwrap(), env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn errors_map_to_negative_codes() {
        assert_eq!(
            JobnsStatus::from(&JobnsError::AdoptionDenied("no job".into())),
            JobnsStatus::Denied
        );
        assert_eq!(
            JobnsStatus::from(&JobnsError::Config("bad".into())),
            JobnsStatus::Config
        );
        assert_eq!(
            JobnsStatus::from(&JobnsError::Namespace("unshare".into())),
            JobnsStatus::Failed
        );
        assert!((JobnsStatus::Denied as c_int) < 0);
    }

    #[test]
    fn last_error_is_per_call() {
        let code = fail(&JobnsError::RegistryLookup("nothing registered".into()));
        assert_eq!(code, JobnsStatus::Failed as c_int);
        assert!(last_error().unwrap().contains("nothing registered"));

        clear_last_error();
        assert!(last_error().is_none());
    }

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Run `f` with the given `JOBNS_*` variables set, then unset them
    fn with_env(vars: &[(&str, &str)], f: impl FnOnce()) {
        let _guard = ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        for (key, value) in vars {
            // SAFETY: environment access in these tests is serialised by ENV_LOCK
            unsafe { std::env::set_var(key, value) };
        }
        f();
        for (key, _) in vars {
            // SAFETY: as above
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    fn broken_config_still_lets_sessions_through() {
        with_env(&[("JOBNS_TMP_DIRS", "relative/scratch")], || {
            // SAFETY: null user is allowed
            let code = unsafe { jobns_session_open(1234, ptr::null()) };
            assert_eq!(code, JobnsStatus::Ok as c_int);
            assert!(last_error().unwrap().contains("absolute"));
        });
    }

    #[test]
    fn broken_config_refuses_under_fail_closed() {
        with_env(
            &[
                ("JOBNS_TMP_DIRS", "relative/scratch"),
                ("JOBNS_ADOPT_POLICY", "fail-closed"),
            ],
            || {
                // SAFETY: null user is allowed
                let code = unsafe { jobns_session_open(1234, ptr::null()) };
                assert_eq!(code, JobnsStatus::Denied as c_int);
                assert!(last_error().unwrap().contains("absolute"));
            },
        );
    }

    #[test]
    fn invalid_user_follows_policy() {
        let bad = [0xffu8 as c_char, 0];
        with_env(&[], || {
            // SAFETY: bad is NUL-terminated
            let code = unsafe { jobns_session_open(1, bad.as_ptr()) };
            assert_eq!(code, JobnsStatus::Ok as c_int);
            assert!(last_error().unwrap().contains("UTF-8"));
        });
        with_env(&[("JOBNS_ADOPT_POLICY", "fail-closed")], || {
            // SAFETY: bad is NUL-terminated
            let code = unsafe { jobns_session_open(1, bad.as_ptr()) };
            assert_eq!(code, JobnsStatus::Denied as c_int);
        });
    }

    #[test]
    fn negative_pid_follows_policy() {
        with_env(&[], || {
            // SAFETY: null user is allowed
            let code = unsafe { jobns_session_open(-1, ptr::null()) };
            assert_eq!(code, JobnsStatus::Ok as c_int);
            assert!(last_error().unwrap().contains("-1"));
        });
        with_env(&[("JOBNS_ADOPT_POLICY", "fail-closed")], || {
            // SAFETY: null user is allowed
            let code = unsafe { jobns_session_open(-1, ptr::null()) };
            assert_eq!(code, JobnsStatus::Denied as c_int);
        });
    }
}
