//! Shared fixtures: an in-process step daemon and a recording mounter

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use jobns_core::isolation::{MountNamespace, MountOps};
use jobns_core::stepd::StepId;
use jobns_core::stepd::protocol::{self, PROTOCOL_VERSION, Request, RequestBody, Response};
use jobns_core::stepd::StepDirectory;
use jobns_core::Result;
use std::cell::RefCell;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

pub const NODE: &str = "localhost";

/// A step daemon answering on a socket in the step directory
pub struct FakeStepd {
    pub id: StepId,
    pub socket: PathBuf,
}

impl FakeStepd {
    pub fn spawn(stepd_dir: &Path, id: StepId, uid: u32, pids: Vec<u32>) -> Self {
        std::fs::create_dir_all(stepd_dir).expect("create step directory");
        let socket = stepd_dir.join(StepDirectory::socket_name(NODE, id));
        let listener = UnixListener::bind(&socket).expect("bind step socket");

        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                serve(stream, uid, &pids);
            }
        });

        Self { id, socket }
    }

    /// Unregister the step; later connects see it as gone
    pub fn stop(self) {
        std::fs::remove_file(&self.socket).expect("remove step socket");
    }
}

fn serve(mut stream: UnixStream, uid: u32, pids: &[u32]) {
    while let Ok(request) = protocol::read_frame::<_, Request>(&mut stream) {
        let response = match request.body {
            RequestBody::Hello => Response::Hello {
                version: PROTOCOL_VERSION,
            },
            RequestBody::ListPids => Response::Pids {
                pids: pids.to_vec(),
            },
            RequestBody::OwnerUid => Response::Uid { uid },
        };
        if protocol::write_frame(&mut stream, &response).is_err() {
            break;
        }
    }
}

/// Mount operations that only remember which namespaces were entered
#[derive(Debug, Default)]
pub struct EnterRecorder {
    pub entered: RefCell<Vec<PathBuf>>,
}

impl EnterRecorder {
    pub fn entered(&self) -> Vec<PathBuf> {
        self.entered.borrow().clone()
    }
}

impl MountOps for EnterRecorder {
    fn unshare_mount_ns(&self) -> Result<()> {
        Ok(())
    }

    fn make_rslave(&self, _path: &Path) -> Result<()> {
        Ok(())
    }

    fn make_private(&self, _path: &Path) -> Result<()> {
        Ok(())
    }

    fn bind(&self, _src: &Path, _dst: &Path) -> Result<()> {
        Ok(())
    }

    fn enter_mount_ns(&self, ns: &MountNamespace) -> Result<()> {
        self.entered.borrow_mut().push(ns.path().to_path_buf());
        Ok(())
    }
}

/// Fake process table entry with a namespace reference file
pub fn fake_process(proc_root: &Path, pid: u32) -> PathBuf {
    let ns_dir = proc_root.join(pid.to_string()).join("ns");
    std::fs::create_dir_all(&ns_dir).expect("create ns dir");
    let mnt = ns_dir.join("mnt");
    std::fs::write(&mnt, b"").expect("write ns reference");
    mnt
}

pub fn current_uid() -> u32 {
    nix::unistd::getuid().as_raw()
}

pub fn current_gid() -> u32 {
    nix::unistd::getgid().as_raw()
}
