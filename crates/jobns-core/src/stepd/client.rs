//! Connection to a single step daemon

use super::protocol::{self, MIN_PROTOCOL_VERSION, Request, RequestBody, Response};
use super::{StepDescriptor, StepId};
use crate::{JobnsError, Result};
use std::io::ErrorKind;
use std::net::Shutdown;
use std::os::unix::net::UnixStream;

/// An open connection to a step daemon.
///
/// The socket is closed when the connection is dropped.
#[derive(Debug)]
pub struct StepDaemonConnection {
    stream: UnixStream,
    step: StepId,
    protocol_version: u16,
}

impl StepDaemonConnection {
    /// Connect and negotiate the protocol version.
    ///
    /// A missing or stale socket means the step is gone.
    pub fn connect(descriptor: &StepDescriptor) -> Result<Self> {
        let step = descriptor.id;
        let stream = UnixStream::connect(&descriptor.socket).map_err(|e| match e.kind() {
            ErrorKind::NotFound | ErrorKind::ConnectionRefused => JobnsError::StepNotFound(step),
            _ => JobnsError::Connection { step, source: e },
        })?;

        let mut conn = Self {
            stream,
            step,
            protocol_version: descriptor.protocol_version,
        };

        let version = match conn.call(RequestBody::Hello)? {
            Response::Hello { version } => version,
            other => return Err(unexpected(step, &other)),
        };
        let negotiated = version.min(descriptor.protocol_version);
        if negotiated < MIN_PROTOCOL_VERSION {
            return Err(JobnsError::Protocol(format!(
                "step {step} speaks unsupported protocol version {version}"
            )));
        }
        conn.protocol_version = negotiated;

        tracing::trace!(%step, version = negotiated, "connected to step daemon");
        Ok(conn)
    }

    #[must_use]
    pub const fn step(&self) -> StepId {
        self.step
    }

    #[must_use]
    pub const fn protocol_version(&self) -> u16 {
        self.protocol_version
    }

    /// Process ids supervised by the step
    pub fn list_pids(&mut self) -> Result<Vec<u32>> {
        match self.call(RequestBody::ListPids)? {
            Response::Pids { pids } => Ok(pids),
            other => Err(unexpected(self.step, &other)),
        }
    }

    /// Uid of the user that launched the step
    pub fn owner_uid(&mut self) -> Result<u32> {
        match self.call(RequestBody::OwnerUid)? {
            Response::Uid { uid } => Ok(uid),
            other => Err(unexpected(self.step, &other)),
        }
    }

    /// Close the connection
    pub fn close(self) {
        // The daemon may already have hung up.
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    fn call(&mut self, body: RequestBody) -> Result<Response> {
        let request = Request {
            version: self.protocol_version,
            step: self.step,
            body,
        };
        protocol::write_frame(&mut self.stream, &request)?;
        protocol::read_frame(&mut self.stream)
    }
}

fn unexpected(step: StepId, response: &Response) -> JobnsError {
    match response {
        Response::Error { message } => JobnsError::Protocol(format!("step {step}: {message}")),
        other => JobnsError::Protocol(format!("step {step}: unexpected response {other:?}")),
    }
}
