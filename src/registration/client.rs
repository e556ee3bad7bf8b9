//! Client side of the registration handshake

use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::{FloeError, Result};
use crate::registration::protocol::{
    format_request, parse_reply, read_frame, write_frame, Reply, Request, PROTOCOL_VERSION,
};

/// Outcome of a successful registration
#[derive(Debug, Clone)]
pub struct RegistrationToken {
    /// Path of the segment to map
    pub segment_path: PathBuf,
    /// Identity assigned to this process
    pub runtime_id: u32,
    /// Size the mapped segment must have
    pub segment_size: u64,
}

/// Synchronous registration client with a hard deadline
#[derive(Debug, Clone)]
pub struct RegistrationClient {
    socket_path: PathBuf,
}

impl RegistrationClient {
    /// Create a client talking to the broker socket at `socket_path`
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// The broker socket this client talks to
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Register this process, waiting at most `timeout` for the broker
    ///
    /// Connecting is retried until the deadline so a broker that is still
    /// starting up does not fail the caller early.
    pub fn register(&self, process_name: &str, timeout: Duration) -> Result<RegistrationToken> {
        if process_name.is_empty() || process_name.contains(char::is_whitespace) {
            return Err(FloeError::invalid_parameter(
                "process_name",
                "Process name must be non-empty and free of whitespace",
            ));
        }

        let deadline = Instant::now() + timeout;
        let mut stream = self.connect_until(deadline, timeout)?;

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(FloeError::registration_timeout(timeout));
        }
        stream
            .set_read_timeout(Some(remaining))
            .and_then(|_| stream.set_write_timeout(Some(remaining)))
            .map_err(|e| FloeError::from_io(e, "Failed to arm socket timeouts"))?;

        let request = Request::Register {
            process_name: process_name.to_string(),
            version: PROTOCOL_VERSION,
            pid: std::process::id(),
        };
        write_frame(&mut stream, &format_request(&request))?;

        let reply_text = match read_frame(&mut stream) {
            Ok(text) => text,
            Err(FloeError::Io { source, .. })
                if source.as_ref().map(is_timeout).unwrap_or(false) =>
            {
                return Err(FloeError::registration_timeout(timeout));
            }
            Err(other) => return Err(other),
        };

        match parse_reply(&reply_text)? {
            Reply::Ack {
                segment_path,
                runtime_id,
                segment_size,
            } => {
                log::info!(
                    "registered as runtime {} on segment {}",
                    runtime_id,
                    segment_path.display()
                );
                Ok(RegistrationToken {
                    segment_path,
                    runtime_id,
                    segment_size,
                })
            }
            Reply::Nack { reason } => Err(FloeError::registration_rejected(reason.describe())),
        }
    }

    /// Tell the broker this runtime is going away; best effort
    pub fn offboard(&self, runtime_id: u32) {
        if let Ok(mut stream) = UnixStream::connect(&self.socket_path) {
            let _ = stream.set_write_timeout(Some(Duration::from_millis(250)));
            let _ = write_frame(
                &mut stream,
                &format_request(&Request::Offboard { runtime_id }),
            );
        }
    }

    fn connect_until(&self, deadline: Instant, timeout: Duration) -> Result<UnixStream> {
        loop {
            match UnixStream::connect(&self.socket_path) {
                Ok(stream) => return Ok(stream),
                Err(_) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(_) => return Err(FloeError::registration_timeout(timeout)),
            }
        }
    }
}

fn is_timeout(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_times_out_without_broker() {
        let dir = tempfile::tempdir().unwrap();
        let client = RegistrationClient::new(dir.path().join("missing.sock"));

        let result = client.register("lonely", Duration::from_millis(50));
        assert!(matches!(
            result,
            Err(FloeError::RegistrationTimeout { .. })
        ));
    }

    #[test]
    fn test_register_rejects_bad_process_names() {
        let client = RegistrationClient::new("/tmp/unused.sock");
        assert!(client.register("", Duration::from_millis(10)).is_err());
        assert!(client
            .register("has spaces", Duration::from_millis(10))
            .is_err());
    }
}
