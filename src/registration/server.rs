//! Broker side of the registration handshake

use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::broker::BrokerCore;
use crate::error::{FloeError, Result};
use crate::memory::RuntimeId;
use crate::registration::protocol::{
    format_reply, parse_request, read_frame, write_frame, NackReason, Reply, Request,
    PROTOCOL_VERSION,
};

/// Accept loop answering registration requests on a Unix socket
#[derive(Debug)]
pub struct RegistrationServer {
    socket_path: PathBuf,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl RegistrationServer {
    /// Bind the socket and spawn the accept loop
    pub(crate) fn spawn(socket_path: PathBuf, core: Arc<BrokerCore>) -> Result<Self> {
        // A stale socket file from a previous run blocks the bind.
        let _ = std::fs::remove_file(&socket_path);
        let listener = UnixListener::bind(&socket_path)
            .map_err(|e| FloeError::from_io(e, "Failed to bind registration socket"))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| FloeError::from_io(e, "Failed to configure registration socket"))?;

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let path = socket_path.clone();
        let thread = std::thread::spawn(move || {
            log::info!("registration server listening on {}", path.display());
            while !stop_flag.load(Ordering::Acquire) {
                match listener.accept() {
                    Ok((stream, _)) => {
                        if let Err(error) = handle_connection(stream, &core) {
                            log::warn!("registration connection failed: {}", error);
                        }
                    }
                    Err(ref error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(10));
                    }
                    Err(error) => {
                        log::error!("registration accept failed: {}", error);
                        break;
                    }
                }
            }
            log::info!("registration server stopped");
        });

        Ok(Self {
            socket_path,
            stop,
            thread: Some(thread),
        })
    }

    /// The socket path clients connect to
    pub fn socket_path(&self) -> &std::path::Path {
        &self.socket_path
    }
}

impl Drop for RegistrationServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

fn handle_connection(mut stream: UnixStream, core: &Arc<BrokerCore>) -> Result<()> {
    stream
        .set_read_timeout(Some(Duration::from_secs(1)))
        .and_then(|_| stream.set_write_timeout(Some(Duration::from_secs(1))))
        .map_err(|e| FloeError::from_io(e, "Failed to arm connection timeouts"))?;

    let text = read_frame(&mut stream)?;
    let request = match parse_request(&text) {
        Ok(request) => request,
        Err(error) => {
            let reply = Reply::Nack {
                reason: NackReason::Malformed,
            };
            write_frame(&mut stream, &format_reply(&reply))?;
            return Err(error);
        }
    };

    match request {
        Request::Register {
            process_name,
            version,
            pid,
        } => {
            let reply = answer_registration(core, &process_name, version, pid);
            write_frame(&mut stream, &format_reply(&reply))
        }
        Request::Offboard { runtime_id } => {
            log::info!("offboarding runtime {}", runtime_id);
            core.offboard_remote(RuntimeId(runtime_id));
            Ok(())
        }
    }
}

fn answer_registration(core: &Arc<BrokerCore>, name: &str, version: u32, pid: u32) -> Reply {
    if version != PROTOCOL_VERSION {
        log::warn!(
            "rejecting '{}': protocol version {} (want {})",
            name,
            version,
            PROTOCOL_VERSION
        );
        return Reply::Nack {
            reason: NackReason::VersionMismatch,
        };
    }

    let Some(segment_path) = core.segment_path() else {
        return Reply::Nack {
            reason: NackReason::NoSegment,
        };
    };

    match core.register_remote(name, pid) {
        Ok(Some(runtime_id)) => {
            log::info!("registered '{}' (pid {}) as {}", name, pid, runtime_id);
            Reply::Ack {
                segment_path,
                runtime_id: runtime_id.0,
                segment_size: core.segment_size() as u64,
            }
        }
        Ok(None) => {
            log::warn!("rejecting '{}': no liveness slot available", name);
            Reply::Nack {
                reason: NackReason::NoCapacity,
            }
        }
        Err(error) => {
            log::error!("registration of '{}' failed: {}", name, error);
            Reply::Nack {
                reason: NackReason::Internal,
            }
        }
    }
}
