//! Length-prefixed text frames of the registration protocol
//!
//! Requests: `REG <processName> <version> <pid>` and `BYE <runtimeId>`.
//! Replies: `ACK <segmentPath> <runtimeId> <segmentSize>` and
//! `NACK <reasonCode>`. Each frame is a little-endian `u32` byte length
//! followed by that many bytes of UTF-8 text.

use std::io::{Read, Write};
use std::path::PathBuf;

use crate::error::{FloeError, Result};

/// Protocol version carried in every registration request
pub const PROTOCOL_VERSION: u32 = 1;

/// Upper bound on a single frame, generous for any path length
pub const MAX_FRAME_LEN: u32 = 4096;

/// Reason codes carried by a `NACK` reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackReason {
    /// Client spoke a different protocol version
    VersionMismatch,
    /// Every liveness slot is taken
    NoCapacity,
    /// The broker could not parse the request
    Malformed,
    /// The broker has no openable segment to hand out
    NoSegment,
    /// The broker failed internally while answering
    Internal,
}

impl NackReason {
    /// Wire code of this reason
    pub fn code(&self) -> u32 {
        match self {
            Self::VersionMismatch => 1,
            Self::NoCapacity => 2,
            Self::Malformed => 3,
            Self::NoSegment => 4,
            Self::Internal => 5,
        }
    }

    /// Reason for a wire code, if known
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::VersionMismatch),
            2 => Some(Self::NoCapacity),
            3 => Some(Self::Malformed),
            4 => Some(Self::NoSegment),
            5 => Some(Self::Internal),
            _ => None,
        }
    }

    /// Human-readable description
    pub fn describe(&self) -> &'static str {
        match self {
            Self::VersionMismatch => "protocol version mismatch",
            Self::NoCapacity => "no registration capacity left",
            Self::Malformed => "request not understood",
            Self::NoSegment => "broker has no openable segment",
            Self::Internal => "broker-internal failure",
        }
    }
}

/// Client-to-broker messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Register a process
    Register {
        process_name: String,
        version: u32,
        pid: u32,
    },
    /// Offboard a registered runtime
    Offboard { runtime_id: u32 },
}

/// Broker-to-client messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Registration accepted
    Ack {
        segment_path: PathBuf,
        runtime_id: u32,
        segment_size: u64,
    },
    /// Registration refused
    Nack { reason: NackReason },
}

/// Write one length-prefixed frame
pub fn write_frame(stream: &mut impl Write, text: &str) -> Result<()> {
    let bytes = text.as_bytes();
    if bytes.len() as u32 > MAX_FRAME_LEN {
        return Err(FloeError::malformed("frame exceeds the length limit"));
    }
    stream
        .write_all(&(bytes.len() as u32).to_le_bytes())
        .and_then(|_| stream.write_all(bytes))
        .map_err(|e| FloeError::from_io(e, "Failed to write frame"))?;
    Ok(())
}

/// Read one length-prefixed frame
pub fn read_frame(stream: &mut impl Read) -> Result<String> {
    let mut len_bytes = [0u8; 4];
    stream
        .read_exact(&mut len_bytes)
        .map_err(|e| FloeError::from_io(e, "Failed to read frame length"))?;
    let len = u32::from_le_bytes(len_bytes);
    if len > MAX_FRAME_LEN {
        return Err(FloeError::malformed("frame length exceeds the limit"));
    }
    let mut buffer = vec![0u8; len as usize];
    stream
        .read_exact(&mut buffer)
        .map_err(|e| FloeError::from_io(e, "Failed to read frame body"))?;
    String::from_utf8(buffer).map_err(|_| FloeError::malformed("frame is not valid UTF-8"))
}

/// Render a request as frame text
pub fn format_request(request: &Request) -> String {
    match request {
        Request::Register {
            process_name,
            version,
            pid,
        } => format!("REG {} {} {}", process_name, version, pid),
        Request::Offboard { runtime_id } => format!("BYE {}", runtime_id),
    }
}

/// Parse frame text into a request
pub fn parse_request(text: &str) -> Result<Request> {
    let mut parts = text.split_ascii_whitespace();
    match parts.next() {
        Some("REG") => {
            let process_name = parts
                .next()
                .ok_or_else(|| FloeError::malformed("REG without process name"))?
                .to_string();
            let version = parse_field(parts.next(), "REG version")?;
            let pid = parse_field(parts.next(), "REG pid")?;
            ensure_exhausted(parts, "REG")?;
            Ok(Request::Register {
                process_name,
                version,
                pid,
            })
        }
        Some("BYE") => {
            let runtime_id = parse_field(parts.next(), "BYE runtime id")?;
            ensure_exhausted(parts, "BYE")?;
            Ok(Request::Offboard { runtime_id })
        }
        _ => Err(FloeError::malformed(format!("unknown request: {:?}", text))),
    }
}

/// Render a reply as frame text
pub fn format_reply(reply: &Reply) -> String {
    match reply {
        Reply::Ack {
            segment_path,
            runtime_id,
            segment_size,
        } => format!(
            "ACK {} {} {}",
            segment_path.display(),
            runtime_id,
            segment_size
        ),
        Reply::Nack { reason } => format!("NACK {}", reason.code()),
    }
}

/// Parse frame text into a reply
pub fn parse_reply(text: &str) -> Result<Reply> {
    let mut parts = text.split_ascii_whitespace();
    match parts.next() {
        Some("ACK") => {
            let segment_path = PathBuf::from(
                parts
                    .next()
                    .ok_or_else(|| FloeError::malformed("ACK without segment path"))?,
            );
            let runtime_id = parse_field(parts.next(), "ACK runtime id")?;
            let segment_size = parse_field(parts.next(), "ACK segment size")?;
            ensure_exhausted(parts, "ACK")?;
            Ok(Reply::Ack {
                segment_path,
                runtime_id,
                segment_size,
            })
        }
        Some("NACK") => {
            let code: u32 = parse_field(parts.next(), "NACK reason")?;
            let reason = NackReason::from_code(code)
                .ok_or_else(|| FloeError::malformed(format!("unknown NACK code {}", code)))?;
            ensure_exhausted(parts, "NACK")?;
            Ok(Reply::Nack { reason })
        }
        _ => Err(FloeError::malformed(format!("unknown reply: {:?}", text))),
    }
}

fn parse_field<T: std::str::FromStr>(field: Option<&str>, what: &str) -> Result<T> {
    field
        .ok_or_else(|| FloeError::malformed(format!("{} is missing", what)))?
        .parse()
        .map_err(|_| FloeError::malformed(format!("{} is not a number", what)))
}

fn ensure_exhausted<'a>(mut parts: impl Iterator<Item = &'a str>, what: &str) -> Result<()> {
    if parts.next().is_some() {
        return Err(FloeError::malformed(format!("{} has trailing fields", what)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_roundtrip() {
        let request = Request::Register {
            process_name: "camera_driver".to_string(),
            version: PROTOCOL_VERSION,
            pid: 4242,
        };
        let parsed = parse_request(&format_request(&request)).unwrap();
        assert_eq!(parsed, request);

        let bye = Request::Offboard { runtime_id: 3 };
        assert_eq!(parse_request(&format_request(&bye)).unwrap(), bye);
    }

    #[test]
    fn test_reply_roundtrip() {
        let ack = Reply::Ack {
            segment_path: PathBuf::from("/tmp/floe.seg"),
            runtime_id: 1,
            segment_size: 65536,
        };
        assert_eq!(parse_reply(&format_reply(&ack)).unwrap(), ack);

        let nack = Reply::Nack {
            reason: NackReason::NoCapacity,
        };
        assert_eq!(parse_reply(&format_reply(&nack)).unwrap(), nack);
    }

    #[test]
    fn test_malformed_requests_rejected() {
        assert!(parse_request("HELLO world").is_err());
        assert!(parse_request("REG").is_err());
        assert!(parse_request("REG name x 1").is_err());
        assert!(parse_request("REG name 1 2 extra").is_err());
    }

    #[test]
    fn test_frame_roundtrip() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, "REG test 1 99").unwrap();

        let mut cursor = std::io::Cursor::new(buffer);
        assert_eq!(read_frame(&mut cursor).unwrap(), "REG test 1 99");
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut buffer = Vec::new();
        let huge = "x".repeat(MAX_FRAME_LEN as usize + 1);
        assert!(write_frame(&mut buffer, &huge).is_err());
    }
}
