//! Error types and handling for Floe

/// Result type alias for Floe operations
pub type Result<T> = std::result::Result<T, FloeError>;

/// Error types surfaced by the Floe middleware
///
/// These cover the recoverable failures only. Contract violations and
/// shared-memory corruption never appear here; they route through
/// [`crate::fault`] and terminate the process.
#[derive(Debug, thiserror::Error)]
pub enum FloeError {
    /// I/O related errors (socket operations, mmap, etc.)
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Platform-specific errors (memfd, ftruncate, clock access)
    #[error("Platform error: {message}")]
    Platform { message: String },

    /// Invalid parameters or configuration
    #[error("Invalid parameter: {parameter} - {message}")]
    InvalidParameter { parameter: String, message: String },

    /// A bounded resource is exhausted (free chunks, port slots, liveness slots)
    #[error("Resource exhausted: {resource}")]
    Exhausted { resource: String },

    /// Requested payload does not fit into the largest configured pool
    #[error("Oversize request: {requested} bytes requested, largest pool holds {max}")]
    OversizeRequest { requested: usize, max: usize },

    /// Operation on a port that is not offered or has been shut down
    #[error("Port stopped: {message}")]
    PortStopped { message: String },

    /// Broker did not answer within the registration deadline
    #[error("Registration timed out after {millis} ms")]
    RegistrationTimeout { millis: u64 },

    /// Broker refused the registration
    #[error("Registration rejected: {reason}")]
    RegistrationRejected { reason: String },

    /// A wire message did not match the registration protocol
    #[error("Malformed message: {message}")]
    Malformed { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl FloeError {
    /// Create an I/O error from a standard I/O error
    pub fn from_io(source: std::io::Error, context: &str) -> Self {
        Self::Io {
            message: format!("{}: {}", context, source),
            source: Some(source),
        }
    }

    /// Create a platform error
    pub fn platform(message: impl Into<String>) -> Self {
        Self::Platform {
            message: message.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create an exhaustion error
    pub fn exhausted(resource: impl Into<String>) -> Self {
        Self::Exhausted {
            resource: resource.into(),
        }
    }

    /// Create an oversize request error
    pub fn oversize(requested: usize, max: usize) -> Self {
        Self::OversizeRequest { requested, max }
    }

    /// Create a port stopped error
    pub fn port_stopped(message: impl Into<String>) -> Self {
        Self::PortStopped {
            message: message.into(),
        }
    }

    /// Create a registration timeout error
    pub fn registration_timeout(timeout: std::time::Duration) -> Self {
        Self::RegistrationTimeout {
            millis: timeout.as_millis() as u64,
        }
    }

    /// Create a registration rejected error
    pub fn registration_rejected(reason: impl Into<String>) -> Self {
        Self::RegistrationRejected {
            reason: reason.into(),
        }
    }

    /// Create a malformed message error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for FloeError {
    fn from(err: std::io::Error) -> Self {
        Self::from_io(err, "I/O operation failed")
    }
}

impl From<bincode::Error> for FloeError {
    fn from(err: bincode::Error) -> Self {
        Self::serialization(format!("Bincode error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = FloeError::exhausted("chunk pool");
        assert!(matches!(err, FloeError::Exhausted { .. }));

        let err = FloeError::oversize(512, 256);
        assert!(matches!(err, FloeError::OversizeRequest { .. }));

        let err = FloeError::registration_rejected("version mismatch");
        assert!(matches!(err, FloeError::RegistrationRejected { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = FloeError::oversize(512, 256);
        let display = format!("{}", err);
        assert!(display.contains("512"));
        assert!(display.contains("256"));

        let err = FloeError::port_stopped("not offered");
        assert!(format!("{}", err).contains("not offered"));
    }
}
