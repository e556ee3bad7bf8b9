//! Service identification

use serde::{Deserialize, Serialize};

/// Three-part topic identity: `(service, instance, event)`
///
/// Publishers and subscribers meet when all three parts match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceId {
    service: String,
    instance: String,
    event: String,
}

impl ServiceId {
    /// Create a service identity from its three parts
    pub fn new(
        service: impl Into<String>,
        instance: impl Into<String>,
        event: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            instance: instance.into(),
            event: event.into(),
        }
    }

    /// The service part
    pub fn service(&self) -> &str {
        &self.service
    }

    /// The instance part
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// The event part
    pub fn event(&self) -> &str {
        &self.event
    }
}

impl std::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.service, self.instance, self.event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_joins_parts() {
        let id = ServiceId::new("radar", "front", "objects");
        assert_eq!(id.to_string(), "radar/front/objects");
    }

    #[test]
    fn test_equality_requires_all_parts() {
        let a = ServiceId::new("radar", "front", "objects");
        let b = ServiceId::new("radar", "front", "status");
        assert_ne!(a, b);
        assert_eq!(a, ServiceId::new("radar", "front", "objects"));
    }
}
