//! Port configuration options

use serde::{Deserialize, Serialize};

use crate::error::{FloeError, Result};
use crate::limits;

/// What a full subscriber queue does with an incoming chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueFullPolicy {
    /// Drop the oldest queued chunk to make room for the new one
    DiscardOldest,
    /// Make the publisher wait until the queue has room
    BlockProducer,
}

impl Default for QueueFullPolicy {
    fn default() -> Self {
        Self::DiscardOldest
    }
}

/// Options for creating a publisher port
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherOptions {
    /// Number of recent chunks retained for late-joining subscribers
    pub history_capacity: usize,
    /// Whether the port starts out offered
    pub offer_on_create: bool,
}

impl Default for PublisherOptions {
    fn default() -> Self {
        Self {
            history_capacity: 0,
            offer_on_create: true,
        }
    }
}

impl PublisherOptions {
    /// Set the history capacity
    pub fn with_history_capacity(mut self, history_capacity: usize) -> Self {
        self.history_capacity = history_capacity;
        self
    }

    /// Set whether the port starts out offered
    pub fn with_offer_on_create(mut self, offer_on_create: bool) -> Self {
        self.offer_on_create = offer_on_create;
        self
    }

    /// Validate the options against the configured limits
    pub fn validate(&self) -> Result<()> {
        if self.history_capacity > limits::MAX_HISTORY_CAPACITY {
            return Err(FloeError::invalid_parameter(
                "history_capacity",
                format!(
                    "History capacity must not exceed {}",
                    limits::MAX_HISTORY_CAPACITY
                ),
            ));
        }
        Ok(())
    }
}

/// Options for creating a subscriber port
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriberOptions {
    /// Delivery queue capacity, in `[1, MAX_QUEUE_CAPACITY]`
    pub queue_capacity: usize,
    /// Number of history chunks requested on attach
    pub history_request: usize,
    /// Behavior when the delivery queue is full
    pub queue_full_policy: QueueFullPolicy,
}

impl Default for SubscriberOptions {
    fn default() -> Self {
        Self {
            queue_capacity: limits::DEFAULT_QUEUE_CAPACITY,
            history_request: 0,
            queue_full_policy: QueueFullPolicy::default(),
        }
    }
}

impl SubscriberOptions {
    /// Set the delivery queue capacity
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Set the number of history chunks requested on attach
    pub fn with_history_request(mut self, history_request: usize) -> Self {
        self.history_request = history_request;
        self
    }

    /// Set the queue-full policy
    pub fn with_queue_full_policy(mut self, policy: QueueFullPolicy) -> Self {
        self.queue_full_policy = policy;
        self
    }

    /// Validate the options against the configured limits
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 || self.queue_capacity > limits::MAX_QUEUE_CAPACITY {
            return Err(FloeError::invalid_parameter(
                "queue_capacity",
                format!(
                    "Queue capacity must be in [1, {}]",
                    limits::MAX_QUEUE_CAPACITY
                ),
            ));
        }
        if self.history_request > limits::MAX_HISTORY_CAPACITY {
            return Err(FloeError::invalid_parameter(
                "history_request",
                format!(
                    "History request must not exceed {}",
                    limits::MAX_HISTORY_CAPACITY
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(PublisherOptions::default().validate().is_ok());
        assert!(SubscriberOptions::default().validate().is_ok());
    }

    #[test]
    fn test_zero_queue_capacity_rejected() {
        let options = SubscriberOptions::default().with_queue_capacity(0);
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_excessive_history_rejected() {
        let options =
            PublisherOptions::default().with_history_capacity(limits::MAX_HISTORY_CAPACITY + 1);
        assert!(options.validate().is_err());
    }
}
