//! Error types for log clients.

use thiserror::Error;

/// Error type for log client operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    #[error("topic {topic} has no partition {partition}")]
    UnknownPartition { topic: String, partition: i32 },

    #[error("consumer used before start()")]
    NotStarted,

    #[error("background fetcher disconnected")]
    Disconnected,

    #[error("flush did not complete within {timeout_ms} ms")]
    FlushTimeout { timeout_ms: u64 },

    #[error("delivery failed with error code {0}")]
    Delivery(i32),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for log client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_partition_displays_topic_and_partition() {
        let err = Error::UnknownPartition {
            topic: "events".to_string(),
            partition: 7,
        };
        assert!(err.to_string().contains("events"));
        assert!(err.to_string().contains('7'));
    }

    #[test]
    fn flush_timeout_displays_millis() {
        let err = Error::FlushTimeout { timeout_ms: 250 };
        assert!(err.to_string().contains("250"));
    }
}
