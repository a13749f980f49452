//! Message stream abstraction consumed by the intake loop.
//!
//! The intake loop reads one partition of one topic. It only needs three
//! things from the stream: a bounded-wait read, a per-message acknowledgement,
//! and a way to have a message delivered again after a transient failure.
//!
//! # Offset commits
//!
//! Acknowledgements are per message, but a partition only stores a single
//! committed position. [`CommitTracker`] bridges the two: the committed
//! position moves forward only across a contiguous run of acknowledged
//! offsets. A message that was abandoned keeps the position at or below its own
//! offset, so a restarted consumer sees it again, together with any later
//! messages (which re-apply idempotently).

pub mod kafka;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use kafka::KafkaStream;

/// One message read from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// Opaque producer key, used only for logging.
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

impl StreamMessage {
    /// Key for log lines, `-` when the producer sent none.
    #[must_use]
    pub fn key_for_log(&self) -> &str {
        self.key.as_deref().unwrap_or("-")
    }
}

/// Errors from the underlying stream client.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Kafka client error.
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// The stream could not be reached.
    #[error("stream unavailable: {0}")]
    Unavailable(String),
}

/// A single-partition message source with explicit acknowledgement.
#[async_trait]
pub trait MessageStream: Send {
    /// Wait up to `wait` for the next message.
    ///
    /// Returns `Ok(None)` if nothing arrived in time.
    async fn next_message(&mut self, wait: Duration) -> Result<Option<StreamMessage>, StreamError>;

    /// Acknowledge `message` as fully processed.
    async fn commit(&mut self, message: &StreamMessage) -> Result<(), StreamError>;

    /// Arrange for `message` to be the next one delivered.
    async fn rewind(&mut self, message: &StreamMessage) -> Result<(), StreamError>;
}

/// Tracks acknowledged offsets and derives the committable position.
///
/// The position is the offset of the next message a restarted consumer should
/// read: one past the end of the contiguous acknowledged prefix.
///
/// Acks past a gap are held as a single contiguous run, so memory stays
/// constant however long a gap stays open. A new run that does not touch the
/// held one replaces it; the forgotten offsets are simply redelivered after a
/// restart.
#[derive(Debug, Default, Clone)]
pub struct CommitTracker {
    position: Option<i64>,
    // Acked offsets beyond the gap, as `[lo, hi)`, with `lo > position`.
    ahead: Option<(i64, i64)>,
}

impl CommitTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from a known committed position.
    #[must_use]
    pub fn starting_at(position: i64) -> Self {
        Self {
            position: Some(position),
            ahead: None,
        }
    }

    /// Record that `offset` was delivered.
    ///
    /// The first delivery fixes the low end of the window when no committed
    /// position was known up front.
    pub fn observe(&mut self, offset: i64) {
        if self.position.is_none() {
            self.position = Some(offset);
        }
    }

    /// Record that `offset` was processed.
    ///
    /// Returns the new committable position if it moved.
    pub fn ack(&mut self, offset: i64) -> Option<i64> {
        let start = *self.position.get_or_insert(offset);
        if offset < start {
            return None;
        }

        if offset > start {
            self.ahead = match self.ahead {
                Some((lo, hi)) if (lo..hi).contains(&offset) => Some((lo, hi)),
                Some((lo, hi)) if offset == hi => Some((lo, hi + 1)),
                Some((lo, hi)) if offset + 1 == lo => Some((offset, hi)),
                _ => Some((offset, offset + 1)),
            };
            return None;
        }

        let mut position = start + 1;
        if let Some((lo, hi)) = self.ahead {
            if lo == position {
                position = hi;
                self.ahead = None;
            } else if hi <= position {
                self.ahead = None;
            }
        }
        self.position = Some(position);
        Some(position)
    }

    /// Number of acked offsets held beyond the committable position.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.ahead
            .map_or(0, |(lo, hi)| usize::try_from(hi - lo).unwrap_or(usize::MAX))
    }

    /// The committable position, if any message was seen.
    #[must_use]
    pub const fn position(&self) -> Option<i64> {
        self.position
    }
}
