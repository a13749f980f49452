//! Order intake: stream messages in, persisted and cached orders out.
//!
//! One task drives [`IntakeConsumer::run`] over a single partition. Each
//! message goes through the same pipeline, strictly in stream order:
//!
//! 1. Decode the payload as an [`Order`].
//! 2. Reject it if `order_uid` is blank.
//! 3. Persist the aggregate in one store transaction (bounded by the write timeout).
//! 4. Upsert it into the cache.
//! 5. Commit the message offset.
//!
//! Decode and validation failures are permanent: the message is logged and
//! left uncommitted, so it comes back after a restart (or is acknowledged and
//! skipped when `skip_unprocessable` is set). Persist failures are transient:
//! nothing was committed, the cache is untouched, and the stream is rewound so
//! the same message is retried after the backoff.

use std::sync::Arc;
use std::time::Duration;

use order_broker_core::{Order, OrderUid, OrderUidError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::cache::OrderCache;
use crate::config::IntakeConfig;
use crate::db::{OrderStore, RepositoryError};
use crate::stream::{MessageStream, StreamError, StreamMessage};

/// Why a message could not be turned into a stored order.
#[derive(Debug, Error)]
pub enum IntakeError {
    /// Payload is not an order aggregate.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Payload decoded but has no usable `order_uid`.
    #[error("validation error: {0}")]
    Validation(#[from] OrderUidError),

    /// The store transaction failed and was rolled back.
    #[error("persist error: {0}")]
    Persist(#[from] RepositoryError),

    /// The store transaction did not finish in time and was abandoned.
    #[error("persist timed out after {0:?}")]
    PersistTimeout(Duration),
}

impl IntakeError {
    /// Whether retrying the same payload can never succeed.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::Validation(_))
    }
}

/// What one pass of the loop did.
#[derive(Debug)]
pub enum PollOutcome {
    /// No message arrived within the read timeout.
    Idle,
    /// The read failed; the loop backs off before reading again.
    ReadFailed(StreamError),
    /// Persisted and cached, with the offset committed.
    Committed(OrderUid),
    /// Stored and cached, but the offset commit failed. The message will be
    /// redelivered after a restart and re-applied idempotently.
    CommitFailed(OrderUid),
    /// Permanently unprocessable; left uncommitted.
    Abandoned(IntakeError),
    /// Permanently unprocessable; acknowledged so consumption can move on.
    Skipped(IntakeError),
    /// Persist failed; the message will be read again after the backoff.
    Retrying(IntakeError),
}

impl PollOutcome {
    /// Whether the loop should sleep the retry backoff before the next read.
    #[must_use]
    pub const fn needs_backoff(&self) -> bool {
        matches!(self, Self::ReadFailed(_) | Self::Retrying(_))
    }
}

/// The ingestion loop for one partition.
pub struct IntakeConsumer<S> {
    stream: S,
    store: Arc<dyn OrderStore>,
    cache: OrderCache,
    config: IntakeConfig,
}

impl<S: MessageStream> IntakeConsumer<S> {
    /// Create a consumer over `stream` that writes to `store` and `cache`.
    #[must_use]
    pub fn new(
        stream: S,
        store: Arc<dyn OrderStore>,
        cache: OrderCache,
        config: IntakeConfig,
    ) -> Self {
        Self {
            stream,
            store,
            cache,
            config,
        }
    }

    /// Run until `shutdown` is cancelled, returning the stream.
    ///
    /// Cancellation is observed while waiting for a message and during the
    /// backoff sleep. A message already being processed is carried through to
    /// its commit (or rollback) first.
    pub async fn run(mut self, shutdown: CancellationToken) -> S {
        info!("Intake consumer started, waiting for messages");

        loop {
            let read = tokio::select! {
                () = shutdown.cancelled() => break,
                read = self.stream.next_message(self.config.read_timeout) => read,
            };

            let outcome = self.handle_read(read).await;

            if outcome.needs_backoff() {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(self.config.retry_backoff) => {}
                }
            }
        }

        info!("Intake consumer stopped");
        self.stream
    }

    /// Perform one read-process-acknowledge pass, including the backoff sleep
    /// when the pass failed transiently.
    pub async fn poll_once(&mut self) -> PollOutcome {
        let read = self.stream.next_message(self.config.read_timeout).await;
        let outcome = self.handle_read(read).await;
        if outcome.needs_backoff() {
            tokio::time::sleep(self.config.retry_backoff).await;
        }
        outcome
    }

    /// Consume the loop and hand back the stream.
    pub fn into_stream(self) -> S {
        self.stream
    }

    async fn handle_read(
        &mut self,
        read: Result<Option<StreamMessage>, StreamError>,
    ) -> PollOutcome {
        match read {
            Ok(Some(message)) => self.handle_message(&message).await,
            Ok(None) => {
                debug!("No message within read timeout");
                PollOutcome::Idle
            }
            Err(e) => {
                warn!(error = %e, backoff = ?self.config.retry_backoff, "Error reading message");
                PollOutcome::ReadFailed(e)
            }
        }
    }

    #[instrument(
        skip(self, message),
        fields(offset = message.offset, key = %message.key_for_log())
    )]
    async fn handle_message(&mut self, message: &StreamMessage) -> PollOutcome {
        match process(self.store.as_ref(), &self.cache, self.config.write_timeout, message).await {
            Ok(uid) => match self.stream.commit(message).await {
                Ok(()) => {
                    info!(order_uid = %uid, "Order saved");
                    PollOutcome::Committed(uid)
                }
                Err(e) => {
                    error!(order_uid = %uid, error = %e, "Commit error");
                    PollOutcome::CommitFailed(uid)
                }
            },
            Err(err) if err.is_permanent() => {
                if !self.config.skip_unprocessable {
                    warn!(error = %err, "Abandoning unprocessable message without commit");
                    return PollOutcome::Abandoned(err);
                }

                warn!(error = %err, "Skipping unprocessable message");
                if let Err(e) = self.stream.commit(message).await {
                    error!(error = %e, "Commit error");
                }
                PollOutcome::Skipped(err)
            }
            Err(err) => {
                error!(error = %err, "Failed to persist order, will retry");
                if let Err(e) = self.stream.rewind(message).await {
                    error!(error = %e, "Failed to rewind stream");
                }
                PollOutcome::Retrying(err)
            }
        }
    }
}

/// Decode, validate, persist, then cache one message.
async fn process(
    store: &dyn OrderStore,
    cache: &OrderCache,
    write_timeout: Duration,
    message: &StreamMessage,
) -> Result<OrderUid, IntakeError> {
    let order: Order = serde_json::from_slice(&message.payload)?;
    let uid = order.uid()?;

    tokio::time::timeout(write_timeout, store.insert_order(&order))
        .await
        .map_err(|_| IntakeError::PersistTimeout(write_timeout))??;

    cache.set(uid.clone(), order);
    Ok(uid)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_errors() {
        let decode = serde_json::from_slice::<Order>(b"{").unwrap_err();
        assert!(IntakeError::Decode(decode).is_permanent());
        assert!(IntakeError::Validation(OrderUidError::Empty).is_permanent());
        assert!(!IntakeError::Persist(RepositoryError::NotFound).is_permanent());
        assert!(!IntakeError::PersistTimeout(Duration::from_secs(5)).is_permanent());
    }

    #[test]
    fn test_backoff_outcomes() {
        assert!(PollOutcome::ReadFailed(StreamError::Unavailable("down".into())).needs_backoff());
        assert!(
            PollOutcome::Retrying(IntakeError::PersistTimeout(Duration::from_secs(1)))
                .needs_backoff()
        );
        assert!(!PollOutcome::Idle.needs_backoff());
        assert!(!PollOutcome::Abandoned(IntakeError::Validation(OrderUidError::Empty)).needs_backoff());
    }
}
