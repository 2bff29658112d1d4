//! Dual-trigger event batching
//!
//! Events are held in memory until either the count threshold or the time
//! window is reached, then handed to the sink in one insert. A failed flush
//! keeps the pending events so the caller can retry.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::models::Event;
use crate::storage::{Storage, StorageResult};

/// Destination of flushed batches
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn write_batch(&self, batch: &[Event]) -> StorageResult<()>;
}

#[async_trait]
impl<T: Storage + ?Sized> EventSink for T {
    async fn write_batch(&self, batch: &[Event]) -> StorageResult<()> {
        Storage::insert_events(self, batch).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// Flush once this many events are pending (0 disables)
    pub buffer_size: usize,
    /// Flush once this much time has passed since the last flush (zero disables)
    pub buffer_time: Duration,
}

impl BatchConfig {
    pub fn new(buffer_size: usize, buffer_time: Duration) -> Self {
        Self {
            buffer_size,
            buffer_time,
        }
    }

    fn unbatched(&self) -> bool {
        self.buffer_size == 0 && self.buffer_time.is_zero()
    }
}

pub struct Batcher<S: EventSink + ?Sized> {
    sink: Arc<S>,
    config: BatchConfig,
    pending: Vec<Event>,
    deadline: Option<Instant>,
}

impl<S: EventSink + ?Sized> Batcher<S> {
    pub fn new(sink: Arc<S>, config: BatchConfig) -> Self {
        let deadline =
            (!config.buffer_time.is_zero()).then(|| Instant::now() + config.buffer_time);
        Self {
            sink,
            config,
            pending: Vec::with_capacity(config.buffer_size),
            deadline,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Instant at which the time trigger fires, if time batching is enabled
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Add an event, flushing if a trigger is reached
    ///
    /// Returns the number of events flushed.
    pub async fn push(&mut self, event: Event) -> StorageResult<usize> {
        let now = Instant::now();
        if self.pending.is_empty() {
            self.advance_elapsed_deadline(now);
        }

        self.pending.push(event);

        let size_reached =
            self.config.buffer_size > 0 && self.pending.len() >= self.config.buffer_size;
        let time_reached = self.deadline.is_some_and(|deadline| now >= deadline);

        if self.config.unbatched() || size_reached || time_reached {
            return self.flush().await;
        }
        Ok(0)
    }

    /// Fire the time trigger if its deadline has passed
    ///
    /// An empty batch is never flushed; its deadline moves forward instead.
    pub async fn flush_if_due(&mut self) -> StorageResult<usize> {
        let now = Instant::now();
        match self.deadline {
            Some(deadline) if now >= deadline => {
                if self.pending.is_empty() {
                    self.advance_elapsed_deadline(now);
                    Ok(0)
                } else {
                    self.flush().await
                }
            }
            _ => Ok(0),
        }
    }

    /// Hand every pending event to the sink
    pub async fn flush(&mut self) -> StorageResult<usize> {
        if self.pending.is_empty() {
            return Ok(0);
        }

        self.sink.write_batch(&self.pending).await?;

        let count = self.pending.len();
        self.pending.clear();
        if !self.config.buffer_time.is_zero() {
            self.deadline = Some(Instant::now() + self.config.buffer_time);
        }
        debug!(events = count, "Flushed event batch");
        Ok(count)
    }

    fn advance_elapsed_deadline(&mut self, now: Instant) {
        if let Some(deadline) = self.deadline {
            if now >= deadline {
                self.deadline = Some(now + self.config.buffer_time);
            }
        }
    }
}
