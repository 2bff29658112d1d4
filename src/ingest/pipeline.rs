//! Tail-to-store ingestion loop
//!
//! Consumes raw lines from a [`FollowHandle`], turns them into events and
//! feeds the [`Batcher`]. Flushes run inline, so a slow store throttles
//! line consumption. Bad records are logged and skipped.

use tokio::sync::watch;
use tracing::{info, warn};

use crate::ingest::batcher::{Batcher, EventSink};
use crate::ingest::decoder::{EventAssembler, LineError};
use crate::ingest::follower::{FollowExit, FollowHandle};
use crate::storage::StorageResult;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestStats {
    pub lines: u64,
    pub decode_failures: u64,
    pub assemble_failures: u64,
    pub events: u64,
    pub flushed: u64,
}

pub struct Pipeline<S: EventSink + ?Sized> {
    assembler: EventAssembler,
    batcher: Batcher<S>,
    stats: IngestStats,
}

impl<S: EventSink + ?Sized> Pipeline<S> {
    pub fn new(assembler: EventAssembler, batcher: Batcher<S>) -> Self {
        Self {
            assembler,
            batcher,
            stats: IngestStats::default(),
        }
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    pub fn batcher(&self) -> &Batcher<S> {
        &self.batcher
    }

    /// Process one raw line; record failures are counted, not returned
    pub async fn handle_line(&mut self, line: &str) -> StorageResult<()> {
        self.stats.lines += 1;
        if line.trim().is_empty() {
            return Ok(());
        }

        match self.assembler.assemble_line(line) {
            Ok(event) => {
                self.stats.events += 1;
                let flushed = self.batcher.push(event).await?;
                self.stats.flushed += flushed as u64;
            }
            Err(LineError::Decode(e)) => {
                self.stats.decode_failures += 1;
                warn!(error = %e.source, line = %e.line, "Skipping malformed log line");
            }
            Err(LineError::Assemble(e)) => {
                self.stats.assemble_failures += 1;
                warn!(error = %e.kind, payload = %e.payload, "Skipping unrecognized record");
            }
        }
        Ok(())
    }

    /// Run until the follower ends or `shutdown` is signalled
    ///
    /// Pending events are flushed before returning. On a flush error the
    /// follower is stopped and the error returned; unflushed events stay
    /// in the batcher.
    pub async fn run(
        &mut self,
        handle: &mut FollowHandle,
        mut shutdown: watch::Receiver<bool>,
    ) -> StorageResult<IngestStats> {
        let result = self.consume(handle, &mut shutdown).await;
        let exit = handle.stop().await;
        result?;

        if exit == FollowExit::Ended {
            warn!("Log follower ended unexpectedly");
        }

        let flushed = self.batcher.flush().await?;
        self.stats.flushed += flushed as u64;

        info!(
            lines = self.stats.lines,
            events = self.stats.events,
            decode_failures = self.stats.decode_failures,
            assemble_failures = self.stats.assemble_failures,
            flushed = self.stats.flushed,
            "Ingestion stopped"
        );
        Ok(self.stats)
    }

    async fn consume(
        &mut self,
        handle: &mut FollowHandle,
        shutdown: &mut watch::Receiver<bool>,
    ) -> StorageResult<()> {
        if *shutdown.borrow() {
            return Ok(());
        }

        // A dropped sender can no longer signal; keep running until the log ends.
        let mut listening = true;
        loop {
            let deadline = self.batcher.deadline();
            tokio::select! {
                changed = shutdown.changed(), if listening => match changed {
                    Ok(()) if *shutdown.borrow() => {
                        info!("Shutdown signal received, stopping ingestion");
                        return Ok(());
                    }
                    Ok(()) => {}
                    Err(_) => listening = false,
                },
                line = handle.next_line() => match line {
                    Some(line) => self.handle_line(&line).await?,
                    None => return Ok(()),
                },
                _ = sleep_until_deadline(deadline), if deadline.is_some() => {
                    let flushed = self.batcher.flush_if_due().await?;
                    self.stats.flushed += flushed as u64;
                }
            }
        }
    }
}

async fn sleep_until_deadline(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
