//! Promotion Pipeline Module
//!
//! Moves completed batches from the hot tier to the cold tier.
//!
//! ## Per Reference
//! ```text
//!   dequeue ──► hot.read_batch ──► cold.insert ──► hot.trim_batch ──► ack
//!                     │                 │
//!                     │ gone from hot   │ DuplicateBatch
//!                     ▼                 ▼
//!               archived already? ──yes──► (skip to trim)
//!                     │ no
//!                     ▼
//!               Consistency error: logged, reference stays in processing
//! ```
//! Every step is idempotent, so re-running a reference whose previous
//! attempt died halfway converges to the same state.
//!
//! Each step checks the reference's generation against the live stream.
//! The cold insert runs under the stream's lock, so a delete waits for it
//! and then removes what it wrote. A reference whose generation is gone is
//! dropped without touching a recreated stream.

mod sweeper;
mod worker;

use std::sync::Arc;

pub use worker::PipelineHandle;

use crate::cold::{Batch, ColdStore};
use crate::error::{Result, TierError};
use crate::hot::{BatchRef, HotCache, HotRange};

/// What happened to a reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromoteOutcome {
    /// Archived, trimmed and acked
    Promoted,
    /// Found already archived by an earlier attempt; trimmed and acked
    AlreadyPromoted,
    /// The stream was deleted; the reference was discarded
    Dropped,
}

/// Runs the promotion steps for one reference at a time
#[derive(Clone)]
pub struct Promoter {
    hot: Arc<HotCache>,
    cold: Arc<dyn ColdStore>,
}

impl Promoter {
    pub fn new(hot: Arc<HotCache>, cold: Arc<dyn ColdStore>) -> Self {
        Self { hot, cold }
    }

    /// Promote one reference that is in processing
    pub fn promote_one(&self, reference: &BatchRef) -> Result<PromoteOutcome> {
        let answer = match self.hot.read_batch(reference)? {
            Some(answer) => answer,
            None => return self.drop_reference(reference),
        };

        let archived = match answer {
            HotRange::Data(points) if points.len() as i64 == reference.len() => {
                let batch = Batch::new(reference, points)?;
                let inserted = self.hot.while_current(reference, || match self.cold.insert(&batch) {
                    Ok(()) => Ok(true),
                    Err(TierError::DuplicateBatch(_)) => {
                        tracing::debug!("Batch {} already archived", reference);
                        Ok(false)
                    }
                    Err(e) => Err(e),
                })?;
                match inserted {
                    Some(archived) => archived,
                    None => return self.drop_reference(reference),
                }
            }
            _ if self.cold.contains(reference) => false,
            HotRange::Data(points) => {
                return Err(TierError::Consistency(format!(
                    "Hot tier holds {} of {} datapoints for batch {}",
                    points.len(),
                    reference.len(),
                    reference
                )))
            }
            HotRange::Cold => {
                return Err(TierError::Consistency(format!(
                    "Batch {} is neither in the hot tier nor archived",
                    reference
                )))
            }
        };

        self.hot.heartbeat(reference);
        if self.hot.trim_batch(reference)?.is_none() {
            // deleted after the insert; the delete removes the archived copy
            return self.drop_reference(reference);
        }
        if !self.hot.ack(reference)? {
            tracing::debug!("Batch {} was no longer in processing at ack", reference);
        }

        if archived {
            tracing::debug!("Promoted batch {}", reference);
            Ok(PromoteOutcome::Promoted)
        } else {
            Ok(PromoteOutcome::AlreadyPromoted)
        }
    }

    fn drop_reference(&self, reference: &BatchRef) -> Result<PromoteOutcome> {
        tracing::debug!("Dropping batch {} of a deleted stream", reference);
        self.hot.ack(reference)?;
        Ok(PromoteOutcome::Dropped)
    }

    /// Promote pending references on the calling thread until none is ready.
    ///
    /// Returns how many references were processed. Stops at the first error,
    /// leaving that reference in processing.
    pub fn drain(&self) -> Result<usize> {
        let mut processed = 0;
        while let Some(reference) = self.hot.queue().try_dequeue() {
            if let Err(e) = self.promote_one(&reference) {
                tracing::error!("Promotion of {} failed: {}", reference, e);
                return Err(e);
            }
            processed += 1;
        }
        Ok(processed)
    }

    pub fn hot(&self) -> &Arc<HotCache> {
        &self.hot
    }

    pub fn cold(&self) -> &Arc<dyn ColdStore> {
        &self.cold
    }
}
