//! Promotion worker threads
//!
//! Workers block on the batch queue. Backend failures are retried on the
//! same reference with exponential backoff; anything else is logged and the
//! reference is left in processing for the lease sweeper to resurface.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use crate::config::Config;
use crate::error::{Result, TierError};
use crate::hot::BatchRef;

use super::sweeper;
use super::Promoter;

/// Retry settings for one worker
#[derive(Debug, Clone, Copy)]
struct Backoff {
    initial: Duration,
    max: Duration,
}

/// Running pipeline threads
///
/// Dropping the handle shuts the pipeline down.
pub struct PipelineHandle {
    promoter: Promoter,
    /// Dropped to signal shutdown
    stop: Option<Sender<()>>,
    workers: Vec<JoinHandle<()>>,
    sweeper: Option<JoinHandle<()>>,
}

impl PipelineHandle {
    /// Start `pipeline_workers` workers and the lease sweeper.
    ///
    /// References left in processing by an earlier run are requeued first.
    pub fn start(promoter: Promoter, config: &Config) -> Result<Self> {
        let hot = promoter.hot();
        hot.queue().reopen();
        let requeued = hot.queue().requeue_all_processing();
        if requeued > 0 {
            tracing::info!("Requeued {} references left in processing", requeued);
        }

        let (stop_tx, stop_rx) = channel::bounded::<()>(0);
        let backoff = Backoff {
            initial: config.retry_backoff,
            max: config.max_backoff,
        };

        let mut handle = Self {
            promoter: promoter.clone(),
            stop: Some(stop_tx),
            workers: Vec::new(),
            sweeper: None,
        };

        for id in 0..config.pipeline_workers.max(1) {
            let promoter = promoter.clone();
            let stop = stop_rx.clone();
            let worker = thread::Builder::new()
                .name(format!("promoter-{}", id))
                .spawn(move || run_worker(id, promoter, stop, backoff))?;
            handle.workers.push(worker);
        }

        handle.sweeper = Some(sweeper::spawn(
            std::sync::Arc::clone(hot),
            config.lease_timeout,
            config.lease_sweep_interval,
            stop_rx,
        )?);

        tracing::info!(
            "Promotion pipeline started with {} workers on {}",
            handle.workers.len(),
            hot.queue().pending_name()
        );
        Ok(handle)
    }

    pub fn promoter(&self) -> &Promoter {
        &self.promoter
    }

    pub fn is_running(&self) -> bool {
        self.stop.is_some()
    }

    /// Stop and join every pipeline thread. Idempotent.
    pub fn shutdown(&mut self) {
        let stop = match self.stop.take() {
            Some(stop) => stop,
            None => return,
        };
        drop(stop);
        self.promoter.hot().shutdown();

        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!("Promotion worker panicked");
            }
        }
        if let Some(sweeper) = self.sweeper.take() {
            if sweeper.join().is_err() {
                tracing::error!("Lease sweeper panicked");
            }
        }
        tracing::info!("Promotion pipeline stopped");
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(id: usize, promoter: Promoter, stop: Receiver<()>, backoff: Backoff) {
    tracing::debug!("Promoter {} started", id);
    while let Some(reference) = promoter.hot().dequeue(None) {
        if let Err(TierError::ShuttingDown) = promote_with_retry(&promoter, &reference, &stop, backoff) {
            tracing::debug!("Promoter {} stopped while retrying {}", id, reference);
            break;
        }
    }
    tracing::debug!("Promoter {} exiting", id);
}

/// `ShuttingDown` if shutdown was requested while backing off. Other
/// errors are logged and returned.
fn promote_with_retry(
    promoter: &Promoter,
    reference: &BatchRef,
    stop: &Receiver<()>,
    backoff: Backoff,
) -> Result<()> {
    let mut delay = backoff.initial;
    loop {
        match promoter.promote_one(reference) {
            Ok(_) => return Ok(()),
            Err(e) if e.is_retryable() => {
                tracing::warn!("Promotion of {} failed, retrying in {:?}: {}", reference, delay, e);
                match stop.recv_timeout(delay) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => return Err(TierError::ShuttingDown),
                }
                promoter.hot().heartbeat(reference);
                delay = (delay * 2).min(backoff.max);
            }
            Err(e) => {
                tracing::error!("Promotion of {} failed: {}", reference, e);
                return Err(e);
            }
        }
    }
}
