//! Lease sweeper
//!
//! Requeues in-flight references whose worker stopped heartbeating.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver};

use crate::error::Result;
use crate::hot::HotCache;

pub(super) fn spawn(
    hot: Arc<HotCache>,
    lease_timeout: Duration,
    interval: Duration,
    stop: Receiver<()>,
) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("lease-sweeper".to_string())
        .spawn(move || {
            let ticker = channel::tick(interval);
            loop {
                crossbeam::select! {
                    recv(ticker) -> _ => {
                        let requeued = hot.requeue_stale(lease_timeout);
                        if requeued > 0 {
                            tracing::info!("Lease sweeper requeued {} references", requeued);
                        }
                    }
                    recv(stop) -> _ => break,
                }
            }
        })?;
    Ok(handle)
}
