//! Background poll loop.
//!
//! Every interval the poller pulls each registered chat on a dedicated rayon
//! pool and publishes what changed. Stopping is cooperative: the loop checks
//! its stop channel between cycles and exits without starting a new one.

use crossbeam_channel::{Sender, bounded, select};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, trace};

use crate::engine::SyncEngine;

pub struct Poller;

/// Running poll loop. Dropping the handle stops the loop and waits for it.
pub struct PollerHandle {
    stop: Option<Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl Poller {
    /// Start polling every `interval` with `threads` workers.
    ///
    /// # Errors
    /// Returns an error if the worker pool or the loop thread cannot be created.
    pub fn spawn(
        engine: Arc<SyncEngine>,
        interval: Duration,
        threads: usize,
    ) -> io::Result<PollerHandle> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("gitchat-poll-{i}"))
            .build()
            .map_err(io::Error::other)?;
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let join = thread::Builder::new()
            .name("gitchat-poller".into())
            .spawn(move || {
                info!(interval_ms = interval.as_millis() as u64, threads, "poller started");
                loop {
                    let report = pool.install(|| engine.poll_once());
                    trace!(?report, "poll cycle done");
                    select! {
                        recv(stop_rx) -> _ => break,
                        default(interval) => {}
                    }
                }
                info!("poller stopped");
            })?;

        Ok(PollerHandle {
            stop: Some(stop_tx),
            join: Some(join),
        })
    }
}

impl PollerHandle {
    /// Signal the loop and wait for the running cycle to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.try_send(());
        }
        if let Some(join) = self.join.take()
            && join.join().is_err()
        {
            debug!("poller thread panicked");
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
