//! Background sync worker
//!
//! Forces dirty shard files to disk on a fixed interval until stopped.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Sender};
use tracing::{debug, error};

use crate::error::Result;
use crate::shard::Shard;

pub(crate) struct SyncWorker {
    /// Dropping the sender wakes the thread and ends it
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl SyncWorker {
    pub(crate) fn spawn(shards: Arc<[Shard]>, interval: Duration) -> Result<Self> {
        let (shutdown, shutdown_rx) = channel::bounded::<()>(0);
        let ticker = channel::tick(interval);

        let handle = thread::Builder::new()
            .name("sniperkv-sync".to_string())
            .spawn(move || {
                debug!(?interval, "sync worker started");
                loop {
                    crossbeam::select! {
                        recv(ticker) -> _ => sync_all(&shards),
                        recv(shutdown_rx) -> _ => break,
                    }
                }
                debug!("sync worker stopped");
            })?;

        Ok(Self {
            shutdown: Some(shutdown),
            handle: Some(handle),
        })
    }

    /// Stop the thread and wait for it; idempotent
    pub(crate) fn stop(&mut self) {
        drop(self.shutdown.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("sync worker panicked");
            }
        }
    }
}

impl Drop for SyncWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn sync_all(shards: &[Shard]) {
    for shard in shards {
        if let Err(e) = shard.sync() {
            error!(
                shard = shard.id(),
                path = ?shard.path(),
                error = %e,
                "background sync failed"
            );
        }
    }
}
