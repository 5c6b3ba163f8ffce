//! Background thread that periodically sweeps the slot pool.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender, bounded};

use super::SlotPool;
use crate::error::Result;

/// Owns the sweeper thread. Stopping (explicitly or on drop) wakes the thread and joins it.
pub struct PoolSweeper {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PoolSweeper {
    pub fn spawn(pool: Arc<SlotPool>, interval: Duration) -> Result<Self> {
        let (stop, stopped) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("annostore-pool-sweeper".into())
            .spawn(move || {
                tracing::debug!(target = "annostore::sweep", ?interval, "pool sweeper started");
                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            pool.sweep();
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!(target = "annostore::sweep", "pool sweeper stopped");
            })?;
        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!(target = "annostore::sweep", "pool sweeper panicked");
            }
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for PoolSweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consistency::ConsistencyPipeline;
    use crate::io::encode_state;
    use crate::layout::Layout;
    use crate::pool::SchemaRegistry;
    use crate::storage::{FsStorage, StorageDriver};
    use crate::types::{AnnotationState, PoolOptions, SchemaFingerprint, Slot, VersionStamp};

    #[test]
    fn sweeper_evicts_stale_entries_and_stops() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let storage = Arc::new(FsStorage::new(Layout::new(dir.path())));
        let schema = Arc::new(SchemaRegistry::new(SchemaFingerprint::of(b"v1")));
        let pool = Arc::new(SlotPool::new(
            storage.clone(),
            Arc::new(ConsistencyPipeline::default()),
            schema.clone(),
            PoolOptions::default(),
        ));
        let slot = Slot::new(1, "alice");
        let bytes = encode_state(
            &AnnotationState::new("text"),
            VersionStamp(1),
            SchemaFingerprint::of(b"v1"),
        )
        .expect("encode");
        storage.write(&slot, &bytes).expect("write");
        pool.acquire(&slot).expect("acquire");
        schema.set_default(SchemaFingerprint::of(b"v2"));

        let mut sweeper =
            PoolSweeper::spawn(pool.clone(), Duration::from_millis(5)).expect("spawn");
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while pool.is_cached(&slot) && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!pool.is_cached(&slot));
        sweeper.stop();
        assert!(!sweeper.is_running());
    }
}
