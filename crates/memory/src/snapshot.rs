use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::thread::{self, JoinHandle};

use tracing::{error, info};

/// Asynchronous sink for snapshot artifacts.
///
/// Each `enqueue` spawns a short-lived writer thread so snapshot generation
/// never stalls the memory manager or the driver. Handles are collected and
/// joined at shutdown; nothing is dropped on the floor.
#[derive(Debug)]
pub struct SnapshotWriter {
    dir: PathBuf,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl SnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Queue one snapshot for writing to `<dir>/memory_tick_<n>.txt`.
    pub fn enqueue(&self, tick: u64, contents: String) {
        let path = self.dir.join(format!("memory_tick_{tick}.txt"));
        let dir = self.dir.clone();
        let handle = thread::spawn(move || {
            if let Err(err) = fs::create_dir_all(&dir).and_then(|_| fs::write(&path, contents)) {
                error!(?path, %err, "snapshot write failed");
            }
        });
        self.lock_pending().push(handle);
    }

    /// Wait for every queued write. Returns how many were flushed.
    pub fn flush(&self) -> usize {
        let handles: Vec<_> = self.lock_pending().drain(..).collect();
        let count = handles.len();
        for handle in handles {
            let _ = handle.join();
        }
        if count > 0 {
            info!(count, "memory snapshots saved to disk");
        }
        count
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for SnapshotWriter {
    fn drop(&mut self) {
        self.flush();
    }
}
