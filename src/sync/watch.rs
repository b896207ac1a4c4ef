//! Background watching: filesystem events for notes and skills, a periodic
//! timer for session transcripts.
//!
//! Both sources feed one mpsc channel drained by a single worker task, so
//! index writes stay serialized no matter how bursty the filesystem gets.
//! Worker failures are logged, never propagated; the next event simply
//! tries again.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{MemoryError, Result};
use crate::sync::SyncEngine;

enum WatchEvent {
    /// Filesystem paths touched under the notes or skills directory.
    Paths(Vec<PathBuf>),
    /// Periodic session resync tick.
    SessionTick,
}

struct Running {
    // kept alive for the duration of the watch; dropping it stops events
    _watcher: RecommendedWatcher,
    timer: JoinHandle<()>,
    worker: JoinHandle<()>,
}

/// Owns the watcher, timer, and worker for one engine.
pub struct SyncWatcher {
    engine: Arc<SyncEngine>,
    interval: Duration,
    running: Mutex<Option<Running>>,
}

impl SyncWatcher {
    pub fn new(engine: Arc<SyncEngine>, interval: Duration) -> Self {
        Self {
            engine,
            interval,
            running: Mutex::new(None),
        }
    }

    pub fn is_watching(&self) -> bool {
        self.running.lock().map(|r| r.is_some()).unwrap_or(false)
    }

    /// Start watching. A second call while already watching is a no-op.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<()> {
        let mut slot = self.running.lock().map_err(|_| MemoryError::LockPoisoned)?;
        if slot.is_some() {
            debug!("watch already active");
            return Ok(());
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<WatchEvent>();

        // notify needs existing paths to watch
        std::fs::create_dir_all(self.engine.notes_dir())?;
        std::fs::create_dir_all(self.engine.skills_dir())?;

        let fs_tx = tx.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    if is_relevant(&event.kind) && !event.paths.is_empty() {
                        let _ = fs_tx.send(WatchEvent::Paths(event.paths));
                    }
                }
                Err(e) => warn!(error = %e, "filesystem watch error"),
            }
        })
        .map_err(|e| MemoryError::Watch(format!("watcher setup failed: {e}")))?;
        watcher
            .watch(self.engine.notes_dir(), RecursiveMode::Recursive)
            .map_err(|e| MemoryError::Watch(format!("watch notes dir failed: {e}")))?;
        watcher
            .watch(self.engine.skills_dir(), RecursiveMode::Recursive)
            .map_err(|e| MemoryError::Watch(format!("watch skills dir failed: {e}")))?;

        let interval = self.interval;
        let timer = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // the first tick fires immediately; skip it, full_sync already ran
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if tx.send(WatchEvent::SessionTick).is_err() {
                    break;
                }
            }
        });

        let engine = Arc::clone(&self.engine);
        let worker = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    WatchEvent::Paths(paths) => {
                        for path in paths {
                            if let Err(e) = engine.sync_file(&path).await {
                                warn!(path = %path.display(), error = %e, "watch sync failed");
                            }
                        }
                    }
                    WatchEvent::SessionTick => {
                        match engine.sync_sessions().await {
                            Ok(report) if report.changed() > 0 => {
                                debug!(%report, "session resync");
                            }
                            Ok(_) => {}
                            Err(e) => warn!(error = %e, "session resync failed"),
                        }
                    }
                }
            }
        });

        *slot = Some(Running {
            _watcher: watcher,
            timer,
            worker,
        });
        info!("watch started");
        Ok(())
    }

    /// Stop watching. Safe to call when not watching.
    pub fn stop(&self) {
        let running = match self.running.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => return,
        };
        if let Some(running) = running {
            running.timer.abort();
            // dropping the watcher closes the fs sender; the worker drains
            // what is queued and exits once the timer sender drops too
            drop(running._watcher);
            running.worker.abort();
            info!("watch stopped");
        }
    }
}

impl Drop for SyncWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn is_relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use crate::embedding::local::LocalHashProvider;
    use crate::memory::store::MemoryStore;

    fn watcher() -> (SyncWatcher, tempfile::TempDir) {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut config = MemoryConfig::default();
        config.storage.data_dir = tmp.path().to_string_lossy().into_owned();
        let store =
            Arc::new(MemoryStore::open_in_memory(Arc::new(LocalHashProvider::new(32))).unwrap());
        let engine = Arc::new(SyncEngine::new(store, &config));
        (SyncWatcher::new(engine, Duration::from_secs(3600)), tmp)
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let (w, _tmp) = watcher();
        w.start().unwrap();
        assert!(w.is_watching());
        w.start().unwrap();
        assert!(w.is_watching());
        w.stop();
        assert!(!w.is_watching());
    }

    #[tokio::test]
    async fn stop_without_start_is_a_noop() {
        let (w, _tmp) = watcher();
        w.stop();
        w.stop();
        assert!(!w.is_watching());
    }

    #[tokio::test]
    async fn restart_after_stop_works() {
        let (w, _tmp) = watcher();
        w.start().unwrap();
        w.stop();
        w.start().unwrap();
        assert!(w.is_watching());
        w.stop();
    }

    #[tokio::test]
    async fn created_note_is_picked_up() {
        let (w, _tmp) = watcher();
        w.start().unwrap();

        let path = w.engine.notes_dir().join("live.md");
        tokio::fs::write(&path, "# Live\n\nwritten while watching\n")
            .await
            .unwrap();

        // watch delivery is asynchronous; poll with a deadline
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if w.engine
                .store()
                .get_by_source("note:live.md")
                .unwrap()
                .is_some()
            {
                break;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("watched note never indexed");
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        w.stop();
    }
}
