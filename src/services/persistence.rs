//! Persistence service: debounced board saves.
//!
//! DESIGN
//! ======
//! Every accepted mutation calls `SaveScheduler::schedule`, which marks the
//! board dirty and (re)starts a fixed-delay timer. A burst of edits therefore
//! produces one write after the burst settles. The timer holds no copy of
//! the board: when it fires it asks its `SnapshotSource` for the current
//! state, so a burst costs one snapshot, not one per mutation.
//!
//! The timer is an owned task handle: resetting aborts the previous task,
//! and dropping the scheduler aborts whatever is still pending. Once a timed
//! write has started it runs to completion on its own task. Every write
//! carries the generation it was taken at and passes through a per-board
//! gate; a write older than the last one that landed is skipped, so the
//! document on disk only moves forward.
//!
//! Callers that need durability now use `flush`, or `begin_flush` to take
//! the snapshot under their lock and run the write after releasing it.
//!
//! Save status is published on a `watch` channel: `Dirty` synchronously at
//! schedule time, `Clean` once the write for the latest schedule lands.
//!
//! ERROR HANDLING
//! ==============
//! A failed timed write is logged and leaves the status `Dirty`; the next
//! mutation or an explicit flush retries. Nothing here retries on its own.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::model::{Board, BoardId};
use crate::services::store::{BoardStore, StoreError};

/// Board state fetched when a timer fires. `None` skips the write.
pub type SnapshotFuture = Pin<Box<dyn Future<Output = Option<Board>> + Send>>;

/// Produces the current board on demand.
pub type SnapshotSource = Arc<dyn Fn() -> SnapshotFuture + Send + Sync>;

/// Whether the in-memory board matches what is on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveStatus {
    Clean,
    Dirty,
}

impl SaveStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Dirty => "dirty",
        }
    }
}

/// Owned debounce timer for one board.
pub struct SaveScheduler {
    board_id: BoardId,
    store: BoardStore,
    delay: Duration,
    source: SnapshotSource,
    pending: Option<JoinHandle<()>>,
    /// Bumped on every schedule/flush; a write only reports `Clean` if
    /// nothing newer was scheduled while it ran.
    generation: Arc<AtomicU64>,
    /// One write at a time per board.
    gate: Arc<Mutex<()>>,
    /// Generation of the last write that reached the store.
    written: Arc<AtomicU64>,
    status: watch::Sender<SaveStatus>,
}

/// A snapshot taken for writing, detached from any lock.
pub struct PendingSave {
    board_id: BoardId,
    store: BoardStore,
    board: Board,
    generation: u64,
    counter: Arc<AtomicU64>,
    gate: Arc<Mutex<()>>,
    written: Arc<AtomicU64>,
    status: watch::Sender<SaveStatus>,
}

impl PendingSave {
    /// Write the snapshot, then report `Clean` unless a newer schedule
    /// arrived meanwhile.
    ///
    /// # Errors
    ///
    /// Returns the store error; the status stays `Dirty` in that case.
    pub async fn write(self) -> Result<(), StoreError> {
        let _gate = self.gate.lock().await;
        if self.written.load(Ordering::SeqCst) >= self.generation {
            debug!(board_id = %self.board_id, generation = self.generation, "newer save already written; skipped");
            return Ok(());
        }
        self.store.save(&self.board_id, &self.board).await?;
        self.written.store(self.generation, Ordering::SeqCst);
        self.status.send_if_modified(|current| {
            // EDGE: a newer schedule owns the status now.
            if self.counter.load(Ordering::SeqCst) != self.generation || *current == SaveStatus::Clean {
                return false;
            }
            *current = SaveStatus::Clean;
            true
        });
        Ok(())
    }
}

impl SaveScheduler {
    #[must_use]
    pub fn new(board_id: impl Into<BoardId>, store: BoardStore, delay: Duration, source: SnapshotSource) -> Self {
        let (status, _) = watch::channel(SaveStatus::Clean);
        Self {
            board_id: board_id.into(),
            store,
            delay,
            source,
            pending: None,
            generation: Arc::new(AtomicU64::new(0)),
            gate: Arc::new(Mutex::new(())),
            written: Arc::new(AtomicU64::new(0)),
            status,
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SaveStatus> {
        self.status.subscribe()
    }

    #[must_use]
    pub fn status(&self) -> SaveStatus {
        *self.status.borrow()
    }

    /// True while a timed write has not yet completed.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Mark dirty and restart the timer.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn schedule(&mut self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.status.send_replace(SaveStatus::Dirty);
        self.cancel();

        let source = Arc::clone(&self.source);
        let delay = self.delay;
        let template = self.pending_save(Board::default(), generation);

        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(board) = source().await else {
                return;
            };
            let board_id = template.board_id.clone();
            let save = PendingSave { board, ..template };
            // Detached: aborting the timer must not cut a started write short.
            let write = tokio::spawn(async move {
                match save.write().await {
                    Ok(()) => debug!(%board_id, "debounced save flushed"),
                    Err(e) => error!(error = %e, %board_id, "debounced save failed; board stays dirty"),
                }
            });
            let _ = write.await;
        }));
    }

    /// Cancel the timer and snapshot `board` if anything is unsaved. The
    /// returned save can be written after the caller drops its locks.
    pub fn begin_flush(&mut self, board: &Board) -> Option<PendingSave> {
        self.cancel();
        if self.status() == SaveStatus::Clean {
            return None;
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        Some(self.pending_save(board.clone(), generation))
    }

    /// Cancel the timer and write `board` now if anything is unsaved.
    ///
    /// # Errors
    ///
    /// Returns the store error; the status stays `Dirty` in that case.
    pub async fn flush(&mut self, board: &Board) -> Result<(), StoreError> {
        let Some(save) = self.begin_flush(board) else {
            return Ok(());
        };
        save.write().await?;
        debug!(board_id = %self.board_id, "board flushed");
        Ok(())
    }

    fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    fn pending_save(&self, board: Board, generation: u64) -> PendingSave {
        PendingSave {
            board_id: self.board_id.clone(),
            store: self.store.clone(),
            board,
            generation,
            counter: Arc::clone(&self.generation),
            gate: Arc::clone(&self.gate),
            written: Arc::clone(&self.written),
            status: self.status.clone(),
        }
    }
}

impl Drop for SaveScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
#[path = "persistence_test.rs"]
mod tests;
