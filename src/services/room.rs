//! Room service: board residency, membership, and fan-out.
//!
//! DESIGN
//! ======
//! A board is resident while its room has members. The first join loads it
//! from the store (or seeds it from the template) and spawns a forwarder
//! that pushes save-status changes to the room as `board:saveStatus`. When
//! the last member leaves, the board is saved and evicted.
//!
//! Mutations go through `mutate`, which takes the map's write lock for one
//! engine call and the fan-out of its notification. That lock serializes
//! mutations on a board, and peers receive notifications in apply order.
//! It is never held across store I/O: saves snapshot under the lock and
//! write after releasing it.
//!
//! ERROR HANDLING
//! ==============
//! On last-member part, the board is saved before eviction. If that save
//! fails the board stays resident and dirty, so later edits or the shutdown
//! flush can retry instead of losing data. If a mutation lands or a member
//! joins while the save is in flight, eviction is skipped.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::dispatch::{self, Applied, Mutation, Scope};
use crate::frame::{CODE_BAD_REQUEST, CODE_BOARD_UNAVAILABLE, Data, ErrorCode, Frame};
use crate::model::{Board, BoardId};
use crate::services::engine::{BoardEngine, EngineError};
use crate::services::persistence::{PendingSave, SaveScheduler, SaveStatus, SnapshotFuture, SnapshotSource};
use crate::services::store::{StoreError, is_valid_board_id};
use crate::state::{AppState, BoardState};

/// Syscall pushed to members when the board's save status changes.
pub const SAVE_STATUS_SYSCALL: &str = "board:saveStatus";

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("invalid board id: {0:?}")]
    InvalidBoardId(String),
    #[error("board not loaded: {0}")]
    NotLoaded(BoardId),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ErrorCode for RoomError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidBoardId(_) => "E_INVALID_BOARD_ID",
            Self::NotLoaded(_) => "E_BOARD_NOT_LOADED",
            Self::Store(e) => e.error_code(),
            Self::Engine(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.retryable(),
            _ => false,
        }
    }
}

impl RoomError {
    /// Integer wire code. `kinds` are the error kinds of the mutation that
    /// failed; join and part errors pass an empty slice.
    #[must_use]
    pub fn wire_code(&self, kinds: &[&str]) -> u16 {
        match self {
            Self::InvalidBoardId(_) => CODE_BAD_REQUEST,
            Self::NotLoaded(_) | Self::Store(_) => CODE_BOARD_UNAVAILABLE,
            Self::Engine(e) => dispatch::error_code(kinds, e),
        }
    }
}

/// What a joining client receives.
#[derive(Debug, Clone)]
pub struct JoinSnapshot {
    pub board: Board,
    pub save_status: SaveStatus,
    pub members: usize,
}

// =============================================================================
// JOIN / PART
// =============================================================================

/// Join a board, loading it first if it is not resident.
///
/// # Errors
///
/// Returns `InvalidBoardId` for ids that cannot name a file, or the store
/// error if the board document cannot be read.
pub async fn join_board(
    state: &AppState,
    board_id: &str,
    client_id: Uuid,
    tx: mpsc::Sender<Frame>,
) -> Result<JoinSnapshot, RoomError> {
    if !is_valid_board_id(board_id) {
        return Err(RoomError::InvalidBoardId(board_id.to_owned()));
    }

    let mut loaded: Option<Board> = None;
    loop {
        let resident = state.boards.read().await.contains_key(board_id);
        if !resident && loaded.is_none() {
            // Store I/O happens outside the lock.
            loaded = Some(load_or_seed(state, board_id).await?);
        }

        let mut boards = state.boards.write().await;
        if !boards.contains_key(board_id) {
            // EDGE: evicted between the residency check and the write lock.
            let Some(board) = loaded.take() else {
                continue;
            };
            let board_state = BoardState::new(make_engine(state, board_id, board));
            spawn_status_forwarder(state, board_id, &board_state.engine);
            boards.insert(board_id.to_owned(), board_state);
            info!(%board_id, "board resident");
        }

        let Some(board_state) = boards.get_mut(board_id) else {
            continue;
        };
        board_state.clients.insert(client_id, tx);
        let snapshot = JoinSnapshot {
            board: board_state.engine.board().clone(),
            save_status: board_state.engine.save_status(),
            members: board_state.clients.len(),
        };
        info!(%board_id, %client_id, clients = snapshot.members, "client joined board");
        return Ok(snapshot);
    }
}

/// Leave a board. If this was the last member, save and evict.
pub async fn part_board(state: &AppState, board_id: &str, client_id: Uuid) {
    let mut boards = state.boards.write().await;
    let Some(board_state) = boards.get_mut(board_id) else {
        return;
    };

    board_state.clients.remove(&client_id);
    info!(%board_id, %client_id, remaining = board_state.clients.len(), "client left board");
    if !board_state.clients.is_empty() {
        return;
    }

    // PHASE: CLEAN FAST PATH
    if board_state.engine.save_status() == SaveStatus::Clean {
        boards.remove(board_id);
        info!(%board_id, "evicted board from memory");
        return;
    }

    // PHASE: SNAPSHOT, SAVE OUTSIDE THE LOCK
    // begin_flush also cancels the debounce timer.
    let revision = board_state.engine.revision();
    let pending = board_state.engine.begin_flush();
    drop(boards);
    let saved = match pending {
        Some(save) => save.write().await,
        None => Ok(()),
    };

    // PHASE: EVICT ONLY IF NOTHING CHANGED
    let mut boards = state.boards.write().await;
    let Some(board_state) = boards.get(board_id) else {
        return;
    };
    if !board_state.clients.is_empty() {
        return;
    }
    match saved {
        Ok(()) if board_state.engine.revision() == revision => {
            boards.remove(board_id);
            info!(%board_id, "evicted board from memory");
        }
        Ok(()) => {
            warn!(%board_id, "board changed during final save; retained");
        }
        Err(e) => {
            error!(error = %e, %board_id, "final save failed; board retained for retry");
        }
    }
}

// =============================================================================
// MUTATION
// =============================================================================

/// Apply one mutation from `from` to a resident board and notify the other
/// members as its scope requires, all under one write lock.
///
/// # Errors
///
/// `NotLoaded` if the board is not resident; `Engine` for rejected mutations.
/// Nothing is broadcast for a rejected mutation.
pub async fn mutate(state: &AppState, board_id: &str, from: Uuid, mutation: Mutation) -> Result<Applied, RoomError> {
    let name = mutation.name();
    let mut boards = state.boards.write().await;
    let Some(board_state) = boards.get_mut(board_id) else {
        return Err(RoomError::NotLoaded(board_id.to_owned()));
    };
    let applied = dispatch::apply(&mut board_state.engine, mutation)?;
    if applied.scope != Scope::Caller {
        let frame = mutation_frame(board_id, from, name, applied.data.clone());
        fan_out(board_id, board_state, &frame, Some(from));
    }
    Ok(applied)
}

// =============================================================================
// BROADCAST
// =============================================================================

/// Broadcast a frame to all clients in a board, optionally excluding one.
pub async fn broadcast(state: &AppState, board_id: &str, frame: &Frame, exclude: Option<Uuid>) {
    let boards = state.boards.read().await;
    if let Some(board_state) = boards.get(board_id) {
        fan_out(board_id, board_state, frame, exclude);
    }
}

fn fan_out(board_id: &str, board_state: &BoardState, frame: &Frame, exclude: Option<Uuid>) {
    for (client_id, tx) in &board_state.clients {
        if exclude == Some(*client_id) {
            continue;
        }
        // Best-effort: if a client's channel is full, skip it.
        if tx.try_send(frame.clone()).is_err() {
            warn!(%board_id, %client_id, syscall = %frame.syscall, "client channel full or closed; frame dropped");
        }
    }
}

/// Peer notification for an applied mutation.
#[must_use]
pub fn mutation_frame(board_id: &str, from: Uuid, name: &str, data: Data) -> Frame {
    Frame::request(format!("mutation:{name}"), data)
        .with_board_id(board_id)
        .with_from(from.to_string())
}

// =============================================================================
// SHUTDOWN
// =============================================================================

/// Flush every resident board. Returns how many flushes failed.
///
/// Snapshots are taken under the write lock; the writes run after it is
/// released.
pub async fn flush_all(state: &AppState) -> usize {
    let (resident, pending) = {
        let mut boards = state.boards.write().await;
        let pending: Vec<(BoardId, PendingSave)> = boards
            .iter_mut()
            .filter_map(|(board_id, board_state)| Some((board_id.clone(), board_state.engine.begin_flush()?)))
            .collect();
        (boards.len(), pending)
    };

    let mut failures = 0;
    for (board_id, save) in pending {
        if let Err(e) = save.write().await {
            failures += 1;
            error!(error = %e, %board_id, "shutdown flush failed");
        }
    }
    info!(boards = resident, failures, "flushed resident boards");
    failures
}

// =============================================================================
// HELPERS
// =============================================================================

async fn load_or_seed(state: &AppState, board_id: &str) -> Result<Board, RoomError> {
    if let Some(board) = state.store.load(board_id).await? {
        info!(%board_id, blocks = board.blocks.len(), "hydrated board from store");
        return Ok(board);
    }
    info!(%board_id, "new board seeded from template");
    Ok(Board::from_template((*state.template).clone()))
}

pub(crate) fn make_engine(state: &AppState, board_id: &str, board: Board) -> BoardEngine {
    let saver = SaveScheduler::new(
        board_id,
        state.store.clone(),
        state.config.save_debounce,
        snapshot_source(state, board_id),
    );
    BoardEngine::with_saver(board, saver)
}

/// Timer snapshots read the resident board under the read lock. The map is
/// held weakly since it owns the engine that owns this source.
fn snapshot_source(state: &AppState, board_id: &str) -> SnapshotSource {
    let boards = Arc::downgrade(&state.boards);
    let board_id = board_id.to_owned();
    Arc::new(move || -> SnapshotFuture {
        let boards = boards.clone();
        let board_id = board_id.clone();
        Box::pin(async move {
            let boards = boards.upgrade()?;
            let guard = boards.read().await;
            guard.get(&board_id).map(|b| b.engine.board().clone())
        })
    })
}

/// Relay save-status changes to the room until the engine is dropped.
fn spawn_status_forwarder(state: &AppState, board_id: &str, engine: &BoardEngine) {
    let Some(mut rx) = engine.subscribe_save_status() else {
        return;
    };
    let state = state.clone();
    let board_id = board_id.to_owned();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let status = *rx.borrow_and_update();
            let mut data = Data::new();
            data.insert("status".into(), serde_json::json!(status.as_str()));
            let frame = Frame::request(SAVE_STATUS_SYSCALL, data).with_board_id(board_id.clone());
            broadcast(&state, &board_id, &frame, None).await;
        }
    });
}

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;
