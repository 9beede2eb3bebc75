//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor and
//! handed to the in-process transport directly. It holds the configuration,
//! the board store, and a map of resident boards. Each resident board owns
//! its engine and the outbound channels of the clients in its room.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::config::Config;
use crate::frame::Frame;
use crate::model::{BoardId, BoardTemplate};
use crate::services::engine::BoardEngine;
use crate::services::store::BoardStore;

// =============================================================================
// BOARD STATE
// =============================================================================

/// Per-board live state. Resident while any client is in the room.
pub struct BoardState {
    pub engine: BoardEngine,
    /// Room members: `client_id` -> sender for outgoing frames.
    pub clients: HashMap<Uuid, mpsc::Sender<Frame>>,
}

impl BoardState {
    #[must_use]
    pub fn new(engine: BoardEngine) -> Self {
        Self { engine, clients: HashMap::new() }
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state. Clone is cheap: every field is Arc-backed.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: BoardStore,
    /// Taxonomy seeded into boards that do not exist yet.
    pub template: Arc<BoardTemplate>,
    pub boards: Arc<RwLock<HashMap<BoardId, BoardState>>>,
}

impl AppState {
    #[must_use]
    pub fn new(config: Config, template: BoardTemplate) -> Self {
        let store = BoardStore::new(&config.data_dir);
        Self {
            config: Arc::new(config),
            store,
            template: Arc::new(template),
            boards: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
