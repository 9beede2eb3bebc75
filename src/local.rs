//! In-process transport: call-and-respond access to a board.
//!
//! DESIGN
//! ======
//! A desktop host embedding the server talks to boards through a
//! `LocalSession` instead of a socket. The session joins the room like any
//! other member, so networked peers see its mutations and it sees theirs.
//! Calls return the mutation result directly to the caller; peers receive
//! the same `mutation:<name>` notification a websocket member would send.
//!
//! ERROR HANDLING
//! ==============
//! Failures come back as `CallError`, carrying the same integer code a
//! websocket error frame would. Nothing is broadcast for a failed call.

use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::dispatch::Mutation;
use crate::frame::{CODE_BAD_REQUEST, Data, Frame};
use crate::model::BoardId;
use crate::services::room::{self, JoinSnapshot, RoomError};
use crate::state::AppState;

/// A failed local call.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("invalid mutation: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("{error}")]
    Room { code: u16, error: RoomError },
}

impl CallError {
    /// Integer code, identical to the websocket error frame's `code`.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            Self::Decode(_) => CODE_BAD_REQUEST,
            Self::Room { code, .. } => *code,
        }
    }
}

/// One in-process member of a board room.
pub struct LocalSession {
    state: AppState,
    board_id: BoardId,
    client_id: Uuid,
    rx: mpsc::Receiver<Frame>,
}

impl LocalSession {
    /// Join `board_id`, loading it if needed.
    ///
    /// # Errors
    ///
    /// Propagates the room's join error (bad id or unreadable document).
    pub async fn open(state: &AppState, board_id: &str) -> Result<(Self, JoinSnapshot), RoomError> {
        let client_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(state.config.client_channel_capacity);
        let snapshot = room::join_board(state, board_id, client_id, tx).await?;

        let joined = Frame::request("board:joined", Data::new())
            .with_board_id(board_id)
            .with_data("clientId", client_id.to_string());
        room::broadcast(state, board_id, &joined, Some(client_id)).await;
        info!(%board_id, %client_id, "local: session opened");

        let session = Self { state: state.clone(), board_id: board_id.to_owned(), client_id, rx };
        Ok((session, snapshot))
    }

    #[must_use]
    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    #[must_use]
    pub fn board_id(&self) -> &str {
        &self.board_id
    }

    /// Decode and apply a mutation given by name and payload.
    ///
    /// # Errors
    ///
    /// `Decode` for unknown names or malformed payloads, otherwise as `call`.
    pub async fn request(&self, name: &str, payload: &Data) -> Result<Data, CallError> {
        let mutation = Mutation::from_request(name, payload)?;
        self.call(mutation).await
    }

    /// Apply a mutation and return its result. The room notifies peers
    /// unless the mutation is a read.
    ///
    /// # Errors
    ///
    /// `Room` with the operation's error code when the mutation is rejected.
    pub async fn call(&self, mutation: Mutation) -> Result<Data, CallError> {
        let name = mutation.name();
        let kinds = mutation.error_kinds();
        let applied = match room::mutate(&self.state, &self.board_id, self.client_id, mutation).await {
            Ok(applied) => applied,
            Err(error) => {
                let code = error.wire_code(kinds);
                warn!(board_id = %self.board_id, client_id = %self.client_id, code, error = %error, "local: {name} rejected");
                return Err(CallError::Room { code, error });
            }
        };
        Ok(applied.data)
    }

    /// Next frame pushed by the room: peer mutations, membership, save status.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Leave the room. The board is saved and evicted if this was the last
    /// member.
    pub async fn close(self) {
        let part = Frame::request("board:part", Data::new())
            .with_board_id(self.board_id.clone())
            .with_data("clientId", self.client_id.to_string());
        room::broadcast(&self.state, &self.board_id, &part, Some(self.client_id)).await;
        room::part_board(&self.state, &self.board_id, self.client_id).await;
        info!(board_id = %self.board_id, client_id = %self.client_id, "local: session closed");
    }
}

#[cfg(test)]
#[path = "local_test.rs"]
mod tests;
