//! WebSocket handler: bidirectional frame relay for board rooms.
//!
//! DESIGN
//! ======
//! On upgrade, generates a client ID and enters a `select!` loop:
//! - Incoming client frames → parse + dispatch by syscall prefix
//! - Room frames from board peers → forward to client
//!
//! Handler functions validate, call into the room, and return an `Outcome`.
//! The dispatch layer owns what goes back to the sender and membership
//! notices to peers. Mutation notifications are sent by the room under the
//! lock that applied them; a mutation's `Scope` only picks the reply.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `session:connected` with `clientId`
//! 2. `board:join` → snapshot reply, `board:joined` to peers
//! 3. `mutation:<name>` → engine → Outcome (reply / broadcast / both)
//! 4. Close or `board:part` → `board:part` to peers → room cleanup

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::dispatch::{Mutation, Scope};
use crate::frame::{CODE_BAD_REQUEST, CODE_BOARD_UNAVAILABLE, Data, FRAME_KIND, FRAME_MESSAGE, Frame, Status};
use crate::model::BoardId;
use crate::services::room;
use crate::state::AppState;

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. The dispatch layer uses this to
/// decide who receives what; handlers never send frames directly.
enum Outcome {
    /// Nothing back to the sender.
    Silent,
    /// Send done+data to sender only.
    Reply(Data),
    /// Send empty done to sender only.
    Done,
    /// Reply to sender with one payload, notify peers under `syscall`.
    ReplyAndBroadcast { reply: Data, syscall: &'static str, broadcast: Data },
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let client_id = Uuid::new_v4();

    // Per-connection channel for frames pushed by the room.
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(state.config.client_channel_capacity);

    let welcome = Frame::request("session:connected", Data::new()).with_data("clientId", client_id.to_string());
    if send_frame(&mut socket, &welcome).await.is_err() {
        return;
    }

    info!(%client_id, "ws: client connected");

    // Track which board this client has joined.
    let mut current_board: Option<BoardId> = None;

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let replies = process_inbound_text(&state, &mut current_board, client_id, &client_tx, &text).await;
                        for frame in replies {
                            let _ = send_frame(&mut socket, &frame).await;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    if let Some(board_id) = current_board {
        leave_board(&state, &board_id, client_id).await;
    }
    info!(%client_id, "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the sender.
///
/// Kept apart from the socket so tests can drive it with plain channels.
async fn process_inbound_text(
    state: &AppState,
    current_board: &mut Option<BoardId>,
    client_id: Uuid,
    client_tx: &mpsc::Sender<Frame>,
    text: &str,
) -> Vec<Frame> {
    let mut req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(%client_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("gateway:error", Data::new()).error(CODE_BAD_REQUEST, format!("invalid json: {e}"));
            return vec![err];
        }
    };

    // The connection, not the payload, decides who sent a frame.
    req.from = Some(client_id.to_string());
    info!(%client_id, id = %req.id, syscall = %req.syscall, "ws: recv frame");

    let result = match req.prefix() {
        "board" => handle_board(state, current_board, client_id, client_tx, &req).await,
        "mutation" => handle_mutation(state, current_board.as_deref(), client_id, &req).await,
        prefix => Err(req.error(CODE_BAD_REQUEST, format!("unknown prefix: {prefix}"))),
    };

    // Apply outcome. The dispatch layer owns all outbound logic.
    let board_id = current_board.as_deref();
    match result {
        Ok(Outcome::Silent) => vec![],
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::Done) => vec![req.done()],
        Ok(Outcome::ReplyAndBroadcast { reply, syscall, broadcast }) => {
            let sender_frame = req.done_with(reply);
            if let Some(bid) = board_id {
                let notif = Frame::request(syscall, broadcast).with_board_id(bid);
                room::broadcast(state, bid, &notif, Some(client_id)).await;
            }
            vec![sender_frame]
        }
        Err(err_frame) => vec![err_frame],
    }
}

// =============================================================================
// BOARD HANDLERS
// =============================================================================

async fn handle_board(
    state: &AppState,
    current_board: &mut Option<BoardId>,
    client_id: Uuid,
    client_tx: &mpsc::Sender<Frame>,
    req: &Frame,
) -> Result<Outcome, Frame> {
    match req.op() {
        "join" => {
            let Some(board_id) = req.board_id.clone().or_else(|| {
                req.data
                    .get("boardId")
                    .and_then(|v| v.as_str())
                    .map(str::to_owned)
            }) else {
                return Err(req.error(CODE_BAD_REQUEST, "boardId required"));
            };

            // Part current board if already joined.
            if let Some(old_board) = current_board.take() {
                leave_board(state, &old_board, client_id).await;
            }

            match room::join_board(state, &board_id, client_id, client_tx.clone()).await {
                Ok(snapshot) => {
                    *current_board = Some(board_id);

                    let mut reply = Data::new();
                    reply.insert("board".into(), serde_json::to_value(&snapshot.board).unwrap_or_default());
                    reply.insert("saveStatus".into(), serde_json::json!(snapshot.save_status.as_str()));
                    reply.insert("clientId".into(), serde_json::json!(client_id));
                    reply.insert("members".into(), serde_json::json!(snapshot.members));

                    let mut broadcast = Data::new();
                    broadcast.insert("clientId".into(), serde_json::json!(client_id));

                    Ok(Outcome::ReplyAndBroadcast { reply, syscall: "board:joined", broadcast })
                }
                Err(e) => Err(req.error_from(e.wire_code(&[]), &e)),
            }
        }
        "part" => {
            if let Some(board_id) = current_board.take() {
                leave_board(state, &board_id, client_id).await;
            }
            Ok(Outcome::Done)
        }
        op => Err(req.error(CODE_BAD_REQUEST, format!("unknown board op: {op}"))),
    }
}

// =============================================================================
// MUTATION HANDLER
// =============================================================================

async fn handle_mutation(
    state: &AppState,
    current_board: Option<&str>,
    client_id: Uuid,
    req: &Frame,
) -> Result<Outcome, Frame> {
    let Some(board_id) = current_board else {
        return Err(req.error(CODE_BOARD_UNAVAILABLE, "must join a board first"));
    };

    let mutation = match Mutation::from_request(req.op(), &req.data) {
        Ok(m) => m,
        Err(e) => return Err(req.error(CODE_BAD_REQUEST, format!("invalid mutation: {e}"))),
    };
    let kinds = mutation.error_kinds();

    // Peers were notified by the room; only the sender's reply is left.
    match room::mutate(state, board_id, client_id, mutation).await {
        Ok(applied) => Ok(match applied.scope {
            Scope::Everyone | Scope::Caller => Outcome::Reply(applied.data),
            Scope::Others => Outcome::Silent,
        }),
        Err(e) => Err(req.error_from(e.wire_code(kinds), &e)),
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Tell peers this client left, then release its room membership.
async fn leave_board(state: &AppState, board_id: &str, client_id: Uuid) {
    // Broadcast before part_board, which may evict the room.
    let part_frame = Frame::request("board:part", Data::new())
        .with_board_id(board_id)
        .with_data("clientId", client_id.to_string());
    room::broadcast(state, board_id, &part_frame, Some(client_id)).await;
    room::part_board(state, board_id, client_id).await;
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if frame.status == Status::Error {
        let code = frame.error_code().unwrap_or_default();
        let kind = frame
            .data
            .get(FRAME_KIND)
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        let message = frame
            .data
            .get(FRAME_MESSAGE)
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        warn!(id = %frame.id, syscall = %frame.syscall, code, kind, message, "ws: send frame status=Error");
    } else {
        info!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
    }
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
