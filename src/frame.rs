//! Frame: the universal message type for board sessions.
//!
//! ARCHITECTURE
//! ============
//! Every exchange between a client and a board room is a Frame. Clients send
//! request frames, the transport dispatches by syscall prefix, and responses
//! flow back as done/error frames. Room broadcasts are plain request frames
//! carrying the mutation's result.
//!
//! DESIGN
//! ======
//! - Flat data: payload is always `Map<String, Value>`.
//! - Responses correlate to requests via `parent_id`.
//! - The transport routes on the `syscall` prefix ("board:", "mutation:")
//!   and leaves `data` to the mutation decoder.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// FIELD CONSTANTS
// =============================================================================

/// Frame data key for error messages.
pub const FRAME_MESSAGE: &str = "message";

/// Frame data key for the integer error code.
pub const FRAME_CODE: &str = "code";

/// Frame data key for the grepable error kind.
pub const FRAME_KIND: &str = "kind";

/// Frame data key for the retryable flag on error frames.
pub const FRAME_RETRYABLE: &str = "retryable";

// =============================================================================
// TRANSPORT ERROR CODES
// =============================================================================
// Codes 0-2 belong to the transport. Operation codes start at 3 and are
// scoped per mutation (see `dispatch::Mutation::error_code`).

/// Unexpected failure, wrapped with its diagnostic detail.
pub const CODE_INTERNAL: u16 = 0;
/// Frame or payload could not be decoded.
pub const CODE_BAD_REQUEST: u16 = 1;
/// No board joined, or the board could not be loaded.
pub const CODE_BOARD_UNAVAILABLE: u16 = 2;

// =============================================================================
// TYPES
// =============================================================================

/// Flat key-value payload. Alias to reduce noise in signatures.
pub type Data = HashMap<String, serde_json::Value>;

/// Lifecycle position of a frame in a request/response exchange.
///
/// Every exchange is `request → done` or `request → error`; broadcasts are
/// unsolicited requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Request,
    Done,
    Error,
}

impl Status {
    /// Terminal statuses end an exchange.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Done | Status::Error)
    }
}

/// The universal message type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub id: Uuid,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    /// Milliseconds since Unix epoch. Set automatically at construction.
    #[serde(default)]
    pub ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board_id: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    pub syscall: String,
    pub status: Status,
    #[serde(default)]
    pub data: Data,
}

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error kind and retryable flag for structured error frames.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

/// Current time as milliseconds since Unix epoch.
fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

impl Frame {
    /// Create a request frame. Entry point for every syscall and broadcast.
    pub fn request(syscall: impl Into<String>, data: Data) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: None,
            ts: now_ms(),
            board_id: None,
            from: None,
            syscall: syscall.into(),
            status: Status::Request,
            data,
        }
    }

    /// Create a done response carrying the result. Terminal.
    #[must_use]
    pub fn done_with(&self, data: Data) -> Self {
        self.reply(Status::Done, data)
    }

    /// Create an empty done response. Terminal.
    #[must_use]
    pub fn done(&self) -> Self {
        self.reply(Status::Done, Data::new())
    }

    /// Create a transport-level error response from a plain string. Terminal.
    #[must_use]
    pub fn error(&self, code: u16, message: impl Into<String>) -> Self {
        let mut data = Data::new();
        data.insert(FRAME_CODE.into(), serde_json::Value::from(code));
        data.insert(FRAME_MESSAGE.into(), serde_json::Value::String(message.into()));
        self.reply(Status::Error, data)
    }

    /// Create a structured error response from a typed error. Terminal.
    #[must_use]
    pub fn error_from(&self, code: u16, err: &(impl ErrorCode + ?Sized)) -> Self {
        let mut data = Data::new();
        data.insert(FRAME_CODE.into(), serde_json::Value::from(code));
        data.insert(FRAME_KIND.into(), serde_json::Value::String(err.error_code().to_string()));
        data.insert(FRAME_MESSAGE.into(), serde_json::Value::String(err.to_string()));
        data.insert(FRAME_RETRYABLE.into(), serde_json::Value::Bool(err.retryable()));
        self.reply(Status::Error, data)
    }

    /// Build a reply frame. Inherits `parent_id`, `board_id`, and `syscall`.
    fn reply(&self, status: Status, data: Data) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: Some(self.id),
            ts: now_ms(),
            board_id: self.board_id.clone(),
            from: None,
            syscall: self.syscall.clone(),
            status,
            data,
        }
    }
}

// =============================================================================
// BUILDERS
// =============================================================================

impl Frame {
    #[must_use]
    pub fn with_board_id(mut self, board_id: impl Into<String>) -> Self {
        self.board_id = Some(board_id.into());
        self
    }

    #[must_use]
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

// =============================================================================
// ROUTING
// =============================================================================

impl Frame {
    /// Extract the syscall prefix (everything before the first ':').
    #[must_use]
    pub fn prefix(&self) -> &str {
        let Some((prefix, _)) = self.syscall.split_once(':') else {
            return &self.syscall;
        };
        prefix
    }

    /// Extract the operation (everything after the first ':').
    #[must_use]
    pub fn op(&self) -> &str {
        self.syscall.split_once(':').map_or("", |(_, op)| op)
    }

    /// Integer error code of an error frame.
    #[must_use]
    pub fn error_code(&self) -> Option<u64> {
        self.data.get(FRAME_CODE).and_then(serde_json::Value::as_u64)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_sets_fields() {
        let frame = Frame::request("board:join", Data::new());
        assert_eq!(frame.syscall, "board:join");
        assert_eq!(frame.status, Status::Request);
        assert!(frame.parent_id.is_none());
        assert!(frame.board_id.is_none());
        assert!(frame.ts > 0);
    }

    #[test]
    fn reply_inherits_context() {
        let req = Frame::request("mutation:createBlock", Data::new()).with_board_id("plan");
        let done = req.done_with(Data::new());

        assert_eq!(done.parent_id, Some(req.id));
        assert_eq!(done.board_id.as_deref(), Some("plan"));
        assert_eq!(done.syscall, "mutation:createBlock");
        assert_eq!(done.status, Status::Done);
    }

    #[test]
    fn terminal_statuses() {
        assert!(Status::Done.is_terminal());
        assert!(Status::Error.is_terminal());
        assert!(!Status::Request.is_terminal());
    }

    #[test]
    fn prefix_and_op_extraction() {
        let frame = Frame::request("mutation:deleteBlocks", Data::new());
        assert_eq!(frame.prefix(), "mutation");
        assert_eq!(frame.op(), "deleteBlocks");

        let frame = Frame::request("noseparator", Data::new());
        assert_eq!(frame.prefix(), "noseparator");
        assert_eq!(frame.op(), "");
    }

    #[test]
    fn json_round_trip() {
        let original = Frame::request("board:join", Data::new())
            .with_board_id("roadmap")
            .with_from("client-1")
            .with_data("key", "value");

        let json = serde_json::to_string(&original).expect("serialize");
        let restored: Frame = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(restored.id, original.id);
        assert_eq!(restored.board_id.as_deref(), Some("roadmap"));
        assert_eq!(restored.syscall, "board:join");
        assert_eq!(restored.from.as_deref(), Some("client-1"));
        assert_eq!(restored.data.get("key").and_then(|v| v.as_str()), Some("value"));
    }

    #[test]
    fn minimal_client_frame_parses() {
        let raw = format!(r#"{{"id":"{}","syscall":"board:join","status":"request"}}"#, Uuid::new_v4());
        let frame: Frame = serde_json::from_str(&raw).expect("parse");
        assert!(frame.data.is_empty());
        assert!(frame.board_id.is_none());
    }

    #[test]
    fn error_from_typed() {
        #[derive(Debug, thiserror::Error)]
        #[error("block not found: b1")]
        struct Missing;

        impl ErrorCode for Missing {
            fn error_code(&self) -> &'static str {
                "E_NOT_FOUND"
            }
        }

        let req = Frame::request("mutation:setBlockContent", Data::new());
        let err = req.error_from(3, &Missing);

        assert_eq!(err.status, Status::Error);
        assert_eq!(err.error_code(), Some(3));
        assert_eq!(err.data.get("kind").and_then(|v| v.as_str()), Some("E_NOT_FOUND"));
        assert_eq!(err.data.get("message").and_then(|v| v.as_str()), Some("block not found: b1"));
        assert_eq!(err.data.get("retryable").and_then(serde_json::Value::as_bool), Some(false));
    }

    #[test]
    fn transport_error_carries_code() {
        let req = Frame::request("mutation:bogus", Data::new());
        let err = req.error(CODE_BAD_REQUEST, "unknown mutation");
        assert_eq!(err.error_code(), Some(u64::from(CODE_BAD_REQUEST)));
        assert_eq!(err.parent_id, Some(req.id));
    }
}
