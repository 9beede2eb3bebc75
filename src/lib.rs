//! Collaborative block boards: a hierarchical canvas of positioned blocks
//! tagged with typed classifications, served to networked peers over a
//! websocket and to in-process callers through `local::LocalSession`.
//!
//! ARCHITECTURE
//! ============
//! - `model` / `geometry`: the board aggregate and nesting math.
//! - `services`: the engine (single writer per board), durable store,
//!   debounced saves, and rooms.
//! - `dispatch`: decodes named mutations and applies them to an engine.
//! - `routes` and `local`: the two transports over the same rooms.

pub mod config;
pub mod dispatch;
pub mod frame;
pub mod geometry;
pub mod local;
pub mod model;
pub mod routes;
pub mod services;
pub mod state;
