//! Board services used by both transports.
//!
//! ARCHITECTURE
//! ============
//! `engine` (with `taxonomy` and `paste`) owns board semantics, `store` and
//! `persistence` own durability, and `room` owns residency and fan-out.
//! Transports in `routes` and `local` only translate frames and calls.

pub mod engine;
pub mod paste;
pub mod persistence;
pub mod room;
pub mod store;
pub mod taxonomy;
