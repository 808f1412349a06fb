//! Typed events crossing the engine boundary.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize`: session events
//! are read from the dialogue transport (or a replay log) and engine events
//! are forwarded to UIs as JSON.

pub mod events;
