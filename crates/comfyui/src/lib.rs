//! ComfyUI WebSocket and REST client library.
//!
//! Provides typed message parsing, the event-channel connection,
//! HTTP API wrappers, availability probing, and the completion monitor
//! used to follow a single prompt from submission to its final state.

pub mod api;
pub mod client;
pub mod history;
pub mod messages;
pub mod monitor;
pub mod probe;
