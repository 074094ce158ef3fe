//! Streaming transport adapter.

pub mod adapter;
pub mod events;

pub use adapter::{StreamAdapter, StreamResult, StreamStep};
pub use events::StreamEvent;
