//! Cross-tab synchronisation.

pub mod bus;

pub use bus::{SyncBus, SyncEnvelope, SyncEvent};
