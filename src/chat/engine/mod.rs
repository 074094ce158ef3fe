//! Chat controller orchestration module.

pub mod controller;

pub use controller::{ChatController, SendOutcome};
