//! Reconciliation of optimistic and authoritative messages.

pub mod view;

pub use view::{MergeInput, OptimisticFate, merge_messages, optimistic_fate};
