//! Conversation identity resolution.

pub mod resolver;

pub use resolver::{
    MigrationOutcome, RejectReason, StagedSubmission, Staging, begin_submission, migrate, rollback,
};
