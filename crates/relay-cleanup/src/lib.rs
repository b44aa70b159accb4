//! Scheduled reconciliation of orphaned data: messages without a live
//! conversation, messages of soft-deleted conversations, and tombstones
//! past the retention window. Each phase works conversation-by-
//! conversation; one failure never blocks the rest of the run.

mod engine;

pub use engine::{CleanupEngine, CleanupReport};
