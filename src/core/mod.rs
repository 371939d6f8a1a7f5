//! Core orchestration logic.
//!
//! This module contains:
//! - Store: Durable per-video records with optimistic merges
//! - Join: Readiness predicate for the stitch stage
//! - Orchestrator: Stage handlers
//! - Retry: Dead-letter policy around the handlers
//! - Consumer: Per-topic consumer loops
//! - Sweep: Retention and stale-video sweep

pub mod consumer;
pub mod join;
pub mod orchestrator;
pub mod retry;
pub mod store;
pub mod sweep;

// Re-export commonly used types
pub use consumer::{Consumer, ConsumerSettings};
pub use join::{join_fired, ready_to_stitch};
pub use orchestrator::{HandlerOutcome, Orchestrator, OrchestratorError, OrchestratorSettings};
pub use retry::{DeadLetterPolicy, Disposition};
pub use store::{guarded_merge, Guarded, SqliteVideoStore, StoreError, VideoStore};
pub use sweep::{RetentionPolicy, RetentionSweeper, SweepReport};
