//! reelflow - Message-driven video generation orchestrator
//!
//! Advances a per-video state record through content acquisition, optional
//! translation, speech synthesis, background acquisition, stitching and
//! upload. Each stage is performed by a remote worker reached over a topic
//! queue; the orchestrator only reacts to their results.
//!
//! # Architecture
//!
//! The system is built around a single durable record per video:
//! - Every stage result is merged into the record with an optimistic
//!   version check
//! - Stale and duplicate deliveries are discarded by a terminal/flag guard
//! - The stitch request fires exactly once, when the last prerequisite lands
//! - Failing handlers are retried by redelivery, then dead-lettered and the
//!   video is marked `Error`
//!
//! # Modules
//!
//! - `adapters`: Status notifiers (webhook hub, log)
//! - `bus`: Topic queues and the outbound event bus
//! - `core`: Store, join evaluator, stage handlers, retry policy, consumers
//! - `domain`: Data structures (VideoRecord, VideoPatch, messages)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Fire a job and run the orchestrator
//! reelflow submit job.yaml
//! reelflow serve
//!
//! # Inspect a job's videos
//! reelflow list <job-id>
//! ```

pub mod adapters;
pub mod bus;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use adapters::{LogNotifier, StatusNotifier, WebhookNotifier};
pub use bus::{EventBus, FileBus, TopicQueue};
pub use core::{DeadLetterPolicy, Disposition, Orchestrator, SqliteVideoStore, VideoStore};
pub use domain::{InboundEvent, OutboundMessage, VideoPatch, VideoRecord, VideoStatus};
