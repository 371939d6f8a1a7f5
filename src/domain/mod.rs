//! Domain types for the reelflow orchestrator.
//!
//! This module contains the core data structures:
//! - Video: Per-video state record and job settings
//! - Patch: Partial updates merged into a record
//! - Job: Scheduler-delivered job and creation event
//! - Messages: Worker requests and results

pub mod job;
pub mod messages;
pub mod patch;
pub mod video;

// Re-export commonly used types
pub use job::{derive_video_id, CreateVideo, Job};
pub use messages::{topics, Envelope, InboundEvent, MessageError, OutboundMessage};
pub use patch::{InvalidTransition, VideoPatch};
pub use video::{VideoKey, VideoRecord, VideoSettings, VideoStatus};
