//! Storage Module
//!
//! Segmented append-only log with one hash index per segment.
//!
//! ## Responsibilities
//! - Persist records to append-only segment files
//! - O(1) key → offset lookups through per-segment indexes
//! - Rebuild indexes by replaying segment files on startup
//! - Background compaction of sealed segments
//!
//! ## Directory Layout
//! ```text
//! {data_dir}/
//! ├── segment_000003.log      (merged output of segments 0..=3)
//! ├── segment_000004.log      (sealed)
//! └── segment_000005.log      (active, takes appends)
//! ```
//!
//! Segment ids only grow. Replay order is id order, so a newer id always
//! shadows an older one.

mod compaction;
mod manager;
mod recovery;
mod segment;

pub use compaction::{compact, CompactionStats, Compactor};
pub use manager::{SegmentList, SegmentManager};
pub use recovery::{replay, RecoveryResult, REPLAY_BUFFER_SIZE};
pub use segment::Segment;
