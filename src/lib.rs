//! # seglog
//!
//! An embedded key-value store built on a segmented append-only log:
//! - One in-memory hash index per segment
//! - Size-triggered segment rotation
//! - Background compaction of sealed segments
//! - Crash recovery by log replay
//! - Single-writer/multi-reader concurrency model
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Engine                               │
//! │            (Single Writer / Multi Reader)                    │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │   Active    │          │  Segment    │
//!   │  Segment    │          │  Manager    │
//!   │  (Append)   │          │  (RwLock)   │
//!   └─────────────┘          └──────┬──────┘
//!                                   │
//!                     ┌─────────────┼─────────────┐
//!                     ▼             ▼             ▼
//!               ┌──────────┐  ┌──────────┐  ┌──────────┐
//!               │ Segment  │  │ Segment  │  │Compactor │
//!               │ (sealed) │  │ (active) │  │ (thread) │
//!               └──────────┘  └──────────┘  └──────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod record;
pub mod storage;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{SeglogError, Result};
pub use config::{Config, SyncStrategy};
pub use engine::Engine;
pub use record::Record;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of seglog
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
