//! Record Module
//!
//! The on-disk encoding of a single key/value pair.
//!
//! ## Record Format (little-endian)
//! ```text
//! ┌───────────────┬─────────────┬───────────┬───────────────┬─────────────┐
//! │ TotalLen (4)  │ KeyLen (4)  │    Key    │  ValueLen (4) │    Value    │
//! └───────────────┴─────────────┴───────────┴───────────────┴─────────────┘
//! ```
//!
//! `TotalLen` counts every byte after itself, so a record occupies
//! `4 + TotalLen` bytes in a segment file.

mod codec;

pub use codec::{read_value, Record, HEADER_SIZE, MAX_BODY_SIZE, RECORD_OVERHEAD};
