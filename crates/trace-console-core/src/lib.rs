//! Core building blocks of the live trace console.
//!
//! This crate provides:
//! - `TraceRecord` - One observed remote invocation
//! - `TraceBuffer` - Ordered, deduplicating record store with live updates
//! - `matches` / `RecordFilter` - Substring and `/regex/flags` filtering
//! - `format_code_light` - Best-effort payload pretty-printing

pub mod buffer;
pub mod format;
pub mod query;
pub mod record;

pub use buffer::{BufferEvent, TraceBuffer};
pub use format::{FormatError, FormatOptions, Lang, format_code_light};
pub use query::{FilterError, FilterExpr, RecordFilter, matches};
pub use record::{CallKind, CallStatus, TraceRecord};
