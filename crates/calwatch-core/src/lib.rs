//! Core types: reminder offsets, trigger times, reminder payloads, tracing

pub mod offset;
pub mod reminder;
pub mod tracing;

pub use offset::{Offset, OffsetError, trigger_time};
pub use reminder::Reminder;
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
