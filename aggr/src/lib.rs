//! The streaming aggregation engine: walks a record-identifier batch list
//! under partition reservations and per-record locks, filters survivors
//! through the caller's pre-check, and drives a scripting runtime over the
//! result (spec.md §4.3).

pub mod cursor;
pub mod engine;
pub mod stream;

pub use cursor::AggregationCursor;
pub use engine::aggregate;
pub use stream::{CursorInputStream, HookOutputStream, TracingAggrLog};
