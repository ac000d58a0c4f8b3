//! Dependencies shared by every crate that logs or traces.
//!
//! All observability code should use these types/macros rather than
//! pulling in `tracing` directly, so the whole workspace can be repointed
//! at a different facade in one place.

pub use tracing;
