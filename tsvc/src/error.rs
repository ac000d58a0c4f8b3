//! Dispatcher error kinds (spec.md §7).
//!
//! `ClientError` is the only kind that produces a `Result`-returning path
//! through `Dispatcher::process`; it carries the result code to report to
//! the caller. `programmer_error` conditions panic directly at the call
//! site (see [`programmer_error`]) rather than returning a value, matching
//! `cf_crash`'s process-abort semantics — there is no recoverable caller.

use txn_types::ResultCode;

/// A client-visible dispatch failure: reply with `code` and stop.
#[derive(Debug, snafu::Snafu)]
#[snafu(display("client error: {code:?}"))]
pub struct ClientError {
    /// The result code to report back to the caller.
    pub code: ResultCode,
}

impl ClientError {
    /// Construct a client error carrying `code`.
    pub fn new(code: ResultCode) -> Self {
        Self { code }
    }
}

/// Abort the process: a reservation invariant was violated with no
/// recoverable caller (spec.md §7 `programmer_error`). Mirrors `cf_crash`:
/// log at error severity, then panic.
#[track_caller]
pub fn programmer_error(context: &str) -> ! {
    observability_deps::tracing::error!(%context, "programmer error, aborting");
    panic!("programmer error: {context}");
}
