//! Input/output stream adapters the scripting runtime drives, and the
//! log-only "aerospike" facade (spec.md §4.3 "Scripting runtime
//! integration").

use async_trait::async_trait;
use observability_deps::tracing::{debug, error, info, trace, warn};
use txn_ports::{AggrHooks, AggrInputStream, AggrLog, AggrOutputStream, AggrValue, RecordHandle, StreamStatus};

use crate::cursor::AggregationCursor;

/// The input-stream side of one `aggregate` call: pulls digests off the
/// cursor, opens and filters them, and yields the survivors (spec.md §4.3
/// "Input stream `read()` policy").
pub struct CursorInputStream<'a, 'c, R: RecordHandle> {
    cursor: &'c mut AggregationCursor<'a, R>,
}

impl<'a, 'c, R: RecordHandle> CursorInputStream<'a, 'c, R> {
    /// Wrap `cursor` for the duration of one scripting-runtime call.
    pub fn new(cursor: &'c mut AggregationCursor<'a, R>) -> Self {
        Self { cursor }
    }
}

#[async_trait]
impl<'a, 'c, R: RecordHandle> AggrInputStream for CursorInputStream<'a, 'c, R> {
    async fn read(&mut self) -> Result<Option<AggrValue>, StreamStatus> {
        // "Close any currently open record" (spec.md §4.3).
        self.cursor.close();

        loop {
            let id = match self.cursor.next_id() {
                Some(id) => id,
                None => return Err(StreamStatus::End),
            };
            let digest = id.digest;

            if !self.cursor.open(id).await {
                continue;
            }
            if !self.cursor.pre_check(id) {
                self.cursor.close();
                continue;
            }

            return Ok(Some(AggrValue(digest.as_bytes().to_vec())));
        }
    }
}

/// The output-stream side: forwards every value to the caller's hook
/// vector (spec.md §4.3 "Output stream `write(value)` policy").
pub struct HookOutputStream {
    hooks: std::sync::Arc<dyn AggrHooks>,
}

impl HookOutputStream {
    /// Wrap `hooks` for the duration of one scripting-runtime call.
    pub fn new(hooks: std::sync::Arc<dyn AggrHooks>) -> Self {
        Self { hooks }
    }
}

impl AggrOutputStream for HookOutputStream {
    fn write(&mut self, value: AggrValue) -> StreamStatus {
        self.hooks.output_write(value)
    }
}

/// The "aerospike" facade: only `log` is implemented, routing to the
/// embedder's tracing subscriber at the runtime-supplied level (spec.md
/// §4.3).
pub struct TracingAggrLog;

impl AggrLog for TracingAggrLog {
    fn log(&self, level: u32, message: &str) {
        match level {
            0 => error!(%message, "aggregation runtime log"),
            1 => warn!(%message, "aggregation runtime log"),
            2 => info!(%message, "aggregation runtime log"),
            3 => debug!(%message, "aggregation runtime log"),
            _ => trace!(%message, "aggregation runtime log"),
        }
    }
}
