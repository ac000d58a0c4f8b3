//! The aggregation engine's entry point (spec.md §4.3 "Entry contract").

use std::sync::Arc;

use txn_ports::{AggrHooks, AggrValue, RecordHandle, ScriptingRuntime, StreamStatus};
use txn_types::RecordIdBatchList;

use crate::cursor::AggregationCursor;
use crate::stream::{CursorInputStream, HookOutputStream, TracingAggrLog};

/// Run one aggregation call: stream `record_id_list` through `records` and
/// `hooks`'s pre-filter, feed survivors to `runtime::module::function`, and
/// forward its output through `hooks.output_write` (spec.md §4.3 "Entry
/// contract").
///
/// Returns the scripting runtime's terminal status unchanged; no partial
/// results are rolled back (spec.md §4.3 "Termination").
pub async fn aggregate<R, Rt>(
    namespace: &str,
    n_partitions: u16,
    record_id_list: &RecordIdBatchList,
    hooks: Arc<dyn AggrHooks>,
    records: Arc<R>,
    runtime: &Rt,
    module: &str,
    function: &str,
    args: &[AggrValue],
) -> StreamStatus
where
    R: RecordHandle,
    Rt: ScriptingRuntime,
{
    let mut cursor = AggregationCursor::new(namespace, n_partitions, record_id_list, hooks.clone(), records);
    let mut input = CursorInputStream::new(&mut cursor);
    let mut output = HookOutputStream::new(hooks.clone());
    let log = TracingAggrLog;

    let status = runtime.run(module, function, args, &mut input, &mut output, &log).await;

    if let StreamStatus::Err(code) = status {
        hooks.set_error(code);
    }

    // Termination: release the outer iterator and close any open record,
    // regardless of how the runtime finished.
    cursor.finish();

    status
}
