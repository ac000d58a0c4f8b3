//! Port traits for every external collaborator the dispatcher and
//! aggregation engine depend on: reservation gateway, record handle, proxy
//! fabric, security, the single- and multi-record executors, the XDR
//! replication handler, and the scripting runtime.
//!
//! Nothing in `tsvc` or `aggr` depends on a concrete implementation of any
//! of these; they depend only on the traits here.

use async_trait::async_trait;
use txn_types::{Digest, PartitionReservation, ReservationMode, ResultCode, Transaction};

/// Why a reservation attempt failed to land on the local node.
#[derive(Debug, Clone, Copy)]
pub struct ReservationFailure {
    /// The node that should be proxied to instead.
    pub dest_node: u64,
    /// The cluster epoch token in effect when the gateway answered.
    pub cluster_key: u64,
}

/// The partition reservation gateway (spec.md §2, §6).
#[async_trait]
pub trait ReservationGateway: Send + Sync {
    /// Reserve `(namespace, partition_id)` for reads.
    async fn reserve_read(
        &self,
        namespace: &str,
        partition_id: u16,
    ) -> Result<PartitionReservation, ReservationFailure>;

    /// Reserve `(namespace, partition_id)` for writes.
    async fn reserve_write(
        &self,
        namespace: &str,
        partition_id: u16,
    ) -> Result<PartitionReservation, ReservationFailure>;

    /// Reserve `(namespace, partition_id)` for a shipped migrate op.
    /// Infallible in normal operation (spec.md §6).
    async fn reserve_migrate(&self, namespace: &str, partition_id: u16) -> PartitionReservation;

    /// Release a previously acquired reservation.
    fn release(&self, reservation: &PartitionReservation, mode: ReservationMode);
}

/// A per-record cloak: `open`/`close` plus field access (spec.md §2).
///
/// `open` acquires a per-record lock; `close` releases it. Implementations
/// may block on lock contention (spec.md §5).
#[async_trait]
pub trait RecordHandle: Send + Sync {
    /// Opaque record reference returned by a successful open.
    type Ref: Send;

    /// Open the record identified by `digest` under `reservation`.
    async fn open(
        &self,
        reservation: &PartitionReservation,
        digest: &Digest,
    ) -> Option<Self::Ref>;

    /// Close a previously opened record. Idempotent at the call site: the
    /// caller must only call this once per successful `open`.
    fn close(&self, record: Self::Ref);
}

/// Forwards a request to a peer node when the local reservation attempt
/// fails (spec.md §4.1 step 11).
#[async_trait]
pub trait ProxyFabric: Send + Sync {
    /// Forward `tr` to `dest_node`, stamped with `cluster_key`. Returns
    /// without awaiting a reply. On success the fabric takes ownership of
    /// `tr` (it is not returned); on failure `tr` is handed back so the
    /// caller can still decide how to finish the transaction.
    async fn divert(&self, dest_node: u64, cluster_key: u64, tr: Transaction) -> Result<(), Transaction>;

    /// Return a proxied request to its original sender (peer-proxy
    /// origin). Always consumes `tr`.
    async fn return_to_sender(&self, tr: Transaction);
}

/// Invokes the caller's callback for an internal-UDF-origin transaction
/// (spec.md §4.1 step 11, §7 "always invoke their callback exactly once
/// on any terminal path").
#[async_trait]
pub trait InternalUdfCallback: Send + Sync {
    /// Invoke the callback identified by `udata` with the transaction's
    /// terminal result.
    async fn complete(&self, udata: u64, code: ResultCode);
}

/// Security/authorization (spec.md §4.1 steps 3, 7, 9).
#[async_trait]
pub trait SecurityCheck: Send + Sync {
    /// `PERM_NONE` connection-level authentication check.
    async fn check_auth(&self, tr: &Transaction) -> Result<(), u32>;

    /// Per-operation data permission check (`PERM_READ`/`PERM_WRITE`/
    /// `PERM_QUERY`/`PERM_SCAN`/`PERM_UDF_QUERY`/`PERM_UDF_SCAN`).
    async fn check_data_op(&self, tr: &Transaction, permission: DataPermission) -> Result<(), u32>;
}

/// The specific data-op permission being checked (spec.md §4.1 step 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataPermission {
    /// Legacy batch-direct read.
    Read,
    /// Secondary-index query.
    Query,
    /// Secondary-index query carrying a UDF.
    UdfQuery,
    /// Full scan.
    Scan,
    /// Full scan carrying a UDF.
    UdfScan,
}

/// Status returned by a single-record executor's `start` (spec.md §2, §6).
///
/// Encodes ownership transfer of both the message buffer and the
/// reservation in one value, per spec.md §9 ("a sum-type return is
/// strongly preferred").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    /// Terminal success; reply already sent. Dispatcher releases the
    /// reservation and frees the message.
    DoneOk,
    /// Terminal failure; reply already sent. Same cleanup as `DoneOk`.
    DoneErr,
    /// The executor owns both the reservation and the message
    /// asynchronously (typically via a request-tracking record).
    /// Dispatcher releases neither.
    InProgress,
    /// The executor retains the message for re-enqueue. Dispatcher
    /// releases the reservation but does not free the message.
    Waiting,
}

/// One of the four single-record execution engines: write, delete, UDF,
/// read (spec.md §2).
///
/// `start` takes ownership of `tr`. For `InProgress`/`Waiting`, the
/// executor retains it (the returned tuple carries `None`); for
/// `DoneOk`/`DoneErr` it is handed back so the dispatcher can release the
/// reservation and drop it.
#[async_trait]
pub trait SingleRecordExecutor: Send + Sync {
    /// Start executing `tr`, already holding its reservation.
    async fn start(&self, tr: Transaction) -> (ExecStatus, Option<Transaction>);
}

/// Did a multi-record executor take ownership of the transaction's message
/// buffer (spec.md §4.1 step 7)?
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiRecordOutcome {
    /// The executor took over; message buffer ownership transferred.
    Taken,
    /// The executor failed to start; the core retains ownership.
    NotTaken,
}

/// Scan, query, and legacy batch-direct engines (spec.md §2).
///
/// `start` takes ownership of `tr`; on `Taken` it is retained by the
/// executor, on `NotTaken` it is handed back for the core to clean up.
#[async_trait]
pub trait MultiRecordExecutor: Send + Sync {
    /// Dispatch `tr` to this engine.
    async fn start(&self, tr: Transaction) -> (MultiRecordOutcome, Option<Transaction>);
}

/// The XDR replication handler, taken for internal-replication messages
/// before any other dispatch step (spec.md §4.1 step 1).
#[async_trait]
pub trait ReplicationHandler: Send + Sync {
    /// Handle `tr`. The handler owns the message on return.
    async fn handle(&self, tr: Transaction);
}

/// The aggregation hook vector a caller supplies to one `aggregate` call
/// (spec.md §3 "Aggregation Call", §6).
#[async_trait]
pub trait AggrHooks: Send + Sync {
    /// Reserve a partition for `digest`, or fail.
    async fn reserve_partition(
        &self,
        namespace: &str,
        partition_id: u16,
    ) -> Option<PartitionReservation>;

    /// Release a partition previously reserved via `reserve_partition`.
    fn release_partition(&self, reservation: &PartitionReservation);

    /// Record a terminal error code for the call.
    fn set_error(&self, code: u32);

    /// Should this record survive the pre-filter? `secondary_key` is
    /// opaque pass-through data from the record-identifier batch.
    fn pre_check(&self, digest: &Digest, secondary_key: &[u8]) -> bool;

    /// Forward one value written by the scripting runtime to the caller's
    /// sink. Returns the stream status to hand back to the runtime.
    fn output_write(&self, value: AggrValue) -> StreamStatus;
}

/// An opaque value flowing out of the scripting runtime's output stream.
/// Aggregation result shapes are a scripting-runtime concern, out of scope
/// here (spec.md §1) — the engine only forwards bytes.
#[derive(Debug, Clone)]
pub struct AggrValue(pub Vec<u8>);

/// Status of a stream operation, as returned by the scripting runtime or
/// by `AggrHooks::output_write`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// The operation succeeded; keep going.
    Ok,
    /// The stream is exhausted (input) or closed (output).
    End,
    /// A runtime-level error occurred; propagate verbatim (spec.md §7).
    Err(u32),
}

/// The scripting runtime the aggregation engine is strictly reactive to
/// (spec.md §4.3 "Scripting runtime integration").
///
/// The engine presents the runtime with an "aerospike" log facade, an
/// input stream, an output stream, a module+function pair, and an
/// argument list; the runtime pulls and pushes through those two streams
/// and drives the call to completion.
#[async_trait]
pub trait ScriptingRuntime: Send + Sync {
    /// Run `module::function(args)` against the given input/output
    /// streams, routing its log calls through `log`. Returns the runtime's
    /// terminal status, propagated verbatim (spec.md §7 `runtime_error`).
    async fn run(
        &self,
        module: &str,
        function: &str,
        args: &[AggrValue],
        input: &mut dyn AggrInputStream,
        output: &mut dyn AggrOutputStream,
        log: &dyn AggrLog,
    ) -> StreamStatus;
}

/// The input stream side the scripting runtime pulls records from
/// (spec.md §4.3, §9 "small polymorphic interfaces, two methods each").
#[async_trait]
pub trait AggrInputStream: Send {
    /// Pull the next surviving record, or `StreamStatus::End`.
    async fn read(&mut self) -> Result<Option<AggrValue>, StreamStatus>;
}

/// The output stream side the scripting runtime pushes results to.
pub trait AggrOutputStream: Send {
    /// Push one value; delegates to `AggrHooks::output_write`.
    fn write(&mut self, value: AggrValue) -> StreamStatus;
}

/// The "aerospike" facade presented to the scripting runtime. Only `log`
/// is implemented (spec.md §4.3); it routes to the caller's fault/logging
/// system at the requested level.
pub trait AggrLog: Send + Sync {
    /// Log `message` at `level` (an opaque, runtime-defined severity).
    fn log(&self, level: u32, message: &str);
}
