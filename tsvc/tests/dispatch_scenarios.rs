//! End-to-end dispatcher scenarios against in-memory fakes of every
//! `txn_ports` trait (spec.md §8 "End-to-end scenarios").

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use assert_matches::assert_matches;
use async_trait::async_trait;
use parking_lot::Mutex;
use time::{MockProvider, Time, TimeProvider};
use tsvc::{DispatchConfig, Dispatcher, MultiRecordExecutors, ProcessOutcome, SingleRecordExecutors};
use txn_ports::{
    DataPermission, ExecStatus, InternalUdfCallback, MultiRecordExecutor, MultiRecordOutcome,
    ProxyFabric, ReplicationHandler, ReservationFailure, ReservationGateway, SecurityCheck,
    SingleRecordExecutor,
};
use txn_types::{
    CallerHandle, Digest, InternalUdfOrigin, MessageClass, MsgField, Origin, PartitionReservation,
    ProtocolMessageView, ReservationMode, ResultCode, Transaction, TreePointers,
};

#[derive(Debug)]
struct FakeMsg {
    namespace: Option<&'static str>,
    info1_read: bool,
    info2_write: bool,
    ttl_ms: u32,
    digest: Option<Vec<u8>>,
    class: MessageClass,
    is_xdr: bool,
}

impl FakeMsg {
    fn read(namespace: &'static str) -> Self {
        Self {
            namespace: Some(namespace),
            info1_read: true,
            info2_write: false,
            ttl_ms: 0,
            digest: Some(vec![7u8; 20]),
            class: MessageClass::Read,
            is_xdr: false,
        }
    }

    fn write(namespace: &'static str) -> Self {
        Self {
            namespace: Some(namespace),
            info1_read: false,
            info2_write: true,
            ttl_ms: 0,
            digest: Some(vec![7u8; 20]),
            class: MessageClass::Write,
            is_xdr: false,
        }
    }
}

impl ProtocolMessageView for FakeMsg {
    fn is_internal_xdr(&self) -> bool {
        self.is_xdr
    }
    fn info1_read(&self) -> bool {
        self.info1_read
    }
    fn info2_write(&self) -> bool {
        self.info2_write
    }
    fn transaction_ttl_ms(&self) -> u32 {
        self.ttl_ms
    }
    fn field(&self, field: MsgField) -> Option<&[u8]> {
        match field {
            MsgField::Namespace => self.namespace.map(str::as_bytes),
            MsgField::DigestRipe => self.digest.as_deref(),
            MsgField::Key => Some(b"k"),
            MsgField::Set => Some(b"s"),
        }
    }
    fn classification(&self) -> MessageClass {
        self.class
    }
    fn digest(&self) -> Option<Digest> {
        self.digest.as_deref().and_then(Digest::from_slice)
    }
}

struct AllowAllSecurity;

#[async_trait]
impl SecurityCheck for AllowAllSecurity {
    async fn check_auth(&self, _tr: &Transaction) -> Result<(), u32> {
        Ok(())
    }
    async fn check_data_op(&self, _tr: &Transaction, _permission: DataPermission) -> Result<(), u32> {
        Ok(())
    }
}

/// A reservation gateway whose read/write/migrate behavior is scripted per
/// test via the `Mutex`-guarded plan, and that logs every call so
/// assertions can check call counts.
#[derive(Default)]
struct ScriptedReservations {
    read_n_dupl: Mutex<u32>,
    write_fails: Mutex<bool>,
    read_calls: AtomicUsize,
    write_calls: AtomicUsize,
    release_calls: AtomicUsize,
}

fn reservation(mode: ReservationMode, n_dupl: u32) -> PartitionReservation {
    PartitionReservation::new("ns", 3, mode, 0, 99, TreePointers::default(), n_dupl)
}

#[async_trait]
impl ReservationGateway for ScriptedReservations {
    async fn reserve_read(
        &self,
        _namespace: &str,
        _partition_id: u16,
    ) -> Result<PartitionReservation, ReservationFailure> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        Ok(reservation(ReservationMode::Read, *self.read_n_dupl.lock()))
    }

    async fn reserve_write(
        &self,
        _namespace: &str,
        _partition_id: u16,
    ) -> Result<PartitionReservation, ReservationFailure> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if *self.write_fails.lock() {
            return Err(ReservationFailure {
                dest_node: 77,
                cluster_key: 5,
            });
        }
        Ok(reservation(ReservationMode::Write, 0))
    }

    async fn reserve_migrate(&self, _namespace: &str, _partition_id: u16) -> PartitionReservation {
        reservation(ReservationMode::Migrate, 0)
    }

    fn release(&self, reservation: &PartitionReservation, _mode: ReservationMode) {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        reservation.mark_released();
    }
}

struct RecordingExecutor {
    status: ExecStatus,
    starts: AtomicUsize,
}

impl RecordingExecutor {
    fn done_ok() -> Self {
        Self {
            status: ExecStatus::DoneOk,
            starts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SingleRecordExecutor for RecordingExecutor {
    async fn start(&self, tr: Transaction) -> (ExecStatus, Option<Transaction>) {
        self.starts.fetch_add(1, Ordering::SeqCst);
        match self.status {
            ExecStatus::DoneOk | ExecStatus::DoneErr => (self.status, Some(tr)),
            ExecStatus::InProgress => (self.status, None),
            ExecStatus::Waiting => (self.status, Some(tr)),
        }
    }
}

struct NeverCalledMultiExecutor;

#[async_trait]
impl MultiRecordExecutor for NeverCalledMultiExecutor {
    async fn start(&self, tr: Transaction) -> (MultiRecordOutcome, Option<Transaction>) {
        (MultiRecordOutcome::NotTaken, Some(tr))
    }
}

/// Records the `end_time` of every transaction it's handed and always
/// takes ownership, for asserting on the multi-record deadline computation
/// (spec.md §4.1 step 7).
#[derive(Default)]
struct RecordingMultiExecutor {
    seen_end_time: Mutex<Vec<Option<Time>>>,
}

#[async_trait]
impl MultiRecordExecutor for RecordingMultiExecutor {
    async fn start(&self, tr: Transaction) -> (MultiRecordOutcome, Option<Transaction>) {
        self.seen_end_time.lock().push(tr.end_time);
        (MultiRecordOutcome::Taken, None)
    }
}

#[derive(Default)]
struct RecordingProxy {
    diverted: Mutex<Vec<(u64, u64)>>,
    fail_divert: Mutex<bool>,
    returned_to_sender: AtomicUsize,
}

#[async_trait]
impl ProxyFabric for RecordingProxy {
    async fn divert(&self, dest_node: u64, cluster_key: u64, tr: Transaction) -> Result<(), Transaction> {
        self.diverted.lock().push((dest_node, cluster_key));
        if *self.fail_divert.lock() {
            Err(tr)
        } else {
            Ok(())
        }
    }

    async fn return_to_sender(&self, _tr: Transaction) {
        self.returned_to_sender.fetch_add(1, Ordering::SeqCst);
    }
}

struct NeverCalledReplication;

#[async_trait]
impl ReplicationHandler for NeverCalledReplication {
    async fn handle(&self, _tr: Transaction) {
        panic!("replication handler should not be invoked for a non-XDR transaction");
    }
}

#[derive(Default)]
struct RecordingUdfCallback {
    completions: Mutex<Vec<(u64, ResultCode)>>,
}

#[async_trait]
impl InternalUdfCallback for RecordingUdfCallback {
    async fn complete(&self, udata: u64, code: ResultCode) {
        self.completions.lock().push((udata, code));
    }
}

fn single_executors_all_done_ok() -> SingleRecordExecutors {
    SingleRecordExecutors {
        write: Arc::new(RecordingExecutor::done_ok()),
        delete: Arc::new(RecordingExecutor::done_ok()),
        udf: Arc::new(RecordingExecutor::done_ok()),
        read: Arc::new(RecordingExecutor::done_ok()),
    }
}

fn multi_executors_never_called() -> MultiRecordExecutors {
    MultiRecordExecutors {
        batch_direct: Arc::new(NeverCalledMultiExecutor),
        query: Arc::new(NeverCalledMultiExecutor),
        scan: Arc::new(NeverCalledMultiExecutor),
    }
}

fn client_transaction(msg: FakeMsg) -> Transaction {
    Transaction::new(
        Origin::Client,
        CallerHandle::ClientSocket(1),
        Arc::new(msg),
        Time::from_timestamp_nanos(0),
    )
    .unwrap()
}

struct Harness {
    reservations: Arc<ScriptedReservations>,
    proxy: Arc<RecordingProxy>,
    udf_callback: Arc<RecordingUdfCallback>,
    dispatcher: Dispatcher<MockProvider>,
}

fn build_harness(single: SingleRecordExecutors) -> Harness {
    let reservations = Arc::new(ScriptedReservations::default());
    let proxy = Arc::new(RecordingProxy::default());
    let udf_callback = Arc::new(RecordingUdfCallback::default());
    let dispatcher = Dispatcher::new_with_time_provider(
        DispatchConfig {
            max_ttl_ms: 1_000,
            benchmarking: false,
            cluster_balanced: true,
            n_partitions: 4096,
        },
        MockProvider::new(Time::from_timestamp_nanos(0)),
        Arc::new(AllowAllSecurity),
        Arc::clone(&reservations) as Arc<dyn ReservationGateway>,
        Arc::clone(&proxy) as Arc<dyn ProxyFabric>,
        Arc::new(NeverCalledReplication),
        Arc::clone(&udf_callback) as Arc<dyn InternalUdfCallback>,
        single,
        multi_executors_never_called(),
    );
    Harness {
        reservations,
        proxy,
        udf_callback,
        dispatcher,
    }
}

/// Scenario 1: happy read. One read-start invocation with `DONE_OK`, one
/// release, and the message is freed (no requeue, no ownership transfer).
#[tokio::test]
async fn scenario_1_happy_read() {
    let h = build_harness(single_executors_all_done_ok());
    let tr = client_transaction(FakeMsg::read("ns"));

    let outcome = h.dispatcher.process(tr).await;

    assert_matches!(outcome, ProcessOutcome::Done);
    assert_eq!(h.reservations.read_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.reservations.write_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.reservations.release_calls.load(Ordering::SeqCst), 1);
}

/// Scenario 2: read with duplicates. `n_dupl = 2` on the read reservation
/// upgrades to a write reservation; exactly one release of the read
/// reservation, one write reservation acquired, one read-start invocation,
/// one release, one free.
#[tokio::test]
async fn scenario_2_read_with_duplicates_upgrades_to_write() {
    let single = single_executors_all_done_ok();
    let h = build_harness(single);
    *h.reservations.read_n_dupl.lock() = 2;
    let tr = client_transaction(FakeMsg::read("ns"));

    let outcome = h.dispatcher.process(tr).await;

    assert_matches!(outcome, ProcessOutcome::Done);
    assert_eq!(h.reservations.read_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.reservations.write_calls.load(Ordering::SeqCst), 1);
    // One release for the read reservation, one for the write reservation
    // the executor finishes with.
    assert_eq!(h.reservations.release_calls.load(Ordering::SeqCst), 2);
}

/// Scenario 3: write forwarded via proxy. Local reservation fails with a
/// non-local destination; exactly one `divert` call, and the message buffer
/// is not freed by the core (ownership transferred to the fabric).
#[tokio::test]
async fn scenario_3_write_forwarded_via_proxy() {
    let h = build_harness(single_executors_all_done_ok());
    *h.reservations.write_fails.lock() = true;
    let tr = client_transaction(FakeMsg::write("ns"));

    let outcome = h.dispatcher.process(tr).await;

    assert_matches!(outcome, ProcessOutcome::OwnershipTransferred);
    assert_eq!(h.proxy.diverted.lock().as_slice(), &[(77, 5)]);
}

/// Scenario 3 variant: a `batch` origin transaction must not be freed by
/// the core even when the proxy attempt itself fails to take ownership
/// (spec.md §4.1 step 12 — the message is shared across sibling batch-sub
/// transactions).
#[tokio::test]
async fn batch_origin_reservation_failure_is_never_freed_by_the_core() {
    let h = build_harness(single_executors_all_done_ok());
    *h.reservations.write_fails.lock() = true;
    *h.proxy.fail_divert.lock() = true;

    let tr = Transaction::new(
        Origin::Batch,
        CallerHandle::None,
        Arc::new(FakeMsg::write("ns")),
        Time::from_timestamp_nanos(0),
    )
    .unwrap();

    let outcome = h.dispatcher.process(tr).await;

    assert_matches!(outcome, ProcessOutcome::OwnershipTransferred);
    assert_eq!(h.proxy.diverted.lock().len(), 1);
}

/// Scenario 4: shipped-op sanity check. `from_flags.shipped_op = true` but
/// `info2 = 0` (not a write). Expect one `FAIL_UNKNOWN` reply and no
/// reservation acquired.
#[tokio::test]
async fn scenario_4_shipped_op_without_write_bit_fails() {
    let h = build_harness(single_executors_all_done_ok());
    let mut tr = client_transaction(FakeMsg::read("ns"));
    tr.from_flags |= txn_types::FromFlags::SHIPPED_OP;

    let outcome = h.dispatcher.process(tr).await;

    assert_matches!(outcome, ProcessOutcome::Done);
    assert_eq!(h.reservations.read_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.reservations.write_calls.load(Ordering::SeqCst), 0);
}

/// Boundary: a message lacking a namespace field yields exactly one
/// `FAIL_NAMESPACE` reply and frees the buffer (no executor invoked).
#[tokio::test]
async fn missing_namespace_fails_with_fail_namespace() {
    let single = single_executors_all_done_ok();
    let h = build_harness(single);
    let mut msg = FakeMsg::read("ns");
    msg.namespace = None;
    let tr = client_transaction(msg);

    let outcome = h.dispatcher.process(tr).await;

    assert_matches!(outcome, ProcessOutcome::Done);
    assert_eq!(h.reservations.read_calls.load(Ordering::SeqCst), 0);
}

/// Boundary: a digest field whose length != 20 bytes yields exactly one
/// `FAIL_PARAMETER` reply.
#[tokio::test]
async fn malformed_digest_length_fails_with_fail_parameter() {
    let h = build_harness(single_executors_all_done_ok());
    let mut msg = FakeMsg::read("ns");
    msg.digest = Some(vec![1, 2, 3]);
    let tr = client_transaction(msg);

    let outcome = h.dispatcher.process(tr).await;

    assert_matches!(outcome, ProcessOutcome::Done);
    assert_eq!(h.reservations.read_calls.load(Ordering::SeqCst), 0);
}

/// Boundary: a transaction whose deadline has already passed when checked
/// yields exactly one `FAIL_TIMEOUT` reply, and no reservation is attempted.
#[tokio::test]
async fn expired_deadline_fails_with_fail_timeout() {
    let reservations = Arc::new(ScriptedReservations::default());
    let proxy = Arc::new(RecordingProxy::default());
    let udf_callback = Arc::new(RecordingUdfCallback::default());
    // start_time is epoch 0, max_ttl_ms = 1ms; the clock is already 10ms
    // past epoch when the transaction reaches the dispatcher.
    let dispatcher = Dispatcher::new_with_time_provider(
        DispatchConfig {
            max_ttl_ms: 1,
            benchmarking: false,
            cluster_balanced: true,
            n_partitions: 4096,
        },
        MockProvider::new(Time::from_timestamp_nanos(10_000_000)),
        Arc::new(AllowAllSecurity),
        Arc::clone(&reservations) as Arc<dyn ReservationGateway>,
        Arc::clone(&proxy) as Arc<dyn ProxyFabric>,
        Arc::new(NeverCalledReplication),
        Arc::clone(&udf_callback) as Arc<dyn InternalUdfCallback>,
        single_executors_all_done_ok(),
        multi_executors_never_called(),
    );

    let tr = client_transaction(FakeMsg::read("ns"));

    let outcome = dispatcher.process(tr).await;

    assert_matches!(outcome, ProcessOutcome::Done);
    assert_eq!(reservations.read_calls.load(Ordering::SeqCst), 0);
}

/// The pre-balance readiness gate rejects everything but expiration-origin
/// transactions (spec.md §4.1 step 5).
#[tokio::test]
async fn readiness_gate_rejects_client_before_balance() {
    let reservations = Arc::new(ScriptedReservations::default());
    let proxy = Arc::new(RecordingProxy::default());
    let udf_callback = Arc::new(RecordingUdfCallback::default());
    let dispatcher = Dispatcher::new_with_time_provider(
        DispatchConfig {
            max_ttl_ms: 1_000,
            benchmarking: false,
            cluster_balanced: false,
            n_partitions: 4096,
        },
        MockProvider::new(Time::from_timestamp_nanos(0)),
        Arc::new(AllowAllSecurity),
        Arc::clone(&reservations) as Arc<dyn ReservationGateway>,
        Arc::clone(&proxy) as Arc<dyn ProxyFabric>,
        Arc::new(NeverCalledReplication),
        Arc::clone(&udf_callback) as Arc<dyn InternalUdfCallback>,
        single_executors_all_done_ok(),
        multi_executors_never_called(),
    );

    let tr = client_transaction(FakeMsg::read("ns"));
    let outcome = dispatcher.process(tr).await;

    assert_matches!(outcome, ProcessOutcome::Done);
    assert_eq!(reservations.read_calls.load(Ordering::SeqCst), 0);

    let expiration_tr = Transaction::new(
        Origin::Expiration,
        CallerHandle::None,
        Arc::new(FakeMsg::read("ns")),
        Time::from_timestamp_nanos(0),
    )
    .unwrap();
    let outcome = dispatcher.process(expiration_tr).await;
    assert_matches!(outcome, ProcessOutcome::Done);
    assert_eq!(reservations.read_calls.load(Ordering::SeqCst), 1);
}

/// An internal-UDF-origin transaction that fails authorization must still
/// invoke its callback exactly once (spec.md §7).
#[tokio::test]
async fn internal_udf_reservation_failure_invokes_callback_once() {
    let h = build_harness(single_executors_all_done_ok());
    *h.reservations.write_fails.lock() = true;

    let tr = Transaction::new(
        Origin::InternalUdf,
        CallerHandle::InternalUdf(InternalUdfOrigin { udata: 42 }),
        Arc::new(FakeMsg::write("ns")),
        Time::from_timestamp_nanos(0),
    )
    .unwrap();

    let outcome = h.dispatcher.process(tr).await;

    assert_matches!(outcome, ProcessOutcome::Done);
    let completions = h.udf_callback.completions.lock();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].0, 42);
}

/// spec.md §4.1 step 7: the multi-record path computes `end_time` from the
/// message's TTL when present, with no fallback to `config.max_ttl_ms`.
#[tokio::test]
async fn multi_record_deadline_set_from_message_ttl_no_default() {
    let reservations = Arc::new(ScriptedReservations::default());
    let proxy = Arc::new(RecordingProxy::default());
    let udf_callback = Arc::new(RecordingUdfCallback::default());
    let query_executor = Arc::new(RecordingMultiExecutor::default());
    let dispatcher = Dispatcher::new_with_time_provider(
        DispatchConfig {
            max_ttl_ms: 999_000,
            benchmarking: false,
            cluster_balanced: true,
            n_partitions: 4096,
        },
        MockProvider::new(Time::from_timestamp_nanos(0)),
        Arc::new(AllowAllSecurity),
        Arc::clone(&reservations) as Arc<dyn ReservationGateway>,
        Arc::clone(&proxy) as Arc<dyn ProxyFabric>,
        Arc::new(NeverCalledReplication),
        Arc::clone(&udf_callback) as Arc<dyn InternalUdfCallback>,
        single_executors_all_done_ok(),
        MultiRecordExecutors {
            batch_direct: Arc::new(NeverCalledMultiExecutor),
            query: Arc::clone(&query_executor) as Arc<dyn MultiRecordExecutor>,
            scan: Arc::new(NeverCalledMultiExecutor),
        },
    );

    let msg = FakeMsg {
        namespace: Some("ns"),
        info1_read: true,
        info2_write: false,
        ttl_ms: 50,
        digest: Some(vec![7u8; 20]),
        class: MessageClass::Query { udf: false },
        is_xdr: false,
    };
    let tr = client_transaction(msg);

    let outcome = dispatcher.process(tr).await;

    assert_matches!(outcome, ProcessOutcome::OwnershipTransferred);
    let seen = query_executor.seen_end_time.lock();
    assert_eq!(seen.as_slice(), &[Some(Time::from_timestamp_nanos(50_000_000))]);
}

/// Without a message TTL, the multi-record path leaves `end_time` unset —
/// unlike the single-record path, there is no `config.max_ttl_ms` fallback.
#[tokio::test]
async fn multi_record_deadline_stays_unset_without_message_ttl() {
    let reservations = Arc::new(ScriptedReservations::default());
    let proxy = Arc::new(RecordingProxy::default());
    let udf_callback = Arc::new(RecordingUdfCallback::default());
    let query_executor = Arc::new(RecordingMultiExecutor::default());
    let dispatcher = Dispatcher::new_with_time_provider(
        DispatchConfig {
            max_ttl_ms: 999_000,
            benchmarking: false,
            cluster_balanced: true,
            n_partitions: 4096,
        },
        MockProvider::new(Time::from_timestamp_nanos(0)),
        Arc::new(AllowAllSecurity),
        Arc::clone(&reservations) as Arc<dyn ReservationGateway>,
        Arc::clone(&proxy) as Arc<dyn ProxyFabric>,
        Arc::new(NeverCalledReplication),
        Arc::clone(&udf_callback) as Arc<dyn InternalUdfCallback>,
        single_executors_all_done_ok(),
        MultiRecordExecutors {
            batch_direct: Arc::new(NeverCalledMultiExecutor),
            query: Arc::clone(&query_executor) as Arc<dyn MultiRecordExecutor>,
            scan: Arc::new(NeverCalledMultiExecutor),
        },
    );

    let msg = FakeMsg {
        namespace: Some("ns"),
        info1_read: true,
        info2_write: false,
        ttl_ms: 0,
        digest: Some(vec![7u8; 20]),
        class: MessageClass::Query { udf: false },
        is_xdr: false,
    };
    let tr = client_transaction(msg);

    let outcome = dispatcher.process(tr).await;

    assert_matches!(outcome, ProcessOutcome::OwnershipTransferred);
    let seen = query_executor.seen_end_time.lock();
    assert_eq!(seen.as_slice(), &[None]);
}
