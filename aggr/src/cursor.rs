//! The streaming aggregation cursor: walks a batch-of-batches of record
//! identifiers, opening and filtering each one under a partition
//! reservation (spec.md §4.3 "Streaming cursor state").

use std::sync::Arc;

use txn_ports::{AggrHooks, RecordHandle};
use txn_types::{PartitionReservation, RecordId, RecordIdBatch, RecordIdBatchList, ReservationView};

/// Cursor state for one `aggregate` call (spec.md §4.3). Generic over the
/// record-handle implementation so `open`/`close` stay zero-cost over
/// whatever cloak type the embedder's storage engine returns.
pub struct AggregationCursor<'a, R: RecordHandle> {
    namespace: String,
    n_partitions: u16,
    outer: std::slice::Iter<'a, RecordIdBatch>,
    current_batch: Option<&'a RecordIdBatch>,
    offset_in_batch: usize,
    record_open: bool,
    active_reservation: Option<PartitionReservation>,
    active_reservation_view: Option<ReservationView>,
    open_ref: Option<R::Ref>,
    hooks: Arc<dyn AggrHooks>,
    records: Arc<R>,
}

impl<'a, R: RecordHandle> AggregationCursor<'a, R> {
    /// Construct a cursor over `record_id_list`, with no batch loaded and
    /// no record open (spec.md §4.3 "Initial: no batch loaded, no record
    /// open").
    pub fn new(
        namespace: impl Into<String>,
        n_partitions: u16,
        record_id_list: &'a RecordIdBatchList,
        hooks: Arc<dyn AggrHooks>,
        records: Arc<R>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            n_partitions,
            outer: record_id_list.iter(),
            current_batch: None,
            offset_in_batch: 0,
            record_open: false,
            active_reservation: None,
            active_reservation_view: None,
            open_ref: None,
            hooks,
            records,
        }
    }

    /// Is a record currently open?
    pub fn record_open(&self) -> bool {
        self.record_open
    }

    /// Advance to the next record identifier, per spec.md §4.3
    /// `next_id()`'s policy. Returns `None` at end-of-stream.
    pub fn next_id(&mut self) -> Option<&'a RecordId> {
        loop {
            if self.current_batch.is_none() {
                self.current_batch = Some(self.outer.next()?);
                self.offset_in_batch = 0;
            }
            let batch = self.current_batch.expect("just set above");
            if self.offset_in_batch == batch.len() {
                self.current_batch = Some(self.outer.next()?);
                self.offset_in_batch = 0;
                continue;
            }
            let id = batch.get(self.offset_in_batch).expect("offset in range");
            self.offset_in_batch += 1;
            return Some(id);
        }
    }

    /// Open the record identified by `id`, per spec.md §4.3 `open(digest)`.
    /// On any failure the cursor is left closed (no reservation, no open
    /// record).
    pub async fn open(&mut self, id: &RecordId) -> bool {
        let partition_id = id.digest.partition_id(self.n_partitions);

        let reservation = match self.hooks.reserve_partition(&self.namespace, partition_id).await {
            Some(r) => r,
            None => return false,
        };
        let view = reservation.view();

        match self.records.open(&reservation, &id.digest).await {
            Some(r) => {
                self.active_reservation_view = Some(view);
                self.active_reservation = Some(reservation);
                self.open_ref = Some(r);
                self.record_open = true;
                true
            }
            None => {
                self.hooks.release_partition(&reservation);
                false
            }
        }
    }

    /// Close the currently open record, if any. Idempotent (spec.md §4.3
    /// "Idempotent").
    pub fn close(&mut self) {
        if !self.record_open {
            return;
        }
        if let Some(r) = self.open_ref.take() {
            self.records.close(r);
        }
        if let Some(reservation) = self.active_reservation.take() {
            self.hooks.release_partition(&reservation);
        }
        self.active_reservation_view = None;
        self.record_open = false;
    }

    /// The reservation view backing the currently open record, if any.
    pub fn active_reservation(&self) -> Option<&ReservationView> {
        self.active_reservation_view.as_ref()
    }

    /// Apply the caller's pre-filter to `id` (spec.md §4.3 `pre_check`).
    pub fn pre_check(&self, id: &RecordId) -> bool {
        self.hooks.pre_check(&id.digest, &id.secondary_key.0)
    }

    /// Release the outer iterator and close any open record (spec.md §4.3
    /// "Termination"). Consumes the cursor so the common path doesn't
    /// depend on `Drop` ordering.
    pub fn finish(mut self) {
        self.close();
    }
}

impl<'a, R: RecordHandle> Drop for AggregationCursor<'a, R> {
    /// Backstop for a scripting-runtime call that panics mid-stream: the
    /// cursor still closes any open record rather than leaking a lock
    /// (spec.md §9 "acleanup").
    fn drop(&mut self) {
        self.close();
    }
}
