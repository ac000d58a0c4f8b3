//! The transaction: the unit of work the dispatcher routes end to end.

use std::sync::Arc;

use snafu::Snafu;
use time::Time;

use crate::digest::Digest;
use crate::message::ProtocolMessageView;
use crate::origin::{CallerHandle, Origin};
use crate::reservation::ReservationView;
use crate::result_code::ResultCode;

bitflags::bitflags! {
    /// Flags carried on the wire alongside a transaction, interpreted
    /// selectively per spec.md §3 "Transaction" ("only `SHIPPED_OP` is
    /// interpreted by the dispatcher; other bits are opaque pass-through").
    #[derive(Default)]
    pub struct FromFlags: u32 {
        /// This transaction originated as a migrate/shipped-op duplicate
        /// resolution write (spec.md §4.1 step 4, reservation-mode
        /// selection).
        const SHIPPED_OP = 1 << 0;
        /// Reserved pass-through bit, not interpreted here.
        const RESERVED_1 = 1 << 1;
        /// Reserved pass-through bit, not interpreted here.
        const RESERVED_2 = 1 << 2;
    }
}

/// Errors constructing a [`Transaction`] (spec.md §9: "a mismatched
/// (origin, handle) pair must be rejected at construction").
#[derive(Debug, Snafu)]
pub enum TxnTypesError {
    /// The caller handle's shape didn't match the declared origin.
    #[snafu(display("caller handle {handle:?} does not match origin {origin:?}"))]
    OriginHandleMismatch {
        /// The declared origin.
        origin: Origin,
        /// The handle that didn't match it.
        handle: CallerHandle,
    },
}

/// The unit of work flowing through the dispatcher and, for multi-record
/// classes, the aggregation engine (spec.md §3 "Transaction").
#[derive(Debug)]
pub struct Transaction {
    /// Where this transaction came from.
    pub origin: Origin,
    /// The caller-supplied handle, already validated against `origin`.
    pub caller: CallerHandle,
    /// The parsed protocol message view. Shared because proxied and
    /// batch-sub transactions may reference a parent message's fields.
    pub msg: Arc<dyn ProtocolMessageView>,
    /// Wall-clock time the transaction entered the dispatcher.
    pub start_time: Time,
    /// Deadline; `None` until computed during dispatch.
    pub end_time: Option<Time>,
    /// The record's digest, once computed or read off the wire.
    pub digest: Option<Digest>,
    /// This transaction's partition reservation slot, populated during
    /// dispatch (spec.md §4.1 step 7) and cleared on release.
    pub reservation: Option<ReservationView>,
    /// Pass-through and dispatcher-interpreted flags.
    pub from_flags: FromFlags,
    /// Benchmark start timestamp: stamped at transaction creation, read by
    /// the queue plane's queue-wait histogram at the pop-to-dispatch point,
    /// then re-stamped on every non-restart dispatch (spec.md §9
    /// "benchmark_time").
    pub benchmark_time: Option<Time>,
    /// Terminal result code, set once the transaction reaches a reply
    /// point.
    pub result_code: Option<ResultCode>,
    /// Set when this transaction is a re-enqueue of one that previously
    /// returned `Waiting` (spec.md §4.1 "edge-case policies"). Re-queued
    /// transactions keep their original `start_time` and skip queue-wait
    /// histogram recording.
    pub is_restart: bool,
}

impl Transaction {
    /// Construct a transaction, rejecting a caller handle whose shape
    /// doesn't match `origin` (spec.md §9).
    pub fn new(
        origin: Origin,
        caller: CallerHandle,
        msg: Arc<dyn ProtocolMessageView>,
        start_time: Time,
    ) -> Result<Self, TxnTypesError> {
        if !caller.matches(origin) {
            return OriginHandleMismatchSnafu {
                origin,
                handle: caller,
            }
            .fail();
        }
        Ok(Self {
            origin,
            caller,
            msg,
            start_time,
            end_time: None,
            digest: None,
            reservation: None,
            from_flags: FromFlags::empty(),
            benchmark_time: Some(start_time),
            result_code: None,
            is_restart: false,
        })
    }

    /// Is this a shipped-op (migrate duplicate-resolution) write (spec.md
    /// §4.1 step 4)?
    pub fn is_shipped_op(&self) -> bool {
        self.from_flags.contains(FromFlags::SHIPPED_OP)
    }

    /// Reset `benchmark_time` for a fresh pass through the dispatcher,
    /// unless this is a re-queue of an already-started transaction
    /// (spec.md §9).
    pub fn maybe_restart_benchmark(&mut self, now: Time) {
        if !self.is_restart {
            self.benchmark_time = Some(now);
        }
    }
}
