//! The parsed protocol message view the dispatcher consumes.
//!
//! Wire parsing itself is out of scope (spec.md §1): this module defines
//! only the shape the dispatcher needs, as a trait a protocol layer
//! implements. `txn_types` never parses bytes.

use std::fmt::Debug;

use crate::digest::Digest;

/// Field types the dispatcher looks up in the message's keyed field table
/// (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgField {
    /// The namespace field. Required on every transaction.
    Namespace,
    /// The explicit 20-byte digest field, when the client supplies one.
    DigestRipe,
    /// The record key, used to compute the digest when absent.
    Key,
    /// The set name, used together with `Key` to compute the digest.
    Set,
}

/// How a transaction classifies, per spec.md §4.1 step 6. The protocol
/// layer (out of scope here) determines this from the message's opcode
/// and fields; the dispatcher only branches on the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageClass {
    /// Legacy direct batch request.
    BatchDirect,
    /// Secondary-index query, optionally UDF-bearing.
    Query { udf: bool },
    /// Full scan, optionally UDF-bearing.
    Scan { udf: bool },
    /// Plain read.
    Read,
    /// Plain write.
    Write,
    /// Delete (a specialization of write).
    Delete,
    /// UDF (a specialization of write).
    Udf,
    /// A per-record slice of a modern client-batch request; already
    /// carries its own digest.
    BatchSub,
}

impl MessageClass {
    /// Is this one of the multi-record classes (spec.md §4.1 step 6)?
    pub fn is_multi_record(&self) -> bool {
        matches!(
            self,
            MessageClass::BatchDirect | MessageClass::Query { .. } | MessageClass::Scan { .. }
        )
    }
}

/// The parsed view of a protocol message (spec.md §6).
///
/// Implemented by the protocol layer; the dispatcher consumes it read-only.
pub trait ProtocolMessageView: Debug + Send + Sync {
    /// Is this message internal XDR replication traffic (spec.md §4.1 step 1)?
    fn is_internal_xdr(&self) -> bool;

    /// `msg.info1 & READ`.
    fn info1_read(&self) -> bool;

    /// `msg.info2 & WRITE`.
    fn info2_write(&self) -> bool;

    /// `msg.transaction_ttl`, in milliseconds; `0` means unset.
    fn transaction_ttl_ms(&self) -> u32;

    /// Look up a keyed field. Returns `None` if the field is absent.
    fn field(&self, field: MsgField) -> Option<&[u8]>;

    /// The message's classification (spec.md §4.1 step 6).
    fn classification(&self) -> MessageClass;

    /// The digest field, if the digest-length check already passed.
    /// `batch-sub` transactions always return `Some` here (spec.md §6).
    fn digest(&self) -> Option<Digest>;
}
