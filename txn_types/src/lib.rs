//! Data model shared by the transaction dispatcher and the aggregation
//! engine: transactions, digests, partition reservations, and the
//! record-identifier batches the aggregation engine streams over.
//!
//! This crate defines shape only. Wire parsing, storage, clustering, and
//! UDF execution are external collaborators, reached through the traits in
//! `txn_ports`.

pub mod batch;
pub mod digest;
pub mod message;
pub mod origin;
pub mod queue_config;
pub mod reservation;
pub mod result_code;
pub mod transaction;

pub use batch::{RecordId, RecordIdBatch, RecordIdBatchList, SecondaryKey};
pub use digest::{digest20, Digest, DIGEST_SIZE};
pub use message::{MessageClass, MsgField, ProtocolMessageView};
pub use origin::{CallerHandle, InternalUdfOrigin, Origin};
pub use queue_config::{NamespaceQueueLayout, QueueConfigError, QueuePlaneConfig, MAX_TRANSACTION_QUEUES};
pub use reservation::{PartitionReservation, ReservationMode, ReservationView, TreePointers};
pub use result_code::ResultCode;
pub use transaction::{FromFlags, Transaction, TxnTypesError};
