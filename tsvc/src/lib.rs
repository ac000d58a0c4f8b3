//! The transaction service: classifies, authenticates, reserves, and
//! dispatches transactions, and the queue plane that feeds the
//! dispatcher from a fixed bank of worker tasks.

pub mod dispatch;
pub mod error;
pub mod queue;

pub use dispatch::{
    DispatchConfig, DispatchStats, Dispatcher, MultiRecordExecutors, ProcessOutcome,
    SingleRecordExecutors,
};
pub use error::{programmer_error, ClientError};
pub use queue::QueuePlane;
