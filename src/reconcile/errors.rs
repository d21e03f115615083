use thiserror::Error;

use crate::calendar::UnknownInterval;
use crate::common::structs::TimestampMS;
use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error(transparent)]
    UnknownInterval(#[from] UnknownInterval),
    #[error("invalid window: start {0} is not before end {1}")]
    InvalidWindow(TimestampMS, TimestampMS),
    #[error("store query failed: {0}")]
    Store(#[from] StorageError),
}
