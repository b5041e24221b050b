// vim: tw=80
//! Translation of engine errors into block-operation status
//!
//! Done exactly once, where a monitor tick hands its result back to the
//! scheduler.

use serde_derive::{Deserialize, Serialize};

use crate::types::*;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum BlockStatus {
    Success,
    IoFailed,
    RequestAborted,
    Timeout,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum BlockQualifier {
    None,
    RetryPossible,
    RetryNotPossible,
    ClientAborted,
    UnexpectedError,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PacketStatus {
    pub status: BlockStatus,
    pub qualifier: BlockQualifier,
}

impl PacketStatus {
    pub const SUCCESS: PacketStatus = PacketStatus {
        status: BlockStatus::Success,
        qualifier: BlockQualifier::None
    };

    pub fn is_success(&self) -> bool {
        self.status == BlockStatus::Success
    }
}

impl From<Error> for PacketStatus {
    fn from(e: Error) -> Self {
        let (status, qualifier) = match e {
            Error::EAGAIN | Error::EBUSY | Error::EIO | Error::ENXIO |
                Error::EINPROGRESS =>
                (BlockStatus::IoFailed, BlockQualifier::RetryPossible),
            Error::ECANCELED =>
                (BlockStatus::RequestAborted, BlockQualifier::ClientAborted),
            Error::ENODEV | Error::EPERM | Error::ETOOMANYDEAD |
                Error::EINTEGRITY =>
                (BlockStatus::IoFailed, BlockQualifier::RetryNotPossible),
            Error::ETIMEDOUT =>
                (BlockStatus::Timeout, BlockQualifier::RetryPossible),
            _ =>
                (BlockStatus::IoFailed, BlockQualifier::UnexpectedError),
        };
        PacketStatus { status, qualifier }
    }
}

impl<T> From<&Result<T>> for PacketStatus {
    fn from(r: &Result<T>) -> Self {
        match r {
            Ok(_) => PacketStatus::SUCCESS,
            Err(e) => (*e).into()
        }
    }
}

// LCOV_EXCL_STOP
