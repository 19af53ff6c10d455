//! definition of the crate-wide error type

use crate::registers::{AlError, AlState};

/**
    everything that can go wrong while driving the fieldbus

    The variants follow the layers of the stack: transport ([Self::Io],
    [Self::Timeout], [Self::MalformedFrame]), cyclic exchange ([Self::LostFrame],
    [Self::LinkDown]), state machine ([Self::TransitionTimeout],
    [Self::NotOperational]), motion ([Self::OutOfRange], [Self::HomingTimeout])
    and plain usage errors ([Self::NotFound], [Self::AlreadyScanned],
    [Self::Master]).
*/
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// error caused by the communication support, exterior to this library
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// structural violation found while parsing a frame, fatal to that round trip
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),

    /// no response within the bound of a blocking call
    #[error("timeout while {0}")]
    Timeout(&'static str),

    /// working-counter mismatch, the command was not seen by the expected number of devices
    #[error("lost frame: {got} devices answered, {expected} expected")]
    LostFrame {expected: u16, got: u16},

    /// too many consecutive lost cycles, the segment is considered unreachable
    #[error("link down after {0} consecutive lost cycles")]
    LinkDown(u32),

    /// a device did not reach the requested state within its deadline, or faulted on the way
    #[error("device {device} failed to reach {state:?} (fault: {fault:?})")]
    TransitionTimeout {device: u16, state: AlState, fault: Option<AlError>},

    /// process-data exchange attempted while a mapped device is not operational
    #[error("process exchange refused: a mapped device is not operational")]
    NotOperational,

    /// motion target outside the configured soft limits
    #[error("target {target} outside soft limits [{min}, {max}]")]
    OutOfRange {target: i32, min: i32, max: i32},

    /// the homed status bit did not raise within the cycle budget
    #[error("homing did not complete within {0} cycles")]
    HomingTimeout(u32),

    /// no device matches the given selection
    #[error("no device matches the selection")]
    NotFound,

    /// a second scan was attempted without resetting the session
    #[error("chain already scanned, reset the session first")]
    AlreadyScanned,

    /// the master structures were misused, the fieldbus itself is fine
    #[error("master: {0}")]
    Master(&'static str),
}

/// convenient alias to simplify return annotations
pub type Result<T = ()> = core::result::Result<T, Error>;

impl From<crate::data::PackingError> for Error {
    fn from(src: crate::data::PackingError) -> Self {
        Error::MalformedFrame(match src {
            crate::data::PackingError::BadSize(_, text) => text,
            crate::data::PackingError::InvalidValue(text) => text,
        })
    }
}
