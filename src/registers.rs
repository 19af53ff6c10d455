/*!
    structs and consts for the registers in a device's physical memory. This should be used instead of any hardcoded register value.

    The goal of this file is to gather all physical memory registers at one place, so what you see here is exactly what you can expect in a device, no more, no less.
*/

#![allow(non_upper_case_globals)]

use core::fmt;
use bilge::prelude::*;
use crate::data::{self, Field};

pub mod address {
    use super::*;

    /// configured station address, 0 while unset
    pub const fixed: Field<u16> = Field::simple(0x0010);
    /// station alias, non-volatile and survives power cycles
    pub const alias: Field<u16> = Field::simple(0x0012);
}

/// AL (Application Layer) registers control the communication state of a device
pub mod al {
    use super::*;

    pub const control: Field<AlControlRequest> = Field::simple(0x0120);
    pub const status: Field<AlStatusResponse> = Field::simple(0x0130);
    /// code detailing the fault flagged in [status], see [AlError]
    pub const error: Field<u16> = Field::simple(0x0134);
}

/// process-data interface configuration, mapping a device into the logical memory
pub mod pdi {
    use super::*;

    pub const config: Field<PdiConfig> = Field::simple(0x0600);
}

/// identification block, read during discovery
pub const identity: Field<DeviceIdentity> = Field::simple(0x0e00);
/// human readable device description, zero-padded ASCII
pub const description: Field<[u8; 32]> = Field::simple(0x0e10);


/// state change request written to [al::control]
#[bitsize(8)]
#[derive(FromBits, DebugBits, Copy, Clone, Eq, PartialEq, Default)]
pub struct AlControlRequest {
    /// requested state of communication
    pub state: AlMixedState,
    /// if true, a pending fault flag is acknowledged and cleared
    pub ack: bool,
    reserved: u3,
}
data::bilge_wiredata!(AlControlRequest, u8);

/// state report read from [al::status]
#[bitsize(8)]
#[derive(FromBits, DebugBits, Copy, Clone, Eq, PartialEq, Default)]
pub struct AlStatusResponse {
    /// current state of communication
    pub state: AlMixedState,
    /// orthogonal fault flag, the code is in [al::error]
    pub fault: bool,
    reserved: u3,
}
data::bilge_wiredata!(AlStatusResponse, u8);

/**
    the current operation state of one device

    This is the enum version, useful when communicating with one device only.
    Forward transitions walk the sequence in order, backward transitions are
    accepted in one hop.
*/
#[bitsize(4)]
#[derive(TryFromBits, Debug, Copy, Clone, Eq, PartialEq)]
pub enum AlState {
    /// boot state, communication registers can be set
    Init = 1,
    /// configuration state, process-data mapping is set up here
    PreOperational = 2,
    /// inputs are exchanged and valid, outputs are ignored by the device
    SafeOperational = 4,
    /// full cyclic operation, outputs are applied
    Operational = 8,
}
impl AlState {
    /// the ordered transition sequence
    pub const SEQUENCE: [AlState; 4] = [
        AlState::Init,
        AlState::PreOperational,
        AlState::SafeOperational,
        AlState::Operational,
        ];

    /// index of the state in the forward transition sequence
    pub fn rank(self) -> usize {
        match self {
            AlState::Init => 0,
            AlState::PreOperational => 1,
            AlState::SafeOperational => 2,
            AlState::Operational => 3,
        }
    }
}

/**
    gather the current operation states of several devices

    This is the bitfield version, useful when communicating with multiple
    devices at once (broadcast commands): every bit pattern is valid so it can
    be decoded from the wire without failing.
*/
#[bitsize(4)]
#[derive(FromBits, DebugBits, Copy, Clone, Eq, PartialEq, Default)]
pub struct AlMixedState {
    /// one device at least is in [AlState::Init]
    pub init: bool,
    /// one device at least is in [AlState::PreOperational]
    pub pre_operational: bool,
    /// one device at least is in [AlState::SafeOperational]
    pub safe_operational: bool,
    /// one device at least is in [AlState::Operational]
    pub operational: bool,
}

impl fmt::Display for AlMixedState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "AlMixedState{{")?;
        for (active, mark) in [
                (self.init(), "init"),
                (self.pre_operational(), "pre"),
                (self.safe_operational(), "safe"),
                (self.operational(), "op"),
                ] {
            write!(f, " ")?;
            if active {
                write!(f, "{}", mark)?;
            } else {
                for _ in 0 .. mark.len() {write!(f, " ")?;}
            }
        }
        write!(f, "}}")?;
        Ok(())
    }
}

impl TryFrom<AlMixedState> for AlState {
    type Error = &'static str;
    fn try_from(state: AlMixedState) -> Result<Self, Self::Error> {
        Self::try_from(u4::from(state)).map_err(|_| "device reports a mixed state")
    }
}
impl From<AlState> for AlMixedState {
    fn from(state: AlState) -> Self {
        Self::from(u4::from(state))
    }
}

/// fault codes reported in [al::error]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AlError {
    NoError,
    Unspecified,
    /// the requested transition skips a state or is otherwise illegal
    InvalidStateRequest,
    /// the request does not name a defined state
    UnknownStateRequest,
    InvalidOutputConfig,
    InvalidInputConfig,
    WatchdogExpired,
    /// device or vendor specific code
    Other(u16),
}

impl From<u16> for AlError {
    fn from(code: u16) -> Self {
        match code {
            0x0000 => AlError::NoError,
            0x0001 => AlError::Unspecified,
            0x0011 => AlError::InvalidStateRequest,
            0x0012 => AlError::UnknownStateRequest,
            0x001d => AlError::InvalidOutputConfig,
            0x001e => AlError::InvalidInputConfig,
            0x001b => AlError::WatchdogExpired,
            other => AlError::Other(other),
        }
    }
}
impl From<AlError> for u16 {
    fn from(code: AlError) -> Self {
        match code {
            AlError::NoError => 0x0000,
            AlError::Unspecified => 0x0001,
            AlError::InvalidStateRequest => 0x0011,
            AlError::UnknownStateRequest => 0x0012,
            AlError::InvalidOutputConfig => 0x001d,
            AlError::InvalidInputConfig => 0x001e,
            AlError::WatchdogExpired => 0x001b,
            AlError::Other(other) => other,
        }
    }
}

impl fmt::Display for AlError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AlError::Other(code) => write!(f, "device specific fault 0x{:04x}", code),
            other => write!(f, "{:?}", other),
        }
    }
}

/// process-data interface: where the device's images live in the logical memory
#[repr(C, packed)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PdiConfig {
    /// byte offset of the device's output image in the logical memory,
    /// the input image follows right after it
    pub logical_start: u32,
    pub output_len: u16,
    pub input_len: u16,
    /// exchange enabled when non-zero
    pub enable: u8,
}
data::packed_wiredata!(PdiConfig);

/// identification block of a device
#[repr(C, packed)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DeviceIdentity {
    pub vendor: u32,
    pub product: u32,
    pub revision: u32,
    pub serial: u32,
}
data::packed_wiredata!(DeviceIdentity);


#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::WireData;

    #[test]
    fn al_state_conversions() {
        for state in AlState::SEQUENCE {
            assert_eq!(AlState::try_from(AlMixedState::from(state)), Ok(state));
        }
        let mut mixed = AlMixedState::default();
        mixed.set_init(true);
        mixed.set_operational(true);
        assert!(AlState::try_from(mixed).is_err());
    }

    #[test]
    fn identity_packs_flat() {
        let ident = DeviceIdentity {vendor: 0x1d, product: 0x0201, revision: 1, serial: 42};
        let mut raw = [0u8; 16];
        ident.pack(&mut raw).unwrap();
        assert_eq!(&raw[.. 4], &0x1du32.to_le_bytes());
        assert_eq!(DeviceIdentity::unpack(&raw).unwrap(), ident);
    }
}
