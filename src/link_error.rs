//! Decodes a kernel CAN error frame's id and data bytes into a structured
//! link-level error, adapted from the teacher's `CANError`/
//! `CANErrorDecodingFailure` (see `linux/can/error.h`).

use std::convert::TryFrom;
use thiserror::Error;

#[derive(Copy, Clone, Debug, Error)]
pub enum LinkError {
    #[error("TX timeout (by netdevice driver)")]
    TransmitTimeout,
    #[error("arbitration lost after bit {0}")]
    LostArbitration(u8),
    #[error("controller problem: {0:?}")]
    ControllerProblem(ControllerProblem),
    #[error("protocol violation: {vtype:?} at {location:?}")]
    ProtocolViolation { vtype: ViolationType, location: Location },
    #[error("transceiver error")]
    TransceiverError,
    #[error("no ACK on bus")]
    NoAck,
    #[error("bus-off")]
    BusOff,
    #[error("bus error")]
    BusError,
    #[error("controller restarted")]
    Restarted,
    #[error("unrecognized error class {0:#x}")]
    Unknown(u32),
}

#[derive(Copy, Clone, Debug)]
pub enum ControllerProblem {
    Unspecified,
    ReceiveBufferOverflow,
    TransmitBufferOverflow,
    ReceiveErrorWarning,
    TransmitErrorWarning,
    ReceiveErrorPassive,
    TransmitErrorPassive,
    Active,
}

impl TryFrom<u8> for ControllerProblem {
    type Error = ();
    fn try_from(val: u8) -> Result<Self, ()> {
        Ok(match val {
            0x00 => Self::Unspecified,
            0x01 => Self::ReceiveBufferOverflow,
            0x02 => Self::TransmitBufferOverflow,
            0x04 => Self::ReceiveErrorWarning,
            0x08 => Self::TransmitErrorWarning,
            0x10 => Self::ReceiveErrorPassive,
            0x20 => Self::TransmitErrorPassive,
            0x40 => Self::Active,
            _ => return Err(()),
        })
    }
}

#[derive(Copy, Clone, Debug)]
pub enum ViolationType {
    Unspecified,
    SingleBitError,
    FrameFormatError,
    BitStuffingError,
    UnableToSendDominantBit,
    UnableToSendRecessiveBit,
    BusOverload,
    Active,
    TransmissionError,
}

impl TryFrom<u8> for ViolationType {
    type Error = ();
    fn try_from(val: u8) -> Result<Self, ()> {
        Ok(match val {
            0x00 => Self::Unspecified,
            0x01 => Self::SingleBitError,
            0x02 => Self::FrameFormatError,
            0x04 => Self::BitStuffingError,
            0x08 => Self::UnableToSendDominantBit,
            0x10 => Self::UnableToSendRecessiveBit,
            0x20 => Self::BusOverload,
            0x40 => Self::Active,
            0x80 => Self::TransmissionError,
            _ => return Err(()),
        })
    }
}

#[derive(Copy, Clone, Debug)]
pub enum Location {
    Unspecified,
    StartOfFrame,
    Id2821,
    Id2018,
    SubstituteRtr,
    IdentifierExtension,
    Id1713,
    Id1205,
    Id0400,
    Rtr,
    Reserved1,
    Reserved0,
    DataLengthCode,
    DataSection,
    CrcSequence,
    CrcDelimiter,
    AckSlot,
    AckDelimiter,
    EndOfFrame,
    Intermission,
}

impl TryFrom<u8> for Location {
    type Error = ();
    fn try_from(val: u8) -> Result<Self, ()> {
        Ok(match val {
            0x00 => Self::Unspecified,
            0x03 => Self::StartOfFrame,
            0x02 => Self::Id2821,
            0x06 => Self::Id2018,
            0x04 => Self::SubstituteRtr,
            0x05 => Self::IdentifierExtension,
            0x07 => Self::Id1713,
            0x0F => Self::Id1205,
            0x0E => Self::Id0400,
            0x0C => Self::Rtr,
            0x0D => Self::Reserved1,
            0x09 => Self::Reserved0,
            0x0B => Self::DataLengthCode,
            0x0A => Self::DataSection,
            0x08 => Self::CrcSequence,
            0x18 => Self::CrcDelimiter,
            0x19 => Self::AckSlot,
            0x1B => Self::AckDelimiter,
            0x1A => Self::EndOfFrame,
            0x12 => Self::Intermission,
            _ => return Err(()),
        })
    }
}

fn byte(data: &[u8], idx: usize) -> u8 {
    *data.get(idx).unwrap_or(&0)
}

impl LinkError {
    /// `can_id` is the raw id (with ERR_FLAG still set) of a received
    /// error frame; `data` is its (up to 8-byte) payload.
    pub fn from_error_frame(can_id: u32, data: &[u8]) -> Self {
        match can_id & crate::frame::ERR_MASK {
            0x0000_0001 => LinkError::TransmitTimeout,
            0x0000_0002 => LinkError::LostArbitration(byte(data, 0)),
            0x0000_0004 => LinkError::ControllerProblem(
                ControllerProblem::try_from(byte(data, 1)).unwrap_or(ControllerProblem::Unspecified),
            ),
            0x0000_0008 => LinkError::ProtocolViolation {
                vtype: ViolationType::try_from(byte(data, 2)).unwrap_or(ViolationType::Unspecified),
                location: Location::try_from(byte(data, 3)).unwrap_or(Location::Unspecified),
            },
            0x0000_0010 => LinkError::TransceiverError,
            0x0000_0020 => LinkError::NoAck,
            0x0000_0040 => LinkError::BusOff,
            0x0000_0080 => LinkError::BusError,
            0x0000_0100 => LinkError::Restarted,
            other => LinkError::Unknown(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_bus_off() {
        let e = LinkError::from_error_frame(0x0000_0040, &[0; 8]);
        matches!(e, LinkError::BusOff);
    }

    #[test]
    fn decodes_lost_arbitration_bit_index() {
        let e = LinkError::from_error_frame(0x0000_0002, &[7, 0, 0, 0, 0, 0, 0, 0]);
        match e {
            LinkError::LostArbitration(n) => assert_eq!(n, 7),
            _ => panic!("wrong variant"),
        }
    }
}
