use embedded_can::{ExtendedId, StandardId};
use num_enum::TryFromPrimitive;

use crate::frame::{CanFrame, MAX_DLC};

/// Various errors which can arise while parsing a received SLCAN line
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MessageParseError {
    #[error("received a message with an unrecognized specifier ({0:?})")]
    UnrecognizedMessage(u8),
    #[error("received a message ({0:?}) with fewer bytes ({1}) than required")]
    NotEnoughBytes(MessageKind, usize),

    #[error("tried to decode a hex digit but it was out of range ({0:?})")]
    IllegalHexDigit(u8),
    #[error("received a DLC ({0}) outside the classic CAN range 0..=8")]
    DlcOutOfRange(u8),
    #[error("received a CAN standard ID ({0:#05X}) out of the valid range (0..=0x7FF)")]
    StandardIdOutOfRange(u16),
    #[error("received a CAN extended ID ({0:#010X}) out of the valid range (0..=0x1FFFFFFF)")]
    ExtendedIdOutOfRange(u32),
}

/// Represents a frame indication received from the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[num_enum(error_type(name = MessageParseError, constructor = MessageParseError::UnrecognizedMessage))]
#[repr(u8)]
pub enum MessageKind {
    /// Received a standard (11bit) data frame
    StandardDataFrame = b't',
    /// Received an extended (29bit) data frame
    ExtendedDataFrame = b'T',
    /// Received a standard (11bit) remote frame
    StandardRemoteFrame = b'r',
    /// Received an extended (29bit) remote frame
    ExtendedRemoteFrame = b'R',
}

impl MessageKind {
    fn id_digits(&self) -> usize {
        match self {
            MessageKind::StandardDataFrame | MessageKind::StandardRemoteFrame => 3,
            MessageKind::ExtendedDataFrame | MessageKind::ExtendedRemoteFrame => 8,
        }
    }

    fn is_remote(&self) -> bool {
        matches!(
            self,
            MessageKind::StandardRemoteFrame | MessageKind::ExtendedRemoteFrame
        )
    }
}

/// Parses one received line into a CAN frame.
///
/// The line starts with the kind specifier; anything after the payload
/// (an optional RX timestamp and the terminating CR) is ignored, the host
/// records its own reception time.
pub fn parse_frame_from_bytes(buffer: &[u8]) -> Result<CanFrame, MessageParseError> {
    let kind: MessageKind = (*buffer
        .first()
        .ok_or(MessageParseError::UnrecognizedMessage(0))?)
    .try_into()?;
    let message_data = &buffer[1..];

    let id_digits = kind.id_digits();
    if message_data.len() < id_digits + 1 {
        return Err(MessageParseError::NotEnoughBytes(kind, buffer.len()));
    }

    /* CAN identifier: 11-bit or 29-bit */

    let mut raw_id = 0u32;
    for &nibble in &message_data[..id_digits] {
        raw_id = (raw_id << 4) | u32::from(hex_digit_to_u8(nibble)?);
    }

    /* Data Length Code: 0..8 */

    let dlc = hex_digit_to_u8(message_data[id_digits])?;
    if dlc > MAX_DLC {
        return Err(MessageParseError::DlcOutOfRange(dlc));
    }

    if kind.is_remote() {
        let frame = match kind {
            MessageKind::StandardRemoteFrame => {
                CanFrame::new_remote(standard_id(raw_id)?, dlc).unwrap()
            }
            _ => CanFrame::new_remote(extended_id(raw_id)?, dlc).unwrap(),
        };
        return Ok(frame);
    }

    /* message data: exactly 2 hex digits per payload byte */

    let data_bytes = &message_data[id_digits + 1..];
    if data_bytes.len() < 2 * dlc as usize {
        return Err(MessageParseError::NotEnoughBytes(kind, buffer.len()));
    }

    let mut data = [0u8; MAX_DLC as usize];
    for (i, chunk) in data_bytes[..2 * dlc as usize].chunks_exact(2).enumerate() {
        data[i] = (hex_digit_to_u8(chunk[0])? << 4) | hex_digit_to_u8(chunk[1])?;
    }

    let frame = match kind {
        MessageKind::StandardDataFrame => {
            CanFrame::new_data(standard_id(raw_id)?, &data[..dlc as usize]).unwrap()
        }
        _ => CanFrame::new_data(extended_id(raw_id)?, &data[..dlc as usize]).unwrap(),
    };
    Ok(frame)
}

pub(crate) fn hex_digit_to_u8(byte: u8) -> Result<u8, MessageParseError> {
    Ok(match byte {
        b'0'..=b'9' => byte - b'0',
        b'a'..=b'f' => byte - b'a' + 10,
        b'A'..=b'F' => byte - b'A' + 10,
        _ => return Err(MessageParseError::IllegalHexDigit(byte)),
    })
}

fn standard_id(raw: u32) -> Result<StandardId, MessageParseError> {
    StandardId::new(raw as u16).ok_or(MessageParseError::StandardIdOutOfRange(raw as u16))
}

fn extended_id(raw: u32) -> Result<ExtendedId, MessageParseError> {
    ExtendedId::new(raw).ok_or(MessageParseError::ExtendedIdOutOfRange(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_data_frame_decodes() {
        let frame = parse_frame_from_bytes(b"t1233ABCDEF\r").unwrap();
        assert_eq!(frame.raw_id(), 0x123);
        assert!(!frame.is_extended());
        assert!(!frame.is_remote());
        assert_eq!(frame.dlc(), 3);
        assert_eq!(frame.data(), Some(&[0xAB, 0xCD, 0xEF][..]));
    }

    #[test]
    fn trailing_rx_timestamp_is_ignored() {
        let frame = parse_frame_from_bytes(b"t456811223344556677885A\r").unwrap();
        assert_eq!(frame.raw_id(), 0x456);
        assert_eq!(frame.dlc(), 8);
        assert_eq!(
            frame.data(),
            Some(&[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88][..])
        );
    }

    #[test]
    fn extended_remote_frame_decodes() {
        let frame = parse_frame_from_bytes(b"R1FFFFFFF0\r").unwrap();
        assert_eq!(frame.raw_id(), 0x1FFF_FFFF);
        assert!(frame.is_extended());
        assert!(frame.is_remote());
        assert_eq!(frame.dlc(), 0);
        assert_eq!(frame.data(), None);
    }

    #[test]
    fn lowercase_hex_digits_are_accepted() {
        let frame = parse_frame_from_bytes(b"t7ff2abcd\r").unwrap();
        assert_eq!(frame.raw_id(), 0x7FF);
        assert_eq!(frame.data(), Some(&[0xAB, 0xCD][..]));
    }

    #[test]
    fn boundary_identifiers_decode() {
        assert_eq!(parse_frame_from_bytes(b"t0000\r").unwrap().raw_id(), 0x000);
        assert_eq!(parse_frame_from_bytes(b"t7FF0\r").unwrap().raw_id(), 0x7FF);
        assert_eq!(
            parse_frame_from_bytes(b"T1FFFFFFF0\r").unwrap().raw_id(),
            0x1FFF_FFFF
        );
    }

    #[test]
    fn out_of_range_standard_id_is_rejected() {
        assert_eq!(
            parse_frame_from_bytes(b"tFFF0\r"),
            Err(MessageParseError::StandardIdOutOfRange(0xFFF))
        );
    }

    #[test]
    fn bad_dlc_is_rejected() {
        assert_eq!(
            parse_frame_from_bytes(b"t123900\r"),
            Err(MessageParseError::DlcOutOfRange(9))
        );
    }

    #[test]
    fn truncated_payload_is_rejected() {
        assert!(matches!(
            parse_frame_from_bytes(b"t1232AB"),
            Err(MessageParseError::NotEnoughBytes(_, _))
        ));
    }

    #[test]
    fn unknown_specifier_is_rejected() {
        assert_eq!(
            parse_frame_from_bytes(b"z\r"),
            Err(MessageParseError::UnrecognizedMessage(b'z'))
        );
    }

    #[test]
    fn encode_decode_round_trip() {
        use crate::command::Command;
        use embedded_can::StandardId;

        let original =
            CanFrame::new_data(StandardId::new(0x2A5).unwrap(), &[0xDE, 0xAD, 0xBE, 0xEF])
                .unwrap();
        let wire = Command::TransmitFrame(&original).as_bytes();
        let decoded = parse_frame_from_bytes(&wire).unwrap();
        assert_eq!(decoded, original);
    }
}
