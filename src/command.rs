use embedded_can::{ExtendedId, Id, StandardId};
use num_enum::IntoPrimitive;

use crate::frame::CanFrame;

/// Represents the various different requests that can be sent to the
/// adapter. The discriminant is the first byte on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
#[repr(u8)]
pub enum CommandKind {
    /// Set one of the predefined CAN bit-rates (CANUSB `S` command)
    SetupBitrate = b'S',
    /// Set the SJA1000 BTR0/BTR1 bit-timing registers
    SetupBtr = b's',
    /// Open the CAN channel
    OpenChannel = b'O',
    /// Close the CAN channel
    CloseChannel = b'C',

    /// Transmit a standard (11bit) data frame
    TransmitStandardDataFrame = b't',
    /// Transmit an extended (29bit) data frame
    TransmitExtendedDataFrame = b'T',
    /// Transmit a standard (11bit) remote frame
    TransmitStandardRemoteFrame = b'r',
    /// Transmit an extended (29bit) remote frame
    TransmitExtendedRemoteFrame = b'R',

    /// Read the SJA1000-style status flags
    StatusFlags = b'F',
    /// Set the acceptance code register
    AcceptanceCode = b'M',
    /// Set the acceptance mask register
    AcceptanceMask = b'm',
    /// Ask the adapter for its hardware and software version
    VersionNumber = b'V',
    /// Ask the adapter for its serial number
    SerialNumber = b'N',
}

/// A request to the adapter along with its attached data. The wire form is
/// produced by [`Command::as_bytes`]; the terminating CR is appended when
/// the request is sent.
#[derive(Debug)]
pub enum Command<'a> {
    /// Predefined bit-rate, index 0..=8 (10 kbit/s .. 1 Mbit/s)
    SetupBitrate(u8),
    SetupBtr(u16),
    OpenChannel,
    CloseChannel,
    TransmitFrame(&'a CanFrame),
    StatusFlags,
    AcceptanceCode(u32),
    AcceptanceMask(u32),
    VersionNumber,
    SerialNumber,
}

impl Command<'_> {
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut result = Vec::new();

        match self {
            Command::SetupBitrate(index) => {
                result.push(CommandKind::SetupBitrate.into());
                result.push(b'0' + (index & 0x0F));
            }
            Command::SetupBtr(btr) => {
                result.push(CommandKind::SetupBtr.into());
                result.extend(word_to_hex(*btr));
            }
            Command::OpenChannel => result.push(CommandKind::OpenChannel.into()),
            Command::CloseChannel => result.push(CommandKind::CloseChannel.into()),
            Command::TransmitFrame(frame) => {
                match frame.id() {
                    Id::Standard(id) => {
                        if frame.is_remote() {
                            result.push(CommandKind::TransmitStandardRemoteFrame.into());
                        } else {
                            result.push(CommandKind::TransmitStandardDataFrame.into());
                        }

                        result.extend(standard_id_to_hex(id));
                    }
                    Id::Extended(id) => {
                        if frame.is_remote() {
                            result.push(CommandKind::TransmitExtendedRemoteFrame.into());
                        } else {
                            result.push(CommandKind::TransmitExtendedDataFrame.into());
                        }

                        result.extend(extended_id_to_hex(id));
                    }
                }

                result.push(to_hex_digit(u32::from(frame.dlc())));

                if let Some(data) = frame.data() {
                    result.extend(bytes_to_hex(data));
                }
            }
            Command::StatusFlags => result.push(CommandKind::StatusFlags.into()),
            Command::AcceptanceCode(code) => {
                result.push(CommandKind::AcceptanceCode.into());
                result.extend(dword_to_hex(*code));
            }
            Command::AcceptanceMask(mask) => {
                result.push(CommandKind::AcceptanceMask.into());
                result.extend(dword_to_hex(*mask));
            }
            Command::VersionNumber => result.push(CommandKind::VersionNumber.into()),
            Command::SerialNumber => result.push(CommandKind::SerialNumber.into()),
        }

        result
    }
}

fn to_hex_digit(value: u32) -> u8 {
    const HEX_LUT: &[u8] = "0123456789ABCDEF".as_bytes();

    HEX_LUT[(value & 0xF) as usize]
}

fn standard_id_to_hex(id: StandardId) -> [u8; 3] {
    let raw = u32::from(id.as_raw());

    [
        to_hex_digit(raw >> 8),
        to_hex_digit(raw >> 4),
        to_hex_digit(raw),
    ]
}

fn extended_id_to_hex(id: ExtendedId) -> [u8; 8] {
    let raw = id.as_raw();

    [
        to_hex_digit(raw >> 28),
        to_hex_digit(raw >> 24),
        to_hex_digit(raw >> 20),
        to_hex_digit(raw >> 16),
        to_hex_digit(raw >> 12),
        to_hex_digit(raw >> 8),
        to_hex_digit(raw >> 4),
        to_hex_digit(raw),
    ]
}

fn word_to_hex(value: u16) -> [u8; 4] {
    let raw = u32::from(value);

    [
        to_hex_digit(raw >> 12),
        to_hex_digit(raw >> 8),
        to_hex_digit(raw >> 4),
        to_hex_digit(raw),
    ]
}

fn dword_to_hex(value: u32) -> [u8; 8] {
    [
        to_hex_digit(value >> 28),
        to_hex_digit(value >> 24),
        to_hex_digit(value >> 20),
        to_hex_digit(value >> 16),
        to_hex_digit(value >> 12),
        to_hex_digit(value >> 8),
        to_hex_digit(value >> 4),
        to_hex_digit(value),
    ]
}

fn bytes_to_hex(data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::<u8>::with_capacity(2 * data.len());

    for byte in data {
        buf.push(to_hex_digit(u32::from(byte >> 4)));
        buf.push(to_hex_digit(u32::from(*byte)));
    }

    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_commands_encode_as_expected() {
        assert_eq!(Command::SetupBitrate(6).as_bytes(), b"S6");
        assert_eq!(Command::SetupBtr(0x011C).as_bytes(), b"s011C");
        assert_eq!(Command::OpenChannel.as_bytes(), b"O");
        assert_eq!(Command::CloseChannel.as_bytes(), b"C");
        assert_eq!(Command::StatusFlags.as_bytes(), b"F");
        assert_eq!(Command::VersionNumber.as_bytes(), b"V");
        assert_eq!(Command::SerialNumber.as_bytes(), b"N");
    }

    #[test]
    fn acceptance_registers_encode_eight_nibbles() {
        assert_eq!(Command::AcceptanceCode(0x0000_0000).as_bytes(), b"M00000000");
        assert_eq!(Command::AcceptanceMask(0xFFFF_FFFF).as_bytes(), b"mFFFFFFFF");
    }

    #[test]
    fn standard_data_frame_encodes_id_dlc_and_payload() {
        let frame =
            CanFrame::new_data(StandardId::new(0x123).unwrap(), &[0xAB, 0xCD, 0xEF]).unwrap();
        assert_eq!(Command::TransmitFrame(&frame).as_bytes(), b"t1233ABCDEF");
    }

    #[test]
    fn extended_remote_frame_has_no_payload() {
        let frame = CanFrame::new_remote(ExtendedId::new(0x1FFF_FFFF).unwrap(), 0).unwrap();
        assert_eq!(Command::TransmitFrame(&frame).as_bytes(), b"R1FFFFFFF0");
    }

    #[test]
    fn dlc_boundaries_encode_correctly() {
        let empty = CanFrame::new_data(StandardId::new(0).unwrap(), &[]).unwrap();
        assert_eq!(Command::TransmitFrame(&empty).as_bytes(), b"t0000");

        let full = CanFrame::new_data(StandardId::new(0x7FF).unwrap(), &[0xFF; 8]).unwrap();
        assert_eq!(
            Command::TransmitFrame(&full).as_bytes(),
            b"t7FF8FFFFFFFFFFFFFFFF"
        );
    }
}
