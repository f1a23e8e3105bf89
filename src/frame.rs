use embedded_can::Id;

use crate::timer::Timestamp;

/// Maximum payload length / data length code for classic CAN.
pub const MAX_DLC: u8 = 8;

/// A classic CAN 2.0 frame as seen by the application.
///
/// The DLC can be up to 8; remote frames carry a DLC but no payload.
/// Status frames are synthesized by the driver to report adapter-side
/// errors and are never transmitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanFrame {
    id: Id,
    dlc: u8,
    data: Option<heapless::Vec<u8, 8>>,
    status: bool,
    timestamp: Option<Timestamp>,
}

impl CanFrame {
    /// Creates a new data frame. `data` must have a length in the range
    /// 0..=8 or else `None` will be returned instead.
    pub fn new_data(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() > MAX_DLC as usize {
            return None;
        }

        Some(Self {
            id: id.into(),
            dlc: data.len() as u8,
            data: Some(heapless::Vec::from_slice(data).unwrap()),
            status: false,
            timestamp: None,
        })
    }

    /// Creates a new remote (RTR) frame. `dlc` must be in the range 0..=8
    /// or else `None` will be returned instead.
    pub fn new_remote(id: impl Into<Id>, dlc: u8) -> Option<Self> {
        if dlc > MAX_DLC {
            return None;
        }

        Some(Self {
            id: id.into(),
            dlc,
            data: None,
            status: false,
            timestamp: None,
        })
    }

    /// Creates a status frame carrying an adapter-reported error.
    #[allow(dead_code)]
    pub(crate) fn new_status(id: impl Into<Id>) -> Self {
        Self {
            id: id.into(),
            dlc: 0,
            data: Some(heapless::Vec::new()),
            status: true,
            timestamp: None,
        }
    }

    /// Gets the message ID of the frame
    pub fn id(&self) -> Id {
        self.id
    }

    /// Gets the raw numeric value of the message ID
    pub fn raw_id(&self) -> u32 {
        match self.id {
            Id::Standard(id) => u32::from(id.as_raw()),
            Id::Extended(id) => id.as_raw(),
        }
    }

    /// Gets the DLC (Data Length Code) of the frame
    pub fn dlc(&self) -> u8 {
        self.dlc
    }

    /// Gets the data associated with the frame. Will return `None` if it is
    /// an RTR frame.
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    pub fn is_remote(&self) -> bool {
        self.data.is_none()
    }

    pub fn is_extended(&self) -> bool {
        matches!(self.id, Id::Extended(_))
    }

    /// Whether this is a synthetic status frame reporting an adapter error.
    pub fn is_status(&self) -> bool {
        self.status
    }

    /// Reception time, set by the driver when the frame arrived.
    pub fn timestamp(&self) -> Option<Timestamp> {
        self.timestamp
    }

    pub(crate) fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_can::{ExtendedId, StandardId};

    #[test]
    fn data_frame_has_matching_dlc() {
        let frame = CanFrame::new_data(StandardId::new(0x123).unwrap(), &[1, 2, 3]).unwrap();
        assert_eq!(frame.dlc(), 3);
        assert_eq!(frame.data(), Some(&[1u8, 2, 3][..]));
        assert!(!frame.is_remote());
        assert!(!frame.is_extended());
        assert_eq!(frame.raw_id(), 0x123);
    }

    #[test]
    fn remote_frame_keeps_dlc_without_payload() {
        let frame = CanFrame::new_remote(ExtendedId::new(0x1FFF_FFFF).unwrap(), 4).unwrap();
        assert_eq!(frame.dlc(), 4);
        assert_eq!(frame.data(), None);
        assert!(frame.is_remote());
        assert!(frame.is_extended());
        assert_eq!(frame.raw_id(), 0x1FFF_FFFF);
    }

    #[test]
    fn oversized_frames_are_rejected() {
        assert!(CanFrame::new_data(StandardId::new(1).unwrap(), &[0; 9]).is_none());
        assert!(CanFrame::new_remote(StandardId::new(1).unwrap(), 9).is_none());
    }

    #[test]
    fn status_frame_is_marked() {
        let frame = CanFrame::new_status(StandardId::new(0).unwrap());
        assert!(frame.is_status());
        assert!(!frame.is_remote());
    }
}
