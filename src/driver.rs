//! Application surface: the [`CanApi`] capability trait and its
//! serial-line implementation [`SerialCan`].

use crate::bittiming::{self, Bitrate, BitrateSetting, BusSpeed};
use crate::channel::{
    self, BitrateInfo, ChannelInfo, DeviceParams, OpMode, ProbeState, Status,
};
use crate::error::CanError;
use crate::frame::CanFrame;

const INVALID_HANDLE: i32 = -1;

/// Capability trait of a CAN channel driver.
///
/// The serial-line driver is one implementation; the trait is the seam a
/// different transport would plug into.
pub trait CanApi {
    /// Checks availability of a channel without claiming it.
    fn probe_channel(params: &DeviceParams, mode: OpMode) -> Result<ProbeState, CanError>
    where
        Self: Sized;

    /// Claims the channel and brings the controller into the stopped
    /// state.
    fn initialize_channel(&mut self, params: &DeviceParams, mode: OpMode)
        -> Result<(), CanError>;

    /// Stops the controller if needed and releases the channel.
    fn teardown_channel(&mut self) -> Result<(), CanError>;

    /// Wakes every blocked operation on the channel.
    fn signal_channel(&mut self) -> Result<(), CanError>;

    fn start_controller(&mut self, bitrate: &BitrateSetting) -> Result<(), CanError>;

    fn reset_controller(&mut self) -> Result<(), CanError>;

    fn write_message(&mut self, frame: &CanFrame, timeout: u16) -> Result<(), CanError>;

    fn read_message(&mut self, timeout: u16) -> Result<CanFrame, CanError>;

    fn get_status(&mut self) -> Result<Status, CanError>;

    /// Bus load in percent plus the current status snapshot.
    fn get_busload(&mut self) -> Result<(u8, Status), CanError>;

    fn get_bitrate(&mut self) -> Result<BitrateInfo, CanError>;

    fn get_property(&mut self, param: u16, buf: &mut [u8]) -> Result<usize, CanError>;
}

/// One application-visible CAN channel over a serial-line (SLCAN)
/// adapter.
///
/// Construction does not claim any device; call
/// [`initialize_channel`](CanApi::initialize_channel) first. Dropping the
/// value tears the channel down.
#[derive(Debug)]
pub struct SerialCan {
    handle: i32,
}

impl SerialCan {
    pub fn new() -> Self {
        Self {
            handle: INVALID_HANDLE,
        }
    }

    /// The raw channel handle, if the channel is initialized.
    pub fn handle(&self) -> Option<i32> {
        (self.handle != INVALID_HANDLE).then_some(self.handle)
    }

    /// Formatted hardware version of the attached adapter.
    pub fn hardware_version(&self) -> Result<String, CanError> {
        self.require_handle()?;
        channel::hardware_version(self.handle)
    }

    /// Formatted firmware version of the attached adapter.
    pub fn firmware_version(&self) -> Result<String, CanError> {
        self.require_handle()?;
        channel::firmware_version(self.handle)
    }

    /// Resets the interface enumeration and returns its first entry.
    pub fn first_channel() -> Option<ChannelInfo> {
        channel::first_channel()
    }

    /// Returns the next entry of the interface enumeration.
    pub fn next_channel() -> Option<ChannelInfo> {
        channel::next_channel()
    }

    /// Converts a predefined bit-rate index into structured settings.
    pub fn map_index_to_bitrate(index: i32) -> Result<Bitrate, CanError> {
        Ok(bittiming::index_to_bitrate(index)?)
    }

    /// Parses a `key=value` bit-rate string; the flag reports whether
    /// `nom_sam` was given.
    pub fn map_string_to_bitrate(string: &str) -> Result<(Bitrate, bool), CanError> {
        Ok(bittiming::bitrate_from_string(string)?)
    }

    /// Formats structured settings as a `key=value` string.
    pub fn map_bitrate_to_string(bitrate: &Bitrate, with_sam: bool) -> String {
        bittiming::bitrate_to_string(bitrate, with_sam)
    }

    /// Computes speed and sample point of a bit-rate setting.
    pub fn map_bitrate_to_speed(bitrate: &Bitrate) -> BusSpeed {
        bittiming::bitrate_to_speed(bitrate)
    }

    fn require_handle(&self) -> Result<(), CanError> {
        if self.handle == INVALID_HANDLE {
            return Err(CanError::Handle);
        }
        Ok(())
    }
}

impl Default for SerialCan {
    fn default() -> Self {
        Self::new()
    }
}

impl CanApi for SerialCan {
    fn probe_channel(params: &DeviceParams, mode: OpMode) -> Result<ProbeState, CanError> {
        channel::probe(params, mode)
    }

    fn initialize_channel(
        &mut self,
        params: &DeviceParams,
        mode: OpMode,
    ) -> Result<(), CanError> {
        if self.handle != INVALID_HANDLE {
            return Err(CanError::AlreadyInitialized);
        }
        self.handle = channel::init(params, mode)?;
        Ok(())
    }

    fn teardown_channel(&mut self) -> Result<(), CanError> {
        self.require_handle()?;
        channel::exit(self.handle)?;
        self.handle = INVALID_HANDLE;
        Ok(())
    }

    fn signal_channel(&mut self) -> Result<(), CanError> {
        self.require_handle()?;
        channel::kill(self.handle)
    }

    fn start_controller(&mut self, bitrate: &BitrateSetting) -> Result<(), CanError> {
        self.require_handle()?;
        channel::start(self.handle, bitrate)
    }

    fn reset_controller(&mut self) -> Result<(), CanError> {
        self.require_handle()?;
        channel::reset(self.handle)
    }

    fn write_message(&mut self, frame: &CanFrame, timeout: u16) -> Result<(), CanError> {
        self.require_handle()?;
        channel::write(self.handle, frame, timeout)
    }

    fn read_message(&mut self, timeout: u16) -> Result<CanFrame, CanError> {
        self.require_handle()?;
        channel::read(self.handle, timeout)
    }

    fn get_status(&mut self) -> Result<Status, CanError> {
        self.require_handle()?;
        channel::status(self.handle)
    }

    fn get_busload(&mut self) -> Result<(u8, Status), CanError> {
        self.require_handle()?;
        channel::busload(self.handle)
    }

    fn get_bitrate(&mut self) -> Result<BitrateInfo, CanError> {
        self.require_handle()?;
        channel::bitrate(self.handle)
    }

    fn get_property(&mut self, param: u16, buf: &mut [u8]) -> Result<usize, CanError> {
        // library-scope properties are answered without a handle
        channel::property(self.handle, param, buf)
    }
}

impl Drop for SerialCan {
    fn drop(&mut self) {
        if self.handle != INVALID_HANDLE {
            let _ = channel::exit(self.handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn teardown_before_init_reports_an_invalid_handle() {
        let mut can = SerialCan::new();
        assert_eq!(can.handle(), None);
        assert_eq!(can.teardown_channel(), Err(CanError::Handle));
        assert_eq!(can.signal_channel(), Err(CanError::Handle));
        assert_eq!(
            can.start_controller(&BitrateSetting::Index(bittiming::INDEX_250K)),
            Err(CanError::Handle)
        );
        assert_eq!(can.reset_controller(), Err(CanError::Handle));
        assert!(matches!(can.read_message(0), Err(CanError::Handle)));
    }

    #[test]
    fn init_failure_leaves_the_value_uninitialized() {
        let mut can = SerialCan::new();
        let params = DeviceParams::new("/nonexistent/ttyUSB99");
        assert!(can.initialize_channel(&params, OpMode::DEFAULT).is_err());
        assert_eq!(can.handle(), None);
    }

    #[test]
    fn static_helpers_delegate_to_the_converters() {
        let bitrate = SerialCan::map_index_to_bitrate(bittiming::INDEX_250K).unwrap();
        let speed = SerialCan::map_bitrate_to_speed(&bitrate);
        assert_eq!(speed.speed, 250_000.0);

        let text = SerialCan::map_bitrate_to_string(&bitrate, false);
        let (parsed, sam) = SerialCan::map_string_to_bitrate(&text).unwrap();
        assert!(!sam);
        assert_eq!(parsed, bitrate);

        assert_eq!(
            SerialCan::map_index_to_bitrate(42),
            Err(CanError::Baudrate)
        );
    }

    #[test]
    fn interface_enumeration_is_reachable_from_the_type() {
        let first = SerialCan::first_channel().unwrap();
        assert_eq!(first.channel, channel::CHANNEL_SERIAL);
    }

    #[test]
    fn dropping_an_uninitialized_value_is_harmless() {
        let can = SerialCan::new();
        drop(can);
    }
}
