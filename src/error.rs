//! Driver error taxonomy with stable CAN-API-compatible codes.

use crate::bittiming::BitrateError;
use crate::serial::SerialError;
use crate::slcan::SlcanError;

/// Errors returned by the channel API. Every variant maps to a stable
/// integer code via [`CanError::code`]; 0 means success, -1..-99 are
/// reserved API codes, values of -100 and below are vendor specific and
/// -10000 and below carry an OS error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CanError {
    #[error("busoff status")]
    BusOff,
    #[error("error warning status")]
    ErrorWarning,
    #[error("bus error")]
    BusError,
    #[error("controller already started")]
    Online,
    #[error("controller not started")]
    Offline,
    #[error("message lost")]
    MessageLost,
    #[error("transmitter busy")]
    TxBusy,
    #[error("receiver empty")]
    RxEmpty,
    #[error("error frame received")]
    ErrorFrame,
    #[error("time-out expired")]
    Timeout,
    #[error("resource allocation failed")]
    Resource,
    #[error("illegal baudrate")]
    Baudrate,
    #[error("illegal handle")]
    Handle,
    #[error("illegal parameter")]
    IllegalParameter,
    #[error("null pointer assignment")]
    NullPointer,
    #[error("not initialized")]
    NotInitialized,
    #[error("already initialized")]
    AlreadyInitialized,
    #[error("illegal library")]
    Library,
    #[error("not supported")]
    NotSupported,
    #[error("fatal error")]
    Fatal,
    /// Protocol error on the serial line (vendor-specific range).
    #[error("protocol error (bad message)")]
    BadMessage,
    /// Operating-system error, carried as a raw code.
    #[error("operating system error ({0})")]
    OsError(i32),
}

impl CanError {
    /// Stable CAN-API error code of this error.
    pub const fn code(self) -> i32 {
        match self {
            CanError::BusOff => -1,
            CanError::ErrorWarning => -2,
            CanError::BusError => -3,
            CanError::Online => -8,
            CanError::Offline => -9,
            CanError::MessageLost => -10,
            CanError::TxBusy => -20,
            CanError::RxEmpty => -30,
            CanError::ErrorFrame => -40,
            CanError::Timeout => -50,
            CanError::Resource => -90,
            CanError::Baudrate => -91,
            CanError::Handle => -92,
            CanError::IllegalParameter => -93,
            CanError::NullPointer => -94,
            CanError::NotInitialized => -95,
            CanError::AlreadyInitialized => -96,
            CanError::Library => -97,
            CanError::NotSupported => -98,
            CanError::Fatal => -99,
            CanError::BadMessage => -100,
            CanError::OsError(errno) => -10000 - errno,
        }
    }
}

impl From<SlcanError> for CanError {
    fn from(error: SlcanError) -> Self {
        match error {
            SlcanError::BadMessage => CanError::BadMessage,
            SlcanError::Timeout => CanError::Timeout,
            SlcanError::Empty => CanError::RxEmpty,
            SlcanError::Parameter => CanError::IllegalParameter,
            SlcanError::Serial(serial) => serial.into(),
        }
    }
}

impl From<SerialError> for CanError {
    fn from(error: SerialError) -> Self {
        match error {
            SerialError::AlreadyConnected => CanError::AlreadyInitialized,
            SerialError::NotConnected => CanError::NotInitialized,
            SerialError::Busy => CanError::TxBusy,
            SerialError::Port(_) => CanError::Resource,
            SerialError::Io(e) => CanError::OsError(e.raw_os_error().unwrap_or(0)),
        }
    }
}

impl From<BitrateError> for CanError {
    fn from(_: BitrateError) -> Self {
        CanError::Baudrate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(CanError::BusOff.code(), -1);
        assert_eq!(CanError::Online.code(), -8);
        assert_eq!(CanError::Offline.code(), -9);
        assert_eq!(CanError::TxBusy.code(), -20);
        assert_eq!(CanError::RxEmpty.code(), -30);
        assert_eq!(CanError::Timeout.code(), -50);
        assert_eq!(CanError::Baudrate.code(), -91);
        assert_eq!(CanError::Handle.code(), -92);
        assert_eq!(CanError::NotInitialized.code(), -95);
        assert_eq!(CanError::AlreadyInitialized.code(), -96);
        assert_eq!(CanError::Fatal.code(), -99);
        assert!(CanError::BadMessage.code() <= -100);
        assert!(CanError::OsError(5).code() <= -10000);
    }

    #[test]
    fn engine_errors_map_to_api_errors() {
        assert_eq!(CanError::from(SlcanError::Timeout), CanError::Timeout);
        assert_eq!(CanError::from(SlcanError::Empty), CanError::RxEmpty);
        assert_eq!(CanError::from(SlcanError::BadMessage), CanError::BadMessage);
        assert_eq!(
            CanError::from(SlcanError::Serial(SerialError::Busy)),
            CanError::TxBusy
        );
    }
}
