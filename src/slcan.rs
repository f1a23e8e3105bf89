//! SLCAN protocol engine.
//!
//! [`SlcanPort`] owns the serial transport, the response buffer and the
//! message queue, and demultiplexes the three kinds of traffic sharing the
//! serial stream: spontaneous frame indications, solicited command
//! responses, and one-byte acknowledgements.
//!
//! Two protocol dialects are supported. The Lawicel dialect acknowledges
//! every command with CR (or BEL on failure); the CANable dialect omits
//! acknowledgements for set commands, which then succeed as soon as the
//! request bytes are out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::buffer::ResponseBuffer;
use crate::command::Command;
use crate::frame::CanFrame;
use crate::parser::{hex_digit_to_u8, parse_frame_from_bytes};
use crate::queue::MessageQueue;
use crate::serial::{RxHandler, SerialAttr, SerialError, SerialIo};
use crate::timer;

/// Capacity of the reception line accumulator (including the CR).
const RX_BUFFER_SIZE: usize = 128;

/// Response budget for ordinary commands, in milliseconds.
const RESPONSE_TIMEOUT: u16 = 100;

/// Response budget for transmit confirmations, in milliseconds.
const TRANSMIT_TIMEOUT: u16 = 1000;

/// Negative acknowledgement byte (BEL).
const NACK: u8 = 0x07;

#[derive(Debug, thiserror::Error)]
pub enum SlcanError {
    /// The adapter rejected the command or the response had an
    /// unexpected shape, or the command has no counterpart in the active
    /// protocol dialect.
    #[error("protocol error (unexpected or missing response)")]
    BadMessage,
    /// No response arrived within the time budget.
    #[error("response timed out")]
    Timeout,
    /// No received message is waiting in the queue.
    #[error("no message received")]
    Empty,
    /// A parameter was outside its valid range.
    #[error("illegal parameter")]
    Parameter,
    #[error(transparent)]
    Serial(#[from] SerialError),
}

/// SJA1000-style status flags reported by the `F` command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusFlags {
    byte: u8,
}

impl StatusFlags {
    pub fn from_byte(byte: u8) -> Self {
        Self { byte }
    }

    pub fn byte(&self) -> u8 {
        self.byte
    }

    /// Bus error interrupt (BEI)
    pub fn bus_error(&self) -> bool {
        self.byte & 0x01 != 0
    }

    /// Arbitration lost interrupt (ALI)
    pub fn arbitration_lost(&self) -> bool {
        self.byte & 0x02 != 0
    }

    /// Error passive interrupt (EPI)
    pub fn error_passive(&self) -> bool {
        self.byte & 0x04 != 0
    }

    /// Data overrun interrupt (DOI)
    pub fn data_overrun(&self) -> bool {
        self.byte & 0x10 != 0
    }

    /// Error warning interrupt (EI)
    pub fn error_warning(&self) -> bool {
        self.byte & 0x20 != 0
    }

    /// Transmit FIFO queue full
    pub fn tx_fifo_full(&self) -> bool {
        self.byte & 0x40 != 0
    }

    /// Receive FIFO queue full
    pub fn rx_fifo_full(&self) -> bool {
        self.byte & 0x80 != 0
    }
}

/// State shared with the reception thread.
struct Engine {
    response: ResponseBuffer,
    messages: MessageQueue<CanFrame>,
    line: Mutex<heapless::Vec<u8, RX_BUFFER_SIZE>>,
}

impl RxHandler for Engine {
    fn on_rx(&self, bytes: &[u8]) {
        let mut line = self.line.lock().unwrap();
        for &byte in bytes {
            self.receive_byte(&mut line, byte);
        }
    }
}

impl Engine {
    /// One step of the reception state machine. Bytes accumulate until CR
    /// or BEL terminates the record; overlong lines lose their tail but
    /// still terminate at the next CR.
    fn receive_byte(&self, line: &mut heapless::Vec<u8, RX_BUFFER_SIZE>, byte: u8) {
        if line.len() + 1 < RX_BUFFER_SIZE {
            let _ = line.push(byte);
        }
        if byte == b'\r' {
            match line.first().copied() {
                // long t/T/r/R record: a received frame
                Some(b't' | b'T' | b'r' | b'R') if line.len() > 2 => {
                    match parse_frame_from_bytes(line) {
                        Ok(frame) => {
                            let frame = frame.with_timestamp(timer::now());
                            if self.messages.enqueue(frame).is_err() {
                                log::warn!("receive queue full, frame dropped");
                            }
                        }
                        // malformed lines are recoverable, the stream
                        // re-synchronizes at the next CR
                        Err(e) => log::warn!("discarding malformed frame line: {e}"),
                    }
                }
                // everything else answers a previously sent command
                Some(_) => self.response.put(line),
                None => {}
            }
            line.clear();
        } else if byte == NACK {
            self.response.put(line);
            line.clear();
        }
    }
}

/// One SLCAN communication instance bound to one serial device.
pub struct SlcanPort {
    serial: SerialIo,
    engine: Arc<Engine>,
    // serialises request/response pairs; a late reply must not be
    // attributed to the next command
    cmd_lock: Mutex<()>,
    ack: AtomicBool,
    #[cfg(test)]
    captured_tx: Mutex<Vec<Vec<u8>>>,
}

impl SlcanPort {
    /// Creates a port instance with a reception queue of `queue_size`
    /// messages. ACK/NACK feedback (Lawicel dialect) starts enabled.
    pub fn new(queue_size: usize) -> Self {
        let engine = Arc::new(Engine {
            response: ResponseBuffer::new(),
            messages: MessageQueue::new(queue_size),
            line: Mutex::new(heapless::Vec::new()),
        });
        Self {
            serial: SerialIo::new(Arc::clone(&engine) as Arc<dyn RxHandler>),
            engine,
            cmd_lock: Mutex::new(()),
            ack: AtomicBool::new(true),
            #[cfg(test)]
            captured_tx: Mutex::new(Vec::new()),
        }
    }

    /// Connects to the named serial device and starts reception.
    pub fn connect(&self, device: &str, attr: SerialAttr) -> Result<(), SlcanError> {
        self.engine.line.lock().unwrap().clear();
        self.serial.connect(device, attr)?;
        Ok(())
    }

    /// Closes the CAN channel (best effort) and disconnects the device,
    /// joining the reception thread.
    pub fn disconnect(&self) -> Result<(), SlcanError> {
        let _ = self.close_channel();
        self.serial.disconnect()?;
        Ok(())
    }

    pub fn attr(&self) -> Result<SerialAttr, SlcanError> {
        Ok(self.serial.attr()?)
    }

    pub fn is_connected(&self) -> bool {
        self.serial.is_connected()
    }

    /// Switches ACK/NACK feedback on (Lawicel) or off (CANable) and
    /// returns the previous setting.
    pub fn set_ack(&self, on: bool) -> bool {
        self.ack.swap(on, Ordering::AcqRel)
    }

    pub fn ack(&self) -> bool {
        self.ack.load(Ordering::Acquire)
    }

    /// Wakes every caller blocked on the response buffer or the message
    /// queue; they return with a timeout / no-message result.
    pub fn signal(&self) {
        self.engine.response.signal();
        self.engine.messages.signal();
    }

    /// Setup with one of the predefined CAN bit-rates (index 0..=8).
    pub fn setup_bitrate(&self, index: u8) -> Result<(), SlcanError> {
        if index > 8 {
            return Err(SlcanError::Parameter);
        }
        self.set_command(&Command::SetupBitrate(index), true)
    }

    /// Setup with the SJA1000 BTR0/BTR1 register word. Not available in
    /// the CANable dialect.
    pub fn setup_btr(&self, btr: u16) -> Result<(), SlcanError> {
        self.set_command(&Command::SetupBtr(btr), false)
    }

    /// Opens the CAN channel; pending received messages are discarded.
    pub fn open_channel(&self) -> Result<(), SlcanError> {
        self.engine.messages.clear();
        self.set_command(&Command::OpenChannel, true)
    }

    /// Closes the CAN channel.
    pub fn close_channel(&self) -> Result<(), SlcanError> {
        self.set_command(&Command::CloseChannel, true)
    }

    /// Sets the acceptance code register. Not available in the CANable
    /// dialect.
    pub fn acceptance_code(&self, code: u32) -> Result<(), SlcanError> {
        self.set_command(&Command::AcceptanceCode(code), false)
    }

    /// Sets the acceptance mask register. Not available in the CANable
    /// dialect.
    pub fn acceptance_mask(&self, mask: u32) -> Result<(), SlcanError> {
        self.set_command(&Command::AcceptanceMask(mask), false)
    }

    /// Transmits one CAN frame.
    ///
    /// With ACK feedback the confirmation (`z` or `Z` matching the frame
    /// format) is awaited within a 1 s budget. Without it the call sleeps
    /// for the serial shift-out time of the request so back-to-back
    /// transmissions keep their order.
    pub fn write_message(&self, frame: &CanFrame, _timeout: u16) -> Result<(), SlcanError> {
        let request = Command::TransmitFrame(frame).as_bytes();
        let _guard = self.cmd_lock.lock().unwrap();

        if self.ack() {
            self.engine.response.clear();
            let _ = self.transmit_request(&request)?;
            let response = self
                .engine
                .response
                .get(2, TRANSMIT_TIMEOUT)
                .map_err(|_| SlcanError::Timeout)?;
            let confirmed = response[1] == b'\r'
                && matches!(
                    (response[0], request[0]),
                    (b'z', b't' | b'r') | (b'Z', b'T' | b'R')
                );
            if confirmed {
                Ok(())
            } else {
                Err(SlcanError::BadMessage)
            }
        } else {
            let sent = self.transmit_request(&request)?;
            self.wait_for_bytes_sent(sent);
            Ok(())
        }
    }

    /// Takes one received message out of the queue, waiting up to
    /// `timeout` milliseconds.
    pub fn read_message(&self, timeout: u16) -> Result<CanFrame, SlcanError> {
        self.engine
            .messages
            .dequeue(timeout)
            .map_err(|_| SlcanError::Empty)
    }

    /// Overflow flag and lost-message count of the reception queue.
    pub fn queue_overflow(&self) -> (bool, u64) {
        self.engine.messages.overflow()
    }

    /// Reads the adapter status flags (`F` command).
    pub fn status_flags(&self) -> Result<StatusFlags, SlcanError> {
        if !self.ack() {
            #[cfg(feature = "canable-stub")]
            return Ok(StatusFlags::default());
            #[cfg(not(feature = "canable-stub"))]
            return Err(SlcanError::BadMessage);
        }
        let response = self.query_command(&Command::StatusFlags, 4)?;
        if response[0] == b'F' && response[3] == b'\r' {
            let byte = (self.nibble(response[1])? << 4) | self.nibble(response[2])?;
            Ok(StatusFlags::from_byte(byte))
        } else {
            Err(SlcanError::BadMessage)
        }
    }

    /// Queries hardware and software version (`V` command), returned as
    /// BCD-packed bytes.
    pub fn version_number(&self) -> Result<(u8, u8), SlcanError> {
        if !self.ack() {
            #[cfg(feature = "canable-stub")]
            return Ok((0, 0));
            #[cfg(not(feature = "canable-stub"))]
            return Err(SlcanError::BadMessage);
        }
        let response = self.query_command(&Command::VersionNumber, 6)?;
        if response[0] == b'V' && response[5] == b'\r' {
            let hardware = (self.nibble(response[1])? << 4) | self.nibble(response[2])?;
            let software = (self.nibble(response[3])? << 4) | self.nibble(response[4])?;
            Ok((hardware, software))
        } else {
            Err(SlcanError::BadMessage)
        }
    }

    /// Queries the adapter serial number (`N` command).
    pub fn serial_number(&self) -> Result<u32, SlcanError> {
        if !self.ack() {
            return Err(SlcanError::BadMessage);
        }
        let response = self.query_command(&Command::SerialNumber, 6)?;
        if response[0] == b'N' && response[5] == b'\r' {
            let mut number = 0u32;
            for &digit in &response[1..5] {
                number = (number << 4) | u32::from(self.nibble(digit)?);
            }
            Ok(number)
        } else {
            Err(SlcanError::BadMessage)
        }
    }

    /// Sends a set-style command. With ACK feedback a single CR is
    /// expected back; without it the command either fire-and-forgets
    /// (`canable_supported`) or has no protocol counterpart at all.
    fn set_command(&self, command: &Command, canable_supported: bool) -> Result<(), SlcanError> {
        let request = command.as_bytes();
        let _guard = self.cmd_lock.lock().unwrap();

        if self.ack() {
            self.engine.response.clear();
            let _ = self.transmit_request(&request)?;
            let response = self
                .engine
                .response
                .get(1, RESPONSE_TIMEOUT)
                .map_err(|_| SlcanError::Timeout)?;
            if response[0] == b'\r' {
                Ok(())
            } else {
                Err(SlcanError::BadMessage)
            }
        } else if canable_supported {
            let _ = self.transmit_request(&request)?;
            Ok(())
        } else {
            Err(SlcanError::BadMessage)
        }
    }

    /// Sends a query-style command and returns the raw response bytes.
    fn query_command(&self, command: &Command, expected: usize) -> Result<Vec<u8>, SlcanError> {
        let request = command.as_bytes();
        let _guard = self.cmd_lock.lock().unwrap();

        self.engine.response.clear();
        let _ = self.transmit_request(&request)?;
        self.engine
            .response
            .get(expected, RESPONSE_TIMEOUT)
            .map_err(|_| SlcanError::Timeout)
    }

    /// Appends the CR terminator and transmits the request in one write.
    fn transmit_request(&self, request: &[u8]) -> Result<usize, SlcanError> {
        let mut wire = Vec::with_capacity(request.len() + 1);
        wire.extend_from_slice(request);
        wire.push(b'\r');

        #[cfg(test)]
        if !self.serial.is_connected() {
            self.captured_tx.lock().unwrap().push(wire.clone());
            return Ok(wire.len());
        }

        log::debug!("tx command {:?}", String::from_utf8_lossy(&wire));
        self.serial.transmit(&wire)?;
        Ok(wire.len())
    }

    /// Sleeps for the serial shift-out time of `nbytes` bytes (one start
    /// bit, eight data bits, one stop bit each) at the configured baud.
    fn wait_for_bytes_sent(&self, nbytes: usize) {
        let baud = self
            .serial
            .attr()
            .map(|attr| attr.baudrate)
            .unwrap_or(57_600)
            .max(1);
        timer::delay_us((10_000_000 / u64::from(baud)) * nbytes as u64);
    }

    fn nibble(&self, digit: u8) -> Result<u8, SlcanError> {
        hex_digit_to_u8(digit).map_err(|_| SlcanError::BadMessage)
    }

    #[cfg(test)]
    fn inject(&self, bytes: &[u8]) {
        self.engine.on_rx(bytes);
    }

    #[cfg(test)]
    fn captured(&self) -> Vec<Vec<u8>> {
        self.captured_tx.lock().unwrap().clone()
    }
}

impl Drop for SlcanPort {
    fn drop(&mut self) {
        if self.is_connected() {
            let _ = self.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    /// Injects `bytes` as soon as the port has transmitted a request.
    fn respond_later(port: &Arc<SlcanPort>, bytes: &'static [u8]) -> thread::JoinHandle<()> {
        let port = Arc::clone(port);
        thread::spawn(move || {
            for _ in 0..500 {
                if !port.captured().is_empty() {
                    break;
                }
                thread::sleep(Duration::from_millis(1));
            }
            port.inject(bytes);
        })
    }

    #[test]
    fn received_frames_go_to_the_queue_in_order() {
        let port = SlcanPort::new(8);
        port.inject(b"t1002AABB\rt2001CC\r");

        let first = port.read_message(0).unwrap();
        assert_eq!(first.raw_id(), 0x100);
        assert_eq!(first.data(), Some(&[0xAA, 0xBB][..]));
        assert!(first.timestamp().is_some());

        let second = port.read_message(0).unwrap();
        assert_eq!(second.raw_id(), 0x200);

        assert!(matches!(port.read_message(0), Err(SlcanError::Empty)));
    }

    #[test]
    fn extended_rtr_indication_is_decoded() {
        let port = SlcanPort::new(8);
        port.inject(b"R1FFFFFFF0\r");
        let frame = port.read_message(0).unwrap();
        assert_eq!(frame.raw_id(), 0x1FFF_FFFF);
        assert!(frame.is_extended());
        assert!(frame.is_remote());
        assert_eq!(frame.dlc(), 0);
    }

    #[test]
    fn frame_with_rx_timestamp_suffix_is_accepted() {
        let port = SlcanPort::new(8);
        port.inject(b"t456811223344556677885A\r");
        let frame = port.read_message(0).unwrap();
        assert_eq!(frame.raw_id(), 0x456);
        assert_eq!(frame.dlc(), 8);
    }

    #[test]
    fn malformed_lines_are_discarded_silently() {
        let port = SlcanPort::new(8);
        port.inject(b"tXYZ\rt1001FF\r");
        let frame = port.read_message(0).unwrap();
        assert_eq!(frame.raw_id(), 0x100);
        assert!(matches!(port.read_message(0), Err(SlcanError::Empty)));
    }

    #[test]
    fn queue_overflow_drops_the_newest_frame() {
        let port = SlcanPort::new(4);
        for _ in 0..5 {
            port.inject(b"t0011AA\r");
        }
        for _ in 0..4 {
            port.read_message(0).unwrap();
        }
        assert!(matches!(port.read_message(0), Err(SlcanError::Empty)));
        assert_eq!(port.queue_overflow(), (true, 1));
    }

    #[test]
    fn setup_btr_sends_expected_bytes_and_accepts_cr() {
        let port = Arc::new(SlcanPort::new(8));
        let responder = respond_later(&port, b"\r");
        port.setup_btr(0x011C).unwrap();
        responder.join().unwrap();
        assert_eq!(port.captured(), vec![b"s011C\r".to_vec()]);
    }

    #[test]
    fn nack_maps_to_bad_message() {
        let port = Arc::new(SlcanPort::new(8));
        let responder = respond_later(&port, b"\x07");
        assert!(matches!(
            port.setup_btr(0x001C),
            Err(SlcanError::BadMessage)
        ));
        responder.join().unwrap();
    }

    #[test]
    fn missing_response_times_out() {
        let port = SlcanPort::new(8);
        assert!(matches!(port.open_channel(), Err(SlcanError::Timeout)));
    }

    #[test]
    fn transmit_confirmation_must_match_frame_format() {
        use embedded_can::StandardId;

        let frame = CanFrame::new_data(StandardId::new(0x123).unwrap(), &[0xAB, 0xCD, 0xEF])
            .unwrap();

        let port = Arc::new(SlcanPort::new(8));
        let responder = respond_later(&port, b"z\r");
        port.write_message(&frame, 0).unwrap();
        responder.join().unwrap();
        assert_eq!(port.captured(), vec![b"t1233ABCDEF\r".to_vec()]);

        // an extended confirmation for a standard frame is a protocol error
        let port = Arc::new(SlcanPort::new(8));
        let responder = respond_later(&port, b"Z\r");
        assert!(matches!(
            port.write_message(&frame, 0),
            Err(SlcanError::BadMessage)
        ));
        responder.join().unwrap();
    }

    #[test]
    fn version_response_is_unpacked() {
        let port = Arc::new(SlcanPort::new(8));
        let responder = respond_later(&port, b"V1025\r");
        assert_eq!(port.version_number().unwrap(), (0x10, 0x25));
        responder.join().unwrap();
    }

    #[test]
    fn serial_number_response_is_unpacked() {
        let port = Arc::new(SlcanPort::new(8));
        let responder = respond_later(&port, b"NA123\r");
        assert_eq!(port.serial_number().unwrap(), 0xA123);
        responder.join().unwrap();
    }

    #[test]
    fn status_flags_decode_sja1000_bits() {
        let port = Arc::new(SlcanPort::new(8));
        let responder = respond_later(&port, b"F91\r");
        let flags = port.status_flags().unwrap();
        responder.join().unwrap();
        assert!(flags.bus_error());
        assert!(flags.data_overrun());
        assert!(flags.rx_fifo_full());
        assert!(!flags.error_warning());
    }

    #[test]
    fn canable_mode_rejects_commands_without_responses() {
        let port = SlcanPort::new(8);
        assert!(port.set_ack(false));
        assert!(matches!(port.setup_btr(0x011C), Err(SlcanError::BadMessage)));
        #[cfg(not(feature = "canable-stub"))]
        {
            assert!(matches!(port.status_flags(), Err(SlcanError::BadMessage)));
            assert!(matches!(port.version_number(), Err(SlcanError::BadMessage)));
        }
        assert!(matches!(port.serial_number(), Err(SlcanError::BadMessage)));
    }

    #[test]
    fn canable_set_commands_are_fire_and_forget() {
        let port = SlcanPort::new(8);
        port.set_ack(false);
        port.setup_bitrate(6).unwrap();
        port.open_channel().unwrap();
        port.close_channel().unwrap();
        assert_eq!(
            port.captured(),
            vec![b"S6\r".to_vec(), b"O\r".to_vec(), b"C\r".to_vec()]
        );
    }

    #[test]
    fn signal_unblocks_a_pending_read() {
        let port = Arc::new(SlcanPort::new(8));
        let reader = {
            let port = Arc::clone(&port);
            thread::spawn(move || port.read_message(crate::TIMEOUT_INFINITE))
        };
        thread::sleep(Duration::from_millis(20));
        port.signal();
        assert!(matches!(reader.join().unwrap(), Err(SlcanError::Empty)));
    }

    #[test]
    fn overlong_lines_resynchronize_at_the_next_cr() {
        let port = SlcanPort::new(8);
        let mut garbage = vec![b'#'; 300];
        garbage.push(b'\r');
        port.inject(&garbage);
        port.inject(b"t0011AA\r");
        assert!(port.read_message(0).is_ok());
    }

    #[test]
    fn predefined_bitrate_index_is_validated() {
        let port = SlcanPort::new(8);
        assert!(matches!(port.setup_bitrate(9), Err(SlcanError::Parameter)));
    }
}
