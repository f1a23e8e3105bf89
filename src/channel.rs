//! CAN channel façade: handle table, per-channel state and the property
//! surface.
//!
//! The table is process-wide; a handle is an index into it. Every channel
//! record exclusively owns its SLCAN port, so closing a channel releases
//! the slot for the next open.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use serialport::{DataBits, Parity, StopBits};

use crate::bittiming::{self, Bitrate, BitrateSetting, BusSpeed};
use crate::error::CanError;
use crate::frame::CanFrame;
use crate::serial::SerialAttr;
use crate::slcan::{SlcanError, SlcanPort, StatusFlags};

/// Maximum number of concurrently open channels.
pub const MAX_HANDLES: usize = 16;

/// Sentinel accepted by [`exit`] and [`kill`] to address every open
/// channel at once.
pub const ALL_HANDLES: i32 = -1;

/// Channel number of the serial-line interface in the channel listing.
pub const CHANNEL_SERIAL: i32 = -1;

/// Size of the reception queue created for every channel (messages).
const QUEUE_SIZE: usize = 65536;

/// Bit-timing programmed before the first `start` (250 kbit/s).
const BTR_DEFAULT: u16 = 0x011C;

const LIBRARY_ID: i32 = 900;
const LIBRARY_DLLNAME: &str = "libserialcan.so";
const VENDOR_NAME: &str = "SerialCAN";

/* property identifiers (library scope) */
pub const PROP_SPEC: u16 = 0;
pub const PROP_VERSION: u16 = 1;
pub const PROP_PATCH_NO: u16 = 2;
pub const PROP_BUILD_NO: u16 = 3;
pub const PROP_LIBRARY_ID: u16 = 4;
pub const PROP_LIBRARY_VENDOR: u16 = 5;
pub const PROP_LIBRARY_DLLNAME: u16 = 6;
/* property identifiers (device scope) */
pub const PROP_DEVICE_TYPE: u16 = 10;
pub const PROP_DEVICE_NAME: u16 = 11;
pub const PROP_DEVICE_VENDOR: u16 = 12;
pub const PROP_DEVICE_DLLNAME: u16 = 13;
pub const PROP_DEVICE_PARAM: u16 = 14;
pub const PROP_OP_CAPABILITY: u16 = 15;
pub const PROP_OP_MODE: u16 = 16;
pub const PROP_BITRATE: u16 = 17;
pub const PROP_SPEED: u16 = 18;
pub const PROP_STATUS: u16 = 19;
pub const PROP_BUSLOAD: u16 = 20;
pub const PROP_TX_COUNTER: u16 = 24;
pub const PROP_RX_COUNTER: u16 = 25;
pub const PROP_ERR_COUNTER: u16 = 26;
/* bit-rate conversion helpers */
pub const PROP_BTR_INDEX: u16 = 64;
pub const PROP_BTR_VALUE: u16 = 65;
pub const PROP_BTR_SPEED: u16 = 66;
pub const PROP_BTR_STRING: u16 = 67;
pub const PROP_BTR_SJA1000: u16 = 68;
/* channel enumeration */
pub const PROP_SET_FIRST_CHANNEL: u16 = 240;
pub const PROP_SET_NEXT_CHANNEL: u16 = 241;
pub const PROP_CHANNEL_NO: u16 = 242;
pub const PROP_CHANNEL_NAME: u16 = 243;
pub const PROP_CHANNEL_DLLNAME: u16 = 244;
pub const PROP_CHANNEL_VENDOR_ID: u16 = 245;
pub const PROP_CHANNEL_VENDOR_NAME: u16 = 246;
pub const PROP_CPP_BACKDOOR: u16 = 255;
/* vendor-specific adapter queries */
pub const PROP_VENDOR_PROP: u16 = 256;
pub const PROP_SERIAL_NUMBER: u16 = PROP_VENDOR_PROP;
pub const PROP_HARDWARE_VERSION: u16 = PROP_VENDOR_PROP + 1;
pub const PROP_FIRMWARE_VERSION: u16 = PROP_VENDOR_PROP + 2;
pub const PROP_CLOCK_FREQUENCY: u16 = PROP_VENDOR_PROP + 3;

/// Operation mode of a CAN channel, a byte of bit-flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpMode(u8);

impl OpMode {
    pub const DEFAULT: OpMode = OpMode(0x00);
    /// Listen-only (monitor) mode
    pub const MONITOR: u8 = 0x01;
    /// Accept error frames
    pub const ERR: u8 = 0x02;
    /// Suppress remote frames
    pub const NRTR: u8 = 0x04;
    /// Suppress extended frames
    pub const NXTD: u8 = 0x08;
    /// Permit multiple opens of the same device
    pub const SHARED: u8 = 0x10;

    /// Modes this driver supports; the CAN FD flags (0x20..0x80) are
    /// rejected by the classic-CAN build.
    pub const SUPPORTED: u8 =
        Self::MONITOR | Self::ERR | Self::NRTR | Self::NXTD | Self::SHARED;

    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    pub fn byte(&self) -> u8 {
        self.0
    }

    pub fn is_supported(&self) -> bool {
        self.0 & !Self::SUPPORTED == 0
    }

    pub fn monitor(&self) -> bool {
        self.0 & Self::MONITOR != 0
    }

    pub fn nrtr(&self) -> bool {
        self.0 & Self::NRTR != 0
    }

    pub fn nxtd(&self) -> bool {
        self.0 & Self::NXTD != 0
    }

    pub fn shared(&self) -> bool {
        self.0 & Self::SHARED != 0
    }
}

/// Status register of a CAN channel, a byte of bit-flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status(u8);

impl Status {
    pub const QUEUE_OVERRUN: u8 = 0x01;
    pub const MESSAGE_LOST: u8 = 0x02;
    pub const RECEIVER_EMPTY: u8 = 0x04;
    pub const TRANSMITTER_BUSY: u8 = 0x08;
    pub const BUS_ERROR: u8 = 0x10;
    pub const WARNING_LEVEL: u8 = 0x20;
    pub const BUS_OFF: u8 = 0x40;
    pub const CAN_STOPPED: u8 = 0x80;

    pub fn byte(&self) -> u8 {
        self.0
    }

    pub fn can_stopped(&self) -> bool {
        self.0 & Self::CAN_STOPPED != 0
    }

    pub fn queue_overrun(&self) -> bool {
        self.0 & Self::QUEUE_OVERRUN != 0
    }

    pub fn message_lost(&self) -> bool {
        self.0 & Self::MESSAGE_LOST != 0
    }

    pub fn receiver_empty(&self) -> bool {
        self.0 & Self::RECEIVER_EMPTY != 0
    }

    pub fn transmitter_busy(&self) -> bool {
        self.0 & Self::TRANSMITTER_BUSY != 0
    }

    pub fn bus_error(&self) -> bool {
        self.0 & Self::BUS_ERROR != 0
    }

    pub fn warning_level(&self) -> bool {
        self.0 & Self::WARNING_LEVEL != 0
    }

    pub fn bus_off(&self) -> bool {
        self.0 & Self::BUS_OFF != 0
    }

    fn set(&mut self, flag: u8, on: bool) {
        if on {
            self.0 |= flag;
        } else {
            self.0 &= !flag;
        }
    }
}

/// Result of probing a channel before opening it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    Present,
    NotPresent,
    /// The device is already held by a channel of this process.
    Occupied,
    /// Serial devices cannot be probed without opening them.
    NotTestable,
}

/// Parameters for opening a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceParams {
    /// Name of the serial port device (e.g. `/dev/ttyUSB0`, `COM3`)
    pub name: String,
    pub attr: SerialAttr,
    /// ACK/NACK feedback (Lawicel dialect); disable for CANable firmware
    pub ack: bool,
}

impl DeviceParams {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attr: SerialAttr::default(),
            ack: true,
        }
    }
}

/// Bit-rate read-back: the last programmed values plus whether the
/// controller is currently started.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BitrateInfo {
    pub bitrate: Bitrate,
    pub speed: BusSpeed,
    pub online: bool,
}

/// One entry of the interface enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub channel: i32,
    pub name: String,
    pub driver: String,
    pub vendor: String,
    pub library_id: i32,
}

fn interface_list() -> [ChannelInfo; 1] {
    [ChannelInfo {
        channel: CHANNEL_SERIAL,
        name: String::from("CAN-over-Serial-Line (SLCAN)"),
        driver: String::from(LIBRARY_DLLNAME),
        vendor: String::from(VENDOR_NAME),
        library_id: LIBRARY_ID,
    }]
}

#[derive(Debug, Clone, Copy)]
struct Counters {
    tx: u64,
    rx: u64,
    err: u64,
}

struct ChannelState {
    status: Status,
    counters: Counters,
    btr0btr1: u16,
}

struct Channel {
    port: SlcanPort,
    name: String,
    attr: SerialAttr,
    mode: OpMode,
    state: Mutex<ChannelState>,
}

fn table() -> &'static Mutex<Vec<Option<Arc<Channel>>>> {
    static TABLE: OnceLock<Mutex<Vec<Option<Arc<Channel>>>>> = OnceLock::new();
    TABLE.get_or_init(|| Mutex::new(vec![None; MAX_HANDLES]))
}

static INITIALIZED: AtomicBool = AtomicBool::new(false);

fn require_init() -> Result<(), CanError> {
    if INITIALIZED.load(Ordering::Acquire) {
        Ok(())
    } else {
        Err(CanError::NotInitialized)
    }
}

fn channel(handle: i32) -> Result<Arc<Channel>, CanError> {
    require_init()?;
    let table = table().lock().unwrap();
    usize::try_from(handle)
        .ok()
        .filter(|&h| h < MAX_HANDLES)
        .and_then(|h| table[h].clone())
        .ok_or(CanError::Handle)
}

/// Checks whether the named device could be opened with the requested
/// mode. Serial devices are not testable without opening them; a device
/// already held by this process reports [`ProbeState::Occupied`].
pub(crate) fn probe(params: &DeviceParams, mode: OpMode) -> Result<ProbeState, CanError> {
    INITIALIZED.store(true, Ordering::Release);
    if !mode.is_supported() {
        return Err(CanError::IllegalParameter);
    }

    let table = table().lock().unwrap();
    let occupied = table
        .iter()
        .flatten()
        .any(|chan| chan.name == params.name);
    Ok(if occupied {
        ProbeState::Occupied
    } else {
        ProbeState::NotTestable
    })
}

/// Opens a channel on the named device and returns its handle.
///
/// The serial port is connected with the given attributes, the SLCAN
/// protocol is confirmed with a version query (Lawicel dialect only) and
/// the CAN channel is closed in case the adapter was left running. The
/// controller starts in the stopped state.
pub(crate) fn init(params: &DeviceParams, mode: OpMode) -> Result<i32, CanError> {
    INITIALIZED.store(true, Ordering::Release);
    if !mode.is_supported() {
        return Err(CanError::IllegalParameter);
    }
    {
        let table = table().lock().unwrap();
        if table.iter().flatten().any(|chan| chan.name == params.name) {
            return Err(CanError::AlreadyInitialized);
        }
        if !table.iter().any(Option::is_none) {
            return Err(CanError::Handle);
        }
    }

    let port = SlcanPort::new(QUEUE_SIZE);
    if !params.ack {
        port.set_ack(false);
    }
    port.connect(&params.name, params.attr)?;

    // protocol probe; also rules out a dumb serial device on the far end
    if port.ack() {
        if let Err(e) = port.version_number() {
            let _ = port.disconnect();
            return Err(e.into());
        }
    }
    // the adapter may have been left running by a previous process
    let _ = port.close_channel();

    let attr = port.attr().unwrap_or(params.attr);
    let chan = Arc::new(Channel {
        port,
        name: params.name.clone(),
        attr,
        mode,
        state: Mutex::new(ChannelState {
            status: Status(Status::CAN_STOPPED),
            counters: Counters {
                tx: 0,
                rx: 0,
                err: 0,
            },
            btr0btr1: BTR_DEFAULT,
        }),
    });

    let mut table = table().lock().unwrap();
    if table.iter().flatten().any(|c| c.name == params.name) {
        drop(table);
        let _ = chan.port.disconnect();
        return Err(CanError::AlreadyInitialized);
    }
    match table.iter().position(Option::is_none) {
        Some(slot) => {
            table[slot] = Some(chan);
            log::info!("channel {slot} opened on {}", params.name);
            Ok(slot as i32)
        }
        None => {
            drop(table);
            let _ = chan.port.disconnect();
            Err(CanError::Handle)
        }
    }
}

/// Closes a channel (or all of them with [`ALL_HANDLES`]): stops the
/// controller if running, disconnects the device and releases the slot.
pub(crate) fn exit(handle: i32) -> Result<(), CanError> {
    require_init()?;
    if handle != ALL_HANDLES {
        let chan = channel(handle)?;
        if !chan.state.lock().unwrap().status.can_stopped() {
            let _ = reset(handle);
        }
        chan.port.disconnect()?;
        table().lock().unwrap()[handle as usize] = None;
        log::info!("channel {handle} closed");
    } else {
        for handle in 0..MAX_HANDLES as i32 {
            if let Ok(chan) = channel(handle) {
                if !chan.state.lock().unwrap().status.can_stopped() {
                    let _ = reset(handle);
                }
                let _ = chan.port.disconnect();
                table().lock().unwrap()[handle as usize] = None;
            }
        }
    }
    Ok(())
}

/// Wakes every caller blocked on the channel (or on all channels with
/// [`ALL_HANDLES`]) without tearing any state down.
pub(crate) fn kill(handle: i32) -> Result<(), CanError> {
    require_init()?;
    if handle != ALL_HANDLES {
        channel(handle)?.port.signal();
    } else {
        let ports: Vec<_> = table().lock().unwrap().iter().flatten().cloned().collect();
        for chan in ports {
            chan.port.signal();
        }
    }
    Ok(())
}

/// Starts the CAN controller with the given bit-rate. The controller must
/// be stopped; counters and status are reset on success.
pub(crate) fn start(handle: i32, bitrate: &BitrateSetting) -> Result<(), CanError> {
    let chan = channel(handle)?;
    if !chan.state.lock().unwrap().status.can_stopped() {
        return Err(CanError::Online);
    }

    let timing = bitrate.resolve().map_err(|_| CanError::Baudrate)?;
    let btr0btr1 = bittiming::bitrate_to_btr(&timing).map_err(|_| CanError::Baudrate)?;

    chan.port.setup_btr(btr0btr1)?;
    chan.port.open_channel()?;

    let mut state = chan.state.lock().unwrap();
    state.status = Status(0x00);
    state.counters = Counters {
        tx: 0,
        rx: 0,
        err: 0,
    };
    state.btr0btr1 = btr0btr1;
    log::debug!("channel {handle} started (btr {btr0btr1:#06x})");
    Ok(())
}

/// Stops the CAN controller; a stopped controller is left untouched.
pub(crate) fn reset(handle: i32) -> Result<(), CanError> {
    let chan = channel(handle)?;
    if chan.state.lock().unwrap().status.can_stopped() {
        return Ok(());
    }
    chan.port.close_channel()?;
    chan.state
        .lock()
        .unwrap()
        .status
        .set(Status::CAN_STOPPED, true);
    log::debug!("channel {handle} stopped");
    Ok(())
}

/// Transmits one frame. The controller must be started; frames the
/// operation mode suppresses are rejected without touching the wire.
pub(crate) fn write(handle: i32, frame: &CanFrame, timeout: u16) -> Result<(), CanError> {
    let chan = channel(handle)?;
    if chan.state.lock().unwrap().status.can_stopped() {
        return Err(CanError::Offline);
    }
    if frame.is_status() {
        return Err(CanError::IllegalParameter);
    }
    if frame.is_extended() && chan.mode.nxtd() {
        return Err(CanError::IllegalParameter);
    }
    if frame.is_remote() && chan.mode.nrtr() {
        return Err(CanError::IllegalParameter);
    }

    let result = chan.port.write_message(frame, timeout);

    let mut state = chan.state.lock().unwrap();
    state
        .status
        .set(Status::TRANSMITTER_BUSY, result.is_err());
    if result.is_ok() {
        state.counters.tx += 1;
    }
    result.map_err(CanError::from)
}

/// Takes one received frame out of the channel queue, waiting up to
/// `timeout` milliseconds. A queue overflow since the last start is
/// surfaced in the status register on the next successful read.
pub(crate) fn read(handle: i32, timeout: u16) -> Result<CanFrame, CanError> {
    let chan = channel(handle)?;
    if chan.state.lock().unwrap().status.can_stopped() {
        return Err(CanError::Offline);
    }

    let result = chan.port.read_message(timeout);

    let mut state = chan.state.lock().unwrap();
    match result {
        Ok(frame) => {
            if frame.is_status() {
                state.counters.err += 1;
            } else {
                state.counters.rx += 1;
            }
            state.status.set(Status::RECEIVER_EMPTY, false);
            if chan.port.queue_overflow().0 {
                state.status.set(Status::QUEUE_OVERRUN, true);
            }
            Ok(frame)
        }
        Err(e) => {
            state.status.set(Status::RECEIVER_EMPTY, true);
            Err(e.into())
        }
    }
}

/// Returns the status register. A started channel folds in the adapter's
/// status flags first; in the CANable dialect the flags read as zero.
pub(crate) fn status(handle: i32) -> Result<Status, CanError> {
    let chan = channel(handle)?;

    if !chan.state.lock().unwrap().status.can_stopped() {
        let flags = match chan.port.status_flags() {
            Ok(flags) => flags,
            Err(SlcanError::BadMessage) if !chan.port.ack() => StatusFlags::default(),
            Err(e) => return Err(e.into()),
        };
        let mut state = chan.state.lock().unwrap();
        state.status.set(
            Status::MESSAGE_LOST,
            flags.data_overrun() || flags.rx_fifo_full() || flags.tx_fifo_full(),
        );
        state.status.set(Status::BUS_ERROR, flags.bus_error());
        state.status.set(
            Status::WARNING_LEVEL,
            flags.error_warning() || flags.error_passive(),
        );
        state.status.set(Status::BUS_OFF, flags.arbitration_lost());
    }
    let status = chan.state.lock().unwrap().status;
    Ok(status)
}

/// Bus load in percent; not measured by this driver, always 0.
pub(crate) fn busload(handle: i32) -> Result<(u8, Status), CanError> {
    let status = status(handle)?;
    Ok((0, status))
}

/// Reconstructs the bit-rate from the last programmed BTR0BTR1 word.
pub(crate) fn bitrate(handle: i32) -> Result<BitrateInfo, CanError> {
    let chan = channel(handle)?;
    let state = chan.state.lock().unwrap();
    let bitrate = bittiming::btr_to_bitrate(state.btr0btr1);
    Ok(BitrateInfo {
        bitrate,
        speed: bittiming::bitrate_to_speed(&bitrate),
        online: !state.status.can_stopped(),
    })
}

/// Formatted hardware version of the adapter behind the channel.
pub(crate) fn hardware_version(handle: i32) -> Result<String, CanError> {
    let chan = channel(handle)?;
    let (hardware, _) = chan.port.version_number()?;
    Ok(format!(
        "Hardware {}.{} ({}:{},{}-{}-{})",
        hardware >> 4,
        hardware & 0xF,
        chan.name,
        chan.attr.baudrate,
        data_bits_no(chan.attr.data_bits),
        parity_char(chan.attr.parity),
        stop_bits_no(chan.attr.stop_bits),
    ))
}

/// Formatted firmware version of the adapter behind the channel.
pub(crate) fn firmware_version(handle: i32) -> Result<String, CanError> {
    let chan = channel(handle)?;
    let (_, software) = chan.port.version_number()?;
    Ok(format!(
        "Firmware {}.{} (SLCAN protocol)",
        software >> 4,
        software & 0xF
    ))
}

fn data_bits_no(data_bits: DataBits) -> u8 {
    match data_bits {
        DataBits::Five => 5,
        DataBits::Six => 6,
        DataBits::Seven => 7,
        DataBits::Eight => 8,
    }
}

fn parity_char(parity: Parity) -> char {
    match parity {
        Parity::None => 'N',
        Parity::Odd => 'O',
        Parity::Even => 'E',
    }
}

fn stop_bits_no(stop_bits: StopBits) -> u8 {
    match stop_bits {
        StopBits::One => 1,
        StopBits::Two => 2,
    }
}

fn iterator_index() -> &'static Mutex<Option<usize>> {
    static INDEX: OnceLock<Mutex<Option<usize>>> = OnceLock::new();
    INDEX.get_or_init(|| Mutex::new(None))
}

/// Resets the channel enumeration and returns the first entry.
pub(crate) fn first_channel() -> Option<ChannelInfo> {
    let mut index = iterator_index().lock().unwrap();
    *index = Some(0);
    interface_list().first().cloned()
}

/// Advances the channel enumeration and returns the next entry.
pub(crate) fn next_channel() -> Option<ChannelInfo> {
    let mut index = iterator_index().lock().unwrap();
    let next = index.map(|i| i + 1)?;
    *index = Some(next);
    interface_list().get(next).cloned()
}

fn put_bytes(buf: &mut [u8], bytes: &[u8]) -> Result<usize, CanError> {
    if buf.len() < bytes.len() {
        return Err(CanError::IllegalParameter);
    }
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(bytes.len())
}

fn put_str(buf: &mut [u8], s: &str) -> Result<usize, CanError> {
    put_bytes(buf, s.as_bytes())
}

fn put_bitrate(buf: &mut [u8], bitrate: &Bitrate) -> Result<usize, CanError> {
    let mut bytes = Vec::with_capacity(13);
    bytes.extend_from_slice(&bitrate.frequency.to_le_bytes());
    bytes.extend_from_slice(&bitrate.brp.to_le_bytes());
    bytes.extend_from_slice(&bitrate.tseg1.to_le_bytes());
    bytes.extend_from_slice(&bitrate.tseg2.to_le_bytes());
    bytes.extend_from_slice(&bitrate.sjw.to_le_bytes());
    bytes.push(bitrate.sam);
    put_bytes(buf, &bytes)
}

fn put_speed(buf: &mut [u8], speed: &BusSpeed) -> Result<usize, CanError> {
    let mut bytes = Vec::with_capacity(8);
    bytes.extend_from_slice(&speed.speed.to_le_bytes());
    bytes.extend_from_slice(&speed.sample_point.to_le_bytes());
    put_bytes(buf, &bytes)
}

/// Library-scope properties; valid without any open handle.
fn lib_property(param: u16, buf: &mut [u8]) -> Result<usize, CanError> {
    match param {
        PROP_SPEC => put_bytes(buf, &0x0300u16.to_le_bytes()),
        PROP_VERSION => {
            let major: u16 = env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0);
            let minor: u16 = env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0);
            put_bytes(buf, &((major << 8) | (minor & 0xF)).to_le_bytes())
        }
        PROP_PATCH_NO => {
            let patch: u8 = env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or(0);
            put_bytes(buf, &[patch])
        }
        PROP_BUILD_NO => put_bytes(buf, &0u32.to_le_bytes()),
        PROP_LIBRARY_ID => put_bytes(buf, &LIBRARY_ID.to_le_bytes()),
        PROP_LIBRARY_VENDOR => put_str(buf, VENDOR_NAME),
        PROP_LIBRARY_DLLNAME => put_str(buf, LIBRARY_DLLNAME),
        PROP_SET_FIRST_CHANNEL => first_channel()
            .map(|_| 0)
            .ok_or(CanError::Resource),
        PROP_SET_NEXT_CHANNEL => next_channel().map(|_| 0).ok_or(CanError::Resource),
        PROP_CHANNEL_NO => {
            let info = current_channel_entry()?;
            put_bytes(buf, &info.channel.to_le_bytes())
        }
        PROP_CHANNEL_NAME => {
            let info = current_channel_entry()?;
            put_str(buf, &info.name)
        }
        PROP_CHANNEL_DLLNAME => {
            let info = current_channel_entry()?;
            put_str(buf, &info.driver)
        }
        PROP_CHANNEL_VENDOR_ID => {
            let info = current_channel_entry()?;
            put_bytes(buf, &info.library_id.to_le_bytes())
        }
        PROP_CHANNEL_VENDOR_NAME => {
            let info = current_channel_entry()?;
            put_str(buf, &info.vendor)
        }
        _ => Err(CanError::NotSupported),
    }
}

fn current_channel_entry() -> Result<ChannelInfo, CanError> {
    let index = iterator_index().lock().unwrap();
    index
        .and_then(|i| interface_list().get(i).cloned())
        .ok_or(CanError::Resource)
}

/// Reads a property value into `buf` and returns the number of bytes
/// written. Device-scope properties need a valid handle; library-scope
/// properties fall through for any handle.
pub(crate) fn property(handle: i32, param: u16, buf: &mut [u8]) -> Result<usize, CanError> {
    let chan = match channel(handle) {
        Ok(chan) => chan,
        Err(_) => return lib_property(param, buf),
    };

    match param {
        PROP_DEVICE_TYPE => put_bytes(buf, &CHANNEL_SERIAL.to_le_bytes()),
        PROP_DEVICE_NAME => put_str(buf, &chan.name),
        PROP_DEVICE_VENDOR => put_str(buf, VENDOR_NAME),
        PROP_DEVICE_DLLNAME => put_str(buf, LIBRARY_DLLNAME),
        PROP_DEVICE_PARAM => {
            let text = format!(
                "{}:{},{}-{}-{}",
                chan.name,
                chan.attr.baudrate,
                data_bits_no(chan.attr.data_bits),
                parity_char(chan.attr.parity),
                stop_bits_no(chan.attr.stop_bits)
            );
            put_str(buf, &text)
        }
        PROP_OP_CAPABILITY => put_bytes(buf, &[OpMode::SUPPORTED]),
        PROP_OP_MODE => put_bytes(buf, &[chan.mode.byte()]),
        PROP_BITRATE | PROP_BTR_VALUE => {
            let info = bitrate(handle)?;
            put_bitrate(buf, &info.bitrate)
        }
        PROP_SPEED | PROP_BTR_SPEED => {
            let info = bitrate(handle)?;
            put_speed(buf, &info.speed)
        }
        PROP_STATUS => {
            let status = status(handle)?;
            put_bytes(buf, &[status.byte()])
        }
        PROP_BUSLOAD => {
            let (load, _) = busload(handle)?;
            if buf.len() > 1 {
                // 0..10000 => 0.00%..100.00%
                put_bytes(buf, &(u16::from(load) * 100).to_le_bytes())
            } else {
                put_bytes(buf, &[load])
            }
        }
        PROP_TX_COUNTER => {
            let state = chan.state.lock().unwrap();
            put_bytes(buf, &state.counters.tx.to_le_bytes())
        }
        PROP_RX_COUNTER => {
            let state = chan.state.lock().unwrap();
            put_bytes(buf, &state.counters.rx.to_le_bytes())
        }
        PROP_ERR_COUNTER => {
            let state = chan.state.lock().unwrap();
            put_bytes(buf, &state.counters.err.to_le_bytes())
        }
        PROP_BTR_INDEX => {
            let info = bitrate(handle)?;
            let index =
                bittiming::bitrate_to_index(&info.bitrate).map_err(|_| CanError::Baudrate)?;
            put_bytes(buf, &index.to_le_bytes())
        }
        PROP_BTR_STRING => {
            let info = bitrate(handle)?;
            put_str(buf, &bittiming::bitrate_to_string(&info.bitrate, false))
        }
        PROP_BTR_SJA1000 => {
            let state = chan.state.lock().unwrap();
            put_bytes(buf, &state.btr0btr1.to_le_bytes())
        }
        PROP_CPP_BACKDOOR => put_bytes(buf, &handle.to_le_bytes()),
        PROP_SERIAL_NUMBER => {
            let number = chan.port.serial_number()?;
            put_bytes(buf, &number.to_le_bytes())
        }
        PROP_HARDWARE_VERSION => {
            let (hardware, _) = chan.port.version_number()?;
            let value = (u16::from(hardware & 0xF0) << 4) | u16::from(hardware & 0x0F);
            put_bytes(buf, &value.to_le_bytes())
        }
        PROP_FIRMWARE_VERSION => {
            let (_, software) = chan.port.version_number()?;
            let value = (u16::from(software & 0xF0) << 4) | u16::from(software & 0x0F);
            put_bytes(buf, &value.to_le_bytes())
        }
        PROP_CLOCK_FREQUENCY => {
            put_bytes(buf, &(bittiming::CLOCK_FREQUENCY as i32).to_le_bytes())
        }
        _ => lib_property(param, buf),
    }
}
