//! Serial port transport with a background reception thread.
//!
//! `SerialIo` owns the TTY handle and a dedicated reader thread that drains
//! the port in chunks of up to 1 KiB, handing every non-empty read to the
//! [`RxHandler`] sink. Transmission is synchronous and exclusive.

use std::io;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};

/// Largest single read performed by the reception thread.
const READ_CHUNK: usize = 1024;

/// Poll interval of the reception thread; bounds the disconnect latency.
const READ_TIMEOUT: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("serial port already connected")]
    AlreadyConnected,
    #[error("serial port not connected")]
    NotConnected,
    #[error("incomplete transmission")]
    Busy,
    #[error("serial port error: {0}")]
    Port(#[from] serialport::Error),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Serial line attributes applied at connect time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SerialAttr {
    pub baudrate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl Default for SerialAttr {
    /// 57600 baud, 8N1 (the SLCAN adapter default).
    fn default() -> Self {
        Self {
            baudrate: 57_600,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
        }
    }
}

/// Sink for bytes arriving on the reception thread.
///
/// Implementations must not block; they run on the reader thread and a
/// stalled handler stalls reception for the whole port.
pub trait RxHandler: Send + Sync {
    fn on_rx(&self, bytes: &[u8]);
}

struct Connection {
    port: Box<dyn SerialPort>,
    attr: SerialAttr,
    cancel: Arc<AtomicBool>,
    reader: Option<thread::JoinHandle<()>>,
}

pub struct SerialIo {
    handler: Arc<dyn RxHandler>,
    conn: Mutex<Option<Connection>>,
}

impl SerialIo {
    pub fn new(handler: Arc<dyn RxHandler>) -> Self {
        Self {
            handler,
            conn: Mutex::new(None),
        }
    }

    /// Opens the named device, applies the attributes, flushes both
    /// directions and spawns the reception thread.
    pub fn connect(&self, device: &str, attr: SerialAttr) -> Result<(), SerialError> {
        let mut conn = self.conn.lock().unwrap();
        if conn.is_some() {
            return Err(SerialError::AlreadyConnected);
        }

        let port = serialport::new(device, attr.baudrate)
            .data_bits(attr.data_bits)
            .parity(attr.parity)
            .stop_bits(attr.stop_bits)
            .timeout(READ_TIMEOUT)
            .open()?;
        port.clear(ClearBuffer::All)?;

        let reader_port = port.try_clone()?;
        let cancel = Arc::new(AtomicBool::new(false));
        let reader = thread::Builder::new()
            .name(format!("serialcan-rx {device}"))
            .spawn({
                let handler = Arc::clone(&self.handler);
                let cancel = Arc::clone(&cancel);
                move || reception_loop(reader_port, handler, cancel)
            })
            .map_err(SerialError::Io)?;

        log::debug!("connected to {device} at {} baud", attr.baudrate);
        *conn = Some(Connection {
            port,
            attr,
            cancel,
            reader: Some(reader),
        });
        Ok(())
    }

    /// Stops and joins the reception thread, purges pending I/O and closes
    /// the device.
    pub fn disconnect(&self) -> Result<(), SerialError> {
        let mut conn = self.conn.lock().unwrap();
        let mut connection = conn.take().ok_or(SerialError::NotConnected)?;

        connection.cancel.store(true, Ordering::Release);
        if let Some(reader) = connection.reader.take() {
            // the reader polls with READ_TIMEOUT, so the join is bounded
            let _ = reader.join();
        }
        let _ = connection.port.clear(ClearBuffer::All);
        log::debug!("disconnected");
        Ok(())
    }

    /// Writes the whole buffer synchronously. A short write is reported as
    /// [`SerialError::Busy`].
    pub fn transmit(&self, buf: &[u8]) -> Result<(), SerialError> {
        let mut conn = self.conn.lock().unwrap();
        let connection = conn.as_mut().ok_or(SerialError::NotConnected)?;

        let written = connection.port.write(buf)?;
        if written != buf.len() {
            return Err(SerialError::Busy);
        }
        connection.port.flush()?;
        Ok(())
    }

    /// Attributes the port was connected with.
    pub fn attr(&self) -> Result<SerialAttr, SerialError> {
        let conn = self.conn.lock().unwrap();
        conn.as_ref()
            .map(|c| c.attr)
            .ok_or(SerialError::NotConnected)
    }

    pub fn is_connected(&self) -> bool {
        self.conn.lock().unwrap().is_some()
    }
}

impl Drop for SerialIo {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}

fn reception_loop(
    mut port: Box<dyn SerialPort>,
    handler: Arc<dyn RxHandler>,
    cancel: Arc<AtomicBool>,
) {
    let mut chunk = [0u8; READ_CHUNK];

    while !cancel.load(Ordering::Acquire) {
        match port.read(&mut chunk) {
            Ok(0) => continue,
            Ok(n) => {
                log::trace!("rx {} byte(s)", n);
                handler.on_rx(&chunk[..n]);
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut
                        | io::ErrorKind::WouldBlock
                        | io::ErrorKind::Interrupted
                ) =>
            {
                continue;
            }
            Err(e) => {
                log::error!("serial read failed: {e}");
                break;
            }
        }
    }
}
