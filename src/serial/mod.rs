//! # Serial Communication Module
//!
//! Handles serial communication with the AFHDS3 RF module.
//!
//! This module handles:
//! - Opening the serial port at 1,500,000 baud 8N1
//! - Splitting the port into a frame reader and a frame writer
//! - Writing encoded frames staged by the session

pub mod port_trait;

use crate::config::SerialConfig;
use crate::error::{Afhds3Error, Result};
use port_trait::PortWriter;
use tokio::io::{ReadHalf, WriteHalf};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, trace, warn};

/// Default AFHDS3 module baud rate
pub const AFHDS3_BAUD_RATE: u32 = 1_500_000;

/// Fallback device paths tried after the configured one
const DEFAULT_DEVICE_PATHS: &[&str] = &[
    "/dev/ttyUSB0", // USB-to-serial adapters
    "/dev/ttyACM0", // USB CDC devices
];

/// Receive half of the module port
pub type ModuleReader = ReadHalf<SerialStream>;

/// Transmit half of the module port
pub type ModuleWriter = WriteHalf<SerialStream>;

/// Module serial port writer
///
/// Owns the transmit side of the connection; the receive side is handed out
/// separately by [`ModuleSerial::open`] so both can be polled from one loop.
pub struct ModuleSerial<W: PortWriter = ModuleWriter> {
    /// Transmit half
    writer: W,
    /// Device path (e.g., /dev/ttyUSB0)
    device_path: String,
    /// Bytes written since open
    bytes_sent: u64,
}

impl<W: PortWriter> std::fmt::Debug for ModuleSerial<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleSerial")
            .field("device_path", &self.device_path)
            .field("bytes_sent", &self.bytes_sent)
            .finish_non_exhaustive()
    }
}

impl ModuleSerial {
    /// Open the configured port, falling back to the common device paths
    ///
    /// # Returns
    ///
    /// * `Result<(ModuleSerial, ModuleReader)>` - Writer and receive half
    ///
    /// # Errors
    ///
    /// Returns error if no device could be opened
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use afhds3_link::config::Config;
    /// use afhds3_link::serial::ModuleSerial;
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let config = Config::load("config/default.toml")?;
    ///     let (serial, _reader) = ModuleSerial::open(&config.serial)?;
    ///     println!("Connected to: {}", serial.device_path());
    ///     Ok(())
    /// }
    /// ```
    pub fn open(config: &SerialConfig) -> Result<(Self, ModuleReader)> {
        let mut paths = vec![config.port.as_str()];
        paths.extend(
            DEFAULT_DEVICE_PATHS
                .iter()
                .copied()
                .filter(|path| *path != config.port),
        );
        Self::open_with_paths(&paths, config.baud_rate)
    }

    /// Open the first device of `paths` that accepts the module settings
    ///
    /// # Arguments
    ///
    /// * `paths` - Device paths to try (e.g., &["/dev/ttyUSB0"])
    /// * `baud_rate` - Line speed
    ///
    /// # Returns
    ///
    /// * `Result<(ModuleSerial, ModuleReader)>` - Writer and receive half
    pub fn open_with_paths(paths: &[&str], baud_rate: u32) -> Result<(Self, ModuleReader)> {
        for path in paths {
            debug!("Trying to open serial port: {}", path);

            match Self::open_port(path, baud_rate) {
                Ok(port) => {
                    info!("Successfully opened AFHDS3 module at {} ({} baud)", path, baud_rate);
                    let (reader, writer) = tokio::io::split(port);
                    let serial = Self::with_writer(writer, *path);
                    return Ok((serial, reader));
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            }
        }

        Err(Afhds3Error::SerialPortNotFound(paths.join(", ")))
    }

    /// Open a specific serial port with AFHDS3 line settings (8N1, no flow control)
    fn open_port(path: &str, baud_rate: u32) -> Result<SerialStream> {
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| Afhds3Error::Serial(format!("Failed to open {}: {}", path, e)))?;

        Ok(port)
    }
}

impl<W: PortWriter> ModuleSerial<W> {
    /// Wrap an already opened transmit half
    pub fn with_writer(writer: W, device_path: impl Into<String>) -> Self {
        Self {
            writer,
            device_path: device_path.into(),
            bytes_sent: 0,
        }
    }

    /// Write encoded frames to the module
    ///
    /// # Arguments
    ///
    /// * `frames` - One or more complete, escaped frames
    ///
    /// # Errors
    ///
    /// Returns error if the write or flush fails
    pub async fn send_frames(&mut self, frames: &[u8]) -> Result<()> {
        if frames.is_empty() {
            return Ok(());
        }

        self.writer
            .write_all(frames)
            .await
            .map_err(|e| Afhds3Error::Serial(format!("Failed to write frame: {}", e)))?;

        self.writer
            .flush()
            .await
            .map_err(|e| Afhds3Error::Serial(format!("Failed to flush serial port: {}", e)))?;

        self.bytes_sent += frames.len() as u64;
        trace!("Sent {} bytes", frames.len());
        Ok(())
    }

    /// Get the device path of the opened serial port
    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }
}

#[cfg(test)]
mod tests {
    use super::port_trait::mocks::{PortEvent, PortOp, RecordingPort};
    use super::*;
    use crate::afhds3::protocol::{Command, FrameType};
    use crate::transport::encoder::{encode_frame, FrameHeader, FRAME_END};
    use bytes::BytesMut;
    use std::io;

    fn ready_query() -> BytesMut {
        let mut out = BytesMut::new();
        encode_frame(
            &mut out,
            FrameHeader {
                address: 0x41,
                frame_number: 0,
                frame_type: FrameType::RequestGetData,
                command: Command::ModuleReady,
            },
            &[],
        );
        out
    }

    #[test]
    fn test_constants() {
        assert_eq!(AFHDS3_BAUD_RATE, 1_500_000);
        assert_eq!(DEFAULT_DEVICE_PATHS[0], "/dev/ttyUSB0");
        assert_eq!(DEFAULT_DEVICE_PATHS[1], "/dev/ttyACM0");
    }

    #[test]
    fn test_open_with_invalid_paths_returns_error() {
        let invalid_paths = &["/dev/nonexistent0", "/dev/nonexistent1"];
        let result = ModuleSerial::open_with_paths(invalid_paths, AFHDS3_BAUD_RATE);

        match result {
            Err(Afhds3Error::SerialPortNotFound(msg)) => {
                assert!(msg.contains("/dev/nonexistent0"));
                assert!(msg.contains("/dev/nonexistent1"));
            }
            Err(other) => panic!("Expected SerialPortNotFound error, got: {:?}", other),
            Ok(_) => panic!("Expected SerialPortNotFound error"),
        }
    }

    #[test]
    fn test_open_with_empty_paths_returns_error() {
        let empty_paths: &[&str] = &[];
        let result = ModuleSerial::open_with_paths(empty_paths, AFHDS3_BAUD_RATE);
        assert!(matches!(result, Err(Afhds3Error::SerialPortNotFound(_))));
    }

    #[test]
    fn test_open_port_with_invalid_path_returns_error() {
        let result = ModuleSerial::open_port("/dev/nonexistent_serial_device_12345", AFHDS3_BAUD_RATE);

        match result {
            Err(Afhds3Error::Serial(msg)) => {
                assert!(msg.contains("/dev/nonexistent_serial_device_12345"));
                assert!(msg.contains("Failed to open"));
            }
            Err(other) => panic!("Expected Serial error, got: {:?}", other),
            Ok(_) => panic!("Expected Serial error"),
        }
    }

    #[tokio::test]
    async fn test_send_frames_writes_then_flushes() {
        let port = RecordingPort::new();
        let mut serial = ModuleSerial::with_writer(port.clone(), "/dev/mock");

        let frame = ready_query();
        serial.send_frames(&frame).await.unwrap();

        assert_eq!(
            port.events(),
            vec![PortEvent::Write(frame.to_vec()), PortEvent::Flush]
        );
        assert_eq!(port.writes()[0][0], FRAME_END);
        assert_eq!(serial.bytes_sent(), frame.len() as u64);
        assert_eq!(serial.device_path(), "/dev/mock");
    }

    #[tokio::test]
    async fn test_each_batch_is_flushed() {
        let port = RecordingPort::new();
        let mut serial = ModuleSerial::with_writer(port.clone(), "/dev/mock");

        let frame = ready_query();
        serial.send_frames(&frame).await.unwrap();
        serial.send_frames(&frame).await.unwrap();

        assert_eq!(port.writes().len(), 2);
        assert_eq!(port.flushes(), 2);
        assert_eq!(port.events()[1], PortEvent::Flush);
        assert_eq!(serial.bytes_sent(), 2 * frame.len() as u64);
    }

    #[tokio::test]
    async fn test_send_empty_is_noop() {
        let port = RecordingPort::new();
        let mut serial = ModuleSerial::with_writer(port.clone(), "/dev/mock");

        serial.send_frames(&[]).await.unwrap();
        assert!(port.events().is_empty());
    }

    #[tokio::test]
    async fn test_write_error_is_reported() {
        let port = RecordingPort::failing(PortOp::Write, io::ErrorKind::BrokenPipe);
        let mut serial = ModuleSerial::with_writer(port.clone(), "/dev/mock");

        match serial.send_frames(&ready_query()).await {
            Err(Afhds3Error::Serial(msg)) => assert!(msg.contains("Failed to write")),
            other => panic!("Expected Serial error, got: {:?}", other),
        }
        // no flush after a failed write
        assert!(port.events().is_empty());
        assert_eq!(serial.bytes_sent(), 0);
    }

    #[tokio::test]
    async fn test_flush_error_is_reported() {
        let port = RecordingPort::failing(PortOp::Flush, io::ErrorKind::TimedOut);
        let mut serial = ModuleSerial::with_writer(port.clone(), "/dev/mock");

        match serial.send_frames(&ready_query()).await {
            Err(Afhds3Error::Serial(msg)) => assert!(msg.contains("Failed to flush")),
            other => panic!("Expected Serial error, got: {:?}", other),
        }
        assert_eq!(port.writes().len(), 1);
        assert_eq!(port.flushes(), 0);
        assert_eq!(serial.bytes_sent(), 0);
    }

    #[test]
    fn test_send_frames_blocking_with_tokio_test() {
        let port = RecordingPort::new();
        let mut serial = ModuleSerial::with_writer(port.clone(), "/dev/mock");

        tokio_test::block_on(serial.send_frames(&ready_query())).unwrap();
        assert_eq!(port.writes().len(), 1);
    }

    // Integration test - only runs if a module is connected
    #[test]
    #[ignore] // Run with: cargo test -- --ignored
    fn test_open_with_real_hardware() {
        let config = crate::config::SerialConfig {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: AFHDS3_BAUD_RATE,
            tick_period_ms: 5,
        };

        match ModuleSerial::open(&config) {
            Ok((serial, _reader)) => println!("Opened AFHDS3 module at: {}", serial.device_path()),
            Err(_) => println!("No AFHDS3 hardware detected (this is OK for CI/CD)"),
        }
    }
}
