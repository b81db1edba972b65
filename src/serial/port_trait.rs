//! Write seam between `ModuleSerial` and the port it drives

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio_serial::SerialStream;

/// Transmit side of a module connection
#[async_trait]
pub trait PortWriter: Send {
    /// Write one batch of encoded frames
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Push buffered bytes onto the line
    async fn flush(&mut self) -> io::Result<()>;
}

/// Module port after `tokio::io::split`
#[async_trait]
impl PortWriter for WriteHalf<SerialStream> {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        AsyncWriteExt::write_all(self, data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        AsyncWriteExt::flush(self).await
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// One call seen by [`RecordingPort`]
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum PortEvent {
        Write(Vec<u8>),
        Flush,
    }

    /// Which call a [`RecordingPort`] fails
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum PortOp {
        Write,
        Flush,
    }

    #[derive(Debug, Default)]
    struct PortLog {
        events: Vec<PortEvent>,
        fail_on: Option<(PortOp, io::ErrorKind)>,
    }

    /// Port double keeping writes and flushes in call order
    ///
    /// Clones share the log, so a test keeps one handle while `ModuleSerial`
    /// owns the other.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingPort {
        log: Arc<Mutex<PortLog>>,
    }

    impl RecordingPort {
        pub fn new() -> Self {
            Self::default()
        }

        /// A port whose every `op` call fails with `kind`
        pub fn failing(op: PortOp, kind: io::ErrorKind) -> Self {
            let port = Self::default();
            port.log.lock().unwrap().fail_on = Some((op, kind));
            port
        }

        pub fn events(&self) -> Vec<PortEvent> {
            self.log.lock().unwrap().events.clone()
        }

        pub fn writes(&self) -> Vec<Vec<u8>> {
            self.events()
                .into_iter()
                .filter_map(|event| match event {
                    PortEvent::Write(bytes) => Some(bytes),
                    PortEvent::Flush => None,
                })
                .collect()
        }

        pub fn flushes(&self) -> usize {
            self.events()
                .iter()
                .filter(|event| **event == PortEvent::Flush)
                .count()
        }

        fn record(&self, op: PortOp, event: PortEvent) -> io::Result<()> {
            let mut log = self.log.lock().unwrap();
            match log.fail_on {
                Some((failing, kind)) if failing == op => {
                    Err(io::Error::new(kind, format!("{:?} refused", op)))
                }
                _ => {
                    log.events.push(event);
                    Ok(())
                }
            }
        }
    }

    #[async_trait]
    impl PortWriter for RecordingPort {
        async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
            self.record(PortOp::Write, PortEvent::Write(data.to_vec()))
        }

        async fn flush(&mut self) -> io::Result<()> {
            self.record(PortOp::Flush, PortEvent::Flush)
        }
    }
}
