//! Reference [`Transport`] for a module on a serial line.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace, warn};

use super::decoder::FrameDecoder;
use super::encoder::{encode_frame, FrameHeader};
use super::{Retransmission, Transport};
use crate::afhds3::protocol::{Command, Frame, FrameType};

/// Times an unanswered request is sent again before the link is declared lost
pub const MAX_RETRANSMISSIONS: u8 = 5;

/// Frames the backlog holds; further enqueues are dropped
pub const QUEUE_CAPACITY: usize = 8;

/// Largest payload accepted into the backlog
const QUEUED_PAYLOAD_SIZE: usize = 8;

#[derive(Debug, Clone, Copy)]
struct QueuedFrame {
    command: Command,
    frame_type: FrameType,
    payload: [u8; QUEUED_PAYLOAD_SIZE],
    len: usize,
}

#[derive(Debug)]
struct Outstanding {
    command: Command,
    frame_number: u8,
    encoded: Bytes,
    retries_left: u8,
}

/// Serial-line transport: framing, backlog and retransmission
#[derive(Debug)]
pub struct SerialTransport {
    /// Address byte placed in every outbound frame
    address: u8,
    /// Sequence number of the next request
    frame_number: u8,
    queue: VecDeque<QueuedFrame>,
    outstanding: Option<Outstanding>,
    tx: BytesMut,
    decoder: FrameDecoder,
}

impl SerialTransport {
    /// Create a transport for the module at `address`
    /// (see [`ModuleSlot::frame_address`](crate::afhds3::protocol::ModuleSlot::frame_address))
    pub fn new(address: u8) -> Self {
        Self {
            address,
            frame_number: 0,
            queue: VecDeque::with_capacity(QUEUE_CAPACITY),
            outstanding: None,
            tx: BytesMut::with_capacity(256),
            decoder: FrameDecoder::new(),
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Whether a request is waiting for its answer
    pub fn is_awaiting_response(&self) -> bool {
        self.outstanding.is_some()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    fn stage(&mut self, header: FrameHeader, payload: &[u8]) {
        let start = self.tx.len();
        encode_frame(&mut self.tx, header, payload);
        trace!(
            "Staged {:?} {:?} #{} ({} bytes)",
            header.command,
            header.frame_type,
            header.frame_number,
            self.tx.len() - start
        );

        if header.frame_type.expects_response() {
            self.outstanding = Some(Outstanding {
                command: header.command,
                frame_number: header.frame_number,
                encoded: Bytes::copy_from_slice(&self.tx[start..]),
                retries_left: MAX_RETRANSMISSIONS,
            });
        }
    }

    /// Release the outstanding request when its answer arrives and
    /// acknowledge module requests that ask for it
    fn on_frame(&mut self, frame: &Frame<'_>) {
        if frame.frame_type.is_response() {
            let answered = self
                .outstanding
                .as_ref()
                .map(|o| o.frame_number == frame.frame_number && o.command as u8 == frame.command)
                .unwrap_or(false);
            if answered {
                self.outstanding = None;
            }
            return;
        }

        if frame.frame_type == FrameType::RequestSetExpectAck {
            if let Ok(command) = Command::try_from(frame.command) {
                encode_frame(
                    &mut self.tx,
                    FrameHeader {
                        address: self.address,
                        frame_number: frame.frame_number,
                        frame_type: FrameType::ResponseAck,
                        command,
                    },
                    &[],
                );
            }
        }
    }
}

impl Transport for SerialTransport {
    fn send_frame(&mut self, command: Command, frame_type: FrameType, payload: &[u8]) {
        let frame_number = self.frame_number;
        if frame_type.expects_response() || frame_type == FrameType::RequestSetNoResp {
            self.frame_number = self.frame_number.wrapping_add(1);
        }

        self.stage(
            FrameHeader {
                address: self.address,
                frame_number,
                frame_type,
                command,
            },
            payload,
        );
    }

    fn enqueue(&mut self, command: Command, frame_type: FrameType, payload: &[u8]) {
        if self.queue.len() >= QUEUE_CAPACITY {
            warn!("Command queue full, dropping {:?}", command);
            return;
        }
        if payload.len() > QUEUED_PAYLOAD_SIZE {
            warn!("Payload of {} bytes too large to queue {:?}", payload.len(), command);
            return;
        }

        let mut queued = QueuedFrame {
            command,
            frame_type,
            payload: [0; QUEUED_PAYLOAD_SIZE],
            len: payload.len(),
        };
        queued.payload[..payload.len()].copy_from_slice(payload);
        self.queue.push_back(queued);
    }

    fn process_queue(&mut self) -> bool {
        match self.queue.pop_front() {
            Some(queued) => {
                self.send_frame(queued.command, queued.frame_type, &queued.payload[..queued.len]);
                true
            }
            None => false,
        }
    }

    fn handle_retransmissions(&mut self) -> Retransmission {
        let Some(outstanding) = self.outstanding.as_mut() else {
            return Retransmission::Idle;
        };

        if outstanding.retries_left == 0 {
            warn!(
                "No answer to {:?} #{} after {} retries",
                outstanding.command, outstanding.frame_number, MAX_RETRANSMISSIONS
            );
            self.outstanding = None;
            return Retransmission::Failed;
        }

        outstanding.retries_left -= 1;
        debug!(
            "Resending {:?} #{} ({} retries left)",
            outstanding.command, outstanding.frame_number, outstanding.retries_left
        );
        self.tx.extend_from_slice(&outstanding.encoded);
        Retransmission::Resent
    }

    fn feed_byte(&mut self, byte: u8, buffer: &mut [u8], len: &mut usize) -> bool {
        if !self.decoder.push(byte, buffer, len) {
            return false;
        }

        match Frame::decode(&buffer[..*len]) {
            Ok(frame) => {
                self.on_frame(&frame);
                true
            }
            Err(e) => {
                debug!("Dropping inbound frame: {}", e);
                *len = 0;
                false
            }
        }
    }

    fn clear(&mut self) {
        self.queue.clear();
        self.outstanding = None;
        self.tx.clear();
        self.decoder.reset();
    }

    fn physically_send(&mut self) -> Option<Bytes> {
        if self.tx.is_empty() {
            None
        } else {
            Some(self.tx.split().freeze())
        }
    }
}
