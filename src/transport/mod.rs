//! # AFHDS3 Transport
//!
//! The framed, acknowledged byte stream a [`Session`](crate::afhds3::session::Session)
//! talks through.
//!
//! This module handles:
//! - Frame encoding with delimiters, escaping and checksum
//! - Byte-wise reassembly of inbound frames
//! - Holding requests until answered and retransmitting them
//! - A small command backlog drained one frame per tick

pub mod checksum;
pub mod decoder;
pub mod encoder;
mod serial_transport;

pub use serial_transport::{SerialTransport, MAX_RETRANSMISSIONS, QUEUE_CAPACITY};

use bytes::Bytes;

use crate::afhds3::protocol::{Command, FrameType};

/// Outcome of a retransmission check at the start of a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retransmission {
    /// Nothing outstanding, the tick may send a new frame
    Idle,
    /// An unanswered request was sent again this tick
    Resent,
    /// An unanswered request ran out of retries; it has been dropped
    Failed,
}

/// Framed transport used by a session
///
/// Implementations stage frames for output; nothing reaches the wire until
/// [`physically_send`](Transport::physically_send) hands the bytes to the host.
pub trait Transport {
    /// Stage a frame for immediate output
    fn send_frame(&mut self, command: Command, frame_type: FrameType, payload: &[u8]);

    /// Queue a frame for a later tick
    fn enqueue(&mut self, command: Command, frame_type: FrameType, payload: &[u8]);

    /// Stage the oldest queued frame, if any
    ///
    /// Returns `true` if a frame was staged.
    fn process_queue(&mut self) -> bool;

    /// Resend the outstanding request if it is still unanswered
    fn handle_retransmissions(&mut self) -> Retransmission;

    /// Feed one received byte into frame reassembly
    ///
    /// Returns `true` when `buffer[..*len]` holds a complete frame body
    /// (address, frame number, type, command, payload).
    fn feed_byte(&mut self, byte: u8, buffer: &mut [u8], len: &mut usize) -> bool;

    /// Drop queued, staged and outstanding frames
    fn clear(&mut self);

    /// Take the staged bytes for writing to the port
    fn physically_send(&mut self) -> Option<Bytes>;
}
