//! # AFHDS3 Frame Reassembly
//!
//! Byte-at-a-time decoder for frames produced by
//! [`encode_frame`](super::encoder::encode_frame). Bytes are unescaped into a
//! caller-owned buffer; when the closing delimiter arrives the checksum is
//! verified and stripped, leaving the bare frame body in the buffer.

use tracing::debug;

use super::checksum::verify;
use super::encoder::{FRAME_END, FRAME_ESC, FRAME_ESC_END, FRAME_ESC_ESC};
use crate::afhds3::protocol::FRAME_HEADER_SIZE;

/// Reassembly state between two bytes
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FrameDecoder {
    /// Previous byte was the escape introducer
    escape: bool,
    /// Current frame did not fit the buffer and is being skipped
    overflow: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget any partially received frame
    pub fn reset(&mut self) {
        self.escape = false;
        self.overflow = false;
    }

    /// Feed one received byte
    ///
    /// # Arguments
    ///
    /// * `byte` - Received byte
    /// * `buffer` - Reassembly buffer, owned by the caller
    /// * `len` - Bytes of `buffer` in use; reset to 0 on frame boundaries
    ///
    /// # Returns
    ///
    /// * `bool` - `true` when `buffer[..*len]` holds a complete frame body
    ///   with a valid checksum (checksum already removed)
    pub fn push(&mut self, byte: u8, buffer: &mut [u8], len: &mut usize) -> bool {
        if byte == FRAME_END {
            let complete = !self.overflow && *len > 0 && self.finish(buffer, len);
            if !complete {
                *len = 0;
            }
            self.reset();
            return complete;
        }

        if self.overflow {
            return false;
        }

        let value = if self.escape {
            self.escape = false;
            match byte {
                FRAME_ESC_END => FRAME_END,
                FRAME_ESC_ESC => FRAME_ESC,
                other => {
                    debug!("Invalid escape sequence 0x{:02X}, dropping frame", other);
                    self.overflow = true;
                    return false;
                }
            }
        } else if byte == FRAME_ESC {
            self.escape = true;
            return false;
        } else {
            byte
        };

        if *len >= buffer.len() {
            debug!("Frame exceeds {} bytes, dropping", buffer.len());
            self.overflow = true;
            return false;
        }

        buffer[*len] = value;
        *len += 1;
        false
    }

    fn finish(&self, buffer: &[u8], len: &mut usize) -> bool {
        // header + checksum
        if *len < FRAME_HEADER_SIZE + 1 {
            debug!("Frame too short: {} bytes", *len);
            return false;
        }

        if !verify(&buffer[..*len]) {
            debug!("Checksum mismatch, dropping {} byte frame", *len);
            return false;
        }

        *len -= 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::afhds3::protocol::{Command, FrameType};
    use crate::transport::encoder::{encode_frame, FrameHeader};
    use bytes::BytesMut;

    fn encoded(payload: &[u8]) -> BytesMut {
        let mut out = BytesMut::new();
        encode_frame(
            &mut out,
            FrameHeader {
                address: 0x14,
                frame_number: 9,
                frame_type: FrameType::ResponseData,
                command: Command::ModuleState,
            },
            payload,
        );
        out
    }

    fn feed(decoder: &mut FrameDecoder, bytes: &[u8], buffer: &mut [u8], len: &mut usize) -> usize {
        bytes
            .iter()
            .filter(|&&b| decoder.push(b, buffer, len))
            .count()
    }

    #[test]
    fn test_decode_valid_frame() {
        let mut decoder = FrameDecoder::new();
        let mut buffer = [0u8; 64];
        let mut len = 0;

        let frame = encoded(&[0x04]);
        let mut completed = false;
        for &byte in frame.iter() {
            if decoder.push(byte, &mut buffer, &mut len) {
                completed = true;
                break;
            }
        }

        assert!(completed);
        assert_eq!(&buffer[..len], &[0x14, 9, 0x10, 0x02, 0x04]);
    }

    #[test]
    fn test_decode_unescapes_payload() {
        let mut decoder = FrameDecoder::new();
        let mut buffer = [0u8; 64];
        let mut len = 0;

        let frame = encoded(&[FRAME_END, FRAME_ESC, 0x01]);
        assert_eq!(feed(&mut decoder, &frame, &mut buffer, &mut len), 1);
        assert_eq!(&buffer[4..len], &[FRAME_END, FRAME_ESC, 0x01]);
    }

    #[test]
    fn test_decode_checksum_error() {
        let mut decoder = FrameDecoder::new();
        let mut buffer = [0u8; 64];
        let mut len = 0;

        let mut frame = encoded(&[0x04]);
        let crc_index = frame.len() - 2;
        frame[crc_index] ^= 0x01;

        assert_eq!(feed(&mut decoder, &frame, &mut buffer, &mut len), 0);
        assert_eq!(len, 0);
    }

    #[test]
    fn test_decode_too_short() {
        let mut decoder = FrameDecoder::new();
        let mut buffer = [0u8; 64];
        let mut len = 0;

        assert_eq!(feed(&mut decoder, &[FRAME_END, 0x01, 0xFE, FRAME_END], &mut buffer, &mut len), 0);
    }

    #[test]
    fn test_decode_overflow_drops_frame_and_recovers() {
        let mut decoder = FrameDecoder::new();
        let mut buffer = [0u8; 8];
        let mut len = 0;

        let big = encoded(&[0u8; 16]);
        assert_eq!(feed(&mut decoder, &big, &mut buffer, &mut len), 0);

        let small = encoded(&[]);
        assert_eq!(feed(&mut decoder, &small, &mut buffer, &mut len), 1);
        assert_eq!(len, 4);
    }

    #[test]
    fn test_decode_garbage_before_frame() {
        let mut decoder = FrameDecoder::new();
        let mut buffer = [0u8; 64];
        let mut len = 0;

        let mut stream = vec![0x55, 0xAA, 0x13];
        stream.extend_from_slice(&encoded(&[0x04]));

        // garbage is terminated by the opening delimiter and fails the checksum
        assert_eq!(feed(&mut decoder, &stream, &mut buffer, &mut len), 1);
        assert_eq!(buffer[4], 0x04);
    }

    #[test]
    fn test_decode_back_to_back_frames() {
        let mut decoder = FrameDecoder::new();
        let mut buffer = [0u8; 64];
        let mut len = 0;

        let mut stream = encoded(&[0x04]).to_vec();
        stream.extend_from_slice(&encoded(&[0x05]));

        let mut values = Vec::new();
        for &byte in &stream {
            if decoder.push(byte, &mut buffer, &mut len) {
                values.push(buffer[4]);
                len = 0;
            }
        }
        assert_eq!(values, vec![0x04, 0x05]);
    }
}
