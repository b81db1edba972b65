//! # AFHDS3 Frame Encoder
//!
//! Wraps a frame body into its on-wire form.
//!
//! ```text
//! 0xC0 | address | number | type | command | payload.. | checksum | 0xC0
//! ```
//!
//! Everything between the delimiters is escaped: `0xC0` becomes
//! `0xDB 0xDC` and `0xDB` becomes `0xDB 0xDD`.

use bytes::{BufMut, BytesMut};

use super::checksum::wrapping_sum;
use crate::afhds3::protocol::{Command, FrameType};

/// Frame delimiter
pub const FRAME_END: u8 = 0xC0;

/// Escape introducer
pub const FRAME_ESC: u8 = 0xDB;

/// Escaped delimiter
pub const FRAME_ESC_END: u8 = 0xDC;

/// Escaped escape
pub const FRAME_ESC_ESC: u8 = 0xDD;

/// Header fields of an outbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub address: u8,
    pub frame_number: u8,
    pub frame_type: FrameType,
    pub command: Command,
}

/// Append one complete, escaped frame to `out`
///
/// # Examples
///
/// ```
/// use afhds3_link::afhds3::protocol::{Command, FrameType};
/// use afhds3_link::transport::encoder::{encode_frame, FrameHeader};
/// use bytes::BytesMut;
///
/// let mut out = BytesMut::new();
/// let header = FrameHeader {
///     address: 0x41,
///     frame_number: 0,
///     frame_type: FrameType::RequestGetData,
///     command: Command::ModuleReady,
/// };
/// encode_frame(&mut out, header, &[]);
/// assert_eq!(&out[..], &[0xC0, 0x41, 0x00, 0x01, 0x01, 0xBC, 0xC0]);
/// ```
pub fn encode_frame(out: &mut BytesMut, header: FrameHeader, payload: &[u8]) {
    let head = [
        header.address,
        header.frame_number,
        header.frame_type as u8,
        header.command as u8,
    ];
    let crc = !wrapping_sum(&head).wrapping_add(wrapping_sum(payload));

    out.reserve(2 * (head.len() + payload.len() + 1) + 2);
    out.put_u8(FRAME_END);
    for &byte in head.iter().chain(payload).chain(std::iter::once(&crc)) {
        put_escaped(out, byte);
    }
    out.put_u8(FRAME_END);
}

fn put_escaped(out: &mut BytesMut, byte: u8) {
    match byte {
        FRAME_END => {
            out.put_u8(FRAME_ESC);
            out.put_u8(FRAME_ESC_END);
        }
        FRAME_ESC => {
            out.put_u8(FRAME_ESC);
            out.put_u8(FRAME_ESC_ESC);
        }
        other => out.put_u8(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::checksum::verify;

    fn header(command: Command, frame_type: FrameType) -> FrameHeader {
        FrameHeader {
            address: 0x41,
            frame_number: 3,
            frame_type,
            command,
        }
    }

    #[test]
    fn test_encode_frame_structure() {
        let mut out = BytesMut::new();
        encode_frame(
            &mut out,
            header(Command::ModuleMode, FrameType::RequestSetExpectData),
            &[0x03],
        );

        assert_eq!(out[0], FRAME_END);
        assert_eq!(out[out.len() - 1], FRAME_END);
        assert_eq!(&out[1..6], &[0x41, 3, 0x02, 0x03, 0x03]);
        assert!(verify(&out[1..out.len() - 1]));
    }

    #[test]
    fn test_encode_escapes_reserved_bytes() {
        let mut out = BytesMut::new();
        encode_frame(
            &mut out,
            header(Command::ChannelsFailsafeData, FrameType::RequestSetNoResp),
            &[FRAME_END, FRAME_ESC],
        );

        let inner = &out[1..out.len() - 1];
        assert!(!inner.contains(&FRAME_END));
        assert_eq!(&inner[4..8], &[FRAME_ESC, FRAME_ESC_END, FRAME_ESC, FRAME_ESC_ESC]);
    }

    #[test]
    fn test_encode_appends() {
        let mut out = BytesMut::new();
        encode_frame(&mut out, header(Command::ModuleState, FrameType::RequestGetData), &[]);
        let first = out.len();
        encode_frame(&mut out, header(Command::ModuleState, FrameType::RequestGetData), &[]);
        assert_eq!(out.len(), 2 * first);
    }

    #[test]
    fn test_different_data_different_checksum() {
        let mut frame1 = BytesMut::new();
        let mut frame2 = BytesMut::new();
        encode_frame(&mut frame1, header(Command::ModelId, FrameType::RequestSetExpectData), &[1]);
        encode_frame(&mut frame2, header(Command::ModelId, FrameType::RequestSetExpectData), &[2]);
        assert_ne!(frame1[frame1.len() - 2], frame2[frame2.len() - 2]);
    }
}
