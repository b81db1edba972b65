//! # Telemetry Sub-Record Remapper
//!
//! A TELEMETRY_DATA payload that starts with the sensor marker `0x22`
//! carries a sequence of length-prefixed sensor records:
//!
//! ```text
//! 0x22 | len id data.. | len id data.. | ...
//! ```
//!
//! `len` counts the whole record including itself. Records are normalized
//! to the transmitter's FlySky sensor format and handed to a
//! [`TelemetrySink`] together with a [`RemapTag`].

use tracing::trace;

use super::protocol::TELEMETRY_SENSOR_MARKER;

/// FRM302 module status record: temperature + voltage in one record
pub const FRM302_STATUS: u8 = 0x56;

/// SNR as reported by the receiver, and the id it is exposed under
pub const SENSOR_SNR_RAW: u8 = 0xFA;
pub const SENSOR_SNR: u8 = 0xF8;

/// Sensors in this id use a different record format and get their own id
pub const SENSOR_ALT_FORMAT_RAW: u8 = 0xFE;
pub const SENSOR_ALT_FORMAT: u8 = 0xF7;

/// Sensor record format handed to the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RemapTag {
    /// `[id, instance, value lo, value hi]`
    Short = 0xAA,
    /// `[id, instance, value (4 bytes)]`
    Long = 0xAC,
}

/// Receiver of normalized sensor records
#[cfg_attr(test, mockall::automock)]
pub trait TelemetrySink {
    fn deliver_sensor_record(&mut self, record: &[u8], tag: RemapTag);
}

impl<S: TelemetrySink + ?Sized> TelemetrySink for &mut S {
    fn deliver_sensor_record(&mut self, record: &[u8], tag: RemapTag) {
        (**self).deliver_sensor_record(record, tag)
    }
}

impl<S: TelemetrySink + ?Sized> TelemetrySink for Box<S> {
    fn deliver_sensor_record(&mut self, record: &[u8], tag: RemapTag) {
        (**self).deliver_sensor_record(record, tag)
    }
}

/// Walk the sensor records of a TELEMETRY_DATA payload
///
/// Iteration stops at the first record whose length is zero or runs past
/// the end of the payload. Payloads without the sensor marker are ignored.
///
/// Returns the number of records delivered to `sink`.
pub fn remap_telemetry<S: TelemetrySink + ?Sized>(payload: &[u8], sink: &mut S) -> usize {
    let mut rest = match payload.split_first() {
        Some((&TELEMETRY_SENSOR_MARKER, rest)) => rest,
        _ => return 0,
    };

    let mut delivered = 0;

    while let Some(&length) = rest.first() {
        let length = length as usize;
        if length == 0 || length > rest.len() {
            trace!("Telemetry record length {} with {} bytes left, stopping", length, rest.len());
            break;
        }

        let (record, tail) = rest.split_at(length);
        rest = tail;

        delivered += remap_record(record, sink);
    }

    delivered
}

fn remap_record<S: TelemetrySink + ?Sized>(record: &[u8], sink: &mut S) -> usize {
    if record.len() < 2 {
        return 0;
    }

    let mut id = record[1];
    if id == SENSOR_ALT_FORMAT_RAW {
        id = SENSOR_ALT_FORMAT;
    }

    match record.len() {
        4 => {
            // one byte value, pad the missing high byte
            sink.deliver_sensor_record(&[id, record[2], record[3], 0], RemapTag::Short);
            1
        }
        5 => {
            if id == SENSOR_SNR_RAW {
                id = SENSOR_SNR;
            }
            sink.deliver_sensor_record(&[id, record[2], record[3], record[4]], RemapTag::Short);
            1
        }
        6 if id == FRM302_STATUS => {
            let temperature = (record[3] as u16).wrapping_mul(10).wrapping_add(400);
            let [temp_lo, temp_hi] = temperature.to_le_bytes();
            sink.deliver_sensor_record(&[id + 1, record[2], temp_lo, temp_hi], RemapTag::Short);
            sink.deliver_sensor_record(&[id + 2, record[2], record[4], record[5]], RemapTag::Short);
            2
        }
        7 => {
            let mut data = [0u8; 6];
            data[0] = id;
            data[1..].copy_from_slice(&record[2..7]);
            sink.deliver_sensor_record(&data, RemapTag::Long);
            1
        }
        other => {
            trace!("Skipping telemetry record id 0x{:02X} with length {}", id, other);
            0
        }
    }
}
