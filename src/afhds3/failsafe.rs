//! # Channel and Failsafe Encoding
//!
//! Builds CHANNELS_FAILSAFE_DATA payloads from mixer outputs and from the
//! model failsafe policy.
//!
//! ```text
//! Byte 0: mode (0x01 channels, 0x02 failsafe)
//! Byte 1: channel count N
//! Byte 2..2+2N: N x i16 little-endian
//! ```
//!
//! Channel values are the mixer output scaled by 10 and clamped to
//! ±15000. Failsafe entries may instead carry one of the sentinels
//! `0x8000` (hold) or `0x8001` (no pulses).

use super::host::{FailsafeChannel, FailsafeMode, ModuleHost};
use super::protocol::*;

/// Largest encoded channels/failsafe payload
pub const CHANNELS_PAYLOAD_MAX_SIZE: usize = 2 + 2 * AFHDS3_MAX_CHANNELS;

/// Scale a mixer output to the protocol range
#[inline]
pub fn convert(channel_value: i32) -> i16 {
    channel_value
        .saturating_mul(10)
        .clamp(AFHDS3_FAILSAFE_MIN as i32, AFHDS3_FAILSAFE_MAX as i32) as i16
}

/// Fill `target` with failsafe values for the module's channels
///
/// The first `rf_channel_count` entries are zeroed, then one entry per
/// local channel in `[channels_start, channels_start + channels_count)` is
/// written, up to `rf_channel_count`. An unknown or unset policy falls back
/// to no pulses.
///
/// Returns [`AFHDS3_MAX_CHANNELS`]: the channel count of a bound link
/// cannot change.
pub fn compute_failsafe<H: ModuleHost + ?Sized>(
    host: &H,
    slot: ModuleSlot,
    target: &mut [i16],
    rf_channel_count: usize,
) -> usize {
    let settings = host.module_settings(slot);
    let rf_channel_count = rf_channel_count.min(target.len());
    let channels_start = settings.channels_start as usize;

    target[..rf_channel_count].fill(0);

    for (i, slot_value) in target[..rf_channel_count]
        .iter_mut()
        .take(settings.channels_count as usize)
        .enumerate()
    {
        *slot_value = match settings.failsafe_mode {
            FailsafeMode::Custom => match host.failsafe_channel(channels_start + i) {
                FailsafeChannel::Hold => FAILSAFE_HOLD_VALUE,
                FailsafeChannel::NoPulse => FAILSAFE_NOPULSES_VALUE,
                FailsafeChannel::Value(value) => convert(value as i32),
            },
            FailsafeMode::Hold => FAILSAFE_HOLD_VALUE,
            FailsafeMode::NoPulses | FailsafeMode::NotSet | FailsafeMode::Receiver => {
                FAILSAFE_NOPULSES_VALUE
            }
        };
    }

    AFHDS3_MAX_CHANNELS
}

/// Channels or failsafe values for one CHANNELS_FAILSAFE_DATA frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelsPayload {
    pub mode: ChannelsDataMode,
    /// Channel count implied by the module's PHY mode
    pub count: usize,
    pub data: [i16; AFHDS3_MAX_CHANNELS],
}

impl ChannelsPayload {
    /// Live channel values; channels beyond the local channel count are zero
    pub fn channels<H: ModuleHost + ?Sized>(host: &H, slot: ModuleSlot, phy_mode: PhyMode) -> Self {
        let settings = host.module_settings(slot);
        let count = phy_mode.channel_count().min(AFHDS3_MAX_CHANNELS);
        let channels_start = settings.channels_start as usize;
        let mut data = [0i16; AFHDS3_MAX_CHANNELS];

        for (i, value) in data[..count]
            .iter_mut()
            .take(settings.channels_count as usize)
            .enumerate()
        {
            *value = convert(host.channel_output(channels_start + i));
        }

        Self {
            mode: ChannelsDataMode::Channels,
            count,
            data,
        }
    }

    /// Failsafe values from the model policy
    pub fn failsafe<H: ModuleHost + ?Sized>(host: &H, slot: ModuleSlot, phy_mode: PhyMode) -> Self {
        let count = phy_mode.channel_count().min(AFHDS3_MAX_CHANNELS);
        let mut data = [0i16; AFHDS3_MAX_CHANNELS];
        compute_failsafe(host, slot, &mut data, count);

        Self {
            mode: ChannelsDataMode::FailSafe,
            count,
            data,
        }
    }

    /// Values actually carried on the wire
    pub fn values(&self) -> &[i16] {
        &self.data[..self.count]
    }

    /// Encode header and values into `buf`, returning the encoded bytes
    pub fn encode<'b>(&self, buf: &'b mut [u8; CHANNELS_PAYLOAD_MAX_SIZE]) -> &'b [u8] {
        buf[0] = self.mode as u8;
        buf[1] = self.count as u8;
        let len = encode_values(self.values(), &mut buf[2..]);
        &buf[..2 + len]
    }
}

/// Write values little-endian into `out`, returning the number of bytes written
pub fn encode_values(values: &[i16], out: &mut [u8]) -> usize {
    let mut written = 0;
    for (value, chunk) in values.iter().zip(out.chunks_exact_mut(2)) {
        chunk.copy_from_slice(&value.to_le_bytes());
        written += 2;
    }
    written
}
