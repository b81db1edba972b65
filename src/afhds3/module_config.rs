//! # Module Configuration Record
//!
//! The configuration the module stores and reports with GET_CONFIG. Two
//! on-wire layouts exist, selected by PHY mode; both start with the version
//! byte and share a common prefix.
//!
//! ```text
//! offset  size  field
//!      0     1  version
//!      1     1  EMI standard
//!      2     1  two-way telemetry flag
//!      3     1  PHY mode
//!      4     1  signal strength RC channel (0xFF = off)
//!      5     2  failsafe timeout (ms)
//!      7    64  failsafe table, 32 x i16
//!     71     1  failsafe output mode
//! V0: 72     2  PWM frequency          V1: 72    64  PWM frequencies, 32 x u16
//!     74     4  PWM synchronized mask      136     4  PWM synchronized mask
//!     78     1  analog output              140     4  new port types
//!     79     1  external bus type
//! ```
//!
//! All multi-byte fields are little-endian.

use bytes::{Buf, BufMut};

use super::protocol::{EmiStandard, PhyMode, CONFIG_MAX_CHANNELS};
use crate::error::{Afhds3Error, Result};

/// Default failsafe timeout applied on every layout reset (ms)
pub const DEFAULT_FAILSAFE_TIMEOUT: u16 = 500;

/// Default PWM output frequency applied on every layout reset (Hz)
pub const DEFAULT_PWM_FREQUENCY: u16 = 50;

/// Signal strength output disabled
pub const SIGNAL_STRENGTH_CHANNEL_OFF: u8 = 0xFF;

const COMMON_SIZE: usize = 72;

/// Encoded size of a version 0 record
pub const CONFIG_V0_SIZE: usize = 80;

/// Encoded size of a version 1 record
pub const CONFIG_V1_SIZE: usize = 144;

/// Scratch size able to hold either layout
pub const CONFIG_BUFFER_SIZE: usize = CONFIG_V1_SIZE;

/// Fields shared by both layouts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigCommon {
    pub emi_standard: u8,
    pub is_two_way: bool,
    pub phy_mode: u8,
    pub signal_strength_rc_channel: u8,
    pub failsafe_timeout: u16,
    pub failsafe: [i16; CONFIG_MAX_CHANNELS],
    pub failsafe_output_mode: bool,
}

impl Default for ConfigCommon {
    fn default() -> Self {
        Self {
            emi_standard: EmiStandard::Fcc as u8,
            is_two_way: false,
            phy_mode: PhyMode::ClassicFlcr1Ch18 as u8,
            signal_strength_rc_channel: SIGNAL_STRENGTH_CHANNEL_OFF,
            failsafe_timeout: DEFAULT_FAILSAFE_TIMEOUT,
            failsafe: [0; CONFIG_MAX_CHANNELS],
            failsafe_output_mode: false,
        }
    }
}

impl ConfigCommon {
    fn write(&self, version: u8, buf: &mut &mut [u8]) {
        buf.put_u8(version);
        buf.put_u8(self.emi_standard);
        buf.put_u8(self.is_two_way as u8);
        buf.put_u8(self.phy_mode);
        buf.put_u8(self.signal_strength_rc_channel);
        buf.put_u16_le(self.failsafe_timeout);
        for value in self.failsafe {
            buf.put_i16_le(value);
        }
        buf.put_u8(self.failsafe_output_mode as u8);
    }

    fn read(buf: &mut &[u8]) -> Self {
        let _version = buf.get_u8();
        let emi_standard = buf.get_u8();
        let is_two_way = buf.get_u8() != 0;
        let phy_mode = buf.get_u8();
        let signal_strength_rc_channel = buf.get_u8();
        let failsafe_timeout = buf.get_u16_le();
        let mut failsafe = [0i16; CONFIG_MAX_CHANNELS];
        for value in failsafe.iter_mut() {
            *value = buf.get_i16_le();
        }
        let failsafe_output_mode = buf.get_u8() != 0;

        Self {
            emi_standard,
            is_two_way,
            phy_mode,
            signal_strength_rc_channel,
            failsafe_timeout,
            failsafe,
            failsafe_output_mode,
        }
    }
}

/// Version 0 layout (classic PHY modes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigV0 {
    pub common: ConfigCommon,
    pub pwm_frequency: u16,
    pub pwm_synchronized: u32,
    pub analog_output: u8,
    pub external_bus_type: u8,
}

impl Default for ConfigV0 {
    fn default() -> Self {
        Self {
            common: ConfigCommon::default(),
            pwm_frequency: DEFAULT_PWM_FREQUENCY,
            pwm_synchronized: 0,
            analog_output: 0,
            external_bus_type: 0,
        }
    }
}

/// Version 1 layout (routine PHY modes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigV1 {
    pub common: ConfigCommon,
    pub pwm_frequencies: [u16; CONFIG_MAX_CHANNELS],
    pub pwm_synchronized: u32,
    pub new_port_types: [u8; 4],
}

impl Default for ConfigV1 {
    fn default() -> Self {
        Self {
            common: ConfigCommon::default(),
            pwm_frequencies: [DEFAULT_PWM_FREQUENCY; CONFIG_MAX_CHANNELS],
            pwm_synchronized: 0,
            new_port_types: [0; 4],
        }
    }
}

/// Module configuration, tagged by layout version
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSchema {
    V0(ConfigV0),
    V1(ConfigV1),
}

impl Default for ConfigSchema {
    fn default() -> Self {
        ConfigSchema::V0(ConfigV0::default())
    }
}

impl ConfigSchema {
    /// Fresh record of the given layout, filled with its defaults
    ///
    /// Any version other than 1 yields the version 0 layout.
    pub fn with_version(version: u8) -> Self {
        if version == 1 {
            ConfigSchema::V1(ConfigV1::default())
        } else {
            ConfigSchema::V0(ConfigV0::default())
        }
    }

    pub fn version(&self) -> u8 {
        match self {
            ConfigSchema::V0(_) => 0,
            ConfigSchema::V1(_) => 1,
        }
    }

    /// Encoded size of the active layout
    pub fn encoded_len(&self) -> usize {
        match self {
            ConfigSchema::V0(_) => CONFIG_V0_SIZE,
            ConfigSchema::V1(_) => CONFIG_V1_SIZE,
        }
    }

    pub fn common(&self) -> &ConfigCommon {
        match self {
            ConfigSchema::V0(cfg) => &cfg.common,
            ConfigSchema::V1(cfg) => &cfg.common,
        }
    }

    pub fn common_mut(&mut self) -> &mut ConfigCommon {
        match self {
            ConfigSchema::V0(cfg) => &mut cfg.common,
            ConfigSchema::V1(cfg) => &mut cfg.common,
        }
    }

    pub fn phy_mode(&self) -> PhyMode {
        PhyMode::from_byte(self.common().phy_mode)
    }

    pub fn is_two_way(&self) -> bool {
        self.common().is_two_way
    }

    /// Switch to the given layout; a change always starts from that
    /// layout's defaults
    pub fn reset_if_version_changed(&mut self, version: u8) {
        if self.version() != version {
            *self = Self::with_version(version);
        }
    }

    /// Write the active layout into `buf`, returning the encoded bytes
    pub fn encode<'b>(&self, buf: &'b mut [u8; CONFIG_BUFFER_SIZE]) -> &'b [u8] {
        let len = self.encoded_len();
        {
            let mut out: &mut [u8] = &mut buf[..];
            self.common().write(self.version(), &mut out);
            match self {
                ConfigSchema::V0(cfg) => {
                    out.put_u16_le(cfg.pwm_frequency);
                    out.put_u32_le(cfg.pwm_synchronized);
                    out.put_u8(cfg.analog_output);
                    out.put_u8(cfg.external_bus_type);
                }
                ConfigSchema::V1(cfg) => {
                    for frequency in cfg.pwm_frequencies {
                        out.put_u16_le(frequency);
                    }
                    out.put_u32_le(cfg.pwm_synchronized);
                    out.put_slice(&cfg.new_port_types);
                }
            }
        }
        &buf[..len]
    }

    /// Overlay a GET_CONFIG payload onto the cached record
    ///
    /// The version byte picks the layout. When it matches the cached one,
    /// bytes beyond the payload keep their cached values; otherwise they
    /// start from zero. At most one record's worth of bytes is consumed.
    ///
    /// # Errors
    ///
    /// Returns error if the payload is empty or names an unknown layout
    pub fn overlay(&mut self, payload: &[u8]) -> Result<()> {
        let version = *payload
            .first()
            .ok_or_else(|| Afhds3Error::Protocol("Empty config payload".to_string()))?;
        if version > 1 {
            return Err(Afhds3Error::Protocol(format!(
                "Unknown config version: {}",
                version
            )));
        }

        let mut buf = [0u8; CONFIG_BUFFER_SIZE];
        if version == self.version() {
            self.encode(&mut buf);
        }

        let size = if version == 1 { CONFIG_V1_SIZE } else { CONFIG_V0_SIZE };
        let len = payload.len().min(size);
        buf[..len].copy_from_slice(&payload[..len]);

        *self = Self::decode_layout(version, &buf[..size]);
        Ok(())
    }

    fn decode_layout(version: u8, bytes: &[u8]) -> Self {
        let mut buf = bytes;
        let common = ConfigCommon::read(&mut buf);

        if version == 1 {
            let mut pwm_frequencies = [0u16; CONFIG_MAX_CHANNELS];
            for frequency in pwm_frequencies.iter_mut() {
                *frequency = buf.get_u16_le();
            }
            let pwm_synchronized = buf.get_u32_le();
            let mut new_port_types = [0u8; 4];
            buf.copy_to_slice(&mut new_port_types);

            ConfigSchema::V1(ConfigV1 {
                common,
                pwm_frequencies,
                pwm_synchronized,
                new_port_types,
            })
        } else {
            ConfigSchema::V0(ConfigV0 {
                common,
                pwm_frequency: buf.get_u16_le(),
                pwm_synchronized: buf.get_u32_le(),
                analog_output: buf.get_u8(),
                external_bus_type: buf.get_u8(),
            })
        }
    }
}

const _: () = assert!(COMMON_SIZE + 8 == CONFIG_V0_SIZE);
const _: () = assert!(COMMON_SIZE + 72 == CONFIG_V1_SIZE);

/// Module firmware identification, as reported by MODULE_VERSION
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModuleVersion {
    pub product_number: u32,
    pub hardware_version: u32,
    pub bootloader_version: u32,
    pub firmware_version: u32,
    pub rf_version: u32,
}

impl ModuleVersion {
    /// Encoded size: five little-endian u32
    pub const SIZE: usize = 20;

    /// Decode a MODULE_VERSION payload; missing trailing bytes read as zero
    pub fn from_payload(payload: &[u8]) -> Self {
        let mut raw = [0u8; Self::SIZE];
        let len = payload.len().min(Self::SIZE);
        raw[..len].copy_from_slice(&payload[..len]);

        let mut buf = &raw[..];
        Self {
            product_number: buf.get_u32_le(),
            hardware_version: buf.get_u32_le(),
            bootloader_version: buf.get_u32_le(),
            firmware_version: buf.get_u32_le(),
            rf_version: buf.get_u32_le(),
        }
    }
}
