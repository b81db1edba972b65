//! # Host Model Interface
//!
//! Everything a [`Session`](super::session::Session) needs from the
//! transmitter it runs on: mixer outputs, model failsafe policy, the
//! requested operating mode and the per-module settings it mirrors back.
//!
//! The host owns this data. A session only borrows it for the duration of a
//! single tick or inbound frame and never keeps a copy.

use serde::Deserialize;

use super::protocol::{EmiStandard, ModuleSlot, PhyMode};
use crate::config::Config;

/// Number of logical output channels a model can have
pub const MAX_OUTPUT_CHANNELS: usize = 32;

/// Number of module bays on the transmitter
pub const MAX_MODULES: usize = 2;

/// Operating mode the host asks the module to be in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestedMode {
    #[default]
    Normal,
    Bind,
    RangeCheck,
}

/// Model-wide failsafe policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailsafeMode {
    #[default]
    NotSet,
    Hold,
    Custom,
    NoPulses,
    Receiver,
}

/// Per-channel failsafe entry, used when the policy is [`FailsafeMode::Custom`]
///
/// In configuration files an entry is either a channel value or one of the
/// keywords `"hold"` / `"no_pulse"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "FailsafeChannelEntry")]
pub enum FailsafeChannel {
    Value(i16),
    Hold,
    NoPulse,
}

impl Default for FailsafeChannel {
    fn default() -> Self {
        FailsafeChannel::Value(0)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FailsafeChannelEntry {
    Value(i16),
    Keyword(String),
}

impl TryFrom<FailsafeChannelEntry> for FailsafeChannel {
    type Error = String;

    fn try_from(entry: FailsafeChannelEntry) -> Result<Self, Self::Error> {
        match entry {
            FailsafeChannelEntry::Value(value) => Ok(FailsafeChannel::Value(value)),
            FailsafeChannelEntry::Keyword(word) => match word.as_str() {
                "hold" => Ok(FailsafeChannel::Hold),
                "no_pulse" => Ok(FailsafeChannel::NoPulse),
                other => Err(format!(
                    "invalid failsafe channel '{}' (expected a value, \"hold\" or \"no_pulse\")",
                    other
                )),
            },
        }
    }
}

/// Model settings for one module bay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSettings {
    /// First logical output channel sent to the module
    pub channels_start: u8,
    /// Number of logical output channels sent to the module
    pub channels_count: u8,
    pub failsafe_mode: FailsafeMode,
    pub phy_mode: PhyMode,
    pub emi: EmiStandard,
    /// Two-way link (receiver sends telemetry)
    pub telemetry: bool,
    pub mode: RequestedMode,
}

impl Default for ModuleSettings {
    fn default() -> Self {
        Self {
            channels_start: 0,
            channels_count: 8,
            failsafe_mode: FailsafeMode::NotSet,
            phy_mode: PhyMode::ClassicFlcr1Ch18,
            emi: EmiStandard::Fcc,
            telemetry: true,
            mode: RequestedMode::Normal,
        }
    }
}

/// Host services a session reads each tick and updates on inbound frames
pub trait ModuleHost {
    /// Current mixer output of a logical channel (-1024..=1024 nominal)
    fn channel_output(&self, channel: usize) -> i32;

    /// Custom failsafe entry of a logical channel
    fn failsafe_channel(&self, channel: usize) -> FailsafeChannel;

    /// Receiver number of the active model for this bay
    fn model_id(&self, slot: ModuleSlot) -> u8;

    fn module_settings(&self, slot: ModuleSlot) -> &ModuleSettings;

    fn module_settings_mut(&mut self, slot: ModuleSlot) -> &mut ModuleSettings;

    fn requested_mode(&self, slot: ModuleSlot) -> RequestedMode {
        self.module_settings(slot).mode
    }

    fn set_requested_mode(&mut self, slot: ModuleSlot, mode: RequestedMode) {
        self.module_settings_mut(slot).mode = mode;
    }
}

/// In-memory model owned by the host driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelData {
    pub model_ids: [u8; MAX_MODULES],
    pub channel_outputs: [i32; MAX_OUTPUT_CHANNELS],
    pub failsafe_channels: [FailsafeChannel; MAX_OUTPUT_CHANNELS],
    pub modules: [ModuleSettings; MAX_MODULES],
}

impl Default for ModelData {
    fn default() -> Self {
        Self {
            model_ids: [0; MAX_MODULES],
            channel_outputs: [0; MAX_OUTPUT_CHANNELS],
            failsafe_channels: [FailsafeChannel::default(); MAX_OUTPUT_CHANNELS],
            modules: [ModuleSettings::default(), ModuleSettings::default()],
        }
    }
}

impl ModelData {
    /// Build the model for the configured module bay
    pub fn from_config(config: &Config) -> Self {
        let mut model = Self::default();
        let slot = config.module.slot;

        model.model_ids[slot.index()] = config.model.model_id;

        for (output, &value) in model
            .channel_outputs
            .iter_mut()
            .zip(config.model.channel_values.iter())
        {
            *output = value;
        }

        for (entry, &failsafe) in model
            .failsafe_channels
            .iter_mut()
            .zip(config.module.failsafe_channels.iter())
        {
            *entry = failsafe;
        }

        model.modules[slot.index()] = ModuleSettings {
            channels_start: config.module.channels_start,
            channels_count: config.module.channels_count,
            failsafe_mode: config.module.failsafe_mode,
            phy_mode: config.module.phy_mode,
            emi: config.module.emi,
            telemetry: config.module.telemetry,
            mode: config.module.mode,
        };

        model
    }
}

impl ModuleHost for ModelData {
    fn channel_output(&self, channel: usize) -> i32 {
        self.channel_outputs.get(channel).copied().unwrap_or(0)
    }

    fn failsafe_channel(&self, channel: usize) -> FailsafeChannel {
        self.failsafe_channels
            .get(channel)
            .copied()
            .unwrap_or_default()
    }

    fn model_id(&self, slot: ModuleSlot) -> u8 {
        self.model_ids[slot.index()]
    }

    fn module_settings(&self, slot: ModuleSlot) -> &ModuleSettings {
        &self.modules[slot.index()]
    }

    fn module_settings_mut(&mut self, slot: ModuleSlot) -> &mut ModuleSettings {
        &mut self.modules[slot.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Entries {
        channels: Vec<FailsafeChannel>,
    }

    #[test]
    fn test_failsafe_channel_from_toml() {
        let entries: Entries = toml::from_str(r#"channels = [100, "hold", "no_pulse", -250]"#).unwrap();
        assert_eq!(
            entries.channels,
            vec![
                FailsafeChannel::Value(100),
                FailsafeChannel::Hold,
                FailsafeChannel::NoPulse,
                FailsafeChannel::Value(-250),
            ]
        );
    }

    #[test]
    fn test_failsafe_channel_invalid_keyword() {
        let result: std::result::Result<Entries, _> = toml::from_str(r#"channels = ["freeze"]"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_requested_mode_roundtrip_through_settings() {
        let mut model = ModelData::default();
        assert_eq!(model.requested_mode(ModuleSlot::External), RequestedMode::Normal);

        model.set_requested_mode(ModuleSlot::External, RequestedMode::Bind);
        assert_eq!(model.requested_mode(ModuleSlot::External), RequestedMode::Bind);
        assert_eq!(model.requested_mode(ModuleSlot::Internal), RequestedMode::Normal);
    }

    #[test]
    fn test_out_of_range_channels_read_neutral() {
        let model = ModelData::default();
        assert_eq!(model.channel_output(MAX_OUTPUT_CHANNELS + 3), 0);
        assert_eq!(
            model.failsafe_channel(MAX_OUTPUT_CHANNELS + 3),
            FailsafeChannel::Value(0)
        );
    }
}
