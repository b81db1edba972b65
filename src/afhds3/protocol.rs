//! # AFHDS3 Protocol Constants and Types
//!
//! Core protocol definitions for AFHDS3 module communication: command ids,
//! frame types, module states and the bounds-checked inbound frame view.

use serde::Deserialize;

use crate::error::{Afhds3Error, Result};

/// Maximum number of RF channels carried by a channels/failsafe frame
pub const AFHDS3_MAX_CHANNELS: usize = 18;

/// Size of the failsafe and PWM tables inside the module configuration record
pub const CONFIG_MAX_CHANNELS: usize = 32;

/// RF channel count indexed by PHY mode
pub const PHY_MODE_CHANNELS: [u8; 5] = [18, 10, 18, 8, 12];

/// Failsafe sentinel: hold the last received position
pub const FAILSAFE_HOLD_VALUE: i16 = 0x8000u16 as i16;

/// Failsafe sentinel: stop output pulses
pub const FAILSAFE_NOPULSES_VALUE: i16 = 0x8001u16 as i16;

/// Scaled channel value range (strictly inside the failsafe sentinels)
pub const AFHDS3_FAILSAFE_MIN: i16 = -15000;
pub const AFHDS3_FAILSAFE_MAX: i16 = 15000;

/// Receiver command id used to push failsafe values over a two-way link
pub const RX_CMD_FAILSAFE_VALUE: u16 = 0x6011;

/// Number of ticks between two periodic background requests
pub const PERIODIC_REQUEST_INTERVAL: u32 = 150;

/// MODULE_READY response payloads
pub const MODULE_STATUS_NOT_READY: u8 = 0x01;
pub const MODULE_STATUS_READY: u8 = 0x02;

/// Marker byte opening a TELEMETRY_DATA payload that carries sensor records
pub const TELEMETRY_SENSOR_MARKER: u8 = 0x22;

/// Inbound frame header: address(1) + frame number(1) + type(1) + command(1)
pub const FRAME_HEADER_SIZE: usize = 4;

/// Largest frame body (header + payload) accepted from or sent to a module
pub const MAX_FRAME_BODY_SIZE: usize = 160;

/// Protocol commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    ModuleReady = 0x01,
    ModuleState = 0x02,
    ModuleMode = 0x03,
    ModuleSetConfig = 0x04,
    ModuleGetConfig = 0x06,
    ChannelsFailsafeData = 0x07,
    TelemetryData = 0x09,
    SendCommand = 0x0C,
    CommandResult = 0x0D,
    ModulePowerStatus = 0x0F,
    ModuleVersion = 0x1F,
    ModelId = 0x2F,
    /// Local only: triggers a failsafe push, never sent on the wire
    VirtualFailsafe = 0x99,
}

impl TryFrom<u8> for Command {
    type Error = Afhds3Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0x01 => Command::ModuleReady,
            0x02 => Command::ModuleState,
            0x03 => Command::ModuleMode,
            0x04 => Command::ModuleSetConfig,
            0x06 => Command::ModuleGetConfig,
            0x07 => Command::ChannelsFailsafeData,
            0x09 => Command::TelemetryData,
            0x0C => Command::SendCommand,
            0x0D => Command::CommandResult,
            0x0F => Command::ModulePowerStatus,
            0x1F => Command::ModuleVersion,
            0x2F => Command::ModelId,
            0x99 => Command::VirtualFailsafe,
            other => {
                return Err(Afhds3Error::Protocol(format!(
                    "Unknown command: 0x{:02X}",
                    other
                )))
            }
        })
    }
}

/// Frame types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    RequestGetData = 0x01,
    RequestSetExpectData = 0x02,
    RequestSetExpectAck = 0x03,
    RequestSetNoResp = 0x05,
    ResponseData = 0x10,
    ResponseAck = 0x20,
}

impl FrameType {
    /// Whether a frame of this type carries a payload that must be interpreted
    pub fn contains_data(self) -> bool {
        matches!(
            self,
            FrameType::ResponseData
                | FrameType::RequestSetExpectData
                | FrameType::RequestSetExpectAck
                | FrameType::RequestSetNoResp
        )
    }

    /// Whether the sender of this frame waits for an answer
    pub fn expects_response(self) -> bool {
        matches!(
            self,
            FrameType::RequestGetData
                | FrameType::RequestSetExpectData
                | FrameType::RequestSetExpectAck
        )
    }

    /// Whether this is a module-initiated request
    pub fn is_request(self) -> bool {
        matches!(
            self,
            FrameType::RequestGetData | FrameType::RequestSetExpectData
        )
    }

    /// Whether this is an answer to one of our requests
    pub fn is_response(self) -> bool {
        matches!(self, FrameType::ResponseData | FrameType::ResponseAck)
    }
}

impl TryFrom<u8> for FrameType {
    type Error = Afhds3Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0x01 => FrameType::RequestGetData,
            0x02 => FrameType::RequestSetExpectData,
            0x03 => FrameType::RequestSetExpectAck,
            0x05 => FrameType::RequestSetNoResp,
            0x10 => FrameType::ResponseData,
            0x20 => FrameType::ResponseAck,
            other => {
                return Err(Afhds3Error::Protocol(format!(
                    "Unknown frame type: 0x{:02X}",
                    other
                )))
            }
        })
    }
}

/// Module connection state as reported by the module
///
/// `Ready` is virtual: it is only entered when the module answers a
/// MODULE_READY query positively and is left on the next state report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ModuleState {
    NotReady = 0x00,
    HwError = 0x01,
    Binding = 0x02,
    SyncRunning = 0x03,
    SyncDone = 0x04,
    Standby = 0x05,
    UpdatingWait = 0x06,
    UpdatingModule = 0x07,
    UpdatingRx = 0x08,
    UpdatingRxFailed = 0x09,
    RfTesting = 0x0A,
    Ready = 0x0B,
    HwTest = 0xFF,
}

impl ModuleState {
    /// Human readable status shown by the host
    pub fn status_text(self) -> &'static str {
        match self {
            ModuleState::NotReady => "Not ready",
            ModuleState::HwError => "HW Error",
            ModuleState::Binding => "Binding",
            ModuleState::SyncRunning => "Disconnected",
            ModuleState::SyncDone => "Connected",
            ModuleState::Standby => "Standby",
            ModuleState::UpdatingWait => "Waiting for update",
            ModuleState::UpdatingModule => "Updating",
            ModuleState::UpdatingRx => "Updating RX",
            ModuleState::UpdatingRxFailed => "Updating RX failed",
            ModuleState::RfTesting => "Testing",
            ModuleState::Ready => "Ready",
            ModuleState::HwTest => "HW test",
        }
    }
}

impl TryFrom<u8> for ModuleState {
    type Error = Afhds3Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0x00 => ModuleState::NotReady,
            0x01 => ModuleState::HwError,
            0x02 => ModuleState::Binding,
            0x03 => ModuleState::SyncRunning,
            0x04 => ModuleState::SyncDone,
            0x05 => ModuleState::Standby,
            0x06 => ModuleState::UpdatingWait,
            0x07 => ModuleState::UpdatingModule,
            0x08 => ModuleState::UpdatingRx,
            0x09 => ModuleState::UpdatingRxFailed,
            0x0A => ModuleState::RfTesting,
            0x0B => ModuleState::Ready,
            0xFF => ModuleState::HwTest,
            other => {
                return Err(Afhds3Error::Protocol(format!(
                    "Unknown module state: 0x{:02X}",
                    other
                )))
            }
        })
    }
}

/// Module operating mode, as sent with MODULE_MODE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ModuleMode {
    Standby = 0x01,
    /// After bind the module enters run mode by itself
    Bind = 0x02,
    Run = 0x03,
    RxUpdate = 0x04,
}

/// Result byte of set commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CmdResult {
    Failure = 0x01,
    Success = 0x02,
}

/// Leading byte of a CHANNELS_FAILSAFE_DATA payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelsDataMode {
    Channels = 0x01,
    FailSafe = 0x02,
}

/// Device ids used in the address nibbles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceAddress {
    Transmitter = 0x01,
    Frm303 = 0x04,
    Irm301 = 0x05,
}

/// Module bay the session drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleSlot {
    Internal,
    External,
}

impl ModuleSlot {
    /// Slot index into host per-module tables
    pub fn index(self) -> usize {
        match self {
            ModuleSlot::Internal => 0,
            ModuleSlot::External => 1,
        }
    }

    /// Frame address byte: destination module in the high nibble,
    /// transmitter in the low nibble
    pub fn frame_address(self) -> u8 {
        let module = match self {
            ModuleSlot::Internal => DeviceAddress::Irm301,
            ModuleSlot::External => DeviceAddress::Frm303,
        };
        (module as u8) << 4 | DeviceAddress::Transmitter as u8
    }
}

/// Physical radio configuration of the module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[repr(u8)]
pub enum PhyMode {
    #[default]
    #[serde(rename = "classic_flcr1_18ch")]
    ClassicFlcr1Ch18 = 0,
    #[serde(rename = "classic_flcr6_10ch")]
    ClassicFlcr6Ch10 = 1,
    #[serde(rename = "routine_flcr1_18ch")]
    RoutineFlcr1Ch18 = 2,
    #[serde(rename = "routine_flcr6_8ch")]
    RoutineFlcr6Ch8 = 3,
    #[serde(rename = "routine_lora_12ch")]
    RoutineLoraCh12 = 4,
}

impl PhyMode {
    /// Number of RF channels the module streams in this mode
    pub fn channel_count(self) -> usize {
        PHY_MODE_CHANNELS[self as usize] as usize
    }

    /// Configuration record layout used in this mode
    pub fn config_version(self) -> u8 {
        if self as u8 >= PhyMode::RoutineFlcr1Ch18 as u8 {
            1
        } else {
            0
        }
    }

    /// Decode a PHY mode byte, falling back to the first mode for unknown values
    pub fn from_byte(value: u8) -> Self {
        match value {
            1 => PhyMode::ClassicFlcr6Ch10,
            2 => PhyMode::RoutineFlcr1Ch18,
            3 => PhyMode::RoutineFlcr6Ch8,
            4 => PhyMode::RoutineLoraCh12,
            _ => PhyMode::ClassicFlcr1Ch18,
        }
    }
}

/// Regulatory standard the module radiates under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum EmiStandard {
    #[default]
    Fcc = 0,
    Ce = 1,
}

impl EmiStandard {
    pub fn from_byte(value: u8) -> Self {
        if value == EmiStandard::Ce as u8 {
            EmiStandard::Ce
        } else {
            EmiStandard::Fcc
        }
    }
}

/// Reassembled inbound frame, borrowed from the receive buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Address byte (source/destination nibbles)
    pub address: u8,

    /// Sequence number chosen by the request sender
    pub frame_number: u8,

    /// Frame type
    pub frame_type: FrameType,

    /// Raw command id (may be one we do not implement)
    pub command: u8,

    /// Payload bytes following the header
    pub payload: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Decode a frame body (address, number, type, command, payload)
    ///
    /// # Errors
    ///
    /// Returns error if the body is shorter than the header, longer than
    /// [`MAX_FRAME_BODY_SIZE`] or carries an unknown frame type
    pub fn decode(body: &'a [u8]) -> Result<Self> {
        if body.len() < FRAME_HEADER_SIZE {
            return Err(Afhds3Error::Protocol(format!(
                "Frame too short: {} bytes",
                body.len()
            )));
        }

        if body.len() > MAX_FRAME_BODY_SIZE {
            return Err(Afhds3Error::Protocol(format!(
                "Frame too long: {} bytes",
                body.len()
            )));
        }

        Ok(Self {
            address: body[0],
            frame_number: body[1],
            frame_type: FrameType::try_from(body[2])?,
            command: body[3],
            payload: &body[FRAME_HEADER_SIZE..],
        })
    }

    /// First payload byte, the "value" of most responses
    pub fn value(&self) -> Option<u8> {
        self.payload.first().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phy_mode_channel_table() {
        assert_eq!(PHY_MODE_CHANNELS, [18, 10, 18, 8, 12]);
        assert_eq!(PhyMode::ClassicFlcr1Ch18.channel_count(), 18);
        assert_eq!(PhyMode::ClassicFlcr6Ch10.channel_count(), 10);
        assert_eq!(PhyMode::RoutineFlcr1Ch18.channel_count(), 18);
        assert_eq!(PhyMode::RoutineFlcr6Ch8.channel_count(), 8);
        assert_eq!(PhyMode::RoutineLoraCh12.channel_count(), 12);
    }

    #[test]
    fn test_config_version_follows_phy_mode() {
        assert_eq!(PhyMode::ClassicFlcr1Ch18.config_version(), 0);
        assert_eq!(PhyMode::ClassicFlcr6Ch10.config_version(), 0);
        assert_eq!(PhyMode::RoutineFlcr1Ch18.config_version(), 1);
        assert_eq!(PhyMode::RoutineFlcr6Ch8.config_version(), 1);
        assert_eq!(PhyMode::RoutineLoraCh12.config_version(), 1);
    }

    #[test]
    fn test_failsafe_sentinels() {
        assert_eq!(FAILSAFE_HOLD_VALUE as u16, 0x8000);
        assert_eq!(FAILSAFE_NOPULSES_VALUE as u16, 0x8001);
        assert!(AFHDS3_FAILSAFE_MIN > FAILSAFE_NOPULSES_VALUE);
    }

    #[test]
    fn test_frame_addresses() {
        assert_eq!(ModuleSlot::Internal.frame_address(), 0x51);
        assert_eq!(ModuleSlot::External.frame_address(), 0x41);
    }

    #[test]
    fn test_status_text() {
        assert_eq!(ModuleState::NotReady.status_text(), "Not ready");
        assert_eq!(ModuleState::SyncDone.status_text(), "Connected");
        assert_eq!(ModuleState::SyncRunning.status_text(), "Disconnected");
        assert_eq!(ModuleState::Ready.status_text(), "Ready");
    }

    #[test]
    fn test_module_state_from_byte() {
        assert_eq!(ModuleState::try_from(0x04).unwrap(), ModuleState::SyncDone);
        assert_eq!(ModuleState::try_from(0xFF).unwrap(), ModuleState::HwTest);
        assert!(ModuleState::try_from(0x42).is_err());
    }

    #[test]
    fn test_data_bearing_frame_types() {
        assert!(FrameType::ResponseData.contains_data());
        assert!(FrameType::RequestSetExpectData.contains_data());
        assert!(FrameType::RequestSetExpectAck.contains_data());
        assert!(FrameType::RequestSetNoResp.contains_data());
        assert!(!FrameType::RequestGetData.contains_data());
        assert!(!FrameType::ResponseAck.contains_data());
    }

    #[test]
    fn test_decode_frame() {
        let body = [0x14, 0x07, 0x10, 0x02, 0x04];
        let frame = Frame::decode(&body).unwrap();
        assert_eq!(frame.address, 0x14);
        assert_eq!(frame.frame_number, 0x07);
        assert_eq!(frame.frame_type, FrameType::ResponseData);
        assert_eq!(frame.command, Command::ModuleState as u8);
        assert_eq!(frame.value(), Some(0x04));
    }

    #[test]
    fn test_decode_frame_too_short() {
        assert!(Frame::decode(&[0x14, 0x07, 0x10]).is_err());
    }

    #[test]
    fn test_decode_frame_unknown_type() {
        assert!(Frame::decode(&[0x14, 0x07, 0x77, 0x02]).is_err());
    }

    #[test]
    fn test_decode_frame_empty_payload() {
        let frame = Frame::decode(&[0x14, 0x07, 0x10, 0x02]).unwrap();
        assert!(frame.payload.is_empty());
        assert_eq!(frame.value(), None);
    }
}
