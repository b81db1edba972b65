//! # AFHDS3 Session
//!
//! Per-module protocol state machine. Once per output tick
//! [`Session::setup_frame`] decides which single command to stage next;
//! every received byte goes through [`Session::process_byte`], which hands
//! completed frames to [`Session::handle_frame`].
//!
//! Tick priorities, first match wins:
//!
//! 1. transport gave up on a request: back to `NotReady`, send nothing
//! 2. `NotReady`: ask MODULE_READY
//! 3. drain one queued command
//! 4. settings sync hook
//! 5. host requested mode (bind / model id handshake / run)
//! 6. pending GET_CONFIG
//! 7. periodic MODULE_STATE / failsafe push every 150 ticks
//! 8. channel data when connected, MODULE_STATE otherwise
//!
//! The host serializes both entry points; nothing here locks or blocks.

use tracing::{debug, info, trace, warn};

use super::failsafe::{compute_failsafe, encode_values, ChannelsPayload, CHANNELS_PAYLOAD_MAX_SIZE};
use super::host::{FailsafeMode, ModuleHost, RequestedMode};
use super::module_config::{ConfigSchema, ModuleVersion, CONFIG_BUFFER_SIZE};
use super::protocol::*;
use super::telemetry::{remap_telemetry, TelemetrySink};
use crate::transport::{Retransmission, Transport};

/// Background requests issued round-robin every [`PERIODIC_REQUEST_INTERVAL`] ticks
const PERIODIC_REQUESTS: [Command; 2] = [Command::ModuleState, Command::VirtualFailsafe];

/// Receiver command: id (2 bytes LE) + value length + failsafe values
const FAILSAFE_COMMAND_MAX_SIZE: usize = 3 + 2 * AFHDS3_MAX_CHANNELS;

const RX_BUFFER_SIZE: usize = MAX_FRAME_BODY_SIZE + 1;

/// Protocol session for one module bay
#[derive(Debug)]
pub struct Session<T: Transport, S: TelemetrySink> {
    slot: ModuleSlot,
    transport: T,
    sink: S,

    /// Last state reported by the module
    state: ModuleState,

    /// Configuration as last read from, or pushed to, the module
    config: ConfigSchema,
    version: ModuleVersion,

    /// Model id has been pushed since the last handshake
    model_id_set: bool,
    model_id: u8,
    config_fetch_pending: bool,

    /// Ticks since the last periodic request
    cmd_count: u32,
    /// Next entry of [`PERIODIC_REQUESTS`]
    cmd_index: usize,

    /// Reassembly scratch; holds the checksum until the frame completes
    rx_buffer: [u8; RX_BUFFER_SIZE],
    rx_len: usize,
}

impl<T: Transport, S: TelemetrySink> Session<T, S> {
    /// Create a session for `slot`, starting from `NotReady`
    ///
    /// # Arguments
    ///
    /// * `slot` - Module bay this session drives
    /// * `transport` - Framed link to the module, already addressed for `slot`
    /// * `sink` - Receiver of remapped telemetry sensor records
    pub fn new(slot: ModuleSlot, transport: T, sink: S) -> Self {
        let mut session = Self {
            slot,
            transport,
            sink,
            state: ModuleState::NotReady,
            config: ConfigSchema::default(),
            version: ModuleVersion::default(),
            model_id_set: false,
            model_id: 0,
            config_fetch_pending: false,
            cmd_count: 0,
            cmd_index: 0,
            rx_buffer: [0; RX_BUFFER_SIZE],
            rx_len: 0,
        };
        session.init();
        session
    }

    /// Restart the handshake from scratch
    pub fn init(&mut self) {
        self.state = ModuleState::NotReady;
        self.model_id_set = false;
        self.rx_len = 0;
        self.clear_frame_data();
    }

    pub fn slot(&self) -> ModuleSlot {
        self.slot
    }

    pub fn state(&self) -> ModuleState {
        self.state
    }

    /// Cached module configuration
    pub fn config(&self) -> &ConfigSchema {
        &self.config
    }

    /// Last MODULE_VERSION report
    pub fn module_version(&self) -> &ModuleVersion {
        &self.version
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn status_text(&self) -> &'static str {
        self.state.status_text()
    }

    /// Module and receiver are synchronized and channel data flows
    pub fn is_connected(&self) -> bool {
        self.state == ModuleState::SyncDone
    }

    /// The module is configured for a two-way link
    pub fn has_telemetry(&self) -> bool {
        self.config.is_two_way()
    }

    /// Stage the command for this tick
    ///
    /// At most one new frame is staged; call [`physically_send`](Self::physically_send)
    /// afterwards to collect it.
    pub fn setup_frame<H: ModuleHost + ?Sized>(&mut self, host: &H) {
        match self.transport.handle_retransmissions() {
            Retransmission::Resent => return,
            Retransmission::Failed => {
                warn!("AFHDS3 link lost in state {:?}, restarting handshake", self.state);
                self.state = ModuleState::NotReady;
                self.clear_frame_data();
                return;
            }
            Retransmission::Idle => {}
        }

        if self.state == ModuleState::NotReady {
            trace!("AFHDS3 [GET MODULE READY]");
            self.transport
                .send_frame(Command::ModuleReady, FrameType::RequestGetData, &[]);
            return;
        }

        if self.transport.process_queue() {
            return;
        }

        if self.sync_settings() {
            return;
        }

        match host.requested_mode(self.slot) {
            RequestedMode::Bind => {
                if self.state != ModuleState::Binding {
                    info!("AFHDS3 [BIND]");
                    self.apply_config_from_model(host);

                    let mut buf = [0u8; CONFIG_BUFFER_SIZE];
                    let config = self.config.encode(&mut buf);
                    self.transport.send_frame(
                        Command::ModuleSetConfig,
                        FrameType::RequestSetExpectData,
                        config,
                    );
                    self.transport.enqueue(
                        Command::ModuleMode,
                        FrameType::RequestSetExpectData,
                        &[ModuleMode::Bind as u8],
                    );
                    return;
                }
            }
            RequestedMode::RangeCheck => {
                debug!("AFHDS3 [RANGE CHECK] not supported");
            }
            RequestedMode::Normal => {
                if self.normal_mode_step(host) {
                    return;
                }
            }
        }

        if self.config_fetch_pending {
            trace!("AFHDS3 [GET CONFIG]");
            self.transport
                .send_frame(Command::ModuleGetConfig, FrameType::RequestGetData, &[]);
            return;
        }

        if self.periodic_request(host) {
            return;
        }

        if self.is_connected() {
            self.send_channels_data(host);
        } else {
            self.transport
                .send_frame(Command::ModuleState, FrameType::RequestGetData, &[]);
        }
    }

    /// Take the staged bytes for writing to the port
    pub fn physically_send(&mut self) -> Option<bytes::Bytes> {
        self.transport.physically_send()
    }

    /// Feed one received byte; a completed frame is dispatched immediately
    pub fn process_byte<H: ModuleHost + ?Sized>(&mut self, byte: u8, host: &mut H) {
        if !self
            .transport
            .feed_byte(byte, &mut self.rx_buffer, &mut self.rx_len)
        {
            return;
        }

        let body = self.rx_buffer;
        let len = self.rx_len.min(body.len());
        self.rx_len = 0;

        match Frame::decode(&body[..len]) {
            Ok(frame) => self.handle_frame(&frame, host),
            Err(e) => debug!("AFHDS3 dropping frame: {}", e),
        }
    }

    /// Act on one inbound frame
    pub fn handle_frame<H: ModuleHost + ?Sized>(&mut self, frame: &Frame<'_>, host: &mut H) {
        let command = Command::try_from(frame.command).ok();

        if frame.frame_type.contains_data() {
            match command {
                Some(Command::ModuleReady) => {
                    let Some(value) = frame.value() else {
                        return;
                    };
                    trace!("AFHDS3 [MODULE_READY] {:02X}", value);
                    if value == MODULE_STATUS_READY {
                        self.set_state(ModuleState::Ready, host);
                    } else {
                        self.set_state(ModuleState::NotReady, host);
                    }
                    return;
                }
                Some(Command::ModuleGetConfig) => {
                    self.config_fetch_pending = false;
                    if let Err(e) = self.config.overlay(frame.payload) {
                        warn!("AFHDS3 [MODULE_GET_CONFIG] ignored: {}", e);
                        return;
                    }

                    let common = self.config.common();
                    let settings = host.module_settings_mut(self.slot);
                    settings.emi = EmiStandard::from_byte(common.emi_standard);
                    settings.telemetry = common.is_two_way;
                    settings.phy_mode = PhyMode::from_byte(common.phy_mode);
                    debug!(
                        "AFHDS3 [MODULE_GET_CONFIG] v{} {:?} two-way={}",
                        self.config.version(),
                        settings.phy_mode,
                        settings.telemetry
                    );
                    return;
                }
                Some(Command::ModuleVersion) => {
                    self.version = ModuleVersion::from_payload(frame.payload);
                    info!(
                        "AFHDS3 [MODULE_VERSION] Product {}, HW {}, BOOT {}, FW {}",
                        self.version.product_number,
                        self.version.hardware_version,
                        self.version.bootloader_version,
                        self.version.firmware_version
                    );
                    return;
                }
                Some(Command::ModuleState) => {
                    let Some(value) = frame.value() else {
                        return;
                    };
                    trace!("AFHDS3 [MODULE_STATE] {:02X}", value);
                    match ModuleState::try_from(value) {
                        Ok(state) => self.set_state(state, host),
                        Err(e) => debug!("AFHDS3 [MODULE_STATE] {}", e),
                    }
                    return;
                }
                Some(Command::ModuleMode) | Some(Command::ModuleSetConfig) => {
                    let Some(value) = frame.value() else {
                        return;
                    };
                    trace!("AFHDS3 [{:?}] {:02X}", command, value);
                    if value != CmdResult::Success as u8 {
                        warn!("AFHDS3 {:?} rejected by module ({:02X})", command, value);
                        self.set_state(ModuleState::NotReady, host);
                    }
                    return;
                }
                Some(Command::ModelId) => {
                    if frame.value() == Some(CmdResult::Success as u8) {
                        self.config_fetch_pending = true;
                    }
                    return;
                }
                Some(Command::TelemetryData) => {
                    remap_telemetry(frame.payload, &mut self.sink);
                    return;
                }
                Some(Command::CommandResult) => {
                    trace!("AFHDS3 [COMMAND_RESULT] {:02X?}", frame.payload);
                    return;
                }
                _ => {}
            }
        }

        if frame.frame_type.is_request() {
            debug!("AFHDS3 command {:02X} not implemented", frame.command);
        }
    }

    /// Command the module into standby; does not wait for the answer
    pub fn stop(&mut self) {
        info!("AFHDS3 STOP");
        self.transport.send_frame(
            Command::ModuleMode,
            FrameType::RequestSetExpectData,
            &[ModuleMode::Standby as u8],
        );
    }

    /// Rebuild the cached configuration from the host model
    ///
    /// A PHY mode needing another layout resets the record to that layout's
    /// defaults first.
    pub fn apply_config_from_model<H: ModuleHost + ?Sized>(&mut self, host: &H) {
        let settings = host.module_settings(self.slot);
        self.config
            .reset_if_version_changed(settings.phy_mode.config_version());

        let common = self.config.common_mut();
        common.emi_standard = settings.emi as u8;
        common.is_two_way = settings.telemetry;
        common.phy_mode = settings.phy_mode as u8;
        compute_failsafe(host, self.slot, &mut common.failsafe, AFHDS3_MAX_CHANNELS);
        common.failsafe_output_mode = settings.failsafe_mode != FailsafeMode::NoPulses;
    }

    fn set_state<H: ModuleHost + ?Sized>(&mut self, state: ModuleState, host: &mut H) {
        if state == self.state {
            return;
        }

        debug!("AFHDS3 state {:?} -> {:?}", self.state, state);
        let old = self.state;
        self.state = state;

        if old == ModuleState::Binding {
            host.set_requested_mode(self.slot, RequestedMode::Normal);
        }
        if state == ModuleState::NotReady {
            self.transport.clear();
        }
    }

    fn clear_frame_data(&mut self) {
        trace!("AFHDS3 clear frame data");
        self.transport.clear();
        self.cmd_count = 0;
        self.cmd_index = 0;
    }

    /// Live settings drift correction; no setting is synchronized yet
    fn sync_settings(&mut self) -> bool {
        false
    }

    /// Model id handshake and run/bind-exit transitions
    ///
    /// Returns `true` when a frame was staged.
    fn normal_mode_step<H: ModuleHost + ?Sized>(&mut self, host: &H) -> bool {
        if self.state == ModuleState::Ready {
            self.transport
                .send_frame(Command::ModuleState, FrameType::RequestGetData, &[]);
            return true;
        }

        let host_model_id = host.model_id(self.slot);
        if !self.model_id_set {
            if self.state != ModuleState::Standby {
                self.send_mode(ModuleMode::Standby);
            } else {
                debug!("AFHDS3 [MODEL_ID] {}", host_model_id);
                self.model_id_set = true;
                self.model_id = host_model_id;
                self.transport.send_frame(
                    Command::ModelId,
                    FrameType::RequestSetExpectData,
                    &[host_model_id],
                );
            }
            return true;
        }

        if self.model_id != host_model_id {
            info!("AFHDS3 model id changed {} -> {}", self.model_id, host_model_id);
            self.model_id_set = false;
            self.send_mode(ModuleMode::Standby);
            return true;
        }

        if self.state == ModuleState::Standby {
            self.cmd_count = 0;
            self.request_run();
            return true;
        }

        if self.state == ModuleState::Binding {
            info!("AFHDS3 [EXIT BIND]");
            self.config_fetch_pending = true;
            self.send_mode(ModuleMode::Run);
            return true;
        }

        false
    }

    fn send_mode(&mut self, mode: ModuleMode) {
        self.transport.send_frame(
            Command::ModuleMode,
            FrameType::RequestSetExpectData,
            &[mode as u8],
        );
    }

    fn request_run(&mut self) {
        self.transport.enqueue(
            Command::ModuleMode,
            FrameType::RequestSetExpectData,
            &[ModuleMode::Run as u8],
        );
        self.transport.process_queue();
    }

    /// Returns `true` when a frame was staged.
    fn periodic_request<H: ModuleHost + ?Sized>(&mut self, host: &H) -> bool {
        self.cmd_count += 1;
        if self.cmd_count < PERIODIC_REQUEST_INTERVAL {
            return false;
        }

        self.cmd_count = 0;
        if self.cmd_index >= PERIODIC_REQUESTS.len() {
            self.cmd_index = 0;
        }
        let command = PERIODIC_REQUESTS[self.cmd_index];
        self.cmd_index += 1;

        if command != Command::VirtualFailsafe {
            self.transport
                .send_frame(command, FrameType::RequestGetData, &[]);
            return true;
        }

        let failsafe = ChannelsPayload::failsafe(host, self.slot, self.config.phy_mode());

        if !self.has_telemetry() {
            trace!("AFHDS3 one-way failsafe");
            let mut buf = [0u8; CHANNELS_PAYLOAD_MAX_SIZE];
            self.transport.send_frame(
                Command::ChannelsFailsafeData,
                FrameType::RequestSetNoResp,
                failsafe.encode(&mut buf),
            );
            return true;
        }

        if self.is_connected() {
            trace!("AFHDS3 two-way failsafe");
            let mut data = [0u8; FAILSAFE_COMMAND_MAX_SIZE];
            let [cmd_lo, cmd_hi] = RX_CMD_FAILSAFE_VALUE.to_le_bytes();
            data[0] = cmd_lo;
            data[1] = cmd_hi;
            data[2] = (2 * failsafe.count) as u8;
            let len = encode_values(failsafe.values(), &mut data[3..]);
            self.transport.send_frame(
                Command::SendCommand,
                FrameType::RequestSetExpectData,
                &data[..3 + len],
            );
            return true;
        }

        false
    }

    fn send_channels_data<H: ModuleHost + ?Sized>(&mut self, host: &H) {
        let channels = ChannelsPayload::channels(host, self.slot, self.config.phy_mode());
        let mut buf = [0u8; CHANNELS_PAYLOAD_MAX_SIZE];
        self.transport.send_frame(
            Command::ChannelsFailsafeData,
            FrameType::RequestSetNoResp,
            channels.encode(&mut buf),
        );
    }
}
