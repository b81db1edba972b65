//! # AFHDS3 Protocol Implementation
//!
//! Session logic for FlySky AFHDS3 RF modules.
//!
//! This module handles:
//! - Protocol constants and inbound frame decoding
//! - Versioned module configuration record
//! - Channel and failsafe payload encoding
//! - Telemetry sensor record remapping
//! - The per-module session state machine

pub mod failsafe;
pub mod host;
pub mod module_config;
pub mod protocol;
pub mod session;
pub mod telemetry;

pub use host::{ModelData, ModuleHost};
pub use protocol::{Command, FrameType, ModuleSlot, ModuleState};
pub use session::Session;
pub use telemetry::{RemapTag, TelemetrySink};
