//! # AFHDS3 Link Library
//!
//! Drive a FlySky AFHDS3 RF module from a transmitter host over its serial link.
//!
//! This library provides the module session state machine, the framed serial
//! transport it talks through, and the telemetry logging the host attaches to it.

pub mod afhds3;
pub mod config;
pub mod error;
pub mod serial;
pub mod telemetry;
pub mod transport;
