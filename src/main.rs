//! # AFHDS3 Link
//!
//! Drive a FlySky AFHDS3 RF module from the command line.
//!
//! This application runs one module session against a serial port, feeding it
//! the channel values and failsafe policy of the configured model.

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use afhds3_link::afhds3::{ModelData, ModuleState, Session};
use afhds3_link::config::{Config, LoggingConfig};
use afhds3_link::serial::ModuleSerial;
use afhds3_link::telemetry;
use afhds3_link::transport::SerialTransport;

/// Configuration used when no path is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Ticks between status log messages
const LOG_INTERVAL_TICKS: u64 = 2000;

/// Receive chunk size
const READ_BUFFER_SIZE: usize = 256;

/// Main entry point for the AFHDS3 link driver
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration (first argument, or `config/default.toml`)
///    - Set up logging with tracing subscriber
///    - Open the module serial port and the telemetry sink
///
/// 2. **Main Loop**
///    - Every tick, let the session stage one command and write it out
///    - Feed every received byte to the session
///    - Log state changes, and a status line every 2000 ticks
///
/// 3. **Graceful Shutdown**
///    - Put the module into standby on Ctrl+C
///    - Clean exit
///
/// # Errors
///
/// Returns error if:
/// - Configuration cannot be loaded
/// - Serial port cannot be opened (no module found)
/// - Telemetry log directory is unusable
///
/// # Examples
///
/// ```bash
/// cargo run --release -- config/default.toml
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    let _log_guard = init_tracing(&config.logging);

    info!("AFHDS3 Link v{} starting...", env!("CARGO_PKG_VERSION"));
    debug!("Configuration loaded from {}", config_path);

    let mut model = ModelData::from_config(&config);
    let slot = config.module.slot;

    let (mut serial, mut reader) = ModuleSerial::open(&config.serial)?;
    info!("AFHDS3 module port opened at: {}", serial.device_path());

    let sink = telemetry::open_sink(&config.telemetry)?;
    let mut session = Session::new(slot, SerialTransport::new(slot.frame_address()), sink);

    let mut ticker = interval(Duration::from_millis(config.serial.tick_period_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        "Starting {:?} module session, tick {} ms",
        slot, config.serial.tick_period_ms
    );
    info!("Press Ctrl+C to exit");

    let mut rx = [0u8; READ_BUFFER_SIZE];
    let mut tick_count: u64 = 0;
    let mut last_state = session.state();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                session.setup_frame(&model);
                if let Some(frames) = session.physically_send() {
                    if let Err(e) = serial.send_frames(&frames).await {
                        debug!("Failed to send frame: {}", e);
                    }
                }

                tick_count += 1;
                if tick_count % LOG_INTERVAL_TICKS == 0 {
                    info!(
                        "Module {} ({} ticks, {} bytes sent)",
                        session.status_text(),
                        tick_count,
                        serial.bytes_sent()
                    );
                }
            }

            read = reader.read(&mut rx) => {
                match read {
                    Ok(0) => {
                        warn!("Serial port closed");
                        break;
                    }
                    Ok(n) => {
                        for &byte in &rx[..n] {
                            session.process_byte(byte, &mut model);
                        }
                    }
                    Err(e) => {
                        warn!("Serial read failed: {}", e);
                        break;
                    }
                }
            }

            // Handle Ctrl+C for graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                session.stop();
                if let Some(frames) = session.physically_send() {
                    if let Err(e) = serial.send_frames(&frames).await {
                        warn!("Failed to put module into standby: {}", e);
                    }
                }
                break;
            }
        }

        if session.state() != last_state {
            log_state_change(last_state, session.state(), session.is_connected());
            last_state = session.state();
        }
    }

    info!("Total ticks: {}, bytes sent: {}", tick_count, serial.bytes_sent());
    Ok(())
}

/// Set up console logging, plus daily rolling files when `file_dir` is set
///
/// The returned guard must be held until exit so buffered file output is flushed.
fn init_tracing(config: &LoggingConfig) -> Option<WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let stdout_layer = fmt::layer().with_target(true);

    match &config.file_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, "afhds3-link.log");
            let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
            let file_layer = fmt::layer().with_ansi(false).with_writer(file_writer);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(stdout_layer)
                .with(file_layer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stdout_layer)
                .init();
            None
        }
    }
}

fn log_state_change(from: ModuleState, to: ModuleState, connected: bool) {
    if connected {
        info!("Receiver connected");
    } else if from == ModuleState::SyncDone {
        warn!("Receiver connection lost: {}", to.status_text());
    } else {
        info!("Module state: {} -> {}", from.status_text(), to.status_text());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_interval_constant() {
        // At the default 5 ms tick, 2000 ticks = 10 seconds
        let seconds = LOG_INTERVAL_TICKS as f64 * 5.0 / 1000.0;
        assert_eq!(seconds, 10.0);
    }

    #[test]
    fn test_default_config_path_loads() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/", "config/default.toml");
        assert!(path.ends_with(DEFAULT_CONFIG_PATH));
        let config = Config::load(path).unwrap();
        assert!(config.telemetry.max_records_per_file > 0);
    }

    #[test]
    fn test_model_follows_config() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/default.toml");
        let config = Config::load(path).unwrap();
        let model = ModelData::from_config(&config);
        let settings = &model.modules[config.module.slot.index()];
        assert_eq!(settings.channels_count, config.module.channels_count);
        assert_eq!(model.model_ids[config.module.slot.index()], config.model.model_id);
    }
}
