// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use num_complex::Complex;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use sdrx_app::{init_logging, normalize_name, ConfigFile};
use sdrx_backend::{register_builtin_drivers_on, RegistrationContext};
use sdrx_backend_soapysdr::{BroadcastIqSink, DeviceSession, TxChain, TxIqWriter};
use sdrx_core::{DynResult, IqSample};

use config::{RxChannelConfig, ServerConfig};

const PKG_DESCRIPTION: &str = concat!(env!("CARGO_PKG_NAME"), " - SDR streaming daemon");
const FRAME_CHANNEL_CAPACITY: usize = 16;
const STATS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(
    author = env!("CARGO_PKG_AUTHORS"),
    version = env!("CARGO_PKG_VERSION"),
    about = PKG_DESCRIPTION,
)]
struct Cli {
    /// Path to configuration file
    #[arg(long = "config", short = 'C', value_name = "FILE")]
    config: Option<PathBuf>,
    /// Print example configuration and exit
    #[arg(long = "print-config")]
    print_config: bool,
    /// Device driver to use (e.g. soapysdr, dummy)
    #[arg(short = 'd', long = "driver")]
    driver: Option<String>,
    /// Driver argument string (e.g. "driver=lime")
    #[arg(short = 'a', long = "args")]
    args: Option<String>,
    /// Override the first receiver's frequency in Hz
    #[arg(short = 'f', long = "frequency")]
    frequency: Option<f64>,
}

/// Resolved configuration after merging config file and CLI arguments.
struct ResolvedConfig {
    driver: String,
    args: String,
    channels: Vec<RxChannelConfig>,
}

fn resolve_config(
    cli: &Cli,
    cfg: &ServerConfig,
    registry: &RegistrationContext,
) -> DynResult<ResolvedConfig> {
    let driver_str = cli.driver.clone().or_else(|| cfg.device.driver.clone());
    let driver = match driver_str.as_deref() {
        Some(name) => normalize_name(name),
        None => {
            return Err(
                "Device driver not specified. Use --driver or set [device].driver in config."
                    .into(),
            )
        }
    };
    if !registry.is_driver_registered(&driver) {
        return Err(format!(
            "Unknown device driver: {} (available: {})",
            driver,
            registry.registered_drivers().join(", ")
        )
        .into());
    }

    let args = cli.args.clone().unwrap_or_else(|| cfg.device.args.clone());

    let mut channels = cfg.rx.channels.clone();
    if let Some(hz) = cli.frequency {
        if !(hz > 0.0) {
            return Err(format!("Invalid frequency: {}", hz).into());
        }
        match channels.first_mut() {
            Some(first) => first.frequency_hz = hz,
            None => channels.push(RxChannelConfig {
                frequency_hz: hz,
                ..RxChannelConfig::default()
            }),
        }
    }

    Ok(ResolvedConfig {
        driver,
        args,
        channels,
    })
}

/// Create, tune and start one receiver. Returns the frame subscription.
fn start_receiver(
    session: &mut DeviceSession,
    ch: &RxChannelConfig,
    frame_len: usize,
) -> DynResult<broadcast::Receiver<Arc<[IqSample]>>> {
    let sink = BroadcastIqSink::new(frame_len, FRAME_CHANNEL_CAPACITY);
    let frames = sink.subscribe();
    session.create_receiver(ch.channel, Box::new(sink))?;
    session.set_rx_frequency(ch.channel, ch.frequency_hz)?;

    if ch.automatic_gain {
        session.set_automatic_gain(ch.channel, true)?;
    } else if let Some(att) = ch.attenuation_db {
        if let Some(db) = session.set_rx_attenuation(ch.channel, att)? {
            info!("RX{} attenuation {:.1} dB (gain {:.1} dB)", ch.channel, att, db);
        }
    } else if let Some(gain) = ch.gain_db {
        if let Some(db) = session.set_rx_gain(ch.channel, gain)? {
            info!("RX{} gain {:.1} dB", ch.channel, db);
        }
    }

    session.start_receiver(ch.channel)?;
    Ok(frames)
}

/// Log mean signal power of the frames a receiver delivers.
fn spawn_power_logger(
    channel: usize,
    mut frames: broadcast::Receiver<Arc<[IqSample]>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_log = tokio::time::Instant::now();
        loop {
            match frames.recv().await {
                Ok(frame) => {
                    if last_log.elapsed() < Duration::from_secs(1) {
                        continue;
                    }
                    last_log = tokio::time::Instant::now();
                    info!("RX{} power {:.1} dBFS", channel, power_dbfs(&frame));
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("RX{} power logger skipped {} frames", channel, n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn power_dbfs(frame: &[IqSample]) -> f32 {
    if frame.is_empty() {
        return f32::NEG_INFINITY;
    }
    let mean = frame.iter().map(|s| s.norm_sqr()).sum::<f32>() / frame.len() as f32;
    10.0 * mean.max(1e-20).log10()
}

/// Keeps the transmit path fed with silence until a modulator is attached.
struct SilenceChain {
    writer: TxIqWriter,
}

impl TxChain for SilenceChain {
    fn consume_mic_sample(&self) {
        self.writer.push_sample(Complex::new(0.0, 0.0));
    }
}

fn start_transmitter(session: &mut DeviceSession, cfg: &ServerConfig) -> DynResult<()> {
    let writer = session.create_transmitter(cfg.tx.channel)?;
    session.set_tx_frequency(cfg.tx.frequency_hz)?;
    if let Some(gain) = cfg.tx.gain_db {
        if let Some(db) = session.set_tx_gain(gain)? {
            info!("TX{} gain {:.1} dB", cfg.tx.channel, db);
        }
    }
    session.set_tx_chain(Arc::new(SilenceChain { writer }))?;
    session.start_transmitter()?;
    Ok(())
}

fn log_stats(session: &DeviceSession) {
    for channel in session.receivers() {
        match session.rx_stats(channel) {
            Ok(stats) => info!(
                "RX{} blocks={} withheld={} samples={} ticks={} overflows={} errors={}",
                channel,
                stats.blocks_read,
                stats.blocks_withheld,
                stats.samples_delivered,
                stats.heartbeat_ticks,
                stats.overflows,
                stats.read_errors
            ),
            Err(e) => warn!("RX{} stats unavailable: {}", channel, e),
        }
    }
    if let Some(writer) = session.tx_writer() {
        info!(
            "TX written={} dropped={}",
            writer.samples_written(),
            writer.samples_dropped()
        );
    }
}

#[tokio::main]
async fn main() -> DynResult<()> {
    let mut registry = RegistrationContext::new();
    register_builtin_drivers_on(&mut registry);

    let cli = Cli::parse();

    if cli.print_config {
        println!("{}", ServerConfig::example_combined_toml());
        return Ok(());
    }

    let (cfg, config_path) = if let Some(ref path) = cli.config {
        let cfg = ServerConfig::load_from_file(path)?;
        (cfg, Some(path.clone()))
    } else {
        ServerConfig::load_from_default_paths()?
    };

    cfg.validate()
        .map_err(|e| format!("Invalid server configuration: {}", e))?;

    init_logging(cfg.general.log_level.as_deref());

    if let Some(ref path) = config_path {
        info!("Loaded configuration from {}", path.display());
    }

    let resolved = resolve_config(&cli, &cfg, &registry)?;
    info!(
        "Starting sdrx-server {} (built {}, driver: {}, args: {:?})",
        env!("CARGO_PKG_VERSION"),
        env!("SDRX_SERVER_BUILD_DATE"),
        resolved.driver,
        resolved.args
    );

    let opener = registry.build_opener(&resolved.driver)?;
    let mut session = match DeviceSession::open(&opener, &resolved.args, cfg.session_config()) {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to open device: {}", e);
            return Err(e.into());
        }
    };

    let frame_len = cfg.rx.stream.fft_block_size;
    let mut loggers: Vec<JoinHandle<()>> = Vec::new();
    for ch in &resolved.channels {
        match start_receiver(&mut session, ch, frame_len) {
            Ok(frames) => loggers.push(spawn_power_logger(ch.channel, frames)),
            Err(e) => {
                error!("RX{} failed to start: {}", ch.channel, e);
                return Err(e);
            }
        }
    }

    if cfg.tx.enabled {
        if let Err(e) = start_transmitter(&mut session, &cfg) {
            error!("TX{} failed to start: {}", cfg.tx.channel, e);
            return Err(e);
        }
    }

    let mut stats_tick = tokio::time::interval(STATS_INTERVAL);
    stats_tick.tick().await;
    loop {
        tokio::select! {
            res = signal::ctrl_c() => {
                if let Err(e) = res {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                info!("Ctrl+C received, shutting down");
                break;
            }
            _ = stats_tick.tick() => log_stats(&session),
        }
    }

    log_stats(&session);
    // Dropping the session stops the workers, which drops the sinks and
    // closes the frame channels.
    session.close();
    for handle in loggers {
        if let Err(e) = handle.await {
            warn!("Power logger task failed: {}", e);
        }
    }

    Ok(())
}
