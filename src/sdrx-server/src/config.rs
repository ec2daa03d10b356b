// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Configuration file support for sdrx-server.
//!
//! Config is loaded from the `[sdrx-server]` section of `sdrx.toml`.
//! Default search order:
//! 1. Path specified via `--config` CLI argument
//! 2. `./sdrx.toml`
//! 3. `~/.config/sdrx/sdrx.toml`
//! 4. `/etc/sdrx/sdrx.toml`

use std::collections::BTreeMap;

use sdrx_app::ConfigFile;
use sdrx_backend_soapysdr::{
    GainLimits, RxStreamConfig, SessionConfig, TuningConfig, TxStreamConfig,
};
use serde::{Deserialize, Serialize};

/// Top-level server configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// General settings
    pub general: GeneralConfig,
    /// Device driver selection and vendor settings
    pub device: DeviceConfig,
    /// Receive streams and the channels to start
    pub rx: RxConfig,
    /// Transmitter
    pub tx: TxConfig,
    /// LO/BB split window and retune behaviour
    pub tuning: TuningConfig,
    /// Gain ceiling
    pub gain: GainLimits,
}

/// General application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Registered driver name (e.g. "soapysdr", "dummy")
    pub driver: Option<String>,
    /// Driver argument string (e.g. "driver=lime,serial=...")
    pub args: String,
    /// Named vendor settings written after open
    pub settings: BTreeMap<String, String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            driver: Some("dummy".to_string()),
            args: String::new(),
            settings: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RxConfig {
    #[serde(flatten)]
    pub stream: RxStreamConfig,
    /// Receivers created at startup
    pub channels: Vec<RxChannelConfig>,
}

impl Default for RxConfig {
    fn default() -> Self {
        Self {
            stream: RxStreamConfig::default(),
            channels: vec![RxChannelConfig::default()],
        }
    }
}

/// One receiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RxChannelConfig {
    pub channel: usize,
    pub frequency_hz: f64,
    /// Aggregate gain in dB; ignored when `attenuation_db` is set
    pub gain_db: Option<f64>,
    pub attenuation_db: Option<f64>,
    pub automatic_gain: bool,
}

impl Default for RxChannelConfig {
    fn default() -> Self {
        Self {
            channel: 0,
            frequency_hz: 100_000_000.0,
            gain_db: None,
            attenuation_db: None,
            automatic_gain: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TxConfig {
    pub enabled: bool,
    pub channel: usize,
    pub frequency_hz: f64,
    pub gain_db: Option<f64>,
    #[serde(flatten)]
    pub stream: TxStreamConfig,
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            channel: 0,
            frequency_hz: 144_300_000.0,
            gain_db: None,
            stream: TxStreamConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Session parameters handed to the streaming core.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            rx: self.rx.stream.clone(),
            tx: self.tx.stream.clone(),
            tuning: self.tuning.clone(),
            gain: self.gain,
            settings: self.device.settings.clone(),
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        validate_log_level(self.general.log_level.as_deref())?;

        if let Some(driver) = &self.device.driver {
            if driver.trim().is_empty() {
                return Err("[device].driver must not be empty".to_string());
            }
        }

        let mut seen = Vec::with_capacity(self.rx.channels.len());
        for (idx, ch) in self.rx.channels.iter().enumerate() {
            if seen.contains(&ch.channel) {
                return Err(format!(
                    "[rx].channels[{idx}].channel {} is listed twice",
                    ch.channel
                ));
            }
            seen.push(ch.channel);
            if !(ch.frequency_hz > 0.0) {
                return Err(format!("[rx].channels[{idx}].frequency_hz must be > 0"));
            }
            if let Some(att) = ch.attenuation_db {
                if !(att >= 0.0) {
                    return Err(format!("[rx].channels[{idx}].attenuation_db must be >= 0"));
                }
            }
        }

        if self.tx.enabled && !(self.tx.frequency_hz > 0.0) {
            return Err("[tx].frequency_hz must be > 0 when [tx].enabled = true".to_string());
        }
        if self.tx.enabled && !seen.contains(&self.tx.stream.heartbeat_channel) {
            return Err(format!(
                "[tx].heartbeat_channel {} has no receiver in [rx].channels",
                self.tx.stream.heartbeat_channel
            ));
        }

        self.session_config().validate()
    }

    /// Generate an example configuration wrapped under the `[sdrx-server]`
    /// section header, suitable for use in a combined `sdrx.toml` file.
    pub fn example_combined_toml() -> String {
        #[derive(serde::Serialize)]
        struct Wrapper {
            #[serde(rename = "sdrx-server")]
            inner: ServerConfig,
        }
        let mut example = ServerConfig {
            general: GeneralConfig {
                log_level: Some("info".to_string()),
            },
            device: DeviceConfig {
                driver: Some("soapysdr".to_string()),
                args: "driver=lime".to_string(),
                settings: BTreeMap::new(),
            },
            ..ServerConfig::default()
        };
        example.rx.stream.app_sample_rate = Some(48_000);
        example.rx.channels[0].gain_db = Some(30.0);
        toml::to_string_pretty(&Wrapper { inner: example }).unwrap_or_default()
    }
}

fn validate_log_level(level: Option<&str>) -> Result<(), String> {
    if let Some(level) = level {
        match level {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(format!(
                    "[general].log_level '{}' is invalid (expected one of: trace, debug, info, warn, error)",
                    level
                ))
            }
        }
    }
    Ok(())
}

impl ConfigFile for ServerConfig {
    fn section_key() -> &'static str {
        "sdrx-server"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.device.driver.as_deref(), Some("dummy"));
        assert_eq!(config.rx.channels.len(), 1);
        assert_eq!(config.rx.stream.sample_rate, 768_000.0);
        assert!(!config.tx.enabled);
        assert_eq!(config.tx.stream.heartbeat_rate, 48_000);
        assert_eq!(config.tuning.drop_blocks, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[sdrx-server.general]
log_level = "debug"

[sdrx-server.device]
driver = "soapysdr"
args = "driver=lime"

[sdrx-server.device.settings]
LNA_PATH = "LNAW"

[sdrx-server.rx]
sample_rate = 1536000
app_sample_rate = 48000

[sdrx-server.rx.dc_blocker]
enabled = false

[[sdrx-server.rx.channels]]
channel = 0
frequency_hz = 7074000
gain_db = 40

[[sdrx-server.rx.channels]]
channel = 1
frequency_hz = 14074000
attenuation_db = 10

[sdrx-server.tx]
enabled = true
frequency_hz = 7074000
write_timeout_ms = 50

[sdrx-server.tuning]
drop_blocks = 2
calibration_hz = -150
"#;
        let config = ServerConfig::load_from_str(toml_str).unwrap();
        assert_eq!(config.general.log_level.as_deref(), Some("debug"));
        assert_eq!(config.device.driver.as_deref(), Some("soapysdr"));
        assert_eq!(
            config.device.settings.get("LNA_PATH").map(String::as_str),
            Some("LNAW")
        );
        assert_eq!(config.rx.stream.sample_rate, 1_536_000.0);
        assert_eq!(config.rx.stream.app_sample_rate, Some(48_000));
        assert!(!config.rx.stream.dc_blocker.enabled);
        assert_eq!(config.rx.channels.len(), 2);
        assert_eq!(config.rx.channels[0].gain_db, Some(40.0));
        assert_eq!(config.rx.channels[1].attenuation_db, Some(10.0));
        assert!(config.tx.enabled);
        assert_eq!(config.tx.stream.write_timeout_ms, 50);
        assert_eq!(config.tx.stream.heartbeat_channel, 0);
        assert_eq!(config.tuning.drop_blocks, 2);
        assert_eq!(config.tuning.calibration_hz, -150.0);
        assert!(config.validate().is_ok());

        let session = config.session_config();
        assert_eq!(session.rx.app_sample_rate, Some(48_000));
        assert_eq!(session.settings.len(), 1);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = ServerConfig::default();
        config.general.log_level = Some("loud".to_string());
        assert!(config.validate().unwrap_err().contains("[general].log_level"));
    }

    #[test]
    fn test_duplicate_channel_rejected() {
        let mut config = ServerConfig::default();
        config.rx.channels.push(RxChannelConfig::default());
        assert!(config.validate().unwrap_err().contains("listed twice"));
    }

    #[test]
    fn test_heartbeat_channel_must_be_received() {
        let mut config = ServerConfig::default();
        config.tx.enabled = true;
        config.tx.stream.heartbeat_channel = 3;
        assert!(config
            .validate()
            .unwrap_err()
            .contains("[tx].heartbeat_channel"));
    }

    #[test]
    fn test_session_errors_surface() {
        let mut config = ServerConfig::default();
        config.rx.stream.fft_block_size = 0;
        assert!(config.validate().unwrap_err().contains("[rx].fft_block_size"));
    }

    #[test]
    fn test_example_round_trips() {
        let text = ServerConfig::example_combined_toml();
        assert!(text.contains("[sdrx-server"));
        let parsed = ServerConfig::load_from_str(&text).unwrap();
        assert_eq!(parsed.device.driver.as_deref(), Some("soapysdr"));
        assert_eq!(parsed.rx.stream.app_sample_rate, Some(48_000));
        assert!(parsed.validate().is_ok());
    }
}
