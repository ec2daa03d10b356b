// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::gain::GainLimits;
use crate::heartbeat::MIC_SAMPLE_RATE;
use crate::tuning::TuningConfig;

/// DC offset removal on received blocks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DcBlockerConfig {
    pub enabled: bool,
    /// Fixed pole radius; picked from the output rate when unset.
    pub pole: Option<f32>,
}

impl Default for DcBlockerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pole: None,
        }
    }
}

/// Receive stream parameters shared by all receivers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RxStreamConfig {
    pub sample_rate: f64,
    /// Analog bandwidth in Hz; 0 keeps the driver default.
    pub bandwidth: f64,
    /// Rate handed to sinks. Unset means hardware rate.
    pub app_sample_rate: Option<u32>,
    pub fft_block_size: usize,
    pub read_timeout_ms: u64,
    pub dc_blocker: DcBlockerConfig,
}

impl Default for RxStreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: 768_000.0,
            bandwidth: 0.0,
            app_sample_rate: None,
            fft_block_size: 2048,
            read_timeout_ms: 100,
            dc_blocker: DcBlockerConfig::default(),
        }
    }
}

/// Transmit stream parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxStreamConfig {
    pub sample_rate: f64,
    pub bandwidth: f64,
    pub fft_block_size: usize,
    pub write_timeout_ms: u64,
    /// Receiver whose sample flow paces the transmit chain.
    pub heartbeat_channel: usize,
    pub heartbeat_rate: u32,
}

impl Default for TxStreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: 768_000.0,
            bandwidth: 0.0,
            fft_block_size: 2048,
            write_timeout_ms: 100,
            heartbeat_channel: 0,
            heartbeat_rate: MIC_SAMPLE_RATE,
        }
    }
}

/// Everything a [`DeviceSession`](crate::DeviceSession) needs besides the
/// device itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub rx: RxStreamConfig,
    pub tx: TxStreamConfig,
    pub tuning: TuningConfig,
    pub gain: GainLimits,
    /// Vendor settings written right after open.
    pub settings: BTreeMap<String, String>,
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.rx.sample_rate > 0.0) {
            return Err("[rx].sample_rate must be > 0".to_string());
        }
        if self.rx.fft_block_size == 0 {
            return Err("[rx].fft_block_size must be > 0".to_string());
        }
        if self.rx.read_timeout_ms == 0 {
            return Err("[rx].read_timeout_ms must be > 0".to_string());
        }
        if self.rx.app_sample_rate == Some(0) {
            return Err("[rx].app_sample_rate must be > 0 when set".to_string());
        }
        if let Some(pole) = self.rx.dc_blocker.pole {
            if !(0.0..1.0).contains(&pole) {
                return Err(format!("[rx.dc_blocker].pole must be within [0, 1) (got {pole})"));
            }
        }
        if !(self.tx.sample_rate > 0.0) {
            return Err("[tx].sample_rate must be > 0".to_string());
        }
        if self.tx.heartbeat_rate == 0 {
            return Err("[tx].heartbeat_rate must be > 0".to_string());
        }
        self.tuning
            .window
            .validate()
            .map_err(|e| format!("[tuning.window] {e}"))?;
        if let Some(max) = self.gain.max_value {
            if !max.is_finite() {
                return Err("[gain].max_value must be finite".to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(SessionConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: SessionConfig = toml::from_str(
            r#"
[rx]
sample_rate = 1536000
app_sample_rate = 48000

[rx.dc_blocker]
pole = 0.997

[tuning]
drop_blocks = 6

[settings]
LNA_PATH = "LNAW"
"#,
        )
        .unwrap();
        assert_eq!(cfg.rx.sample_rate, 1_536_000.0);
        assert_eq!(cfg.rx.app_sample_rate, Some(48_000));
        assert!(cfg.rx.dc_blocker.enabled);
        assert_eq!(cfg.rx.fft_block_size, 2048);
        assert_eq!(cfg.tuning.drop_blocks, 6);
        assert_eq!(cfg.tuning.window.preferred_offset_fraction, 0.26);
        assert_eq!(cfg.settings.get("LNA_PATH").map(String::as_str), Some("LNAW"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn bad_pole_is_rejected() {
        let mut cfg = SessionConfig::default();
        cfg.rx.dc_blocker.pole = Some(1.0);
        assert!(cfg.validate().unwrap_err().contains("pole"));
    }
}
