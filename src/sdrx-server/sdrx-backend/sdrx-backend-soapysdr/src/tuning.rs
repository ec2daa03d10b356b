// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Split a requested carrier frequency into a hardware LO (`"RF"`) and a
//! digital baseband offset (`"BB"`).
//!
//! The LO only moves when the requested offset leaves a hysteresis window
//! around it, so small and medium frequency changes are absorbed by the
//! cheap, glitch-free baseband shift. A retune parks the LO at a preferred
//! offset from the carrier, which keeps the signal clear of the DC spike at
//! the centre of the passband.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use sdrx_core::{Direction, SdrDevice, COMPONENT_BB, COMPONENT_RF};

/// Hysteresis window, as fractions of the hardware sample rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningWindow {
    /// Absolute floor of the inner window edge in Hz.
    pub min_offset_hz: f64,
    pub min_offset_fraction: f64,
    /// LO offset chosen on every retune.
    pub preferred_offset_fraction: f64,
    pub max_offset_fraction: f64,
    /// Beyond this the offset is outside usable bandwidth.
    pub nyquist_fraction: f64,
}

impl Default for TuningWindow {
    fn default() -> Self {
        Self {
            min_offset_hz: 20_000.0,
            min_offset_fraction: 0.06,
            preferred_offset_fraction: 0.26,
            max_offset_fraction: 0.40,
            nyquist_fraction: 0.45,
        }
    }
}

impl TuningWindow {
    pub fn preferred_offset(&self, sample_rate: f64) -> f64 {
        self.preferred_offset_fraction * sample_rate
    }

    /// Inner edge. Never above the preferred offset, otherwise a fresh
    /// retune would itself land outside the window.
    pub fn min_offset(&self, sample_rate: f64) -> f64 {
        (self.min_offset_fraction * sample_rate)
            .max(self.min_offset_hz)
            .min(self.preferred_offset(sample_rate))
    }

    pub fn max_offset(&self, sample_rate: f64) -> f64 {
        self.max_offset_fraction * sample_rate
    }

    pub fn nyquist_limit(&self, sample_rate: f64) -> f64 {
        self.nyquist_fraction * sample_rate
    }

    pub fn validate(&self) -> Result<(), String> {
        let fractions = [
            ("min_offset_fraction", self.min_offset_fraction),
            ("preferred_offset_fraction", self.preferred_offset_fraction),
            ("max_offset_fraction", self.max_offset_fraction),
            ("nyquist_fraction", self.nyquist_fraction),
        ];
        for (name, value) in fractions {
            if !(0.0..=0.5).contains(&value) {
                return Err(format!("{name} must be within [0, 0.5] (got {value})"));
            }
        }
        if self.min_offset_hz < 0.0 {
            return Err("min_offset_hz must be >= 0".to_string());
        }
        if !(self.min_offset_fraction <= self.preferred_offset_fraction
            && self.preferred_offset_fraction <= self.max_offset_fraction
            && self.max_offset_fraction <= self.nyquist_fraction)
        {
            return Err(
                "expected min_offset_fraction <= preferred_offset_fraction <= max_offset_fraction <= nyquist_fraction"
                    .to_string(),
            );
        }
        Ok(())
    }
}

/// `[tuning]` configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    pub window: TuningWindow,
    /// Blocks withheld from the sink after an LO retune.
    pub drop_blocks: u32,
    /// Added to every requested frequency (reference oscillator error).
    pub calibration_hz: f64,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            window: TuningWindow::default(),
            drop_blocks: 4,
            calibration_hz: 0.0,
        }
    }
}

/// Why [`compute_tuning`] chose its LO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuneReason {
    /// No valid LO yet.
    Initial,
    /// Offset beyond the usable bandwidth.
    OutOfBand,
    /// Offset outside the hysteresis window.
    OutsideWindow,
    /// LO kept; only the baseband offset moves.
    InWindow,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuningPlan {
    pub lo_hz: f64,
    pub bb_hz: f64,
    pub retuned: bool,
    pub reason: TuneReason,
}

/// Pure LO/BB split for `requested_hz` given the current LO (if valid).
pub fn compute_tuning(
    window: &TuningWindow,
    requested_hz: f64,
    sample_rate: f64,
    current_lo: Option<f64>,
) -> TuningPlan {
    let preferred = window.preferred_offset(sample_rate);
    let Some(lo) = current_lo else {
        return TuningPlan {
            lo_hz: requested_hz - preferred,
            bb_hz: preferred,
            retuned: true,
            reason: TuneReason::Initial,
        };
    };

    let offset = requested_hz - lo;
    let abs = offset.abs();
    let reason = if abs > window.nyquist_limit(sample_rate) {
        TuneReason::OutOfBand
    } else if abs < window.min_offset(sample_rate) || abs > window.max_offset(sample_rate) {
        TuneReason::OutsideWindow
    } else {
        return TuningPlan {
            lo_hz: lo,
            bb_hz: offset,
            retuned: false,
            reason: TuneReason::InWindow,
        };
    };

    // Keep the carrier on the same side of the LO it was requested from.
    let side = if offset < 0.0 { -1.0 } else { 1.0 };
    let lo_hz = requested_hz - side * preferred;
    TuningPlan {
        lo_hz,
        bb_hz: requested_hz - lo_hz,
        retuned: true,
        reason,
    }
}

/// Last successfully programmed split for one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TuningState {
    /// Requested frequency including calibration.
    pub target_hz: Option<f64>,
    pub lo_hz: f64,
    pub bb_hz: f64,
    /// `lo_hz` reflects what the hardware is actually tuned to.
    pub rf_valid: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TuneOutcome {
    /// The hardware LO moved; the next blocks carry a PLL transient.
    pub retuned: bool,
    /// The split was abandoned for a combined tune.
    pub fallback: bool,
}

/// Owns the LO/BB state of one `(direction, channel)`.
pub struct TuningController {
    direction: Direction,
    channel: usize,
    window: TuningWindow,
    calibration_hz: f64,
    state: TuningState,
    split_supported: Option<bool>,
}

impl TuningController {
    pub fn new(direction: Direction, channel: usize, config: &TuningConfig) -> Self {
        Self {
            direction,
            channel,
            window: config.window,
            calibration_hz: config.calibration_hz,
            state: TuningState::default(),
            split_supported: None,
        }
    }

    pub fn state(&self) -> TuningState {
        self.state
    }

    /// Forget the LO so the next tune programs it from scratch.
    pub fn invalidate(&mut self) {
        self.state.rf_valid = false;
    }

    /// Tune to `requested_hz` on a device running at `sample_rate`.
    ///
    /// Driver failures are logged and degrade to a combined tune; they are
    /// never returned.
    pub fn apply(
        &mut self,
        device: &dyn SdrDevice,
        requested_hz: f64,
        sample_rate: f64,
    ) -> TuneOutcome {
        let target = requested_hz + self.calibration_hz;
        if !self.supports_split(device) {
            return self.tune_combined(device, target, false);
        }

        let current_lo = self.state.rf_valid.then_some(self.state.lo_hz);
        let plan = compute_tuning(&self.window, target, sample_rate, current_lo);

        let lo = if plan.retuned {
            if let Err(e) = device.set_component_frequency(
                self.direction,
                self.channel,
                COMPONENT_RF,
                plan.lo_hz,
            ) {
                warn!(
                    "{}{} LO tune to {:.0} Hz failed: {}; using combined tune",
                    self.direction, self.channel, plan.lo_hz, e
                );
                return self.tune_combined(device, target, true);
            }
            // The synthesiser may round; the baseband absorbs the error.
            device
                .component_frequency(self.direction, self.channel, COMPONENT_RF)
                .unwrap_or(plan.lo_hz)
        } else {
            plan.lo_hz
        };

        let bb = target - lo;
        if bb.abs() > self.window.nyquist_limit(sample_rate) {
            warn!(
                "{}{} LO landed at {:.0} Hz, {:.0} Hz from target; using combined tune",
                self.direction, self.channel, lo, bb
            );
            return self.tune_combined(device, target, true);
        }
        if let Err(e) =
            device.set_component_frequency(self.direction, self.channel, COMPONENT_BB, bb)
        {
            warn!(
                "{}{} BB tune to {:.0} Hz failed: {}; using combined tune",
                self.direction, self.channel, bb, e
            );
            return self.tune_combined(device, target, true);
        }

        debug!(
            "{}{} tuned {:.0} Hz: LO {:.0} Hz, BB {:+.0} Hz ({:?})",
            self.direction, self.channel, target, lo, bb, plan.reason
        );
        self.state = TuningState {
            target_hz: Some(target),
            lo_hz: lo,
            bb_hz: bb,
            rf_valid: true,
        };
        TuneOutcome {
            retuned: plan.retuned,
            fallback: false,
        }
    }

    /// Re-tune the last target, e.g. after a sample-rate change moved the
    /// window edges. Returns `None` if nothing was tuned yet.
    pub fn reapply(&mut self, device: &dyn SdrDevice, sample_rate: f64) -> Option<TuneOutcome> {
        let target = self.state.target_hz?;
        Some(self.apply(device, target - self.calibration_hz, sample_rate))
    }

    fn supports_split(&mut self, device: &dyn SdrDevice) -> bool {
        *self.split_supported.get_or_insert_with(|| {
            let supported = device
                .frequency_components(self.direction, self.channel)
                .map(|names| {
                    names.iter().any(|n| n == COMPONENT_RF) && names.iter().any(|n| n == COMPONENT_BB)
                })
                .unwrap_or(false);
            if !supported {
                debug!(
                    "{}{} has no separate BB component; tuning combined",
                    self.direction, self.channel
                );
            }
            supported
        })
    }

    /// Let the driver distribute `target` itself. The LO position becomes
    /// unknown, so the next split tune always retunes.
    fn tune_combined(&mut self, device: &dyn SdrDevice, target: f64, fallback: bool) -> TuneOutcome {
        if let Err(e) = device.set_frequency(self.direction, self.channel, target) {
            warn!(
                "{}{} tune to {:.0} Hz failed: {}",
                self.direction, self.channel, target, e
            );
        }
        self.state = TuningState {
            target_hz: Some(target),
            lo_hz: target,
            bb_hz: 0.0,
            rf_valid: false,
        };
        TuneOutcome {
            retuned: true,
            fallback,
        }
    }
}
