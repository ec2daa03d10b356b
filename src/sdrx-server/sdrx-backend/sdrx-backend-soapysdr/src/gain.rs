// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use sdrx_core::{Direction, SdrDevice, SdrError, SdrResult};

/// `[gain]` limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GainLimits {
    /// Ceiling applied on top of the driver range.
    pub max_value: Option<f64>,
}

/// Gain writes for one `(direction, channel)`.
///
/// Requested values are clamped to the driver range (and the configured
/// ceiling) before they reach hardware. Returns the value actually
/// written.
pub struct GainController {
    device: Arc<dyn SdrDevice>,
    direction: Direction,
    channel: usize,
    limits: GainLimits,
}

impl GainController {
    pub fn new(
        device: Arc<dyn SdrDevice>,
        direction: Direction,
        channel: usize,
        limits: GainLimits,
    ) -> Self {
        Self {
            device,
            direction,
            channel,
            limits,
        }
    }

    /// Effective `(min, max)` after the ceiling.
    pub fn range(&self) -> (f64, f64) {
        let (min, max) = match self.device.gain_range(self.direction, self.channel) {
            Ok(range) => range,
            Err(e) => {
                debug!(
                    "{}{} gain range unavailable: {}",
                    self.direction, self.channel, e
                );
                (0.0, self.limits.max_value.unwrap_or(f64::MAX))
            }
        };
        self.with_ceiling(min, max)
    }

    fn with_ceiling(&self, min: f64, max: f64) -> (f64, f64) {
        let max = self.limits.max_value.map_or(max, |ceiling| max.min(ceiling));
        (min, max.max(min))
    }

    pub fn clamp(&self, db: f64) -> f64 {
        let (min, max) = self.range();
        db.clamp(min, max)
    }

    /// Overall gain; the driver distributes it over its elements.
    pub fn set_gain(&self, db: f64) -> SdrResult<f64> {
        let applied = self.clamp(db);
        if applied != db {
            debug!(
                "{}{} gain {:.1} dB clamped to {:.1} dB",
                self.direction, self.channel, db, applied
            );
        }
        self.device.set_gain(self.direction, self.channel, applied)?;
        Ok(applied)
    }

    pub fn set_gain_element(&self, name: &str, db: f64) -> SdrResult<f64> {
        let applied = match self.limits.max_value {
            Some(ceiling) => db.min(ceiling),
            None => db,
        };
        self.device
            .set_gain_element(self.direction, self.channel, name, applied)?;
        Ok(applied)
    }

    /// Attenuation is gain counted down from the top of the range. Without
    /// a driver-reported range there is no top to count from.
    pub fn set_attenuation(&self, db: f64) -> SdrResult<f64> {
        let (min, max) = self.device.gain_range(self.direction, self.channel)?;
        let (min, max) = self.with_ceiling(min, max);
        let applied = (max - db).clamp(min, max);
        self.device.set_gain(self.direction, self.channel, applied)?;
        Ok(applied)
    }

    /// Hardware AGC. Devices without a gain mode report an error and keep
    /// manual gain.
    pub fn set_automatic(&self, automatic: bool) -> SdrResult<()> {
        if !self.device.has_gain_mode(self.direction, self.channel) {
            return Err(SdrError::driver(
                "set_gain_mode",
                format!("{}{} has no automatic gain", self.direction, self.channel),
            ));
        }
        self.device
            .set_gain_mode(self.direction, self.channel, automatic)
    }

    /// Log and swallow a failed write.
    pub fn report<T>(&self, what: &str, result: SdrResult<T>) -> Option<T> {
        result
            .map_err(|e| warn!("{}{} {} failed: {}", self.direction, self.channel, what, e))
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdrx_core::device::dummy::{calls, DummyDevice};

    fn controller(dev: &DummyDevice, limits: GainLimits) -> GainController {
        GainController::new(Arc::new(dev.clone()), Direction::Rx, 0, limits)
    }

    #[test]
    fn gain_is_clamped_to_range() {
        let dev = DummyDevice::default();
        let gc = controller(&dev, GainLimits::default());
        assert_eq!(gc.set_gain(75.0).unwrap(), 60.0);
        assert_eq!(gc.set_gain(-5.0).unwrap(), 0.0);
        assert_eq!(dev.gain(Direction::Rx, 0).unwrap(), 0.0);
    }

    #[test]
    fn ceiling_lowers_max() {
        let dev = DummyDevice::default();
        let gc = controller(
            &dev,
            GainLimits {
                max_value: Some(40.0),
            },
        );
        assert_eq!(gc.range(), (0.0, 40.0));
        assert_eq!(gc.set_gain(55.0).unwrap(), 40.0);
        assert_eq!(gc.set_gain_element("LNA", 45.0).unwrap(), 40.0);
    }

    #[test]
    fn attenuation_counts_down_from_max() {
        let dev = DummyDevice::default();
        let gc = controller(&dev, GainLimits::default());
        assert_eq!(gc.set_attenuation(10.0).unwrap(), 50.0);
        assert_eq!(gc.set_attenuation(90.0).unwrap(), 0.0);
    }

    #[test]
    fn attenuation_needs_a_known_range() {
        let dev = DummyDevice::default();
        dev.fail_call(calls::GAIN_RANGE);
        let gc = controller(&dev, GainLimits::default());
        assert!(matches!(
            gc.set_attenuation(10.0),
            Err(SdrError::Driver { .. })
        ));
        assert!(dev.calls().is_empty());

        let capped = controller(
            &dev,
            GainLimits {
                max_value: Some(40.0),
            },
        );
        assert!(capped.set_attenuation(10.0).is_err());
        assert_eq!(capped.set_gain(55.0).unwrap(), 40.0);
    }

    #[test]
    fn automatic_requires_gain_mode() {
        let dev = DummyDevice::default();
        let rx = controller(&dev, GainLimits::default());
        rx.set_automatic(true).unwrap();
        assert!(dev.gain_mode(Direction::Rx, 0).unwrap());

        let tx = GainController::new(Arc::new(dev.clone()), Direction::Tx, 0, GainLimits::default());
        assert!(tx.set_automatic(true).is_err());
    }

    #[test]
    fn driver_failure_is_reported() {
        let dev = DummyDevice::default();
        dev.fail_call(calls::SET_GAIN);
        let gc = controller(&dev, GainLimits::default());
        assert_eq!(gc.report("gain", gc.set_gain(20.0)), None);
    }
}
