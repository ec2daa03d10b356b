// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use num_complex::Complex;
use sdrx_core::IqSample;

/// First-order DC blocker, `y[n] = x[n] - x[n-1] + r * y[n-1]`, run
/// independently on I and Q.
///
/// The first sample after construction or [`reset`](Self::reset) primes the
/// input memory, so a constant offset present from the start is removed
/// immediately instead of decaying in.
#[derive(Debug, Clone)]
pub struct DcBlocker {
    pole: f32,
    x1: IqSample,
    y1: IqSample,
    primed: bool,
}

impl DcBlocker {
    pub fn new(pole: f32) -> Self {
        Self {
            pole: pole.clamp(0.0, 0.999_999),
            x1: Complex::new(0.0, 0.0),
            y1: Complex::new(0.0, 0.0),
            primed: false,
        }
    }

    /// Blocker with the pole picked for `sample_rate`.
    pub fn for_rate(sample_rate: f64) -> Self {
        Self::new(Self::pole_for_rate(sample_rate))
    }

    /// Pole radius by rate regime. Keeps the -3 dB corner in the low
    /// hundreds of Hz across the supported rates.
    pub fn pole_for_rate(sample_rate: f64) -> f32 {
        if sample_rate <= 48_000.0 {
            0.9995
        } else if sample_rate <= 192_000.0 {
            0.999
        } else if sample_rate <= 768_000.0 {
            0.998
        } else {
            0.995
        }
    }

    pub fn pole(&self) -> f32 {
        self.pole
    }

    /// Clear filter memory; the next sample primes it again.
    pub fn reset(&mut self) {
        self.x1 = Complex::new(0.0, 0.0);
        self.y1 = Complex::new(0.0, 0.0);
        self.primed = false;
    }

    /// Filter `block` in place.
    pub fn apply(&mut self, block: &mut [IqSample]) {
        let Some(first) = block.first() else {
            return;
        };
        if !self.primed {
            self.x1 = *first;
            self.primed = true;
        }
        let r = self.pole;
        for sample in block.iter_mut() {
            let x = *sample;
            let y = x - self.x1 + self.y1 * r;
            self.x1 = x;
            self.y1 = y;
            *sample = y;
        }
    }
}
