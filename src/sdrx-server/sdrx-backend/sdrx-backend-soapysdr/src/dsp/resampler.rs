// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::f32::consts::PI;

use num_complex::Complex;
use sdrx_core::{IqSample, SdrError, SdrResult};

/// Largest interpolation factor accepted for a rational ratio.
pub const MAX_INTERPOLATION: usize = 512;

/// Prototype taps per polyphase branch, per unit of decimation.
const TAPS_PER_DECIMATION: usize = 8;
const MIN_TAPS_PER_PHASE: usize = 16;

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Hann-windowed sinc low-pass prototype with unity DC gain.
fn windowed_sinc_coeffs(cutoff_norm: f32, taps: usize) -> Vec<f32> {
    let m = taps.saturating_sub(1) as f32;
    let mut coeffs: Vec<f32> = (0..taps)
        .map(|i| {
            let x = i as f32 - m / 2.0;
            let sinc = if x == 0.0 {
                2.0 * cutoff_norm
            } else {
                (2.0 * PI * cutoff_norm * x).sin() / (PI * x)
            };
            let window = if taps == 1 {
                1.0
            } else {
                0.5 * (1.0 - (2.0 * PI * i as f32 / m).cos())
            };
            sinc * window
        })
        .collect();
    let sum: f32 = coeffs.iter().sum();
    if sum.abs() > 1e-12 {
        for c in &mut coeffs {
            *c /= sum;
        }
    }
    coeffs
}

/// Rational `L/M` polyphase resampler over complex samples.
///
/// Streaming: the filter history and output phase carry over between
/// blocks, so splitting the input differently never changes the output.
pub struct PolyphaseResampler {
    interp: usize,
    decim: usize,
    taps_per_phase: usize,
    /// `phases[p][k] = h[p + k * L] * L`
    phases: Vec<Vec<f32>>,
    /// Input history, written twice so any window is one contiguous slice.
    history: Vec<IqSample>,
    pos: usize,
    phase: usize,
    out: Vec<IqSample>,
}

impl PolyphaseResampler {
    /// `max_block` is the largest input block [`process`](Self::process)
    /// will see; the output buffer is sized for it once.
    pub fn new(in_rate: u32, out_rate: u32, max_block: usize) -> SdrResult<Self> {
        let unsupported = SdrError::UnsupportedRate {
            hw_rate: in_rate,
            app_rate: out_rate,
        };
        if in_rate == 0 || out_rate == 0 {
            return Err(unsupported);
        }
        let g = gcd(in_rate as u64, out_rate as u64);
        let interp = (out_rate as u64 / g) as usize;
        let decim = (in_rate as u64 / g) as usize;
        if interp > MAX_INTERPOLATION {
            return Err(unsupported);
        }

        let ratio = decim.div_ceil(interp);
        let taps_per_phase = (TAPS_PER_DECIMATION * ratio).max(MIN_TAPS_PER_PHASE);
        let cutoff = 0.45 / interp.max(decim) as f32;
        let prototype = windowed_sinc_coeffs(cutoff, taps_per_phase * interp);
        let phases = (0..interp)
            .map(|p| {
                (0..taps_per_phase)
                    .map(|k| prototype[p + k * interp] * interp as f32)
                    .collect()
            })
            .collect();

        // One block of output: two f32 per complex sample.
        let out_capacity = (max_block * interp).div_ceil(decim) + 1;
        Ok(Self {
            interp,
            decim,
            taps_per_phase,
            phases,
            history: vec![Complex::new(0.0, 0.0); 2 * taps_per_phase],
            pos: 0,
            phase: 0,
            out: Vec::with_capacity(out_capacity),
        })
    }

    pub fn interpolation(&self) -> usize {
        self.interp
    }

    pub fn decimation(&self) -> usize {
        self.decim
    }

    /// Resample `input`, returning this block's output.
    pub fn process(&mut self, input: &[IqSample]) -> &mut [IqSample] {
        let k = self.taps_per_phase;
        self.out.clear();
        for &x in input {
            self.pos = if self.pos == 0 { k - 1 } else { self.pos - 1 };
            self.history[self.pos] = x;
            self.history[self.pos + k] = x;

            while self.phase < self.interp {
                let window = &self.history[self.pos..self.pos + k];
                let mut acc = Complex::new(0.0_f32, 0.0);
                for (s, &c) in window.iter().zip(&self.phases[self.phase]) {
                    acc += *s * c;
                }
                self.out.push(acc);
                self.phase += self.decim;
            }
            self.phase -= self.interp;
        }
        &mut self.out
    }
}

/// Converts hardware-rate blocks to the fixed application rate.
///
/// A bridge built for equal rates is a passthrough and never touches the
/// samples.
pub enum SampleRateBridge {
    Passthrough,
    Resample(Box<PolyphaseResampler>),
}

impl SampleRateBridge {
    /// `app_rate` of `None` means the application consumes hardware-rate
    /// samples directly.
    pub fn new(hw_rate: f64, app_rate: Option<u32>, max_block: usize) -> SdrResult<Self> {
        let Some(app_rate) = app_rate else {
            return Ok(Self::Passthrough);
        };
        let hw = hw_rate.round();
        if !(hw > 0.0 && hw <= u32::MAX as f64) {
            return Err(SdrError::UnsupportedRate {
                hw_rate: 0,
                app_rate,
            });
        }
        let hw = hw as u32;
        if hw == app_rate {
            return Ok(Self::Passthrough);
        }
        PolyphaseResampler::new(hw, app_rate, max_block)
            .map(|r| Self::Resample(Box::new(r)))
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self, Self::Passthrough)
    }

    /// Rate of the samples this bridge produces from `hw_rate` input.
    pub fn output_rate(&self, hw_rate: f64) -> f64 {
        match self {
            Self::Passthrough => hw_rate,
            Self::Resample(r) => hw_rate * r.interp as f64 / r.decim as f64,
        }
    }

    /// Convert one hardware block. Passthrough hands `input` straight back.
    pub fn convert<'a>(&'a mut self, input: &'a mut [IqSample]) -> &'a mut [IqSample] {
        match self {
            Self::Passthrough => input,
            Self::Resample(r) => r.process(input),
        }
    }
}
