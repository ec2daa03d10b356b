// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

/// Rate at which the transmit chain expects microphone samples.
pub const MIC_SAMPLE_RATE: u32 = 48_000;

/// Derives a fixed-rate tick from the receive sample flow.
///
/// With no hardware microphone clock, the transmit chain is paced by the
/// receiver: every `divisor` produced RX samples yield one tick.
#[derive(Debug, Clone)]
pub struct TxHeartbeatPacer {
    divisor: u32,
    count: u32,
}

impl TxHeartbeatPacer {
    /// `divisor = sample_rate / tick_rate`, truncated, never below one.
    pub fn new(sample_rate: f64, tick_rate: u32) -> Self {
        let divisor = if tick_rate == 0 {
            1
        } else {
            (sample_rate / tick_rate as f64) as u32
        };
        Self {
            divisor: divisor.max(1),
            count: 0,
        }
    }

    pub fn divisor(&self) -> u32 {
        self.divisor
    }

    /// Count one produced sample; true when a tick is due.
    pub fn step(&mut self) -> bool {
        self.count += 1;
        if self.count >= self.divisor {
            self.count = 0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divisor_from_rate() {
        assert_eq!(TxHeartbeatPacer::new(768_000.0, MIC_SAMPLE_RATE).divisor(), 16);
        assert_eq!(TxHeartbeatPacer::new(1_000_000.0, MIC_SAMPLE_RATE).divisor(), 20);
        assert_eq!(TxHeartbeatPacer::new(48_000.0, MIC_SAMPLE_RATE).divisor(), 1);
    }

    #[test]
    fn divisor_never_zero() {
        assert_eq!(TxHeartbeatPacer::new(24_000.0, MIC_SAMPLE_RATE).divisor(), 1);
        assert_eq!(TxHeartbeatPacer::new(0.0, MIC_SAMPLE_RATE).divisor(), 1);
        assert_eq!(TxHeartbeatPacer::new(768_000.0, 0).divisor(), 1);
    }

    #[test]
    fn ticks_every_divisor_samples() {
        let mut pacer = TxHeartbeatPacer::new(768_000.0, MIC_SAMPLE_RATE);
        let ticks: Vec<usize> = (1..=64).filter(|_| pacer.step()).collect();
        assert_eq!(ticks.len(), 4);

        let mut pacer = TxHeartbeatPacer::new(768_000.0, MIC_SAMPLE_RATE);
        let first = (1..=64).find(|_| pacer.step());
        assert_eq!(first, Some(16));
    }

    #[test]
    fn one_second_of_samples_gives_mic_rate() {
        let mut pacer = TxHeartbeatPacer::new(768_000.0, MIC_SAMPLE_RATE);
        let ticks = (0..768_000).filter(|_| pacer.step()).count();
        assert_eq!(ticks, 48_000);
    }
}
