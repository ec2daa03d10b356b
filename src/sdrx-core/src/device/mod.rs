// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Narrow capability interface over a radio hardware driver.
//!
//! Everything above this layer (tuning, streaming, gain) talks to hardware
//! only through [`SdrDevice`], [`RxStream`] and [`TxStream`], so it can be
//! exercised against [`dummy::DummyDevice`] without a physical radio.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use num_complex::Complex;
use serde::{Deserialize, Serialize};

pub mod dummy;
pub mod error;
pub mod stream;

use error::{SdrResult, StreamError};

/// One complex baseband sample as delivered by the driver (CF32).
pub type IqSample = Complex<f32>;

/// Name of the mixer (local oscillator) frequency component.
pub const COMPONENT_RF: &str = "RF";
/// Name of the digital baseband offset frequency component.
pub const COMPONENT_BB: &str = "BB";

/// Stream direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Rx,
    Tx,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rx => write!(f, "RX"),
            Self::Tx => write!(f, "TX"),
        }
    }
}

/// One opened radio. All methods take `&self`; implementations serialise
/// access internally so the control thread can tune while a stream is read
/// from the acquisition thread.
pub trait SdrDevice: Send + Sync {
    /// Driver key reported by the hardware (e.g. `"lime"`, `"rtlsdr"`).
    fn driver_key(&self) -> String;

    fn num_channels(&self, direction: Direction) -> usize;

    fn set_sample_rate(&self, direction: Direction, channel: usize, rate: f64) -> SdrResult<()>;

    fn sample_rate(&self, direction: Direction, channel: usize) -> SdrResult<f64>;

    fn set_bandwidth(&self, direction: Direction, channel: usize, bandwidth: f64)
        -> SdrResult<()>;

    /// Names of the individually tunable frequency components (`"RF"`, `"BB"`, ...).
    fn frequency_components(&self, direction: Direction, channel: usize)
        -> SdrResult<Vec<String>>;

    /// Combined tune: the driver distributes `hz` over its components itself.
    fn set_frequency(&self, direction: Direction, channel: usize, hz: f64) -> SdrResult<()>;

    fn frequency(&self, direction: Direction, channel: usize) -> SdrResult<f64>;

    fn set_component_frequency(
        &self,
        direction: Direction,
        channel: usize,
        name: &str,
        hz: f64,
    ) -> SdrResult<()>;

    fn component_frequency(&self, direction: Direction, channel: usize, name: &str)
        -> SdrResult<f64>;

    fn gain_elements(&self, direction: Direction, channel: usize) -> SdrResult<Vec<String>>;

    /// Overall `(min, max)` gain range in dB.
    fn gain_range(&self, direction: Direction, channel: usize) -> SdrResult<(f64, f64)>;

    fn set_gain(&self, direction: Direction, channel: usize, db: f64) -> SdrResult<()>;

    fn gain(&self, direction: Direction, channel: usize) -> SdrResult<f64>;

    fn set_gain_element(
        &self,
        direction: Direction,
        channel: usize,
        name: &str,
        db: f64,
    ) -> SdrResult<()>;

    fn gain_element(&self, direction: Direction, channel: usize, name: &str) -> SdrResult<f64>;

    fn has_gain_mode(&self, direction: Direction, channel: usize) -> bool;

    fn set_gain_mode(&self, direction: Direction, channel: usize, automatic: bool)
        -> SdrResult<()>;

    fn gain_mode(&self, direction: Direction, channel: usize) -> SdrResult<bool>;

    /// Write an arbitrary vendor-specific setting.
    fn write_setting(&self, key: &str, value: &str) -> SdrResult<()>;

    fn read_setting(&self, key: &str) -> SdrResult<String>;

    fn setup_rx_stream(&self, channel: usize) -> SdrResult<Box<dyn RxStream>>;

    fn setup_tx_stream(&self, channel: usize) -> SdrResult<Box<dyn TxStream>>;
}

/// Receive half of a hardware stream. Dropping the handle tears it down.
pub trait RxStream: Send {
    /// Driver-preferred maximum number of samples per read.
    fn mtu(&self) -> SdrResult<usize>;

    fn activate(&mut self) -> SdrResult<()>;

    fn deactivate(&mut self) -> SdrResult<()>;

    /// Blocking read of up to `buf.len()` samples, bounded by `timeout`.
    fn read(&mut self, buf: &mut [IqSample], timeout: Duration) -> Result<usize, StreamError>;
}

/// Transmit half of a hardware stream. Dropping the handle tears it down.
pub trait TxStream: Send {
    fn mtu(&self) -> SdrResult<usize>;

    fn activate(&mut self) -> SdrResult<()>;

    fn deactivate(&mut self) -> SdrResult<()>;

    /// Blocking write of up to `buf.len()` samples, bounded by `timeout`.
    fn write(&mut self, buf: &[IqSample], timeout: Duration) -> Result<usize, StreamError>;
}

/// Opens device handles for one driver family.
pub trait DeviceFactory: Send + Sync {
    fn name(&self) -> &str;

    fn open(&self, args: &str) -> SdrResult<Arc<dyn SdrDevice>>;
}
