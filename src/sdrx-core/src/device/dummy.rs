// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Dummy device for development and testing.
//!
//! Holds all tunable state in memory, records every driver call, and
//! synthesises an IQ stream of a DC offset plus one tone. Individual driver
//! calls can be made to fail, and reads can be made to time out or error, so
//! the layers above can be tested without hardware.

use std::collections::{HashMap, HashSet};
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use num_complex::Complex;

use super::error::{SdrError, SdrResult, StreamError};
use super::{
    DeviceFactory, Direction, IqSample, RxStream, SdrDevice, TxStream, COMPONENT_BB, COMPONENT_RF,
};

/// Driver call names accepted by [`DummyDevice::fail_call`].
pub mod calls {
    pub const SET_SAMPLE_RATE: &str = "set_sample_rate";
    pub const SET_BANDWIDTH: &str = "set_bandwidth";
    pub const SET_FREQUENCY: &str = "set_frequency";
    pub const SET_COMPONENT_FREQUENCY: &str = "set_component_frequency";
    pub const GAIN_RANGE: &str = "gain_range";
    pub const SET_GAIN: &str = "set_gain";
    pub const SET_GAIN_ELEMENT: &str = "set_gain_element";
    pub const SET_GAIN_MODE: &str = "set_gain_mode";
    pub const WRITE_SETTING: &str = "write_setting";
    pub const SETUP_STREAM: &str = "setup_stream";
    pub const ACTIVATE: &str = "activate";
}

/// A recorded driver call.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    SetSampleRate {
        direction: Direction,
        channel: usize,
        rate: f64,
    },
    SetBandwidth {
        direction: Direction,
        channel: usize,
        bandwidth: f64,
    },
    SetFrequency {
        direction: Direction,
        channel: usize,
        hz: f64,
    },
    SetComponentFrequency {
        direction: Direction,
        channel: usize,
        name: String,
        hz: f64,
    },
    SetGain {
        direction: Direction,
        channel: usize,
        db: f64,
    },
    SetGainElement {
        direction: Direction,
        channel: usize,
        name: String,
        db: f64,
    },
    SetGainMode {
        direction: Direction,
        channel: usize,
        automatic: bool,
    },
    WriteSetting {
        key: String,
        value: String,
    },
    SetupStream {
        direction: Direction,
        channel: usize,
    },
    Activate {
        direction: Direction,
        channel: usize,
    },
    Deactivate {
        direction: Direction,
        channel: usize,
    },
}

/// Static shape of the simulated radio.
#[derive(Debug, Clone)]
pub struct DummyConfig {
    pub rx_channels: usize,
    pub tx_channels: usize,
    pub mtu: usize,
    /// Expose a separately tunable `"BB"` component.
    pub has_bb_component: bool,
    /// LO synthesiser resolution; the programmed LO is rounded to this step.
    pub lo_step_hz: f64,
    /// Sample clock resolution; requested rates are rounded down to it.
    pub sample_rate_step_hz: f64,
    pub gain_range: (f64, f64),
    pub gain_elements: Vec<String>,
    pub tone_offset_hz: f64,
    pub tone_amplitude: f32,
    pub dc_offset: IqSample,
    /// Sleep for the real-time duration of every block read.
    pub paced: bool,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            rx_channels: 2,
            tx_channels: 1,
            mtu: 4096,
            has_bb_component: true,
            lo_step_hz: 0.0,
            sample_rate_step_hz: 0.0,
            gain_range: (0.0, 60.0),
            gain_elements: vec!["LNA".to_string(), "TIA".to_string(), "PGA".to_string()],
            tone_offset_hz: 10_000.0,
            tone_amplitude: 0.25,
            dc_offset: Complex::new(0.05, -0.03),
            paced: false,
        }
    }
}

type Key = (Direction, usize);

#[derive(Default)]
struct DummyState {
    sample_rates: HashMap<Key, f64>,
    bandwidths: HashMap<Key, f64>,
    components: HashMap<(Direction, usize, String), f64>,
    gains: HashMap<Key, f64>,
    gain_elements: HashMap<(Direction, usize, String), f64>,
    gain_modes: HashMap<Key, bool>,
    settings: HashMap<String, String>,
    calls: Vec<DriverCall>,
    failing: HashSet<&'static str>,
}

struct Shared {
    config: DummyConfig,
    state: Mutex<DummyState>,
    pending_timeouts: AtomicUsize,
    pending_read_errors: AtomicUsize,
    samples_read: AtomicU64,
    samples_written: AtomicU64,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, DummyState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record `call` unless `name` was made to fail.
    fn record(&self, name: &'static str, call: DriverCall) -> SdrResult<()> {
        let mut state = self.state();
        if state.failing.contains(name) {
            return Err(SdrError::driver(name, "injected failure"));
        }
        state.calls.push(call);
        Ok(())
    }
}

fn take_pending(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .is_ok()
}

/// In-memory radio implementing [`SdrDevice`].
#[derive(Clone)]
pub struct DummyDevice {
    shared: Arc<Shared>,
}

impl Default for DummyDevice {
    fn default() -> Self {
        Self::new(DummyConfig::default())
    }
}

impl DummyDevice {
    pub fn new(config: DummyConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(DummyState::default()),
                pending_timeouts: AtomicUsize::new(0),
                pending_read_errors: AtomicUsize::new(0),
                samples_read: AtomicU64::new(0),
                samples_written: AtomicU64::new(0),
            }),
        }
    }

    /// Make every subsequent call named `name` (see [`calls`]) fail.
    pub fn fail_call(&self, name: &'static str) {
        self.shared.state().failing.insert(name);
    }

    pub fn clear_failures(&self) {
        self.shared.state().failing.clear();
    }

    /// The next `n` reads on any RX stream time out.
    pub fn inject_timeouts(&self, n: usize) {
        self.shared.pending_timeouts.fetch_add(n, Ordering::AcqRel);
    }

    /// The next `n` reads on any RX stream fail with a non-timeout error.
    pub fn inject_read_errors(&self, n: usize) {
        self.shared.pending_read_errors.fetch_add(n, Ordering::AcqRel);
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.shared.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.shared.state().calls.clear();
    }

    pub fn setting(&self, key: &str) -> Option<String> {
        self.shared.state().settings.get(key).cloned()
    }

    pub fn samples_read(&self) -> u64 {
        self.shared.samples_read.load(Ordering::Acquire)
    }

    pub fn samples_written(&self) -> u64 {
        self.shared.samples_written.load(Ordering::Acquire)
    }

    fn check_channel(&self, direction: Direction, channel: usize) -> SdrResult<()> {
        if channel < self.num_channels(direction) {
            Ok(())
        } else {
            Err(SdrError::UnknownChannel { direction, channel })
        }
    }

    fn component(&self, direction: Direction, channel: usize, name: &str) -> f64 {
        self.shared
            .state()
            .components
            .get(&(direction, channel, name.to_string()))
            .copied()
            .unwrap_or(0.0)
    }
}

impl SdrDevice for DummyDevice {
    fn driver_key(&self) -> String {
        "dummy".to_string()
    }

    fn num_channels(&self, direction: Direction) -> usize {
        match direction {
            Direction::Rx => self.shared.config.rx_channels,
            Direction::Tx => self.shared.config.tx_channels,
        }
    }

    fn set_sample_rate(&self, direction: Direction, channel: usize, rate: f64) -> SdrResult<()> {
        self.check_channel(direction, channel)?;
        self.shared.record(
            calls::SET_SAMPLE_RATE,
            DriverCall::SetSampleRate {
                direction,
                channel,
                rate,
            },
        )?;
        let step = self.shared.config.sample_rate_step_hz;
        let actual = if step > 0.0 {
            (rate / step).floor() * step
        } else {
            rate
        };
        self.shared
            .state()
            .sample_rates
            .insert((direction, channel), actual);
        Ok(())
    }

    fn sample_rate(&self, direction: Direction, channel: usize) -> SdrResult<f64> {
        self.check_channel(direction, channel)?;
        Ok(self
            .shared
            .state()
            .sample_rates
            .get(&(direction, channel))
            .copied()
            .unwrap_or(1_000_000.0))
    }

    fn set_bandwidth(
        &self,
        direction: Direction,
        channel: usize,
        bandwidth: f64,
    ) -> SdrResult<()> {
        self.check_channel(direction, channel)?;
        self.shared.record(
            calls::SET_BANDWIDTH,
            DriverCall::SetBandwidth {
                direction,
                channel,
                bandwidth,
            },
        )?;
        self.shared
            .state()
            .bandwidths
            .insert((direction, channel), bandwidth);
        Ok(())
    }

    fn frequency_components(
        &self,
        direction: Direction,
        channel: usize,
    ) -> SdrResult<Vec<String>> {
        self.check_channel(direction, channel)?;
        let mut names = vec![COMPONENT_RF.to_string()];
        if self.shared.config.has_bb_component {
            names.push(COMPONENT_BB.to_string());
        }
        Ok(names)
    }

    fn set_frequency(&self, direction: Direction, channel: usize, hz: f64) -> SdrResult<()> {
        self.check_channel(direction, channel)?;
        self.shared.record(
            calls::SET_FREQUENCY,
            DriverCall::SetFrequency {
                direction,
                channel,
                hz,
            },
        )?;
        let mut state = self.shared.state();
        state
            .components
            .insert((direction, channel, COMPONENT_RF.to_string()), hz);
        state
            .components
            .insert((direction, channel, COMPONENT_BB.to_string()), 0.0);
        Ok(())
    }

    fn frequency(&self, direction: Direction, channel: usize) -> SdrResult<f64> {
        self.check_channel(direction, channel)?;
        Ok(self.component(direction, channel, COMPONENT_RF)
            + self.component(direction, channel, COMPONENT_BB))
    }

    fn set_component_frequency(
        &self,
        direction: Direction,
        channel: usize,
        name: &str,
        hz: f64,
    ) -> SdrResult<()> {
        self.check_channel(direction, channel)?;
        if name == COMPONENT_BB && !self.shared.config.has_bb_component {
            return Err(SdrError::driver(
                calls::SET_COMPONENT_FREQUENCY,
                "no BB component",
            ));
        }
        self.shared.record(
            calls::SET_COMPONENT_FREQUENCY,
            DriverCall::SetComponentFrequency {
                direction,
                channel,
                name: name.to_string(),
                hz,
            },
        )?;
        let step = self.shared.config.lo_step_hz;
        let actual = if name == COMPONENT_RF && step > 0.0 {
            (hz / step).round() * step
        } else {
            hz
        };
        self.shared
            .state()
            .components
            .insert((direction, channel, name.to_string()), actual);
        Ok(())
    }

    fn component_frequency(
        &self,
        direction: Direction,
        channel: usize,
        name: &str,
    ) -> SdrResult<f64> {
        self.check_channel(direction, channel)?;
        Ok(self.component(direction, channel, name))
    }

    fn gain_elements(&self, direction: Direction, channel: usize) -> SdrResult<Vec<String>> {
        self.check_channel(direction, channel)?;
        Ok(self.shared.config.gain_elements.clone())
    }

    fn gain_range(&self, direction: Direction, channel: usize) -> SdrResult<(f64, f64)> {
        self.check_channel(direction, channel)?;
        if self.shared.state().failing.contains(calls::GAIN_RANGE) {
            return Err(SdrError::driver(calls::GAIN_RANGE, "injected failure"));
        }
        Ok(self.shared.config.gain_range)
    }

    fn set_gain(&self, direction: Direction, channel: usize, db: f64) -> SdrResult<()> {
        self.check_channel(direction, channel)?;
        self.shared.record(
            calls::SET_GAIN,
            DriverCall::SetGain {
                direction,
                channel,
                db,
            },
        )?;
        self.shared.state().gains.insert((direction, channel), db);
        Ok(())
    }

    fn gain(&self, direction: Direction, channel: usize) -> SdrResult<f64> {
        self.check_channel(direction, channel)?;
        Ok(self
            .shared
            .state()
            .gains
            .get(&(direction, channel))
            .copied()
            .unwrap_or(0.0))
    }

    fn set_gain_element(
        &self,
        direction: Direction,
        channel: usize,
        name: &str,
        db: f64,
    ) -> SdrResult<()> {
        self.check_channel(direction, channel)?;
        if !self.shared.config.gain_elements.iter().any(|e| e == name) {
            return Err(SdrError::driver(
                calls::SET_GAIN_ELEMENT,
                format!("unknown gain element {name}"),
            ));
        }
        self.shared.record(
            calls::SET_GAIN_ELEMENT,
            DriverCall::SetGainElement {
                direction,
                channel,
                name: name.to_string(),
                db,
            },
        )?;
        self.shared
            .state()
            .gain_elements
            .insert((direction, channel, name.to_string()), db);
        Ok(())
    }

    fn gain_element(&self, direction: Direction, channel: usize, name: &str) -> SdrResult<f64> {
        self.check_channel(direction, channel)?;
        Ok(self
            .shared
            .state()
            .gain_elements
            .get(&(direction, channel, name.to_string()))
            .copied()
            .unwrap_or(0.0))
    }

    fn has_gain_mode(&self, direction: Direction, _channel: usize) -> bool {
        direction == Direction::Rx
    }

    fn set_gain_mode(
        &self,
        direction: Direction,
        channel: usize,
        automatic: bool,
    ) -> SdrResult<()> {
        self.check_channel(direction, channel)?;
        self.shared.record(
            calls::SET_GAIN_MODE,
            DriverCall::SetGainMode {
                direction,
                channel,
                automatic,
            },
        )?;
        self.shared
            .state()
            .gain_modes
            .insert((direction, channel), automatic);
        Ok(())
    }

    fn gain_mode(&self, direction: Direction, channel: usize) -> SdrResult<bool> {
        self.check_channel(direction, channel)?;
        Ok(self
            .shared
            .state()
            .gain_modes
            .get(&(direction, channel))
            .copied()
            .unwrap_or(false))
    }

    fn write_setting(&self, key: &str, value: &str) -> SdrResult<()> {
        self.shared.record(
            calls::WRITE_SETTING,
            DriverCall::WriteSetting {
                key: key.to_string(),
                value: value.to_string(),
            },
        )?;
        self.shared
            .state()
            .settings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn read_setting(&self, key: &str) -> SdrResult<String> {
        self.shared
            .state()
            .settings
            .get(key)
            .cloned()
            .ok_or_else(|| SdrError::driver("read_setting", format!("no setting {key}")))
    }

    fn setup_rx_stream(&self, channel: usize) -> SdrResult<Box<dyn RxStream>> {
        self.check_channel(Direction::Rx, channel)?;
        self.shared.record(
            calls::SETUP_STREAM,
            DriverCall::SetupStream {
                direction: Direction::Rx,
                channel,
            },
        )?;
        Ok(Box::new(DummyRxStream {
            device: self.clone(),
            channel,
            active: false,
            phase: 0.0,
        }))
    }

    fn setup_tx_stream(&self, channel: usize) -> SdrResult<Box<dyn TxStream>> {
        self.check_channel(Direction::Tx, channel)?;
        self.shared.record(
            calls::SETUP_STREAM,
            DriverCall::SetupStream {
                direction: Direction::Tx,
                channel,
            },
        )?;
        Ok(Box::new(DummyTxStream {
            shared: self.shared.clone(),
            channel,
            active: false,
        }))
    }
}

struct DummyRxStream {
    device: DummyDevice,
    channel: usize,
    active: bool,
    phase: f64,
}

impl RxStream for DummyRxStream {
    fn mtu(&self) -> SdrResult<usize> {
        Ok(self.device.shared.config.mtu)
    }

    fn activate(&mut self) -> SdrResult<()> {
        self.device.shared.record(
            calls::ACTIVATE,
            DriverCall::Activate {
                direction: Direction::Rx,
                channel: self.channel,
            },
        )?;
        self.active = true;
        Ok(())
    }

    fn deactivate(&mut self) -> SdrResult<()> {
        self.device.shared.state().calls.push(DriverCall::Deactivate {
            direction: Direction::Rx,
            channel: self.channel,
        });
        self.active = false;
        Ok(())
    }

    fn read(&mut self, buf: &mut [IqSample], timeout: Duration) -> Result<usize, StreamError> {
        if !self.active {
            return Err(StreamError::Other("stream is not activated".to_string()));
        }
        if take_pending(&self.device.shared.pending_timeouts) {
            std::thread::sleep(timeout.min(Duration::from_millis(1)));
            return Err(StreamError::Timeout);
        }
        if take_pending(&self.device.shared.pending_read_errors) {
            return Err(StreamError::Other("injected read error".to_string()));
        }

        let config = &self.device.shared.config;
        let n = buf.len().min(config.mtu);
        let rate = self
            .device
            .sample_rate(Direction::Rx, self.channel)
            .unwrap_or(1_000_000.0);
        let phase_inc = TAU * config.tone_offset_hz / rate;
        for sample in &mut buf[..n] {
            *sample = config.dc_offset + Complex::from_polar(config.tone_amplitude, self.phase as f32);
            self.phase += phase_inc;
            if self.phase >= TAU {
                self.phase -= TAU;
            }
        }

        if config.paced && rate > 0.0 {
            std::thread::sleep(Duration::from_secs_f64(n as f64 / rate));
        }
        self.device.shared.samples_read.fetch_add(n as u64, Ordering::AcqRel);
        Ok(n)
    }
}

struct DummyTxStream {
    shared: Arc<Shared>,
    channel: usize,
    active: bool,
}

impl TxStream for DummyTxStream {
    fn mtu(&self) -> SdrResult<usize> {
        Ok(self.shared.config.mtu)
    }

    fn activate(&mut self) -> SdrResult<()> {
        self.shared.record(
            calls::ACTIVATE,
            DriverCall::Activate {
                direction: Direction::Tx,
                channel: self.channel,
            },
        )?;
        self.active = true;
        Ok(())
    }

    fn deactivate(&mut self) -> SdrResult<()> {
        self.shared.state().calls.push(DriverCall::Deactivate {
            direction: Direction::Tx,
            channel: self.channel,
        });
        self.active = false;
        Ok(())
    }

    fn write(&mut self, buf: &[IqSample], _timeout: Duration) -> Result<usize, StreamError> {
        if !self.active {
            return Err(StreamError::Other("stream is not activated".to_string()));
        }
        self.shared
            .samples_written
            .fetch_add(buf.len() as u64, Ordering::AcqRel);
        Ok(buf.len())
    }
}

/// Factory for [`DummyDevice`]s. Keeps the most recently opened device so
/// tests can inspect it.
pub struct DummyFactory {
    config: DummyConfig,
    fail_open: bool,
    last_opened: Mutex<Option<DummyDevice>>,
}

impl DummyFactory {
    pub fn new(config: DummyConfig) -> Self {
        Self {
            config,
            fail_open: false,
            last_opened: Mutex::new(None),
        }
    }

    /// A factory whose every open fails.
    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Self::new(DummyConfig::default())
        }
    }

    pub fn last_opened(&self) -> Option<DummyDevice> {
        self.last_opened
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for DummyFactory {
    fn default() -> Self {
        Self::new(DummyConfig::default())
    }
}

impl DeviceFactory for DummyFactory {
    fn name(&self) -> &str {
        "dummy"
    }

    fn open(&self, args: &str) -> SdrResult<Arc<dyn SdrDevice>> {
        if self.fail_open {
            return Err(SdrError::DeviceOpen {
                args: args.to_string(),
                reason: "no dummy device available".to_string(),
            });
        }
        let device = DummyDevice::new(self.config.clone());
        *self.last_opened.lock().unwrap_or_else(|e| e.into_inner()) = Some(device.clone());
        Ok(Arc::new(device))
    }
}
