// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! SoapySDR implementation of the device capability traits.

use std::sync::Arc;
use std::time::Duration;

use soapysdr::{Device, ErrorCode};

use sdrx_core::{
    DeviceFactory, Direction, IqSample, RxStream, SdrDevice, SdrError, SdrResult, StreamError,
    TxStream,
};

fn soapy_direction(direction: Direction) -> soapysdr::Direction {
    match direction {
        Direction::Rx => soapysdr::Direction::Rx,
        Direction::Tx => soapysdr::Direction::Tx,
    }
}

fn stream_error(e: soapysdr::Error) -> StreamError {
    match e.code {
        ErrorCode::Timeout => StreamError::Timeout,
        ErrorCode::Overflow => StreamError::Overflow,
        ErrorCode::Underflow => StreamError::Underflow,
        _ => StreamError::Other(e.to_string()),
    }
}

fn timeout_us(timeout: Duration) -> i64 {
    i64::try_from(timeout.as_micros()).unwrap_or(i64::MAX)
}

/// Opens devices through the SoapySDR runtime.
pub struct SoapyFactory;

impl DeviceFactory for SoapyFactory {
    fn name(&self) -> &str {
        "soapysdr"
    }

    fn open(&self, args: &str) -> SdrResult<Arc<dyn SdrDevice>> {
        tracing::info!("Opening SoapySDR device with args: {}", args);
        let device = Device::new(args).map_err(|e| SdrError::DeviceOpen {
            args: args.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Arc::new(SoapyDevice { device }))
    }
}

pub struct SoapyDevice {
    device: Device,
}

impl SdrDevice for SoapyDevice {
    fn driver_key(&self) -> String {
        self.device
            .driver_key()
            .unwrap_or_else(|_| "unknown".to_string())
    }

    fn num_channels(&self, direction: Direction) -> usize {
        self.device
            .num_channels(soapy_direction(direction))
            .unwrap_or(0)
    }

    fn set_sample_rate(&self, direction: Direction, channel: usize, rate: f64) -> SdrResult<()> {
        self.device
            .set_sample_rate(soapy_direction(direction), channel, rate)
            .map_err(|e| SdrError::driver("set_sample_rate", e))
    }

    fn sample_rate(&self, direction: Direction, channel: usize) -> SdrResult<f64> {
        self.device
            .sample_rate(soapy_direction(direction), channel)
            .map_err(|e| SdrError::driver("sample_rate", e))
    }

    fn set_bandwidth(
        &self,
        direction: Direction,
        channel: usize,
        bandwidth: f64,
    ) -> SdrResult<()> {
        self.device
            .set_bandwidth(soapy_direction(direction), channel, bandwidth)
            .map_err(|e| SdrError::driver("set_bandwidth", e))
    }

    fn frequency_components(
        &self,
        direction: Direction,
        channel: usize,
    ) -> SdrResult<Vec<String>> {
        self.device
            .list_frequencies(soapy_direction(direction), channel)
            .map_err(|e| SdrError::driver("list_frequencies", e))
    }

    fn set_frequency(&self, direction: Direction, channel: usize, hz: f64) -> SdrResult<()> {
        self.device
            .set_frequency(soapy_direction(direction), channel, hz, ())
            .map_err(|e| SdrError::driver("set_frequency", e))
    }

    fn frequency(&self, direction: Direction, channel: usize) -> SdrResult<f64> {
        self.device
            .frequency(soapy_direction(direction), channel)
            .map_err(|e| SdrError::driver("frequency", e))
    }

    fn set_component_frequency(
        &self,
        direction: Direction,
        channel: usize,
        name: &str,
        hz: f64,
    ) -> SdrResult<()> {
        self.device
            .set_component_frequency(soapy_direction(direction), channel, name, hz, ())
            .map_err(|e| SdrError::driver("set_component_frequency", e))
    }

    fn component_frequency(
        &self,
        direction: Direction,
        channel: usize,
        name: &str,
    ) -> SdrResult<f64> {
        self.device
            .component_frequency(soapy_direction(direction), channel, name)
            .map_err(|e| SdrError::driver("component_frequency", e))
    }

    fn gain_elements(&self, direction: Direction, channel: usize) -> SdrResult<Vec<String>> {
        self.device
            .list_gains(soapy_direction(direction), channel)
            .map_err(|e| SdrError::driver("list_gains", e))
    }

    fn gain_range(&self, direction: Direction, channel: usize) -> SdrResult<(f64, f64)> {
        self.device
            .gain_range(soapy_direction(direction), channel)
            .map(|r| (r.minimum, r.maximum))
            .map_err(|e| SdrError::driver("gain_range", e))
    }

    fn set_gain(&self, direction: Direction, channel: usize, db: f64) -> SdrResult<()> {
        self.device
            .set_gain(soapy_direction(direction), channel, db)
            .map_err(|e| SdrError::driver("set_gain", e))
    }

    fn gain(&self, direction: Direction, channel: usize) -> SdrResult<f64> {
        self.device
            .gain(soapy_direction(direction), channel)
            .map_err(|e| SdrError::driver("gain", e))
    }

    fn set_gain_element(
        &self,
        direction: Direction,
        channel: usize,
        name: &str,
        db: f64,
    ) -> SdrResult<()> {
        self.device
            .set_gain_element(soapy_direction(direction), channel, name, db)
            .map_err(|e| SdrError::driver("set_gain_element", e))
    }

    fn gain_element(&self, direction: Direction, channel: usize, name: &str) -> SdrResult<f64> {
        self.device
            .gain_element(soapy_direction(direction), channel, name)
            .map_err(|e| SdrError::driver("gain_element", e))
    }

    fn has_gain_mode(&self, direction: Direction, channel: usize) -> bool {
        self.device
            .has_gain_mode(soapy_direction(direction), channel)
            .unwrap_or(false)
    }

    fn set_gain_mode(
        &self,
        direction: Direction,
        channel: usize,
        automatic: bool,
    ) -> SdrResult<()> {
        self.device
            .set_gain_mode(soapy_direction(direction), channel, automatic)
            .map_err(|e| SdrError::driver("set_gain_mode", e))
    }

    fn gain_mode(&self, direction: Direction, channel: usize) -> SdrResult<bool> {
        self.device
            .gain_mode(soapy_direction(direction), channel)
            .map_err(|e| SdrError::driver("gain_mode", e))
    }

    fn write_setting(&self, key: &str, value: &str) -> SdrResult<()> {
        self.device
            .write_setting(key, value)
            .map_err(|e| SdrError::driver("write_setting", e))
    }

    fn read_setting(&self, key: &str) -> SdrResult<String> {
        self.device
            .read_setting(key)
            .map_err(|e| SdrError::driver("read_setting", e))
    }

    fn setup_rx_stream(&self, channel: usize) -> SdrResult<Box<dyn RxStream>> {
        let stream = self
            .device
            .rx_stream::<IqSample>(&[channel])
            .map_err(|e| SdrError::driver("rx_stream", e))?;
        Ok(Box::new(SoapyRxStream { stream }))
    }

    fn setup_tx_stream(&self, channel: usize) -> SdrResult<Box<dyn TxStream>> {
        let stream = self
            .device
            .tx_stream::<IqSample>(&[channel])
            .map_err(|e| SdrError::driver("tx_stream", e))?;
        Ok(Box::new(SoapyTxStream { stream }))
    }
}

struct SoapyRxStream {
    stream: soapysdr::RxStream<IqSample>,
}

impl RxStream for SoapyRxStream {
    fn mtu(&self) -> SdrResult<usize> {
        self.stream.mtu().map_err(|e| SdrError::driver("mtu", e))
    }

    fn activate(&mut self) -> SdrResult<()> {
        self.stream
            .activate(None)
            .map_err(|e| SdrError::driver("activate", e))
    }

    fn deactivate(&mut self) -> SdrResult<()> {
        self.stream
            .deactivate(None)
            .map_err(|e| SdrError::driver("deactivate", e))
    }

    fn read(&mut self, buf: &mut [IqSample], timeout: Duration) -> Result<usize, StreamError> {
        self.stream
            .read(&mut [buf], timeout_us(timeout))
            .map_err(stream_error)
    }
}

struct SoapyTxStream {
    stream: soapysdr::TxStream<IqSample>,
}

impl TxStream for SoapyTxStream {
    fn mtu(&self) -> SdrResult<usize> {
        self.stream.mtu().map_err(|e| SdrError::driver("mtu", e))
    }

    fn activate(&mut self) -> SdrResult<()> {
        self.stream
            .activate(None)
            .map_err(|e| SdrError::driver("activate", e))
    }

    fn deactivate(&mut self) -> SdrResult<()> {
        self.stream
            .deactivate(None)
            .map_err(|e| SdrError::driver("deactivate", e))
    }

    fn write(&mut self, buf: &[IqSample], timeout: Duration) -> Result<usize, StreamError> {
        self.stream
            .write(&[buf], None, false, timeout_us(timeout))
            .map_err(stream_error)
    }
}
