// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Hardware stream ownership for one `(direction, channel)` slot.
//!
//! [`StreamManager`] drives the driver handle through the
//! [`StreamLifecycle`] state machine. While the acquisition thread runs it
//! owns the handle outright; the manager only lends it out with
//! [`take`](StreamManager::take) and gets it back with
//! [`restore`](StreamManager::restore), so the control thread can never
//! touch a stream that is being read.

use tracing::{debug, warn};

use sdrx_core::{
    Direction, RxStream, SdrDevice, SdrError, SdrResult, StreamEvent, StreamLifecycle,
    StreamState, TxStream,
};

/// Driver handle of either direction.
pub trait StreamHandle: Send + Sized {
    const DIRECTION: Direction;

    fn setup(device: &dyn SdrDevice, channel: usize) -> SdrResult<Self>;
    fn mtu(&self) -> SdrResult<usize>;
    fn activate(&mut self) -> SdrResult<()>;
    fn deactivate(&mut self) -> SdrResult<()>;
}

impl StreamHandle for Box<dyn RxStream> {
    const DIRECTION: Direction = Direction::Rx;

    fn setup(device: &dyn SdrDevice, channel: usize) -> SdrResult<Self> {
        device.setup_rx_stream(channel)
    }

    fn mtu(&self) -> SdrResult<usize> {
        (**self).mtu()
    }

    fn activate(&mut self) -> SdrResult<()> {
        (**self).activate()
    }

    fn deactivate(&mut self) -> SdrResult<()> {
        (**self).deactivate()
    }
}

impl StreamHandle for Box<dyn TxStream> {
    const DIRECTION: Direction = Direction::Tx;

    fn setup(device: &dyn SdrDevice, channel: usize) -> SdrResult<Self> {
        device.setup_tx_stream(channel)
    }

    fn mtu(&self) -> SdrResult<usize> {
        (**self).mtu()
    }

    fn activate(&mut self) -> SdrResult<()> {
        (**self).activate()
    }

    fn deactivate(&mut self) -> SdrResult<()> {
        (**self).deactivate()
    }
}

/// Parameters applied when a stream is created.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamParams {
    pub sample_rate: f64,
    /// Analog bandwidth; zero leaves the driver default.
    pub bandwidth: f64,
    /// Block size of the downstream FFT; a read is capped at twice this.
    pub fft_block_size: usize,
}

pub struct StreamManager<H: StreamHandle> {
    channel: usize,
    lifecycle: StreamLifecycle,
    handle: Option<H>,
    max_block: usize,
}

pub type RxStreamManager = StreamManager<Box<dyn RxStream>>;
pub type TxStreamManager = StreamManager<Box<dyn TxStream>>;

impl<H: StreamHandle> StreamManager<H> {
    pub fn new(channel: usize) -> Self {
        Self {
            channel,
            lifecycle: StreamLifecycle::new(),
            handle: None,
            max_block: 0,
        }
    }

    pub fn direction(&self) -> Direction {
        H::DIRECTION
    }

    pub fn channel(&self) -> usize {
        self.channel
    }

    pub fn state(&self) -> StreamState {
        self.lifecycle.state()
    }

    /// Samples per read: the driver MTU capped at twice the FFT block.
    pub fn max_block_samples(&self) -> usize {
        self.max_block
    }

    /// The handle is currently lent to a worker.
    pub fn is_lent(&self) -> bool {
        self.lifecycle.state().has_handle() && self.handle.is_none()
    }

    fn invalid(&self, event: StreamEvent) -> SdrError {
        SdrError::InvalidTransition {
            direction: H::DIRECTION,
            channel: self.channel,
            from: self.lifecycle.state(),
            event,
        }
    }

    fn setup_error(&self, reason: impl ToString) -> SdrError {
        SdrError::StreamSetup {
            direction: H::DIRECTION,
            channel: self.channel,
            reason: reason.to_string(),
        }
    }

    /// Program the rate, set up the driver stream and size the read block.
    /// Failures are fatal for this slot.
    pub fn create(&mut self, device: &dyn SdrDevice, params: &StreamParams) -> SdrResult<()> {
        if !self.lifecycle.can_process(StreamEvent::Create) {
            return Err(SdrError::ChannelInUse {
                direction: H::DIRECTION,
                channel: self.channel,
            });
        }

        device
            .set_sample_rate(H::DIRECTION, self.channel, params.sample_rate)
            .map_err(|e| self.setup_error(e))?;
        if params.bandwidth > 0.0 {
            if let Err(e) = device.set_bandwidth(H::DIRECTION, self.channel, params.bandwidth) {
                warn!(
                    "{}{} bandwidth {:.0} Hz not accepted: {}",
                    H::DIRECTION,
                    self.channel,
                    params.bandwidth,
                    e
                );
            }
        }
        let handle = H::setup(device, self.channel).map_err(|e| self.setup_error(e))?;

        let cap = 2 * params.fft_block_size.max(1);
        self.max_block = match handle.mtu() {
            Ok(mtu) if mtu > 0 => mtu.min(cap),
            Ok(_) => cap,
            Err(e) => {
                warn!("{}{} MTU unavailable: {}", H::DIRECTION, self.channel, e);
                cap
            }
        };
        self.handle = Some(handle);
        self.lifecycle.process_event(StreamEvent::Create);
        debug!(
            "{}{} stream created, {} samples per read",
            H::DIRECTION,
            self.channel,
            self.max_block
        );
        Ok(())
    }

    pub fn activate(&mut self) -> SdrResult<()> {
        if !self.lifecycle.can_process(StreamEvent::Activate) {
            return Err(self.invalid(StreamEvent::Activate));
        }
        let Some(handle) = self.handle.as_mut() else {
            return Err(self.invalid(StreamEvent::Activate));
        };
        handle.activate()?;
        self.lifecycle.process_event(StreamEvent::Activate);
        Ok(())
    }

    /// Driver deactivation failures are logged; the slot still counts as
    /// deactivated so teardown can proceed.
    pub fn deactivate(&mut self) -> SdrResult<()> {
        if !self.lifecycle.can_process(StreamEvent::Deactivate) {
            return Err(self.invalid(StreamEvent::Deactivate));
        }
        let Some(handle) = self.handle.as_mut() else {
            return Err(self.invalid(StreamEvent::Deactivate));
        };
        if let Err(e) = handle.deactivate() {
            warn!("{}{} deactivate failed: {}", H::DIRECTION, self.channel, e);
        }
        self.lifecycle.process_event(StreamEvent::Deactivate);
        Ok(())
    }

    /// Deactivate if needed, then drop the driver handle.
    pub fn destroy(&mut self) -> SdrResult<()> {
        if self.is_lent() {
            return Err(self.invalid(StreamEvent::Destroy));
        }
        if self.lifecycle.state().is_active() {
            self.deactivate()?;
        }
        if !self.lifecycle.can_process(StreamEvent::Destroy) {
            return Err(self.invalid(StreamEvent::Destroy));
        }
        self.handle = None;
        self.lifecycle.process_event(StreamEvent::Destroy);
        debug!("{}{} stream destroyed", H::DIRECTION, self.channel);
        Ok(())
    }

    /// Lend the active handle to a worker.
    pub fn take(&mut self) -> SdrResult<H> {
        if !self.lifecycle.state().is_active() {
            return Err(self.invalid(StreamEvent::Activate));
        }
        self.handle
            .take()
            .ok_or_else(|| self.invalid(StreamEvent::Activate))
    }

    pub fn restore(&mut self, handle: H) {
        self.handle = Some(handle);
    }

    /// The lent handle will not come back; release the slot.
    pub fn abandon(&mut self) {
        self.handle = None;
        self.lifecycle.set_state(StreamState::Destroyed);
    }
}

impl<H: StreamHandle> Drop for StreamManager<H> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.as_mut() {
            if self.lifecycle.state().is_active() {
                let _ = handle.deactivate();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdrx_core::device::dummy::{calls, DriverCall, DummyConfig, DummyDevice};

    fn params() -> StreamParams {
        StreamParams {
            sample_rate: 768_000.0,
            bandwidth: 0.0,
            fft_block_size: 1024,
        }
    }

    #[test]
    fn create_caps_block_at_twice_fft() {
        let dev = DummyDevice::default();
        let mut sm = RxStreamManager::new(0);
        sm.create(&dev, &params()).unwrap();
        assert_eq!(sm.state(), StreamState::Created);
        assert_eq!(sm.max_block_samples(), 2048);
        assert_eq!(dev.sample_rate(Direction::Rx, 0).unwrap(), 768_000.0);
    }

    #[test]
    fn small_mtu_wins() {
        let dev = DummyDevice::new(DummyConfig {
            mtu: 1000,
            ..DummyConfig::default()
        });
        let mut sm = RxStreamManager::new(0);
        sm.create(&dev, &params()).unwrap();
        assert_eq!(sm.max_block_samples(), 1000);
    }

    #[test]
    fn activation_toggles_without_recreate() {
        let dev = DummyDevice::default();
        let mut sm = RxStreamManager::new(0);
        sm.create(&dev, &params()).unwrap();
        for _ in 0..3 {
            sm.activate().unwrap();
            sm.deactivate().unwrap();
        }
        let setups = dev
            .calls()
            .iter()
            .filter(|c| matches!(c, DriverCall::SetupStream { .. }))
            .count();
        assert_eq!(setups, 1);
        assert_eq!(sm.state(), StreamState::Deactivated);
    }

    #[test]
    fn double_create_is_channel_in_use() {
        let dev = DummyDevice::default();
        let mut sm = TxStreamManager::new(0);
        sm.create(&dev, &params()).unwrap();
        assert!(matches!(
            sm.create(&dev, &params()),
            Err(SdrError::ChannelInUse {
                direction: Direction::Tx,
                channel: 0
            })
        ));
    }

    #[test]
    fn setup_failure_is_fatal_and_leaves_slot_free() {
        let dev = DummyDevice::default();
        dev.fail_call(calls::SETUP_STREAM);
        let mut sm = RxStreamManager::new(1);
        let err = sm.create(&dev, &params()).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(sm.state(), StreamState::Uninitialized);

        dev.clear_failures();
        sm.create(&dev, &params()).unwrap();
    }

    #[test]
    fn lent_handle_blocks_activation_and_destroy() {
        let dev = DummyDevice::default();
        let mut sm = RxStreamManager::new(0);
        sm.create(&dev, &params()).unwrap();
        sm.activate().unwrap();
        let handle = sm.take().unwrap();
        assert!(sm.is_lent());
        assert!(sm.deactivate().is_err());
        assert!(sm.destroy().is_err());

        sm.restore(handle);
        sm.destroy().unwrap();
        assert_eq!(sm.state(), StreamState::Destroyed);
    }

    #[test]
    fn take_requires_active_stream() {
        let dev = DummyDevice::default();
        let mut sm = RxStreamManager::new(0);
        sm.create(&dev, &params()).unwrap();
        assert!(sm.take().is_err());
    }

    #[test]
    fn bandwidth_failure_is_not_fatal() {
        let dev = DummyDevice::default();
        dev.fail_call(calls::SET_BANDWIDTH);
        let mut sm = RxStreamManager::new(0);
        let p = StreamParams {
            bandwidth: 1_500_000.0,
            ..params()
        };
        sm.create(&dev, &p).unwrap();
    }
}
