// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Device session: one opened radio plus its receive and transmit streams.
//!
//! All methods run on the control thread. Receivers each get their own
//! acquisition thread while started; the session talks to them only through
//! [`RxShared`] atomics and reclaims their state by joining the thread.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use sdrx_core::{
    DeviceFactory, Direction, SdrDevice, SdrError, SdrResult, StreamEvent, StreamState,
};

use crate::config::SessionConfig;
use crate::dsp::{DcBlocker, SampleRateBridge};
use crate::gain::GainController;
use crate::heartbeat::TxHeartbeatPacer;
use crate::rx_loop::{RxParts, RxPipeline, RxShared, RxStatsSnapshot, RxWorker};
use crate::sink::{IqSink, TxChain};
use crate::stream::{RxStreamManager, StreamParams, TxStreamManager};
use crate::tuning::{TuningController, TuningState};
use crate::tx::{TxIqWriter, TxOutput};

/// Hands out at most one open device at a time.
pub struct DeviceOpener {
    factory: Arc<dyn DeviceFactory>,
    in_use: Arc<AtomicBool>,
}

impl DeviceOpener {
    pub fn new(factory: Arc<dyn DeviceFactory>) -> Self {
        Self {
            factory,
            in_use: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn driver(&self) -> &str {
        self.factory.name()
    }

    pub fn is_open(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }

    /// Fails with [`SdrError::DeviceBusy`] while a previous handle is alive.
    pub fn open(&self, args: &str) -> SdrResult<DeviceHandle> {
        if self
            .in_use
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SdrError::DeviceBusy);
        }
        let lease = DeviceLease(self.in_use.clone());
        let device = self.factory.open(args)?;
        Ok(DeviceHandle {
            device,
            _lease: lease,
        })
    }
}

struct DeviceLease(Arc<AtomicBool>);

impl Drop for DeviceLease {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// An open device. Dropping it frees the opener for the next open.
pub struct DeviceHandle {
    device: Arc<dyn SdrDevice>,
    _lease: DeviceLease,
}

impl DeviceHandle {
    pub fn device(&self) -> &Arc<dyn SdrDevice> {
        &self.device
    }
}

struct Receiver {
    channel: usize,
    stream: RxStreamManager,
    tuning: TuningController,
    gain: GainController,
    shared: Arc<RxShared>,
    hw_rate: f64,
    output_rate: f64,
    /// Present whenever no worker is running.
    pipeline: Option<RxPipeline>,
    worker: Option<RxWorker>,
}

impl Receiver {
    fn start(
        &mut self,
        heartbeat: Option<(TxHeartbeatPacer, Arc<dyn TxChain>)>,
        read_timeout: Duration,
    ) -> SdrResult<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let Some(pipeline) = self.pipeline.take() else {
            return Err(SdrError::InvalidTransition {
                direction: Direction::Rx,
                channel: self.channel,
                from: self.stream.state(),
                event: StreamEvent::Activate,
            });
        };
        let stream = match self.stream.activate().and_then(|()| self.stream.take()) {
            Ok(stream) => stream,
            Err(e) => {
                self.pipeline = Some(pipeline);
                return Err(e);
            }
        };

        let parts = RxParts {
            stream,
            pipeline,
            heartbeat,
        };
        match RxWorker::spawn(self.channel, parts, self.shared.clone(), read_timeout) {
            Ok(worker) => {
                self.worker = Some(worker);
                Ok(())
            }
            Err(e) => {
                // The parts went down with the thread closure.
                self.stream.abandon();
                Err(e)
            }
        }
    }

    /// Join the worker, take its state back and deactivate the stream.
    fn stop(&mut self) -> SdrResult<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        match worker.stop() {
            Ok(parts) => {
                self.stream.restore(parts.stream);
                self.pipeline = Some(parts.pipeline);
                self.stream.deactivate()
            }
            Err(e) => {
                self.stream.abandon();
                Err(e)
            }
        }
    }
}

struct Transmitter {
    channel: usize,
    /// Rate the driver settled on, which may differ from the request.
    hw_rate: f64,
    stream: TxStreamManager,
    tuning: TuningController,
    gain: GainController,
    output: Arc<TxOutput>,
}

impl Transmitter {
    fn stop(&mut self) -> SdrResult<()> {
        if !self.stream.state().is_active() {
            return Ok(());
        }
        if let Some(stream) = self.output.uninstall() {
            self.stream.restore(stream);
        }
        self.stream.deactivate()
    }
}

pub struct DeviceSession {
    config: SessionConfig,
    receivers: BTreeMap<usize, Receiver>,
    transmitter: Option<Transmitter>,
    tx_chain: Option<Arc<dyn TxChain>>,
    // Dropped last: releases the opener.
    handle: DeviceHandle,
}

impl DeviceSession {
    /// Open the device and apply vendor settings. Open failures are fatal.
    pub fn open(opener: &DeviceOpener, args: &str, config: SessionConfig) -> SdrResult<Self> {
        config.validate().map_err(SdrError::InvalidConfig)?;
        let handle = opener.open(args)?;
        info!(
            "Opened {} device (driver={}, args={:?})",
            handle.device().driver_key(),
            opener.driver(),
            args
        );
        let session = Self {
            config,
            receivers: BTreeMap::new(),
            transmitter: None,
            tx_chain: None,
            handle,
        };
        for (key, value) in &session.config.settings {
            session.write_setting(key, value);
        }
        Ok(session)
    }

    pub fn device(&self) -> &Arc<dyn SdrDevice> {
        self.handle.device()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn receiver(&self, channel: usize) -> SdrResult<&Receiver> {
        self.receivers.get(&channel).ok_or(SdrError::NotCreated {
            direction: Direction::Rx,
            channel,
        })
    }

    fn receiver_mut(&mut self, channel: usize) -> SdrResult<&mut Receiver> {
        self.receivers.get_mut(&channel).ok_or(SdrError::NotCreated {
            direction: Direction::Rx,
            channel,
        })
    }

    fn transmitter_mut(&mut self) -> SdrResult<&mut Transmitter> {
        self.transmitter.as_mut().ok_or(SdrError::NotCreated {
            direction: Direction::Tx,
            channel: 0,
        })
    }

    fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.config.rx.read_timeout_ms)
    }

    fn dc_blocker_for(&self, output_rate: f64) -> Option<DcBlocker> {
        let cfg = self.config.rx.dc_blocker;
        cfg.enabled.then(|| match cfg.pole {
            Some(pole) => DcBlocker::new(pole),
            None => DcBlocker::for_rate(output_rate),
        })
    }

    fn heartbeat_for(
        &self,
        channel: usize,
        output_rate: f64,
    ) -> Option<(TxHeartbeatPacer, Arc<dyn TxChain>)> {
        if channel != self.config.tx.heartbeat_channel {
            return None;
        }
        let chain = self.tx_chain.clone()?;
        let pacer = TxHeartbeatPacer::new(output_rate, self.config.tx.heartbeat_rate);
        debug!("RX{} paces TX, divisor {}", channel, pacer.divisor());
        Some((pacer, chain))
    }

    // ---- receivers ----

    /// Set up the stream and processing state for RX `channel`. The
    /// receiver stays idle until [`start_receiver`](Self::start_receiver).
    pub fn create_receiver(&mut self, channel: usize, sink: Box<dyn IqSink>) -> SdrResult<()> {
        let device = self.handle.device().clone();
        if channel >= device.num_channels(Direction::Rx) {
            return Err(SdrError::UnknownChannel {
                direction: Direction::Rx,
                channel,
            });
        }
        if self.receivers.contains_key(&channel) {
            return Err(SdrError::ChannelInUse {
                direction: Direction::Rx,
                channel,
            });
        }

        let rx = &self.config.rx;
        let mut stream = RxStreamManager::new(channel);
        stream.create(
            device.as_ref(),
            &StreamParams {
                sample_rate: rx.sample_rate,
                bandwidth: rx.bandwidth,
                fft_block_size: rx.fft_block_size,
            },
        )?;
        let hw_rate = device
            .sample_rate(Direction::Rx, channel)
            .unwrap_or(rx.sample_rate);
        let max_block = stream.max_block_samples();
        let bridge = SampleRateBridge::new(hw_rate, rx.app_sample_rate, max_block)?;
        let output_rate = bridge.output_rate(hw_rate);
        if !bridge.is_passthrough() {
            info!(
                "RX{} resampling {:.0} Hz -> {:.0} Hz",
                channel, hw_rate, output_rate
            );
        }

        let pipeline = RxPipeline {
            bridge,
            dc_blocker: self.dc_blocker_for(output_rate),
            sink,
            buffer: vec![Default::default(); max_block],
        };
        let receiver = Receiver {
            channel,
            stream,
            tuning: TuningController::new(Direction::Rx, channel, &self.config.tuning),
            gain: GainController::new(device, Direction::Rx, channel, self.config.gain),
            shared: RxShared::new(),
            hw_rate,
            output_rate,
            pipeline: Some(pipeline),
            worker: None,
        };
        self.receivers.insert(channel, receiver);
        info!("RX{} created at {:.0} Hz", channel, hw_rate);
        Ok(())
    }

    /// Activate the stream and spawn the acquisition thread.
    pub fn start_receiver(&mut self, channel: usize) -> SdrResult<()> {
        let timeout = self.read_timeout();
        let output_rate = self.receiver(channel)?.output_rate;
        let heartbeat = self.heartbeat_for(channel, output_rate);
        let rx = self.receiver_mut(channel)?;
        if rx.worker.is_some() {
            debug!("RX{} already running", channel);
            return Ok(());
        }
        rx.start(heartbeat, timeout)?;
        info!("RX{} started", channel);
        Ok(())
    }

    /// Stop and join the acquisition thread, then deactivate the stream.
    /// Nothing is delivered to the sink after this returns.
    pub fn stop_receiver(&mut self, channel: usize) -> SdrResult<()> {
        let rx = self.receiver_mut(channel)?;
        if rx.worker.is_none() {
            return Ok(());
        }
        rx.stop()?;
        info!("RX{} stopped", channel);
        Ok(())
    }

    pub fn destroy_receiver(&mut self, channel: usize) -> SdrResult<()> {
        let mut rx = self.receivers.remove(&channel).ok_or(SdrError::NotCreated {
            direction: Direction::Rx,
            channel,
        })?;
        let stopped = rx.stop();
        if rx.stream.state() != StreamState::Destroyed {
            rx.stream.destroy()?;
        }
        info!("RX{} destroyed", channel);
        stopped
    }

    pub fn is_receiving(&self, channel: usize) -> bool {
        self.receivers
            .get(&channel)
            .is_some_and(|rx| rx.worker.is_some())
    }

    pub fn receivers(&self) -> Vec<usize> {
        self.receivers.keys().copied().collect()
    }

    pub fn rx_stream_state(&self, channel: usize) -> SdrResult<StreamState> {
        Ok(self.receiver(channel)?.stream.state())
    }

    /// Tune RX `channel`. An LO move arms the drop counter so the PLL
    /// transient never reaches the sink.
    pub fn set_rx_frequency(&mut self, channel: usize, hz: f64) -> SdrResult<()> {
        let device = self.handle.device().clone();
        let drop_blocks = self.config.tuning.drop_blocks;
        let rx = self.receiver_mut(channel)?;
        let outcome = rx.tuning.apply(device.as_ref(), hz, rx.hw_rate);
        if outcome.retuned && drop_blocks > 0 {
            rx.shared.arm_drop(drop_blocks);
            debug!("RX{} LO moved; withholding {} blocks", channel, drop_blocks);
        }
        Ok(())
    }

    pub fn rx_tuning(&self, channel: usize) -> SdrResult<TuningState> {
        Ok(self.receiver(channel)?.tuning.state())
    }

    /// Change the hardware rate of RX `channel`.
    ///
    /// A running receiver is stopped first and restarted afterwards. The
    /// resampler and DC blocker are rebuilt for the new rate and the last
    /// frequency is re-tuned against the new window.
    pub fn set_rx_sample_rate(&mut self, channel: usize, rate: f64) -> SdrResult<()> {
        if !(rate > 0.0) {
            return Err(SdrError::InvalidConfig(format!(
                "sample rate must be > 0 (got {rate})"
            )));
        }
        let device = self.handle.device().clone();
        let timeout = self.read_timeout();
        let app_rate = self.config.rx.app_sample_rate;
        let drop_blocks = self.config.tuning.drop_blocks;

        let was_running = self.is_receiving(channel);
        self.receiver_mut(channel)?.stop()?;

        let result = (|| -> SdrResult<(f64, SampleRateBridge)> {
            let rx = self.receiver(channel)?;
            device.set_sample_rate(Direction::Rx, channel, rate)?;
            let hw_rate = device.sample_rate(Direction::Rx, channel).unwrap_or(rate);
            match SampleRateBridge::new(hw_rate, app_rate, rx.stream.max_block_samples()) {
                Ok(bridge) => Ok((hw_rate, bridge)),
                Err(e) => {
                    // Put the hardware back where the pipeline expects it.
                    if let Err(restore) =
                        device.set_sample_rate(Direction::Rx, channel, rx.hw_rate)
                    {
                        warn!("RX{} could not restore sample rate: {}", channel, restore);
                    }
                    Err(e)
                }
            }
        })();

        let changed = match result {
            Ok((hw_rate, bridge)) => {
                let output_rate = bridge.output_rate(hw_rate);
                let dc_blocker = self.dc_blocker_for(output_rate);
                let rx = self.receiver_mut(channel)?;
                if let Some(pipeline) = rx.pipeline.as_mut() {
                    pipeline.bridge = bridge;
                    pipeline.dc_blocker = dc_blocker;
                }
                rx.hw_rate = hw_rate;
                rx.output_rate = output_rate;
                if let Some(outcome) = rx.tuning.reapply(device.as_ref(), hw_rate) {
                    if outcome.retuned && drop_blocks > 0 {
                        rx.shared.arm_drop(drop_blocks);
                    }
                }
                info!("RX{} sample rate {:.0} Hz", channel, hw_rate);
                Ok(())
            }
            Err(e) => {
                warn!("RX{} sample rate change failed: {}", channel, e);
                Err(e)
            }
        };

        if was_running {
            let output_rate = self.receiver(channel)?.output_rate;
            let heartbeat = self.heartbeat_for(channel, output_rate);
            self.receiver_mut(channel)?.start(heartbeat, timeout)?;
        }
        changed
    }

    pub fn rx_output_rate(&self, channel: usize) -> SdrResult<f64> {
        Ok(self.receiver(channel)?.output_rate)
    }

    /// Returns the gain written, or `None` if the driver rejected it.
    pub fn set_rx_gain(&mut self, channel: usize, db: f64) -> SdrResult<Option<f64>> {
        let rx = self.receiver(channel)?;
        Ok(rx.gain.report("gain", rx.gain.set_gain(db)))
    }

    pub fn set_rx_gain_element(
        &mut self,
        channel: usize,
        name: &str,
        db: f64,
    ) -> SdrResult<Option<f64>> {
        let rx = self.receiver(channel)?;
        Ok(rx
            .gain
            .report(&format!("gain element {name}"), rx.gain.set_gain_element(name, db)))
    }

    pub fn set_rx_attenuation(&mut self, channel: usize, db: f64) -> SdrResult<Option<f64>> {
        let rx = self.receiver(channel)?;
        Ok(rx.gain.report("attenuation", rx.gain.set_attenuation(db)))
    }

    /// Returns whether hardware AGC accepted the mode.
    pub fn set_automatic_gain(&mut self, channel: usize, automatic: bool) -> SdrResult<bool> {
        let rx = self.receiver(channel)?;
        Ok(rx
            .gain
            .report("automatic gain", rx.gain.set_automatic(automatic))
            .is_some())
    }

    pub fn reset_dc_blocker(&self, channel: usize) -> SdrResult<()> {
        let rx = self.receiver(channel)?;
        rx.shared.request_dc_reset();
        Ok(())
    }

    pub fn rx_stats(&self, channel: usize) -> SdrResult<RxStatsSnapshot> {
        Ok(self.receiver(channel)?.shared.stats())
    }

    // ---- transmitter ----

    /// Install the transmit chain paced by the heartbeat receiver. A
    /// running heartbeat receiver is restarted to pick it up.
    pub fn set_tx_chain(&mut self, chain: Arc<dyn TxChain>) -> SdrResult<()> {
        self.tx_chain = Some(chain);
        let channel = self.config.tx.heartbeat_channel;
        if self.is_receiving(channel) {
            self.stop_receiver(channel)?;
            self.start_receiver(channel)?;
        }
        Ok(())
    }

    pub fn create_transmitter(&mut self, channel: usize) -> SdrResult<TxIqWriter> {
        let device = self.handle.device().clone();
        if channel >= device.num_channels(Direction::Tx) {
            return Err(SdrError::UnknownChannel {
                direction: Direction::Tx,
                channel,
            });
        }
        if let Some(tx) = &self.transmitter {
            return Err(SdrError::ChannelInUse {
                direction: Direction::Tx,
                channel: tx.channel,
            });
        }

        let cfg = &self.config.tx;
        let mut stream = TxStreamManager::new(channel);
        stream.create(
            device.as_ref(),
            &StreamParams {
                sample_rate: cfg.sample_rate,
                bandwidth: cfg.bandwidth,
                fft_block_size: cfg.fft_block_size,
            },
        )?;
        let hw_rate = device
            .sample_rate(Direction::Tx, channel)
            .unwrap_or(cfg.sample_rate);
        if hw_rate != cfg.sample_rate {
            info!(
                "TX{} runs at {:.0} Hz (requested {:.0} Hz)",
                channel, hw_rate, cfg.sample_rate
            );
        }
        let output = TxOutput::new(
            channel,
            stream.max_block_samples(),
            Duration::from_millis(cfg.write_timeout_ms),
        );
        let writer = TxIqWriter::new(output.clone());
        self.transmitter = Some(Transmitter {
            channel,
            hw_rate,
            stream,
            tuning: TuningController::new(Direction::Tx, channel, &self.config.tuning),
            gain: GainController::new(device, Direction::Tx, channel, self.config.gain),
            output,
        });
        info!("TX{} created", channel);
        Ok(writer)
    }

    pub fn start_transmitter(&mut self) -> SdrResult<()> {
        let tx = self.transmitter_mut()?;
        if tx.stream.state().is_active() {
            return Ok(());
        }
        tx.stream.activate()?;
        let stream = tx.stream.take()?;
        tx.output.install(stream);
        info!("TX{} started", tx.channel);
        Ok(())
    }

    pub fn stop_transmitter(&mut self) -> SdrResult<()> {
        let tx = self.transmitter_mut()?;
        tx.stop()?;
        info!("TX{} stopped", tx.channel);
        Ok(())
    }

    pub fn destroy_transmitter(&mut self) -> SdrResult<()> {
        let mut tx = self.transmitter.take().ok_or(SdrError::NotCreated {
            direction: Direction::Tx,
            channel: 0,
        })?;
        let stopped = tx.stop();
        tx.stream.destroy()?;
        info!("TX{} destroyed", tx.channel);
        stopped
    }

    pub fn tx_writer(&self) -> Option<TxIqWriter> {
        self.transmitter
            .as_ref()
            .map(|tx| TxIqWriter::new(tx.output.clone()))
    }

    pub fn set_tx_frequency(&mut self, hz: f64) -> SdrResult<()> {
        let device = self.handle.device().clone();
        let tx = self.transmitter_mut()?;
        tx.tuning.apply(device.as_ref(), hz, tx.hw_rate);
        Ok(())
    }

    pub fn tx_tuning(&self) -> Option<TuningState> {
        self.transmitter.as_ref().map(|tx| tx.tuning.state())
    }

    pub fn set_tx_gain(&mut self, db: f64) -> SdrResult<Option<f64>> {
        let tx = self.transmitter_mut()?;
        Ok(tx.gain.report("gain", tx.gain.set_gain(db)))
    }

    pub fn set_tx_gain_element(&mut self, name: &str, db: f64) -> SdrResult<Option<f64>> {
        let tx = self.transmitter_mut()?;
        Ok(tx
            .gain
            .report(&format!("gain element {name}"), tx.gain.set_gain_element(name, db)))
    }

    // ---- device ----

    /// Write a vendor setting. Failures are logged; returns whether the
    /// driver accepted it.
    pub fn write_setting(&self, key: &str, value: &str) -> bool {
        match self.handle.device().write_setting(key, value) {
            Ok(()) => {
                debug!("setting {}={}", key, value);
                true
            }
            Err(e) => {
                warn!("setting {}={} rejected: {}", key, value, e);
                false
            }
        }
    }

    pub fn read_setting(&self, key: &str) -> SdrResult<String> {
        self.handle.device().read_setting(key)
    }

    /// Stop every worker, tear down every stream and release the device.
    pub fn close(self) {}

    fn shutdown(&mut self) {
        let channels: Vec<usize> = self.receivers.keys().copied().collect();
        for channel in channels {
            if let Err(e) = self.destroy_receiver(channel) {
                warn!("RX{} teardown: {}", channel, e);
            }
        }
        if self.transmitter.is_some() {
            if let Err(e) = self.destroy_transmitter() {
                warn!("TX teardown: {}", e);
            }
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.shutdown();
        info!("Closed {} device", self.handle.device().driver_key());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdrx_core::device::dummy::{calls, DummyConfig, DummyFactory};

    fn opener() -> (Arc<DummyFactory>, DeviceOpener) {
        let factory = Arc::new(DummyFactory::default());
        (factory.clone(), DeviceOpener::new(factory))
    }

    fn null_sink() -> Box<dyn IqSink> {
        Box::new(|_s: sdrx_core::IqSample| {})
    }

    #[test]
    fn second_open_is_busy_until_first_is_dropped() {
        let (_factory, opener) = opener();
        let first = opener.open("").unwrap();
        assert!(opener.is_open());
        assert!(matches!(opener.open(""), Err(SdrError::DeviceBusy)));
        drop(first);
        assert!(!opener.is_open());
        assert!(opener.open("").is_ok());
    }

    #[test]
    fn failed_open_releases_opener() {
        let opener = DeviceOpener::new(Arc::new(DummyFactory::failing()));
        let err = DeviceSession::open(&opener, "driver=dummy", SessionConfig::default())
            .err()
            .unwrap();
        assert!(err.is_fatal());
        assert!(!opener.is_open());
    }

    #[test]
    fn settings_are_written_on_open() {
        let (factory, opener) = opener();
        let mut config = SessionConfig::default();
        config
            .settings
            .insert("CALIBRATE".to_string(), "true".to_string());
        let session = DeviceSession::open(&opener, "", config).unwrap();
        let dev = factory.last_opened().unwrap();
        assert_eq!(dev.setting("CALIBRATE").as_deref(), Some("true"));
        assert_eq!(session.read_setting("CALIBRATE").unwrap(), "true");
    }

    #[test]
    fn receiver_channel_checks() {
        let (_factory, opener) = opener();
        let mut session = DeviceSession::open(&opener, "", SessionConfig::default()).unwrap();
        assert!(matches!(
            session.create_receiver(5, null_sink()),
            Err(SdrError::UnknownChannel { .. })
        ));
        session.create_receiver(0, null_sink()).unwrap();
        assert!(matches!(
            session.create_receiver(0, null_sink()),
            Err(SdrError::ChannelInUse { .. })
        ));
        assert!(matches!(
            session.start_receiver(1),
            Err(SdrError::NotCreated { .. })
        ));
    }

    #[test]
    fn stream_setup_failure_is_fatal() {
        let (factory, opener) = opener();
        let mut session = DeviceSession::open(&opener, "", SessionConfig::default()).unwrap();
        factory.last_opened().unwrap().fail_call(calls::SETUP_STREAM);
        let err = session.create_receiver(0, null_sink()).unwrap_err();
        assert!(err.is_fatal());
        assert!(session.receivers().is_empty());
    }

    #[test]
    fn rejected_setting_is_not_fatal() {
        let (factory, opener) = opener();
        let session = DeviceSession::open(&opener, "", SessionConfig::default()).unwrap();
        factory.last_opened().unwrap().fail_call(calls::WRITE_SETTING);
        assert!(!session.write_setting("LNA_PATH", "LNAH"));
    }

    #[test]
    fn session_drop_releases_device() {
        let (_factory, opener) = opener();
        {
            let mut session =
                DeviceSession::open(&opener, "", SessionConfig::default()).unwrap();
            session.create_receiver(0, null_sink()).unwrap();
            session.start_receiver(0).unwrap();
        }
        assert!(!opener.is_open());
    }

    #[test]
    fn tx_tuning_follows_the_rate_the_driver_accepted() {
        let factory = Arc::new(DummyFactory::new(DummyConfig {
            sample_rate_step_hz: 100_000.0,
            ..DummyConfig::default()
        }));
        let opener = DeviceOpener::new(factory.clone());
        let mut session = DeviceSession::open(&opener, "", SessionConfig::default()).unwrap();
        session.create_transmitter(0).unwrap();
        let dev = factory.last_opened().unwrap();
        assert_eq!(dev.sample_rate(Direction::Tx, 0).unwrap(), 700_000.0);

        session.set_tx_frequency(14_074_000.0).unwrap();
        let state = session.tx_tuning().unwrap();
        assert!((state.bb_hz - 0.26 * 700_000.0).abs() < 1e-6);
        assert!((state.lo_hz + state.bb_hz - 14_074_000.0).abs() < 1e-6);

        // 325 kHz from the LO is inside 0.45 * 768 kHz but past 0.45 * 700 kHz.
        session.set_tx_frequency(state.lo_hz + 325_000.0).unwrap();
        let state = session.tx_tuning().unwrap();
        assert!(state.bb_hz.abs() <= 0.45 * 700_000.0);
        assert!((state.bb_hz - 0.26 * 700_000.0).abs() < 1e-6);
    }

    #[test]
    fn invalid_config_is_rejected_before_open() {
        let (factory, opener) = opener();
        let mut config = SessionConfig::default();
        config.rx.fft_block_size = 0;
        assert!(matches!(
            DeviceSession::open(&opener, "", config),
            Err(SdrError::InvalidConfig(_))
        ));
        assert!(factory.last_opened().is_none());
    }
}
