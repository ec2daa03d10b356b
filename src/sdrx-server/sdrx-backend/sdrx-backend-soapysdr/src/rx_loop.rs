// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! One dedicated OS thread per active receiver.
//!
//! The worker owns everything it touches per block (stream, bridge, DC
//! blocker, sink, heartbeat pacer) and hands it all back from the thread's
//! join. The control thread shares only [`RxShared`]: the running flag, the
//! drop counter and a few statistics counters, all atomics.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use sdrx_core::{Direction, IqSample, RxStream, SdrError, SdrResult, StreamError};

use crate::dsp::{DcBlocker, SampleRateBridge};
use crate::heartbeat::TxHeartbeatPacer;
use crate::sink::{IqSink, TxChain};

/// Pause after a non-timeout read error before trying again.
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
pub struct RxStats {
    blocks_read: AtomicU64,
    blocks_withheld: AtomicU64,
    samples_delivered: AtomicU64,
    heartbeat_ticks: AtomicU64,
    timeouts: AtomicU64,
    overflows: AtomicU64,
    read_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RxStatsSnapshot {
    pub blocks_read: u64,
    pub blocks_withheld: u64,
    pub samples_delivered: u64,
    pub heartbeat_ticks: u64,
    pub timeouts: u64,
    pub overflows: u64,
    pub read_errors: u64,
}

impl RxStats {
    pub fn snapshot(&self) -> RxStatsSnapshot {
        RxStatsSnapshot {
            blocks_read: self.blocks_read.load(Ordering::Relaxed),
            blocks_withheld: self.blocks_withheld.load(Ordering::Relaxed),
            samples_delivered: self.samples_delivered.load(Ordering::Relaxed),
            heartbeat_ticks: self.heartbeat_ticks.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

/// State shared between the control thread and one acquisition thread.
#[derive(Debug, Default)]
pub struct RxShared {
    running: AtomicBool,
    drop_counter: AtomicU32,
    dc_reset: AtomicBool,
    stats: RxStats,
}

impl RxShared {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Withhold the next `blocks` blocks from the sink. Replaces any count
    /// still pending.
    pub fn arm_drop(&self, blocks: u32) {
        self.drop_counter.store(blocks, Ordering::Release);
    }

    pub fn pending_drop(&self) -> u32 {
        self.drop_counter.load(Ordering::Acquire)
    }

    /// Clear DC blocker memory before the next block.
    pub fn request_dc_reset(&self) {
        self.dc_reset.store(true, Ordering::Release);
    }

    pub fn stats(&self) -> RxStatsSnapshot {
        self.stats.snapshot()
    }

    /// Decrement-if-positive. True when this block must be withheld.
    fn take_drop(&self) -> bool {
        self.drop_counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Per-receiver processing state that survives worker restarts.
pub struct RxPipeline {
    pub bridge: SampleRateBridge,
    pub dc_blocker: Option<DcBlocker>,
    pub sink: Box<dyn IqSink>,
    pub buffer: Vec<IqSample>,
}

/// Everything moved onto the acquisition thread.
pub struct RxParts {
    pub stream: Box<dyn RxStream>,
    pub pipeline: RxPipeline,
    pub heartbeat: Option<(TxHeartbeatPacer, Arc<dyn TxChain>)>,
}

pub struct RxWorker {
    channel: usize,
    shared: Arc<RxShared>,
    handle: JoinHandle<RxParts>,
}

impl RxWorker {
    /// Start the acquisition thread. The stream in `parts` must already be
    /// activated.
    pub fn spawn(
        channel: usize,
        parts: RxParts,
        shared: Arc<RxShared>,
        read_timeout: Duration,
    ) -> SdrResult<Self> {
        shared.running.store(true, Ordering::Release);
        let thread_shared = shared.clone();
        let handle = std::thread::Builder::new()
            .name(format!("sdrx-rx{channel}"))
            .spawn(move || acquisition_loop(channel, parts, thread_shared, read_timeout))
            .map_err(|e| {
                shared.running.store(false, Ordering::Release);
                SdrError::ThreadSpawn(e.to_string())
            })?;
        Ok(Self {
            channel,
            shared,
            handle,
        })
    }

    pub fn channel(&self) -> usize {
        self.channel
    }

    /// Clear the running flag and join. Returns within about one read
    /// timeout plus one block of processing.
    pub fn stop(self) -> SdrResult<RxParts> {
        self.shared.running.store(false, Ordering::Release);
        self.handle.join().map_err(|_| SdrError::WorkerPanicked {
            direction: Direction::Rx,
            channel: self.channel,
        })
    }
}

fn acquisition_loop(
    channel: usize,
    mut parts: RxParts,
    shared: Arc<RxShared>,
    read_timeout: Duration,
) -> RxParts {
    let stats = &shared.stats;
    debug!("RX{} acquisition started", channel);

    while shared.running.load(Ordering::Acquire) {
        let RxParts {
            stream,
            pipeline,
            heartbeat,
        } = &mut parts;

        let n = match stream.read(&mut pipeline.buffer, read_timeout) {
            Ok(0) => continue,
            Ok(n) => n,
            Err(StreamError::Timeout) => {
                RxStats::bump(&stats.timeouts, 1);
                continue;
            }
            Err(StreamError::Overflow) => {
                RxStats::bump(&stats.overflows, 1);
                debug!("RX{} overflow", channel);
                continue;
            }
            Err(e) => {
                RxStats::bump(&stats.read_errors, 1);
                warn!("RX{} stream read error: {}; retrying", channel, e);
                std::thread::sleep(READ_ERROR_BACKOFF);
                continue;
            }
        };
        RxStats::bump(&stats.blocks_read, 1);

        if shared.dc_reset.swap(false, Ordering::AcqRel) {
            if let Some(dc) = pipeline.dc_blocker.as_mut() {
                dc.reset();
            }
        }

        let n = n.min(pipeline.buffer.len());
        let block = pipeline.bridge.convert(&mut pipeline.buffer[..n]);
        if let Some(dc) = pipeline.dc_blocker.as_mut() {
            dc.apply(block);
        }

        let mut ticks = 0u64;
        if shared.take_drop() {
            // Transient after an LO move: keep the heartbeat, drop the data.
            if let Some((pacer, chain)) = heartbeat.as_mut() {
                for _ in 0..block.len() {
                    if pacer.step() {
                        chain.consume_mic_sample();
                        ticks += 1;
                    }
                }
            }
            RxStats::bump(&stats.blocks_withheld, 1);
        } else {
            for &sample in block.iter() {
                pipeline.sink.add_iq_sample(sample);
                if let Some((pacer, chain)) = heartbeat.as_mut() {
                    if pacer.step() {
                        chain.consume_mic_sample();
                        ticks += 1;
                    }
                }
            }
            RxStats::bump(&stats.samples_delivered, block.len() as u64);
        }
        if ticks > 0 {
            RxStats::bump(&stats.heartbeat_ticks, ticks);
        }
    }

    debug!("RX{} acquisition stopped", channel);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex;
    use std::sync::Mutex;
    use std::time::Instant;

    use sdrx_core::device::dummy::DummyDevice;
    use sdrx_core::SdrDevice;

    use crate::heartbeat::MIC_SAMPLE_RATE;

    fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    fn parts(dev: &DummyDevice, sink: Box<dyn IqSink>) -> RxParts {
        let mut stream = dev.setup_rx_stream(0).unwrap();
        stream.activate().unwrap();
        RxParts {
            stream,
            pipeline: RxPipeline {
                bridge: SampleRateBridge::Passthrough,
                dc_blocker: None,
                sink,
                buffer: vec![Complex::new(0.0, 0.0); 256],
            },
            heartbeat: None,
        }
    }

    #[test]
    fn take_drop_counts_down_to_zero() {
        let shared = RxShared::new();
        shared.arm_drop(2);
        assert!(shared.take_drop());
        assert!(shared.take_drop());
        assert!(!shared.take_drop());
        assert_eq!(shared.pending_drop(), 0);
    }

    #[test]
    fn delivers_samples_until_stopped() {
        let dev = DummyDevice::default();
        let count = Arc::new(AtomicU64::new(0));
        let sink_count = count.clone();
        let sink = Box::new(move |_s: IqSample| {
            sink_count.fetch_add(1, Ordering::Relaxed);
        });
        let shared = RxShared::new();
        let worker = RxWorker::spawn(
            0,
            parts(&dev, sink),
            shared.clone(),
            Duration::from_millis(100),
        )
        .unwrap();
        assert!(wait_for(Duration::from_secs(2), || count.load(Ordering::Relaxed) >= 1024));
        let parts = worker.stop().unwrap();
        assert!(!shared.is_running());

        let delivered = count.load(Ordering::Relaxed);
        assert_eq!(delivered, shared.stats().samples_delivered);
        assert_eq!(delivered % 256, 0);
        // Nothing is delivered once join returned.
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(count.load(Ordering::Relaxed), delivered);
        drop(parts);
    }

    #[test]
    fn timeouts_and_errors_do_not_stop_the_loop() {
        let dev = DummyDevice::default();
        dev.inject_timeouts(3);
        dev.inject_read_errors(2);
        let shared = RxShared::new();
        let worker = RxWorker::spawn(
            0,
            parts(&dev, Box::new(|_s: IqSample| {})),
            shared.clone(),
            Duration::from_millis(5),
        )
        .unwrap();
        assert!(wait_for(Duration::from_secs(2), || shared.stats().blocks_read >= 4));
        worker.stop().unwrap();
        let stats = shared.stats();
        assert_eq!(stats.timeouts, 3);
        assert_eq!(stats.read_errors, 2);
    }

    #[test]
    fn armed_blocks_are_withheld_but_heartbeat_continues() {
        let dev = DummyDevice::default();
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink_delivered = delivered.clone();
        let sink = Box::new(move |s: IqSample| {
            sink_delivered.lock().unwrap().push(s);
        });
        let ticks = Arc::new(AtomicU64::new(0));
        let chain_ticks = ticks.clone();
        let chain: Arc<dyn TxChain> = Arc::new(move || {
            chain_ticks.fetch_add(1, Ordering::Relaxed);
        });

        let mut parts = parts(&dev, sink);
        parts.heartbeat = Some((TxHeartbeatPacer::new(768_000.0, MIC_SAMPLE_RATE), chain));
        let shared = RxShared::new();
        shared.arm_drop(3);
        let worker =
            RxWorker::spawn(0, parts, shared.clone(), Duration::from_millis(100)).unwrap();
        assert!(wait_for(Duration::from_secs(2), || shared.stats().blocks_read >= 10));
        worker.stop().unwrap();

        let stats = shared.stats();
        assert_eq!(stats.blocks_withheld, 3);
        assert_eq!(
            stats.samples_delivered,
            (stats.blocks_read - 3) * 256
        );
        assert_eq!(delivered.lock().unwrap().len() as u64, stats.samples_delivered);
        // 256 samples per block at divisor 16.
        assert_eq!(ticks.load(Ordering::Relaxed), stats.blocks_read * 16);
        assert_eq!(stats.heartbeat_ticks, stats.blocks_read * 16);
    }

    #[test]
    fn dc_reset_request_is_consumed() {
        let dev = DummyDevice::default();
        let shared = RxShared::new();
        let mut p = parts(&dev, Box::new(|_s: IqSample| {}));
        p.pipeline.dc_blocker = Some(DcBlocker::new(0.999));
        shared.request_dc_reset();
        let worker = RxWorker::spawn(0, p, shared.clone(), Duration::from_millis(100)).unwrap();
        assert!(wait_for(Duration::from_secs(2), || shared.stats().blocks_read >= 1));
        worker.stop().unwrap();
        assert!(!shared.dc_reset.load(Ordering::Acquire));
    }
}
