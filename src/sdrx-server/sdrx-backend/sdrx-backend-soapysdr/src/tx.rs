// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Transmit output path.
//!
//! The transmit chain produces IQ on whatever thread runs it (typically the
//! acquisition thread, via heartbeat ticks). [`TxIqWriter`] batches those
//! samples into MTU-sized blocks and writes them to the active TX stream.
//! It never blocks on the control thread: if the stream is being swapped
//! the sample is counted as dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, TryLockError};
use std::time::Duration;

use tracing::{debug, warn};

use sdrx_core::{IqSample, StreamError, TxStream};

/// Write attempts per block before the remainder is dropped.
const WRITE_ATTEMPTS: usize = 3;

struct TxOutputState {
    stream: Option<Box<dyn TxStream>>,
    buffer: Vec<IqSample>,
}

pub(crate) struct TxOutput {
    channel: usize,
    block_len: usize,
    timeout: Duration,
    state: Mutex<TxOutputState>,
    written: AtomicU64,
    dropped: AtomicU64,
}

impl TxOutput {
    pub(crate) fn new(channel: usize, block_len: usize, timeout: Duration) -> Arc<Self> {
        let block_len = block_len.max(1);
        Arc::new(Self {
            channel,
            block_len,
            timeout,
            state: Mutex::new(TxOutputState {
                stream: None,
                buffer: Vec::with_capacity(block_len),
            }),
            written: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        })
    }

    /// Hand an activated stream to the writer.
    pub(crate) fn install(&self, stream: Box<dyn TxStream>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.buffer.clear();
        state.stream = Some(stream);
    }

    /// Take the stream back, flushing whatever is buffered.
    pub(crate) fn uninstall(&self) -> Option<Box<dyn TxStream>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.buffer.is_empty() {
            self.flush(&mut state);
        }
        state.stream.take()
    }

    fn push(&self, samples: &[IqSample]) {
        let mut state = match self.state.try_lock() {
            Ok(state) => state,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
            Err(TryLockError::WouldBlock) => {
                self.dropped
                    .fetch_add(samples.len() as u64, Ordering::Relaxed);
                return;
            }
        };
        if state.stream.is_none() {
            self.dropped
                .fetch_add(samples.len() as u64, Ordering::Relaxed);
            return;
        }
        for &sample in samples {
            state.buffer.push(sample);
            if state.buffer.len() >= self.block_len {
                self.flush(&mut state);
            }
        }
    }

    fn flush(&self, state: &mut TxOutputState) {
        let TxOutputState { stream, buffer } = state;
        let Some(stream) = stream.as_mut() else {
            self.dropped
                .fetch_add(buffer.len() as u64, Ordering::Relaxed);
            buffer.clear();
            return;
        };

        let mut offset = 0;
        let mut attempts = 0;
        while offset < buffer.len() && attempts < WRITE_ATTEMPTS {
            match stream.write(&buffer[offset..], self.timeout) {
                Ok(n) => {
                    offset += n;
                    attempts = if n == 0 { attempts + 1 } else { 0 };
                }
                Err(StreamError::Timeout | StreamError::Underflow) => {
                    debug!("TX{} write stalled", self.channel);
                    attempts += 1;
                }
                Err(e) => {
                    warn!("TX{} stream write error: {}", self.channel, e);
                    break;
                }
            }
        }
        let offset = offset.min(buffer.len());
        self.written.fetch_add(offset as u64, Ordering::Relaxed);
        self.dropped
            .fetch_add((buffer.len() - offset) as u64, Ordering::Relaxed);
        buffer.clear();
    }
}

/// Cloneable handle for feeding transmit IQ.
#[derive(Clone)]
pub struct TxIqWriter {
    output: Arc<TxOutput>,
}

impl TxIqWriter {
    pub(crate) fn new(output: Arc<TxOutput>) -> Self {
        Self { output }
    }

    pub fn push_sample(&self, sample: IqSample) {
        self.output.push(std::slice::from_ref(&sample));
    }

    pub fn push_block(&self, samples: &[IqSample]) {
        self.output.push(samples);
    }

    pub fn samples_written(&self) -> u64 {
        self.output.written.load(Ordering::Relaxed)
    }

    /// Samples discarded because the transmitter was stopped or stalled.
    pub fn samples_dropped(&self) -> u64 {
        self.output.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex;
    use sdrx_core::device::dummy::DummyDevice;
    use sdrx_core::SdrDevice;

    fn active_stream(dev: &DummyDevice) -> Box<dyn TxStream> {
        let mut stream = dev.setup_tx_stream(0).unwrap();
        stream.activate().unwrap();
        stream
    }

    #[test]
    fn samples_are_batched_into_blocks() {
        let dev = DummyDevice::default();
        let output = TxOutput::new(0, 100, Duration::from_millis(100));
        let writer = TxIqWriter::new(output.clone());
        output.install(active_stream(&dev));

        let block = vec![Complex::new(0.1, 0.0); 250];
        writer.push_block(&block);
        assert_eq!(dev.samples_written(), 200);
        assert_eq!(writer.samples_written(), 200);

        // Uninstall flushes the partial block.
        assert!(output.uninstall().is_some());
        assert_eq!(dev.samples_written(), 250);
        assert_eq!(writer.samples_dropped(), 0);
    }

    #[test]
    fn samples_without_stream_are_dropped() {
        let output = TxOutput::new(0, 16, Duration::from_millis(100));
        let writer = TxIqWriter::new(output);
        writer.push_sample(Complex::new(0.0, 1.0));
        writer.push_block(&[Complex::new(0.0, 0.0); 9]);
        assert_eq!(writer.samples_dropped(), 10);
        assert_eq!(writer.samples_written(), 0);
    }

    #[test]
    fn write_errors_drop_the_block() {
        let dev = DummyDevice::default();
        let output = TxOutput::new(0, 8, Duration::from_millis(100));
        let writer = TxIqWriter::new(output.clone());
        // Installed but never activated: every write fails.
        output.install(dev.setup_tx_stream(0).unwrap());
        writer.push_block(&[Complex::new(0.0, 0.0); 8]);
        assert_eq!(writer.samples_dropped(), 8);
        assert_eq!(dev.samples_written(), 0);
    }
}
