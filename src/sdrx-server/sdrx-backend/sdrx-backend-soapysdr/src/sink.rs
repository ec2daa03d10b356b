// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Consumers fed from the acquisition thread.

use std::sync::Arc;

use tokio::sync::broadcast;

use sdrx_core::IqSample;

/// Per-receiver consumer of conditioned IQ samples.
///
/// Called from the acquisition thread in arrival order; implementations
/// must not block for long.
pub trait IqSink: Send {
    fn add_iq_sample(&mut self, sample: IqSample);
}

impl<F> IqSink for F
where
    F: FnMut(IqSample) + Send,
{
    fn add_iq_sample(&mut self, sample: IqSample) {
        self(sample)
    }
}

/// Transmit-side consumer of heartbeat ticks.
pub trait TxChain: Send + Sync {
    /// One microphone-rate tick. Called on the acquisition thread.
    fn consume_mic_sample(&self);
}

impl<F> TxChain for F
where
    F: Fn() + Send + Sync,
{
    fn consume_mic_sample(&self) {
        self()
    }
}

/// Groups samples into fixed-size frames and broadcasts them.
///
/// Frames are dropped, not queued, when nobody is subscribed.
pub struct BroadcastIqSink {
    frame: Vec<IqSample>,
    frame_len: usize,
    tx: broadcast::Sender<Arc<[IqSample]>>,
}

impl BroadcastIqSink {
    pub fn new(frame_len: usize, capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        let frame_len = frame_len.max(1);
        Self {
            frame: Vec::with_capacity(frame_len),
            frame_len,
            tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<[IqSample]>> {
        self.tx.subscribe()
    }

    pub fn sender(&self) -> broadcast::Sender<Arc<[IqSample]>> {
        self.tx.clone()
    }
}

impl IqSink for BroadcastIqSink {
    fn add_iq_sample(&mut self, sample: IqSample) {
        self.frame.push(sample);
        if self.frame.len() >= self.frame_len {
            let frame: Arc<[IqSample]> = Arc::from(self.frame.as_slice());
            self.frame.clear();
            let _ = self.tx.send(frame);
        }
    }
}
