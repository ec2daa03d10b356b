// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Sample streaming and tuning core for SDR hardware.
//!
//! A [`DeviceSession`] owns one opened radio. Each started receiver runs its
//! own acquisition thread that reads hardware blocks, converts them to the
//! application rate, strips DC and hands samples to an [`IqSink`]. The same
//! flow paces the transmit chain through a [`TxHeartbeatPacer`].

pub mod config;
pub mod dsp;
pub mod gain;
pub mod heartbeat;
pub mod rx_loop;
pub mod session;
pub mod sink;
#[cfg(feature = "soapysdr-sys")]
pub mod soapy;
pub mod stream;
pub mod tuning;
pub mod tx;

pub use config::{DcBlockerConfig, RxStreamConfig, SessionConfig, TxStreamConfig};
pub use dsp::{DcBlocker, SampleRateBridge};
pub use gain::{GainController, GainLimits};
pub use heartbeat::{TxHeartbeatPacer, MIC_SAMPLE_RATE};
pub use rx_loop::{RxShared, RxStatsSnapshot, RxWorker};
pub use session::{DeviceHandle, DeviceOpener, DeviceSession};
pub use sink::{BroadcastIqSink, IqSink, TxChain};
pub use stream::{RxStreamManager, StreamManager, StreamParams, TxStreamManager};
pub use tuning::{compute_tuning, TuningConfig, TuningController, TuningState, TuningWindow};
pub use tx::TxIqWriter;
