// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::fmt::Display;

use thiserror::Error;

use super::stream::{StreamEvent, StreamState};
use super::Direction;

pub type SdrResult<T> = Result<T, SdrError>;

/// Errors surfaced by the device layer.
#[derive(Debug, Clone, Error)]
pub enum SdrError {
    #[error("failed to open device (args={args:?}): {reason}")]
    DeviceOpen { args: String, reason: String },

    #[error("a device handle is already open")]
    DeviceBusy,

    #[error("failed to set up {direction} stream on channel {channel}: {reason}")]
    StreamSetup {
        direction: Direction,
        channel: usize,
        reason: String,
    },

    #[error("{direction} stream on channel {channel}: cannot {event} while {from}")]
    InvalidTransition {
        direction: Direction,
        channel: usize,
        from: StreamState,
        event: StreamEvent,
    },

    #[error("{direction} channel {channel} is already in use")]
    ChannelInUse { direction: Direction, channel: usize },

    #[error("{direction} channel {channel} does not exist")]
    UnknownChannel { direction: Direction, channel: usize },

    #[error("no {direction} stream has been created on channel {channel}")]
    NotCreated { direction: Direction, channel: usize },

    #[error("unsupported rate conversion {hw_rate} Hz -> {app_rate} Hz")]
    UnsupportedRate { hw_rate: u32, app_rate: u32 },

    #[error("driver call {call} failed: {reason}")]
    Driver { call: &'static str, reason: String },

    #[error("failed to spawn worker thread: {0}")]
    ThreadSpawn(String),

    #[error("{direction} worker on channel {channel} panicked")]
    WorkerPanicked { direction: Direction, channel: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SdrError {
    pub fn driver(call: &'static str, reason: impl Display) -> Self {
        Self::Driver {
            call,
            reason: reason.to_string(),
        }
    }

    /// Fatal errors leave no valid hardware channel to retry on and must
    /// terminate session initialisation.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DeviceOpen { .. } | Self::StreamSetup { .. } | Self::ThreadSpawn(_)
        )
    }
}

/// Outcome of a failed stream read or write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("stream timeout")]
    Timeout,
    #[error("stream overflow")]
    Overflow,
    #[error("stream underflow")]
    Underflow,
    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_and_setup_failures_are_fatal() {
        let open = SdrError::DeviceOpen {
            args: "driver=lime".into(),
            reason: "no device".into(),
        };
        let setup = SdrError::StreamSetup {
            direction: Direction::Rx,
            channel: 0,
            reason: "busy".into(),
        };
        assert!(open.is_fatal());
        assert!(setup.is_fatal());
        assert!(!SdrError::driver("set_gain", "out of range").is_fatal());
        assert!(!SdrError::DeviceBusy.is_fatal());
    }

    #[test]
    fn messages_name_direction_and_channel() {
        let err = SdrError::ChannelInUse {
            direction: Direction::Tx,
            channel: 1,
        };
        assert_eq!(err.to_string(), "TX channel 1 is already in use");
    }
}
