// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod device;

pub type DynResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub use device::error::{SdrError, SdrResult, StreamError};
pub use device::stream::{StreamEvent, StreamLifecycle, StreamState};
pub use device::{
    DeviceFactory, Direction, IqSample, RxStream, SdrDevice, TxStream, COMPONENT_BB, COMPONENT_RF,
};
