// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Per-block sample conditioning applied on the acquisition thread.

pub mod dc_blocker;
pub mod resampler;

pub use dc_blocker::DcBlocker;
pub use resampler::SampleRateBridge;
