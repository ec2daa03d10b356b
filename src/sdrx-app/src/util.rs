// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

/// Normalize a driver name to lowercase alphanumeric, so `SoapySDR`,
/// `soapy-sdr` and `soapysdr` from the config file or `--driver` all select
/// the same registry entry.
pub fn normalize_name(name: &str) -> String {
    name.to_ascii_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}
