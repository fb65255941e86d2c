// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Serde helpers for human friendly durations in configuration files.
//! A string of the form `[number]ms` or `[number]s` is accepted, for
//! example `"250ms"` or `"30s"`.

/// Deserialize a `Duration` from a `"30s"` / `"250ms"` style string.
pub mod duration_secs {
    use serde::{de, Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if let Some(millis) = s.strip_suffix("ms") {
            return millis
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| de::Error::custom(e.to_string()));
        }
        if let Some(seconds) = s.strip_suffix('s') {
            return seconds
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| de::Error::custom(e.to_string()));
        }
        Err(de::Error::custom(format!(
            "wrong duration format: {s}. Expected a number suffixed with ms or s, e.g. 30s"
        )))
    }
}
