// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared helpers for date/time formatting.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

/// Format a UTC timestamp as RFC3339 using a `Z` suffix.
pub fn format_utc_rfc3339(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Build a UTC timestamp from a seconds/nanos pair, clamping out-of-range
/// values to the epoch.
pub fn from_seconds_nanos(seconds: i64, nanos: u32) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds, nanos.min(999_999_999))
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
