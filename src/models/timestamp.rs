// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Stored creation timestamps and their normalization.
//!
//! A `createdAt` value can come back from the remote store (or from the local
//! cache) in several shapes. Every read normalizes it to a single
//! `DateTime<Utc>` via [`StoredTimestamp::normalize`].

use crate::time_utils::from_seconds_nanos;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp assigned by the remote store at write time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerTimestamp {
    pub seconds: i64,
    #[serde(default)]
    pub nanos: u32,
}

impl ServerTimestamp {
    pub fn from_datetime(date: DateTime<Utc>) -> Self {
        Self {
            seconds: date.timestamp(),
            nanos: date.timestamp_subsec_nanos(),
        }
    }

    pub fn to_datetime(self) -> DateTime<Utc> {
        from_seconds_nanos(self.seconds, self.nanos)
    }
}

/// The representations a stored `createdAt` may take.
///
/// Serialized untagged so that each shape round-trips through JSON as-is:
/// `{"__serverTimestamp": {...}}`, `{"seconds": .., "nanoseconds": ..}`, an
/// RFC3339 string, or `null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum StoredTimestamp {
    Server {
        #[serde(rename = "__serverTimestamp")]
        server: ServerTimestamp,
    },
    SecondsPair {
        seconds: i64,
        #[serde(default)]
        nanoseconds: u32,
    },
    Native(DateTime<Utc>),
    #[default]
    Absent,
}

impl StoredTimestamp {
    pub fn server(date: DateTime<Utc>) -> Self {
        StoredTimestamp::Server {
            server: ServerTimestamp::from_datetime(date),
        }
    }

    /// Normalize to a single in-memory representation.
    ///
    /// Pure: the same stored value and `now` always give the same result.
    /// `now` only matters for [`StoredTimestamp::Absent`].
    pub fn normalize(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            StoredTimestamp::Absent => now,
            StoredTimestamp::Server { server } => server.to_datetime(),
            StoredTimestamp::SecondsPair {
                seconds,
                nanoseconds,
            } => {
                // seconds * 1000 as milliseconds; sub-second part kept at ms precision
                seconds
                    .checked_mul(1000)
                    .and_then(|ms| ms.checked_add(i64::from(nanoseconds / 1_000_000)))
                    .and_then(DateTime::<Utc>::from_timestamp_millis)
                    .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
            }
            StoredTimestamp::Native(date) => *date,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn absent_becomes_now() {
        assert_eq!(StoredTimestamp::Absent.normalize(now()), now());
    }

    #[test]
    fn seconds_pair_uses_seconds_times_thousand() {
        let stored = StoredTimestamp::SecondsPair {
            seconds: 1_700_000_000,
            nanoseconds: 0,
        };
        assert_eq!(
            stored.normalize(now()).timestamp_millis(),
            1_700_000_000_000
        );
    }

    #[test]
    fn out_of_range_seconds_fall_back_to_epoch() {
        for seconds in [i64::MAX, i64::MIN, i64::MAX / 1000] {
            let stored = StoredTimestamp::SecondsPair {
                seconds,
                nanoseconds: 999_000_000,
            };
            assert_eq!(stored.normalize(now()), DateTime::<Utc>::UNIX_EPOCH);
        }
    }

    #[test]
    fn server_and_native_agree() {
        let date = Utc.with_ymd_and_hms(2024, 6, 2, 8, 30, 15).unwrap();
        assert_eq!(StoredTimestamp::server(date).normalize(now()), date);
        assert_eq!(StoredTimestamp::Native(date).normalize(now()), date);
    }

    #[test]
    fn deserializes_every_shape() {
        let server: StoredTimestamp =
            serde_json::from_str(r#"{"__serverTimestamp":{"seconds":10,"nanos":5}}"#).unwrap();
        assert!(matches!(server, StoredTimestamp::Server { .. }));

        let pair: StoredTimestamp =
            serde_json::from_str(r#"{"seconds":10,"nanoseconds":0}"#).unwrap();
        assert!(matches!(pair, StoredTimestamp::SecondsPair { seconds: 10, .. }));

        let native: StoredTimestamp = serde_json::from_str(r#""2024-01-15T10:00:00Z""#).unwrap();
        assert!(matches!(native, StoredTimestamp::Native(_)));

        let absent: StoredTimestamp = serde_json::from_str("null").unwrap();
        assert_eq!(absent, StoredTimestamp::Absent);
    }
}
