//! Consumer Group Naming
//!
//! Two schemes are supported:
//!
//! - **Stable** (`{stream}_consumer`): one long-lived cursor per logical
//!   reader. Restarts resume where the previous run stopped.
//! - **Per-run** (`{stream}_{unix_seconds}`): a fresh group per process
//!   start. Every run replays the stream from its first retained entry and
//!   never collides with another run's cursor.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::stream_key::StreamKey;

/// Suffix used by stable group names.
pub const STABLE_SUFFIX: &str = "consumer";

/// Group naming scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupNaming {
    /// `{stream}_consumer`.
    #[default]
    Stable,
    /// `{stream}_{unix_seconds}` of the reader's start time.
    PerRun,
}

impl GroupNaming {
    /// Name the group for a stream read by a reader started at
    /// `started_at`. The same inputs always give the same name.
    #[must_use]
    pub fn name_for(self, key: &StreamKey, started_at: DateTime<Utc>) -> GroupName {
        match self {
            Self::Stable => GroupName::stable(key),
            Self::PerRun => GroupName::per_run(key, started_at),
        }
    }

    /// Wire label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::PerRun => "per_run",
        }
    }
}

impl FromStr for GroupNaming {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "stable" => Ok(Self::Stable),
            "per_run" | "timestamped" => Ok(Self::PerRun),
            other => Err(format!("unknown group naming scheme: {other}")),
        }
    }
}

/// Consumer group name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupName(String);

impl GroupName {
    /// `{stream}_consumer`.
    #[must_use]
    pub fn stable(key: &StreamKey) -> Self {
        Self(format!("{key}_{STABLE_SUFFIX}"))
    }

    /// `{stream}_{unix_seconds}`.
    #[must_use]
    pub fn per_run(key: &StreamKey, at: DateTime<Utc>) -> Self {
        Self(format!("{key}_{}", at.timestamp()))
    }

    /// Caller-chosen name.
    #[must_use]
    pub fn custom(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Name as sent to the broker.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for GroupName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Consumer name unique to this process, e.g. `relay-3f2a9c1e`.
#[must_use]
pub fn unique_consumer_name(prefix: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &id[..8])
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::domain::stream_key::{Blockchain, DataType, Marketplace, StreamName};

    fn key() -> StreamKey {
        StreamKey::new(
            DataType::Raw,
            Marketplace::Hyperliquid,
            Blockchain::Hyperliquid,
            StreamName::Prices,
        )
    }

    #[test]
    fn stable_name_uses_consumer_suffix() {
        assert_eq!(
            GroupName::stable(&key()).as_str(),
            "raw-hyperliquid-hyperliquid-prices_consumer"
        );
    }

    #[test]
    fn per_run_name_uses_unix_seconds() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(
            GroupName::per_run(&key(), at).as_str(),
            "raw-hyperliquid-hyperliquid-prices_1704164645"
        );
    }

    #[test]
    fn stable_naming_ignores_start_time() {
        let earlier = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(
            GroupNaming::Stable.name_for(&key(), earlier),
            GroupNaming::Stable.name_for(&key(), later)
        );
    }

    #[test]
    fn per_run_naming_is_fixed_by_start_time() {
        let started_at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let first = GroupNaming::PerRun.name_for(&key(), started_at);

        std::thread::sleep(std::time::Duration::from_millis(1100));

        assert_eq!(first, GroupNaming::PerRun.name_for(&key(), started_at));
        assert_eq!(first, GroupName::per_run(&key(), started_at));
    }

    #[test]
    fn naming_parses_aliases() {
        assert_eq!("stable".parse::<GroupNaming>(), Ok(GroupNaming::Stable));
        assert_eq!("Per-Run".parse::<GroupNaming>(), Ok(GroupNaming::PerRun));
        assert_eq!("timestamped".parse::<GroupNaming>(), Ok(GroupNaming::PerRun));
        assert!("random".parse::<GroupNaming>().is_err());
    }

    #[test]
    fn consumer_names_are_unique() {
        let a = unique_consumer_name("relay");
        let b = unique_consumer_name("relay");

        assert!(a.starts_with("relay-"));
        assert_eq!(a.len(), "relay-".len() + 8);
        assert_ne!(a, b);
    }
}
