use crate::error::DataError;
use chrono::{DateTime, TimeDelta};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, num::NonZeroU32, str::FromStr};

/// Aggregation period of a bar.
///
/// Parsed from chart resolution tokens: positive minute counts (`"1"`, `"15"`, `"60"`, ...) or
/// the daily token (`"1D"` / `"D"`). Sub-minute, weekly and monthly tokens are unsupported.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Resolution {
    Minutes(NonZeroU32),
    Daily,
}

impl Resolution {
    pub const ONE_MINUTE: Self = Self::Minutes(NonZeroU32::MIN);

    /// Start time (epoch ms) of the period immediately following the period starting at
    /// `bar_start_ms`, or `None` if it is not representable.
    ///
    /// Daily periods roll to 00:00:00.000 UTC of the next calendar day regardless of the
    /// time-of-day of `bar_start_ms`. Minute periods add exactly `n` minutes.
    pub fn next_boundary(&self, bar_start_ms: i64) -> Option<i64> {
        match self {
            Self::Minutes(minutes) => bar_start_ms.checked_add(minutes_to_ms(*minutes)),
            Self::Daily => DateTime::from_timestamp_millis(bar_start_ms)
                .and_then(|start| start.date_naive().succ_opt())
                .and_then(|next_day| next_day.and_hms_opt(0, 0, 0))
                .map(|midnight| midnight.and_utc().timestamp_millis()),
        }
    }

    /// Start time (epoch ms) of the period containing `time_ms`, or `None` if it is not
    /// representable.
    ///
    /// Minute periods are aligned to multiples of the period length since the unix epoch, so
    /// `"60"` aligns to the top of the UTC hour. Daily periods align to UTC midnight.
    pub fn period_start(&self, time_ms: i64) -> Option<i64> {
        let period_ms = match self {
            Self::Minutes(minutes) => minutes_to_ms(*minutes),
            Self::Daily => MS_PER_DAY,
        };
        time_ms.checked_sub(time_ms.rem_euclid(period_ms))
    }
}

const MS_PER_DAY: i64 = 86_400_000;

fn minutes_to_ms(minutes: NonZeroU32) -> i64 {
    TimeDelta::minutes(i64::from(minutes.get())).num_milliseconds()
}

impl FromStr for Resolution {
    type Err = DataError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        match token {
            "D" | "1D" => Ok(Self::Daily),
            minutes if !minutes.is_empty() && minutes.bytes().all(|byte| byte.is_ascii_digit()) => {
                minutes
                    .parse::<u32>()
                    .ok()
                    .and_then(NonZeroU32::new)
                    .map(Self::Minutes)
                    .ok_or_else(|| DataError::UnsupportedResolution(token.to_string()))
            }
            _ => Err(DataError::UnsupportedResolution(token.to_string())),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Minutes(minutes) => write!(f, "{minutes}"),
            Self::Daily => write!(f, "1D"),
        }
    }
}

impl Serialize for Resolution {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Resolution {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let token = String::deserialize(deserializer)?;
        token.parse().map_err(serde::de::Error::custom)
    }
}
