//! Extraction of memory readings from test-run logs.

use std::str::FromStr;
use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::CliError;

pub const MEMINFO_MARKER: &str = "[MEMINFO]";
pub const MOBILE_SUITE: &str = ".MobileWebSuite";

static MEMINFO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?P<time>\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d+(,\d+)?)",
        r".*(?P<suite>\.(Mobile)?WebSuite)",
        r".*: \[MEMINFO\] (?P<label>.+) \(after GC\)",
        r" - used: (?P<used>\d+) - total: (?P<total>\d+) - limit: (?P<limit>\d+)",
        r"( - tests: (?P<tests>\d+))?",
    ))
    .expect("valid regex")
});

/// One memory measurement taken during a test suite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    /// Display label; mobile suites carry a ` (mobile)` suffix.
    pub label: String,
    /// Suite marker (`.WebSuite` or `.MobileWebSuite`).
    pub suite: String,
    pub mobile: bool,
    /// Milliseconds since the Unix epoch.
    pub time: i64,
    pub used: u64,
    pub total: u64,
    pub limit: u64,
    pub tests: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Time,
    Used,
    Total,
    Limit,
    Tests,
}

impl Metric {
    pub const ALL: [Metric; 5] = [Metric::Time, Metric::Used, Metric::Total, Metric::Limit, Metric::Tests];

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Time => "time",
            Metric::Used => "used",
            Metric::Total => "total",
            Metric::Limit => "limit",
            Metric::Tests => "tests",
        }
    }
}

impl FromStr for Metric {
    type Err = CliError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Metric::ALL
            .into_iter()
            .find(|metric| metric.as_str() == value)
            .ok_or_else(|| CliError::UnknownMetric {
                metric: value.to_string(),
                accepted: Metric::ALL.iter().map(|m| m.as_str().to_string()).collect(),
            })
    }
}

/// Pulls every reading out of a log text.
///
/// Only lines carrying the MEMINFO marker are considered; commas and quotes
/// are stripped before matching. A line whose timestamp cannot be converted
/// is skipped with a warning; the other readings of the source are kept.
pub fn extract_readings(content: &str) -> Vec<Reading> {
    content
        .lines()
        .filter(|line| line.contains(MEMINFO_MARKER))
        .filter_map(|line| {
            let cleaned = line.replace([',', '"'], "");
            let caps = MEMINFO.captures(&cleaned)?;
            match reading_from(&caps) {
                Ok(reading) => Some(reading),
                Err(reason) => {
                    warn!("skipping memory reading: {}", reason);
                    None
                }
            }
        })
        .collect()
}

fn reading_from(caps: &Captures<'_>) -> Result<Reading, String> {
    let time = parse_timestamp(&caps["time"])?;
    let number = |name: &str| -> Result<u64, String> {
        caps[name]
            .parse()
            .map_err(|err| format!("invalid {} value {:?}: {}", name, &caps[name], err))
    };
    let suite = caps["suite"].to_string();
    let mobile = suite == MOBILE_SUITE;
    let label = if mobile {
        format!("{} (mobile)", &caps["label"])
    } else {
        caps["label"].to_string()
    };
    let tests = match caps.name("tests") {
        Some(_) => Some(number("tests")?),
        None => None,
    };
    Ok(Reading {
        label,
        suite,
        mobile,
        time,
        used: number("used")?,
        total: number("total")?,
        limit: number("limit")?,
        tests,
    })
}

/// Converts `YYYY-MM-DD HH:MM:SS[fraction]` into epoch milliseconds (UTC).
///
/// Anything after the two second digits is the fraction, with an optional
/// leading comma; it is padded or truncated to exactly three digits.
pub fn parse_timestamp(text: &str) -> Result<i64, String> {
    let invalid = || format!("invalid timestamp {:?}", text);
    let (date, time) = text.trim().split_once(char::is_whitespace).ok_or_else(invalid)?;
    let mut parts = time.trim().splitn(3, ':');
    let (hours, minutes, rest) = match (parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(m), Some(rest)) => (h, m, rest),
        _ => return Err(invalid()),
    };
    let seconds = rest.get(..2).ok_or_else(invalid)?;
    let fraction: String = rest[2..]
        .trim_start_matches(',')
        .chars()
        .chain(std::iter::repeat('0'))
        .take(3)
        .collect();
    let iso = format!("{}T{}:{}:{}.{}", date, hours, minutes, seconds, fraction);
    NaiveDateTime::parse_from_str(&iso, "%Y-%m-%dT%H:%M:%S%.3f")
        .map(|datetime| datetime.and_utc().timestamp_millis())
        .map_err(|_| invalid())
}

/// A reading with the value charted for it, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub reading: Reading,
    /// `None` when the reading is left out of the chart.
    pub value: Option<i64>,
}

/// Chooses the charted value of each reading. Every reading yields a point.
///
/// `time` is the delta from the first charted reading of the source. With
/// `variance`, each value becomes the absolute difference from the previous
/// charted value (the first one is 0). Mobile readings are not charted unless
/// `include_mobile`; readings without a tests count are not charted for
/// `tests`; neither are values beyond the signed 64-bit range.
pub fn chart_points(readings: &[Reading], metric: Metric, variance: bool, include_mobile: bool) -> Vec<Point> {
    let mut time_ref: Option<i64> = None;
    let mut previous: Option<i64> = None;
    readings
        .iter()
        .map(|reading| {
            let raw = if include_mobile || !reading.mobile {
                raw_value(reading, metric, &mut time_ref)
            } else {
                None
            };
            let value = raw.and_then(|raw| {
                if !variance {
                    return Some(raw);
                }
                let delta = match previous {
                    Some(prev) => i64::try_from(raw.abs_diff(prev)).ok(),
                    None => Some(0),
                };
                previous = Some(raw);
                delta
            });
            Point {
                reading: reading.clone(),
                value,
            }
        })
        .collect()
}

fn raw_value(reading: &Reading, metric: Metric, time_ref: &mut Option<i64>) -> Option<i64> {
    let value = match metric {
        Metric::Time => return reading.time.checked_sub(*time_ref.get_or_insert(reading.time)),
        Metric::Used => reading.used,
        Metric::Total => reading.total,
        Metric::Limit => reading.limit,
        Metric::Tests => reading.tests?,
    };
    match i64::try_from(value) {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("{} value {} of {} is out of range", metric.as_str(), value, reading.label);
            None
        }
    }
}
