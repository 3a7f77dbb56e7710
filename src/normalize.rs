//! Raw records to timed records.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::harvest::RawRecord;

/// A line with a start and end offset in seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimedRecord {
    #[serde(rename = "start_seconds")]
    pub start: f64,
    #[serde(rename = "end_seconds")]
    pub end: f64,
    pub content: String,
}

fn leading_timestamp() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{1,2}:\d{2}(?::\d{2})?)(?:\s+|$)(.*)$").unwrap())
}

/// Split `"01:05 text"` into `("01:05", "text")`. The rest may be empty.
pub(crate) fn split_leading_timestamp(line: &str) -> Option<(&str, &str)> {
    let caps = leading_timestamp().captures(line.trim())?;
    let label = caps.get(1)?.as_str();
    let rest = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");
    Some((label, rest))
}

/// Seconds for `mm:ss` or `hh:mm:ss`. Minutes and seconds past the first
/// field must be below 60. Labels too large to represent do not parse.
pub fn parse_timestamp(label: &str) -> Option<f64> {
    let parts: Vec<&str> = label.trim().split(':').collect();
    if !(2..=3).contains(&parts.len()) {
        return None;
    }
    let mut fields = Vec::with_capacity(parts.len());
    for p in &parts {
        if p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        fields.push(p.parse::<u64>().ok()?);
    }
    if fields[1..].iter().any(|&f| f >= 60) {
        return None;
    }
    let secs = fields
        .iter()
        .try_fold(0u64, |acc, &f| acc.checked_mul(60)?.checked_add(f))?;
    Some(secs as f64)
}

/// Timed records in harvest order.
///
/// A record whose label does not parse starts at `index * duration`, where
/// `index` is its position in `records`. Empty content and repeated
/// `(start, content)` pairs are dropped. Starts that go backwards are logged,
/// not re-sorted.
pub fn normalize(records: &[RawRecord], duration: f64) -> Vec<TimedRecord> {
    let mut out: Vec<TimedRecord> = Vec::with_capacity(records.len());
    let mut seen: HashSet<(u64, String)> = HashSet::new();
    let mut unparsed = 0usize;
    let mut backwards = 0usize;

    for (index, record) in records.iter().enumerate() {
        let content = record.text.trim();
        if content.is_empty() {
            continue;
        }
        let start = match record.time_label.as_deref().and_then(parse_timestamp) {
            Some(s) => s,
            None => {
                unparsed += 1;
                index as f64 * duration
            }
        };
        if !seen.insert((start.to_bits(), content.to_string())) {
            continue;
        }
        if out.last().is_some_and(|prev| start < prev.start) {
            backwards += 1;
        }
        out.push(TimedRecord {
            start,
            end: start + duration,
            content: content.to_string(),
        });
    }

    if unparsed > 0 {
        debug!("{} records without a usable timestamp, positioned by index", unparsed);
    }
    if backwards > 0 {
        warn!("{} records start before their predecessor", backwards);
    }
    out
}
