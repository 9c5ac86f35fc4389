//! Value encoding for interval records.
//!
//! A record is one format byte followed by the interval as JSON. Anything
//! that does not decode to a well-formed interval is a corrupt record.

use crate::core::Interval;
use crate::error::{IntervalError, Result};

/// Current record format.
pub const FORMAT_V1: u8 = 1;

pub fn encode(interval: &Interval) -> Result<Vec<u8>> {
    let mut buf = vec![FORMAT_V1];
    serde_json::to_writer(&mut buf, interval)
        .map_err(|e| IntervalError::Io(format!("failed to encode interval: {e}")))?;
    Ok(buf)
}

pub fn decode(bytes: &[u8]) -> Result<Interval> {
    let (format, body) = bytes
        .split_first()
        .ok_or_else(|| IntervalError::CorruptRecord("empty record".to_string()))?;
    if *format != FORMAT_V1 {
        return Err(IntervalError::CorruptRecord(format!(
            "unknown record format {format}"
        )));
    }
    let interval: Interval = serde_json::from_slice(body)
        .map_err(|e| IntervalError::CorruptRecord(e.to_string()))?;
    if interval.ts_end < interval.ts_start {
        return Err(IntervalError::CorruptRecord(format!(
            "interval {} ends before it starts",
            interval.id
        )));
    }
    if interval.id.is_empty() {
        return Err(IntervalError::CorruptRecord("interval without id".to_string()));
    }
    Ok(interval)
}
