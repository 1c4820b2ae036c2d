//! Aggregate (count-over-time) response parser
//!
//! The charting endpoint answers with a table: one header per group-by
//! dimension and one row per bucket. A row's first group-by value carries the
//! bucket's `val`/`endVal` timestamps and its first aggregation value is the
//! event count.

use crate::fetcher::{FetcherError, FetcherResult};
use crate::Bin;
use serde_json::Value;
use tracing::debug;

/// Stateless parser for aggregate query responses
pub struct AggregateParser;

impl AggregateParser {
    /// Parse a charting response body into bins
    ///
    /// # Errors
    /// - [`FetcherError::UnsupportedGrouping`] unless there is exactly one
    ///   group-by header and it is the time header
    /// - [`FetcherError::ParseError`] for missing or malformed fields
    pub fn parse_chart(body: &Value) -> FetcherResult<Vec<Bin>> {
        let headers = body
            .get("groupByHeaders")
            .and_then(Value::as_array)
            .ok_or_else(|| FetcherError::ParseError("Missing groupByHeaders".to_string()))?;

        if headers.len() != 1 {
            return Err(FetcherError::UnsupportedGrouping(
                "This query produced multiple groupings. Set the query to group by time only."
                    .to_string(),
            ));
        }
        if !headers[0].get("isTime").and_then(Value::as_bool).unwrap_or(false) {
            return Err(FetcherError::UnsupportedGrouping(
                "This query is grouped by something other than time. Set the query to group by time only."
                    .to_string(),
            ));
        }

        let rows = body
            .get("rows")
            .and_then(Value::as_array)
            .ok_or_else(|| FetcherError::ParseError("Missing rows".to_string()))?;

        let mut bins = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            let group = row
                .get("groupByValues")
                .and_then(|v| v.get(0))
                .ok_or_else(|| FetcherError::ParseError(format!("Row {i} has no groupByValues")))?;

            let start = Self::parse_timestamp(group.get("val"), "val", i)?;
            let end = Self::parse_timestamp(group.get("endVal"), "endVal", i)?;
            let count = Self::parse_count(row.get("aggregationValues").and_then(|v| v.get(0)), i)?;

            let bin = Bin::new(start, end, count);
            bin.validate().map_err(FetcherError::InvalidResponse)?;
            bins.push(bin);
        }

        debug!(
            "Parsed {} bins containing {} events",
            bins.len(),
            bins.iter().map(|b| b.count).sum::<u64>()
        );
        Ok(bins)
    }

    fn parse_timestamp(value: Option<&Value>, field: &str, row: usize) -> FetcherResult<i64> {
        let value =
            value.ok_or_else(|| FetcherError::ParseError(format!("Row {row} missing {field}")))?;
        if let Some(v) = value.as_i64() {
            return Ok(v);
        }
        match value.as_f64() {
            Some(v) if v.is_finite() && v.fract() == 0.0 => Ok(v as i64),
            _ => Err(FetcherError::ParseError(format!(
                "Row {row} has invalid {field}: {value}"
            ))),
        }
    }

    fn parse_count(value: Option<&Value>, row: usize) -> FetcherResult<u64> {
        let value = value
            .ok_or_else(|| FetcherError::ParseError(format!("Row {row} missing aggregationValues")))?;
        if let Some(v) = value.as_u64() {
            return Ok(v);
        }
        match value.as_f64() {
            Some(v) if v.is_finite() && v >= 0.0 && v.fract() == 0.0 => Ok(v as u64),
            _ => Err(FetcherError::ParseError(format!(
                "Row {row} has invalid count: {value}"
            ))),
        }
    }
}
