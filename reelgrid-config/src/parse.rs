//! Parsers for the compound configuration values.
//!
//! Compound keys use flat comma syntax: `queue:exchange` pairs for
//! inputs, `prefix=dest_nodes` pairs for sharded outputs, `min..max`
//! for year ranges.

use std::str::FromStr;

use crate::error::{ConfigError, Result};

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// One consumed queue, optionally bound to a fanout exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub queue: String,
    pub exchange: Option<String>,
}

pub fn parse_queue_list(key: &str, raw: &str) -> Result<Vec<QueueSpec>> {
    let mut out = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let spec = match part.split_once(':') {
            Some((queue, exchange)) => QueueSpec {
                queue: queue.trim().to_string(),
                exchange: Some(exchange.trim().to_string()),
            },
            None => QueueSpec {
                queue: part.to_string(),
                exchange: None,
            },
        };
        if spec.queue.is_empty() || spec.exchange.as_deref() == Some("") {
            return Err(invalid(key, raw, "empty queue or exchange name"));
        }
        out.push(spec);
    }
    if out.is_empty() {
        return Err(invalid(key, raw, "no queues configured"));
    }
    Ok(out)
}

/// One sharded destination: exchange prefix plus destination node count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardedOutput {
    pub prefix: String,
    pub dest_nodes: u32,
}

pub fn parse_sharded_outputs(key: &str, raw: &str) -> Result<Vec<ShardedOutput>> {
    let mut out = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (prefix, nodes) = part
            .split_once('=')
            .ok_or_else(|| invalid(key, raw, "expected prefix=dest_nodes"))?;
        let dest_nodes: u32 = nodes
            .trim()
            .parse()
            .map_err(|_| invalid(key, raw, "destination node count is not a number"))?;
        if dest_nodes == 0 || prefix.trim().is_empty() {
            return Err(invalid(key, raw, "empty prefix or zero destinations"));
        }
        out.push(ShardedOutput {
            prefix: prefix.trim().to_string(),
            dest_nodes,
        });
    }
    if out.is_empty() {
        return Err(invalid(key, raw, "no outputs configured"));
    }
    Ok(out)
}

/// The `FILTER_VALUES` shapes: a country list, an exact country count,
/// or an inclusive year range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValues {
    Countries(Vec<String>),
    CountryCount(usize),
    YearRange { min: i32, max: Option<i32> },
}

pub fn parse_filter_values(key: &str, raw: &str) -> Result<FilterValues> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(invalid(key, raw, "empty filter values"));
    }
    if trimmed.bytes().all(|b| b.is_ascii_digit()) {
        let count = trimmed
            .parse()
            .map_err(|_| invalid(key, raw, "country count out of range"))?;
        return Ok(FilterValues::CountryCount(count));
    }
    if let Some((min, max)) = trimmed.split_once("..") {
        let min: i32 = min
            .trim()
            .parse()
            .map_err(|_| invalid(key, raw, "minimum year is not a number"))?;
        let max = match max.trim() {
            "" => None,
            raw_max => Some(
                raw_max
                    .parse()
                    .map_err(|_| invalid(key, raw, "maximum year is not a number"))?,
            ),
        };
        if let Some(max) = max {
            if max < min {
                return Err(invalid(key, raw, "maximum year before minimum"));
            }
        }
        return Ok(FilterValues::YearRange { min, max });
    }
    Ok(FilterValues::Countries(parse_str_list(trimmed)))
}

pub fn parse_str_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Which stream a joiner widens with movie titles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Ratings,
    Credits,
}

impl FromStr for JoinKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ratings" => Ok(JoinKind::Ratings),
            "credits" => Ok(JoinKind::Credits),
            other => Err(format!("unknown join kind: {other}")),
        }
    }
}
