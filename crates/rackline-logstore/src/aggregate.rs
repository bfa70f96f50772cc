//! Time-bucket aggregation for tail query results.
//!
//! Stitched records are partitioned into fixed-width buckets and each
//! non-empty bucket collapses into one synthetic record: the timestamp
//! becomes the bucket's `"start-end"` range string, numeric fields are
//! summed or averaged (nested objects field by field), and non-numeric
//! fields pass through from the bucket's first record.

use rackline_common::{Error, Result};
use serde_json::{Map, Value, json};

const HOUR_MS: u64 = 60 * 60 * 1000;
const DAY_MS: u64 = 24 * HOUR_MS;
const WEEK_MS: u64 = 7 * DAY_MS;
const MONTH_MS: u64 = 30 * DAY_MS;

/// How numeric fields combine within a bucket
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggregateOp {
    Sum,
    Avg,
}

/// Parse a bucket width like `"1H"`, `"2D"`, `"1W"`, `"3M"` (case
/// insensitive, optional trailing `s`) into milliseconds.
pub fn parse_bucket_width(input: &str) -> Result<u64> {
    let trimmed = input.trim();
    let digits_end = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(digits_end);
    let value: u64 = digits
        .parse()
        .map_err(|_| Error::InvalidBucketWidth(input.to_string()))?;
    if value == 0 {
        return Err(Error::InvalidBucketWidth(input.to_string()));
    }
    let unit = unit.trim().to_ascii_uppercase();
    let unit = unit.strip_suffix('S').unwrap_or(&unit);
    let unit_ms = match unit {
        "H" => HOUR_MS,
        "D" => DAY_MS,
        "W" => WEEK_MS,
        "M" => MONTH_MS,
        _ => return Err(Error::InvalidBucketWidth(input.to_string())),
    };
    Ok(value * unit_ms)
}

/// Partition records into time buckets and aggregate each one. Records
/// without a numeric `ts` field cannot be placed and are dropped.
pub fn bucket_records(records: Vec<Value>, width: &str, op: AggregateOp) -> Result<Vec<Value>> {
    let range_ms = parse_bucket_width(width)?;
    if records.is_empty() {
        return Ok(records);
    }

    let mut stamped: Vec<(u64, Value)> = records
        .into_iter()
        .filter_map(|record| {
            record
                .get("ts")
                .and_then(Value::as_u64)
                .map(|ts| (ts, record))
        })
        .collect();
    if stamped.is_empty() {
        return Ok(Vec::new());
    }
    stamped.sort_by_key(|(ts, _)| *ts);

    let max_ts = stamped[stamped.len() - 1].0;
    let mut bucket_start = (stamped[0].0 / range_ms) * range_ms;
    let mut out = Vec::new();
    let mut index = 0;

    while bucket_start <= max_ts {
        let bucket_end = bucket_start + range_ms;
        let from = index;
        while index < stamped.len() && stamped[index].0 < bucket_end {
            index += 1;
        }
        let group = &stamped[from..index];
        if !group.is_empty() {
            out.push(aggregate_bucket(bucket_start, bucket_end - 1, group, op));
        }
        bucket_start = bucket_end;
    }
    Ok(out)
}

fn aggregate_bucket(start: u64, end: u64, group: &[(u64, Value)], op: AggregateOp) -> Value {
    let range_ts = format!("{start}-{end}");
    if group.len() == 1 {
        let mut single = group[0].1.clone();
        if let Some(obj) = single.as_object_mut() {
            obj.insert("ts".to_string(), json!(range_ts));
        }
        return single;
    }

    let mut result = Map::new();
    result.insert("ts".to_string(), json!(range_ts));
    for field in field_names(group.iter().map(|(_, record)| record)) {
        result.insert(field.clone(), aggregate_field(group, &field, op));
    }
    Value::Object(result)
}

/// Union of object keys across the group, first-seen order, `ts` excluded
fn field_names<'a>(records: impl Iterator<Item = &'a Value>) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for record in records {
        if let Some(obj) = record.as_object() {
            for key in obj.keys() {
                if key != "ts" && !names.iter().any(|existing| existing == key) {
                    names.push(key.clone());
                }
            }
        }
    }
    names
}

fn aggregate_field(group: &[(u64, Value)], field: &str, op: AggregateOp) -> Value {
    let values: Vec<&Value> = group
        .iter()
        .filter_map(|(_, record)| record.get(field))
        .filter(|value| !value.is_null())
        .collect();
    let Some(first) = values.first() else {
        return Value::Null;
    };

    if first.is_object() {
        return aggregate_nested(group, field, op);
    }
    if first.is_number() {
        let nums: Vec<f64> = values.iter().filter_map(|value| value.as_f64()).collect();
        return aggregate_numeric(&nums, op);
    }
    (*first).clone()
}

fn aggregate_nested(group: &[(u64, Value)], field: &str, op: AggregateOp) -> Value {
    let nested = field_names(
        group
            .iter()
            .filter_map(|(_, record)| record.get(field))
            .filter(|value| value.is_object()),
    );

    let mut result = Map::new();
    for key in nested {
        let nums: Vec<f64> = group
            .iter()
            .filter_map(|(_, record)| record.get(field).and_then(|inner| inner.get(&key)))
            .filter_map(Value::as_f64)
            .collect();
        if nums.is_empty() {
            let first = group
                .iter()
                .filter_map(|(_, record)| record.get(field).and_then(|inner| inner.get(&key)))
                .find(|value| !value.is_null());
            if let Some(value) = first {
                result.insert(key, value.clone());
            }
        } else {
            result.insert(key, aggregate_numeric(&nums, op));
        }
    }
    if result.is_empty() {
        Value::Null
    } else {
        Value::Object(result)
    }
}

fn aggregate_numeric(values: &[f64], op: AggregateOp) -> Value {
    if values.is_empty() {
        return json!(0);
    }
    let sum: f64 = values.iter().sum();
    let out = match op {
        AggregateOp::Sum => sum,
        AggregateOp::Avg => sum / values.len() as f64,
    };
    json!(out)
}
