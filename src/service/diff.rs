//! Shape-based change sets between two snapshots of an entity.
//!
//! Both sides are normalized to JSON objects first, so any two serializable values with the
//! same shape can be compared. A changed field maps to `[before, after]`; nested objects map
//! to their own change set and are kept only when it is non-empty. Strings that both parse as
//! RFC 3339 timestamps are compared as instants, not as text.

use crate::model::Record;
use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use serde_json::Value;

/// Field name -> `[before, after]` (or a nested change map).
pub type ChangeMap = Record;

/// Diff two optional values.
///
/// Both `None` gives an empty map. Exactly one `None` gives a single `"value"` entry holding the
/// raw pair; non-object values are treated the same way when they differ.
pub fn diff<A, B>(before: Option<&A>, after: Option<&B>) -> Result<ChangeMap, serde_json::Error>
where
    A: Serialize + ?Sized,
    B: Serialize + ?Sized,
{
    let a = before.map(serde_json::to_value).transpose()?;
    let b = after.map(serde_json::to_value).transpose()?;
    Ok(diff_values(a, b))
}

fn diff_values(a: Option<Value>, b: Option<Value>) -> ChangeMap {
    match (a, b) {
        (None, None) => ChangeMap::new(),
        (Some(Value::Object(a)), Some(Value::Object(b))) => diff_records(&a, &b),
        (Some(a), Some(b)) if values_equal(&a, &b) => ChangeMap::new(),
        (a, b) => {
            let mut out = ChangeMap::new();
            out.insert(
                "value".into(),
                Value::Array(vec![a.unwrap_or(Value::Null), b.unwrap_or(Value::Null)]),
            );
            out
        }
    }
}

/// Diff two generic records key by key.
pub fn diff_records(before: &Record, after: &Record) -> ChangeMap {
    let mut out = ChangeMap::new();
    for (key, va) in before {
        match after.get(key) {
            Some(vb) => {
                if let Some(change) = diff_field(va, vb) {
                    out.insert(key.clone(), change);
                }
            }
            None => {
                out.insert(key.clone(), pair(va.clone(), Value::Null));
            }
        }
    }
    for (key, vb) in after {
        if !before.contains_key(key) {
            out.insert(key.clone(), pair(Value::Null, vb.clone()));
        }
    }
    out
}

fn diff_field(va: &Value, vb: &Value) -> Option<Value> {
    if va == vb {
        return None;
    }
    match (va, vb) {
        (Value::String(sa), Value::String(sb)) => match (parse_timestamp(sa), parse_timestamp(sb)) {
            (Some(ta), Some(tb)) if ta == tb => None,
            _ => Some(pair(va.clone(), vb.clone())),
        },
        (Value::Object(ma), Value::Object(mb)) => {
            let nested = diff_records(ma, mb);
            (!nested.is_empty()).then_some(Value::Object(nested))
        }
        _ => Some(pair(va.clone(), vb.clone())),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(sa), Value::String(sb)) => {
            sa == sb
                || matches!((parse_timestamp(sa), parse_timestamp(sb)), (Some(ta), Some(tb)) if ta == tb)
        }
        _ => a == b,
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(s).ok()
}

fn pair(a: Value, b: Value) -> Value {
    Value::Array(vec![a, b])
}
