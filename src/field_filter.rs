//! Response shaping: rebuild a JSON value keeping only requested dot paths.
//!
//! Each path is walked independently through the source. A path resolves when
//! every intermediate segment lands on a non-null object and the last segment is
//! a present key (`null` values count as present). Resolved leaves are written
//! at the same location in the output; paths sharing a prefix merge into one
//! nested object. Anything that does not resolve is dropped without error.
//!
//! Arrays are never descended into by a path: an array value is mapped element
//! by element with the same path list.

use serde_json::{Map, Value};

use crate::error::FieldError;

/// Hard ceiling on segments per path.
pub const MAX_PATH_DEPTH: usize = 32;

#[derive(Debug, Clone)]
pub struct FilterOptions {
    /// Only used for the diagnostic line.
    pub entity_type: String,
    /// `false` flattens output keys to the full dot path.
    pub respect_nesting: bool,
    /// Log entity type and requested paths to stderr.
    pub log_filtering: bool,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            entity_type: String::new(),
            respect_nesting: true,
            log_filtering: false,
        }
    }
}

impl FilterOptions {
    pub fn for_entity(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            ..Self::default()
        }
    }
}

/// Project `value` down to `paths`.
///
/// `None` or an empty list returns the value unchanged, as does any null or
/// primitive value.
pub fn filter_fields(value: &Value, paths: Option<&[String]>, opts: &FilterOptions) -> Result<Value, FieldError> {
    let paths = match paths {
        Some(p) if !p.is_empty() => p,
        _ => return Ok(value.clone()),
    };

    if opts.log_filtering {
        eprintln!(
            "[field_filter] INFO: entity={} paths=[{}]",
            if opts.entity_type.is_empty() { "-" } else { opts.entity_type.as_str() },
            paths.join(", ")
        );
    }

    let split: Vec<(&str, Vec<&str>)> = paths
        .iter()
        .map(|p| {
            let segments: Vec<&str> = p.split('.').collect();
            if segments.len() > MAX_PATH_DEPTH {
                return Err(FieldError::PathTooDeep {
                    path: p.clone(),
                    depth: segments.len(),
                    max: MAX_PATH_DEPTH,
                });
            }
            Ok((p.as_str(), segments))
        })
        .collect::<Result<_, _>>()?;

    Ok(project(value, &split, opts.respect_nesting))
}

fn project(value: &Value, paths: &[(&str, Vec<&str>)], nested: bool) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(|v| project(v, paths, nested)).collect()),
        Value::Object(obj) => Value::Object(project_object(obj, paths, nested)),
        other => other.clone(),
    }
}

fn project_object(obj: &Map<String, Value>, paths: &[(&str, Vec<&str>)], nested: bool) -> Map<String, Value> {
    let mut out = Map::new();
    for (full, segments) in paths {
        let Some(leaf) = lookup(obj, segments) else { continue };
        if nested {
            insert_nested(&mut out, segments, leaf.clone());
        } else {
            out.insert((*full).to_string(), leaf.clone());
        }
    }
    out
}

/// Walk `segments` through `obj`; `None` on the first missing key or non-object hop.
fn lookup<'v>(obj: &'v Map<String, Value>, segments: &[&str]) -> Option<&'v Value> {
    let (last, parents) = segments.split_last()?;
    let mut cur = obj;
    for seg in parents {
        match cur.get(*seg) {
            Some(Value::Object(next)) => cur = next,
            _ => return None,
        }
    }
    cur.get(*last)
}

/// Write `leaf` under `segments`, reusing intermediate objects already present.
fn insert_nested(out: &mut Map<String, Value>, segments: &[&str], leaf: Value) {
    let Some((last, parents)) = segments.split_last() else { return };
    let mut cur = out;
    for seg in parents {
        let slot = cur
            .entry((*seg).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Value::Object(next) = slot else { return };
        cur = next;
    }
    // `a.b` written before `a`: fold the whole object in over the partial one.
    let merge = matches!((cur.get(*last), &leaf), (Some(Value::Object(_)), Value::Object(_)));
    if merge {
        if let (Some(Value::Object(existing)), Value::Object(incoming)) = (cur.get_mut(*last), leaf) {
            existing.extend(incoming);
        }
    } else {
        cur.insert((*last).to_string(), leaf);
    }
}

/// Distinct first segments in order of first appearance, e.g. for Jira's
/// `fields=` query parameter.
pub fn top_level_fields(paths: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for p in paths {
        let first = p.split('.').next().unwrap_or(p);
        if !first.is_empty() && !out.iter().any(|o| o == first) {
            out.push(first.to_string());
        }
    }
    out
}
