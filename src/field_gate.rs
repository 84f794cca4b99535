//! Glue between tool arguments and the field engine.
//!
//! Policy:
//! - no `fields` (or an empty list): nothing is validated or filtered;
//! - every requested field invalid: the call is rejected before any fetch;
//! - some invalid: continue with the valid ones and attach a warning;
//! - validator or projector trouble: log it, pass the fields / payload through.

use serde_json::{json, Map, Value};

use crate::config::FieldFilterConfig;
use crate::error::{format_suggestions, ToolError};
use crate::field_filter::{filter_fields, FilterOptions};
use crate::schema::Registry;
use crate::validator::FieldValidator;

/// Outcome of validating a tool call's `fields` argument.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSelection {
    /// Paths to project to; `None` means return everything.
    pub paths: Option<Vec<String>>,
    pub warning: Option<String>,
}

/// Accepts `["a", "b.c"]` or `"a, b.c"`. Array items are taken verbatim.
pub fn parse_fields_arg(args: &Value) -> Result<Option<Vec<String>>, ToolError> {
    let paths: Vec<String> = match args.get("fields") {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str().map(String::from).ok_or_else(|| ToolError::InvalidArgument {
                    name: "fields",
                    reason: format!("expected an array of strings, found element {v}"),
                })
            })
            .collect::<Result<_, _>>()?,
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        Some(other) => {
            return Err(ToolError::InvalidArgument {
                name: "fields",
                reason: format!("expected an array of strings, found {other}"),
            })
        }
    };
    Ok(if paths.is_empty() { None } else { Some(paths) })
}

pub struct FieldGate<'r> {
    validator: FieldValidator<'r>,
    opts: FieldFilterConfig,
}

impl<'r> FieldGate<'r> {
    pub fn new(registry: &'r Registry, opts: &FieldFilterConfig) -> Self {
        Self {
            validator: FieldValidator::new(registry).with_max_suggestions(opts.max_suggestions),
            opts: opts.clone(),
        }
    }

    pub fn select(&self, entity: &str, requested: Option<Vec<String>>) -> Result<FieldSelection, ToolError> {
        let Some(requested) = requested.filter(|r| !r.is_empty()) else {
            return Ok(FieldSelection::default());
        };

        let result = match self.validator.validate(entity, &requested) {
            Ok(r) => r,
            Err(e) => {
                eprintln!("[field_gate] WARN: field validation failed for {entity} ({e}); passing fields through");
                return Ok(FieldSelection {
                    paths: Some(requested),
                    warning: None,
                });
            }
        };

        if result.is_valid {
            return Ok(FieldSelection {
                paths: Some(result.valid_paths),
                warning: None,
            });
        }
        if result.valid_paths.is_empty() {
            return Err(ToolError::AllFieldsInvalid {
                entity: entity.to_string(),
                invalid: result.invalid_paths,
                suggestions: result.suggestions,
            });
        }

        let mut warning = format!(
            "Some requested fields are not available for {entity}: {}",
            dedup(&result.invalid_paths).join(", ")
        );
        let listing = format_suggestions(&result.invalid_paths, &result.suggestions);
        if !listing.is_empty() {
            warning.push_str(". Suggestions: ");
            warning.push_str(&listing);
        }
        Ok(FieldSelection {
            paths: Some(result.valid_paths),
            warning: Some(warning),
        })
    }

    /// Project `value`; on any projector failure return it untouched.
    pub fn shape(&self, entity: &str, value: Value, sel: &FieldSelection) -> Value {
        let Some(paths) = sel.paths.as_deref() else { return value };
        let opts = FilterOptions {
            entity_type: entity.to_string(),
            respect_nesting: self.opts.respect_nesting,
            log_filtering: self.opts.log_filtering,
        };
        match filter_fields(&value, Some(paths), &opts) {
            Ok(v) => v,
            Err(e) => {
                eprintln!("[field_gate] WARN: filtering {entity} failed ({e}); returning unfiltered payload");
                value
            }
        }
    }

    /// Project only `value[items_key]`, keeping paging metadata (`total`,
    /// `startAt`, ...) intact. Payloads without that array are shaped whole.
    pub fn shape_items(&self, entity: &str, mut value: Value, items_key: &str, sel: &FieldSelection) -> Value {
        if sel.paths.is_none() {
            return value;
        }
        if !matches!(value.get(items_key), Some(Value::Array(_))) {
            return self.shape(entity, value, sel);
        }
        if let Some(items) = value.get_mut(items_key) {
            let taken = std::mem::take(items);
            *items = self.shape(entity, taken, sel);
        }
        value
    }
}

/// `{ "warning": ..., "data": ... }` when a warning exists, otherwise the data itself.
pub fn envelope(data: Value, sel: &FieldSelection) -> Value {
    match &sel.warning {
        Some(w) => json!({ "warning": w, "data": data }),
        None => data,
    }
}

/// Jira nests issue attributes under `fields`; lift them next to `id`/`key`/`self`
/// so catalog paths address the issue directly. Top-level keys win on collision.
pub fn hoist_issue_fields(issue: Value) -> Value {
    let Value::Object(mut obj) = issue else { return issue };
    let Some(Value::Object(fields)) = obj.remove("fields") else { return Value::Object(obj) };
    let mut out: Map<String, Value> = fields;
    for (k, v) in obj {
        out.insert(k, v);
    }
    Value::Object(out)
}

fn dedup(paths: &[String]) -> Vec<&str> {
    let mut out: Vec<&str> = Vec::new();
    for p in paths {
        if !out.contains(&p.as_str()) {
            out.push(p);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(reg: &Registry) -> FieldGate<'_> {
        FieldGate::new(reg, &FieldFilterConfig::default())
    }

    fn paths(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_fields_accepts_arrays_and_csv() {
        assert_eq!(parse_fields_arg(&json!({})).unwrap(), None);
        assert_eq!(parse_fields_arg(&json!({"fields": null})).unwrap(), None);
        assert_eq!(parse_fields_arg(&json!({"fields": []})).unwrap(), None);
        assert_eq!(parse_fields_arg(&json!({"fields": ""})).unwrap(), None);
        assert_eq!(
            parse_fields_arg(&json!({"fields": ["key", "status.name"]})).unwrap(),
            Some(paths(&["key", "status.name"]))
        );
        assert_eq!(
            parse_fields_arg(&json!({"fields": "key, status.name,"})).unwrap(),
            Some(paths(&["key", "status.name"]))
        );
        assert!(parse_fields_arg(&json!({"fields": [1]})).is_err());
        assert!(parse_fields_arg(&json!({"fields": 3})).is_err());
    }

    #[test]
    fn no_fields_means_no_selection() {
        let reg = Registry::builtin().unwrap();
        assert_eq!(gate(&reg).select("issue", None).unwrap(), FieldSelection::default());
        assert_eq!(gate(&reg).select("issue", Some(vec![])).unwrap(), FieldSelection::default());
    }

    #[test]
    fn partial_invalid_warns_and_keeps_valid() {
        let reg = Registry::builtin().unwrap();
        let sel = gate(&reg)
            .select("issue", Some(paths(&["key", "stauts.name", "stauts.name"])))
            .unwrap();
        assert_eq!(sel.paths, Some(paths(&["key"])));
        let w = sel.warning.unwrap();
        assert!(w.starts_with("Some requested fields are not available for issue: stauts.name."));
        assert!(w.contains("stauts.name → status.name"));
    }

    #[test]
    fn all_invalid_is_rejected() {
        let reg = Registry::builtin().unwrap();
        let err = gate(&reg).select("project", Some(paths(&["bogus1", "bogus2"]))).unwrap_err();
        match err {
            ToolError::AllFieldsInvalid { entity, invalid, .. } => {
                assert_eq!(entity, "project");
                assert_eq!(invalid, paths(&["bogus1", "bogus2"]));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn validator_failure_passes_fields_through() {
        let reg = Registry::builtin().unwrap();
        let long = "x".repeat(crate::validator::MAX_PATH_LEN + 1);
        let sel = gate(&reg).select("issue", Some(vec![long.clone(), "key".into()])).unwrap();
        assert_eq!(sel.paths, Some(vec![long, "key".into()]));
        assert!(sel.warning.is_none());
    }

    #[test]
    fn unknown_entity_passes_fields_through() {
        let reg = Registry::builtin().unwrap();
        let sel = gate(&reg).select("workflow", Some(paths(&["anything"]))).unwrap();
        assert_eq!(sel.paths, Some(paths(&["anything"])));
    }

    #[test]
    fn projector_failure_returns_original() {
        let reg = Registry::builtin().unwrap();
        let deep = vec!["a"; crate::field_filter::MAX_PATH_DEPTH + 1].join(".");
        let sel = FieldSelection {
            paths: Some(vec![deep]),
            warning: None,
        };
        let v = json!({"a": {"b": 1}, "c": 2});
        assert_eq!(gate(&reg).shape("issue", v.clone(), &sel), v);
    }

    #[test]
    fn shape_items_keeps_paging_metadata() {
        let reg = Registry::builtin().unwrap();
        let sel = FieldSelection {
            paths: Some(paths(&["key"])),
            warning: None,
        };
        let page = json!({"total": 2, "startAt": 0, "issues": [{"key": "A-1", "id": "1"}, {"key": "A-2"}]});
        let out = gate(&reg).shape_items("issue", page, "issues", &sel);
        assert_eq!(out, json!({"total": 2, "startAt": 0, "issues": [{"key": "A-1"}, {"key": "A-2"}]}));
    }

    #[test]
    fn flat_mode_from_config() {
        let reg = Registry::builtin().unwrap();
        let opts = FieldFilterConfig {
            respect_nesting: false,
            ..FieldFilterConfig::default()
        };
        let g = FieldGate::new(&reg, &opts);
        let sel = FieldSelection {
            paths: Some(paths(&["status.name"])),
            warning: None,
        };
        let out = g.shape("issue", json!({"status": {"name": "Open", "id": "1"}}), &sel);
        assert_eq!(out, json!({"status.name": "Open"}));
    }

    #[test]
    fn envelope_wraps_only_with_warning() {
        let data = json!({"key": "A-1"});
        assert_eq!(envelope(data.clone(), &FieldSelection::default()), data);
        let sel = FieldSelection {
            paths: None,
            warning: Some("careful".into()),
        };
        assert_eq!(envelope(data.clone(), &sel), json!({"warning": "careful", "data": data}));
    }

    #[test]
    fn hoist_issue_fields_flattens() {
        let raw = json!({"id": "10", "key": "A-1", "self": "u", "fields": {"summary": "s", "key": "shadow"}});
        assert_eq!(
            hoist_issue_fields(raw),
            json!({"id": "10", "key": "A-1", "self": "u", "summary": "s"})
        );
        assert_eq!(hoist_issue_fields(json!([1])), json!([1]));
    }
}
