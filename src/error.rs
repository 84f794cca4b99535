//! Typed errors for the field engine and the tool dispatch layer.
//!
//! Application plumbing (config, HTTP, CLI) stays on `anyhow`; these enums
//! cover the cases callers need to match on.

use std::collections::BTreeMap;
use thiserror::Error;

/// Registry construction and lookup errors.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Entity type outside the recognised kinds
    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),

    /// Two fields (or one field twice) register the same access path
    #[error("duplicate access path `{path}` in {entity} registry (fields `{first}` and `{second}`)")]
    DuplicatePath {
        entity: String,
        path: String,
        first: String,
        second: String,
    },

    /// Field id declared more than once
    #[error("duplicate field id `{field}` in {entity} registry")]
    DuplicateField { entity: String, field: String },

    /// Access path not rooted at its owning field id
    #[error("access path `{path}` is not rooted at field `{field}` ({entity} registry)")]
    UnrootedPath {
        entity: String,
        field: String,
        path: String,
    },

    /// Embedded or configured catalog failed to parse
    #[error("failed to parse {entity} field catalog: {source}")]
    Catalog {
        entity: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Defensive failures inside validation / projection.
///
/// Never surfaced to tool callers: the dispatch layer degrades to pass-through.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FieldError {
    #[error("field path is {len} bytes long (max {max})")]
    PathTooLong { len: usize, max: usize },

    #[error("field path `{path}` has {depth} segments (max {max})")]
    PathTooDeep {
        path: String,
        depth: usize,
        max: usize,
    },
}

/// User-facing tool failures, rendered as `isError: true` results.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Missing {0}")]
    MissingArgument(&'static str),

    #[error("Invalid argument `{name}`: {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    /// Every requested field was rejected; the upstream fetch is skipped.
    #[error("{}", all_invalid_message(.entity, .invalid, .suggestions))]
    AllFieldsInvalid {
        entity: String,
        invalid: Vec<String>,
        suggestions: BTreeMap<String, Vec<String>>,
    },

    #[error("Jira connection is not configured (set JIRA_URL and JIRA_PERSONAL_TOKEN)")]
    NotConfigured,

    #[error("{context} failed: {source:#}")]
    Upstream {
        context: String,
        #[source]
        source: anyhow::Error,
    },
}

fn all_invalid_message(
    entity: &str,
    invalid: &[String],
    suggestions: &BTreeMap<String, Vec<String>>,
) -> String {
    let mut out = format!(
        "None of the requested fields are valid for {entity}: {}",
        invalid.join(", ")
    );
    let listing = format_suggestions(invalid, suggestions);
    if !listing.is_empty() {
        out.push_str(". Suggestions: ");
        out.push_str(&listing);
    }
    out
}

/// `a → x, y; b → z` for every invalid path that has at least one suggestion.
/// Repeated invalid paths are listed once.
pub fn format_suggestions(invalid: &[String], suggestions: &BTreeMap<String, Vec<String>>) -> String {
    let mut seen: Vec<&str> = Vec::new();
    let mut parts: Vec<String> = Vec::new();
    for path in invalid {
        if seen.contains(&path.as_str()) {
            continue;
        }
        seen.push(path);
        match suggestions.get(path) {
            Some(s) if !s.is_empty() => parts.push(format!("{path} → {}", s.join(", "))),
            _ => {}
        }
    }
    parts.join("; ")
}
