//! Server configuration.
//!
//! ## Layer priority (last-write-wins for scalars; arrays are unioned)
//!  1. **Global**   `~/.jira-mcp/config.json`
//!  2. **Project**  `{cwd}/.jira-mcp.json`
//!  3. **Env**      `JIRA_URL`, `JIRA_PERSONAL_TOKEN`, `JIRA_TIMEOUT_SECS`
//!
//! Files that are missing are skipped; files that fail to parse are skipped
//! with a warning. A broken config never stops the server from starting.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use crate::schema::{AccessPath, FieldDefinition, FieldType, Frequency, ValueType};
use crate::validator::DEFAULT_MAX_SUGGESTIONS;

pub const PROJECT_CONFIG_FILE: &str = ".jira-mcp.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JiraConfig {
    /// e.g. `https://jira.example.com`; empty means "not configured".
    pub base_url: String,
    /// Personal access token, sent as a bearer token.
    pub personal_token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for JiraConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            personal_token: None,
            timeout_secs: 30,
        }
    }
}

impl JiraConfig {
    pub fn is_configured(&self) -> bool {
        !self.base_url.trim().is_empty()
            && self
                .personal_token
                .as_deref()
                .is_some_and(|t| !t.trim().is_empty())
    }
}

/// Defaults applied to every `fields`-filtered tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldFilterConfig {
    /// Nest multi-segment paths (`true`) or key output by the full dot path.
    pub respect_nesting: bool,
    /// Log entity type + requested paths to stderr on every filtered call.
    pub log_filtering: bool,
    /// Suggestions per invalid path (clamped to 1..=10).
    pub max_suggestions: usize,
}

impl Default for FieldFilterConfig {
    fn default() -> Self {
        Self {
            respect_nesting: true,
            log_filtering: false,
            max_suggestions: DEFAULT_MAX_SUGGESTIONS,
        }
    }
}

/// Instance-specific issue custom field, registered into the `issue` catalog so
/// it shows up in `list_fields` and in suggestions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomFieldConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_custom_field_type", rename = "type")]
    pub value_type: ValueType,
}

fn default_custom_field_type() -> ValueType {
    ValueType::String
}

impl CustomFieldConfig {
    pub fn to_field_definition(&self) -> FieldDefinition {
        let field_type = match self.value_type {
            ValueType::Object => FieldType::Object,
            ValueType::Array => FieldType::Array,
            ValueType::Number => FieldType::Number,
            ValueType::Boolean => FieldType::Boolean,
            ValueType::String => FieldType::String,
        };
        let mut access_paths = vec![AccessPath {
            path: self.id.clone(),
            description: self.description.clone(),
            value_type: self.value_type,
            frequency: Frequency::Medium,
        }];
        // Select-list style custom fields carry their label under `value`.
        if self.value_type == ValueType::Object {
            access_paths.push(AccessPath {
                path: format!("{}.value", self.id),
                description: format!("{} option value", self.name),
                value_type: ValueType::String,
                frequency: Frequency::Medium,
            });
        }
        FieldDefinition {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            field_type,
            access_paths,
            examples: vec![self.id.clone()],
            common_usage: vec![],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub jira: JiraConfig,
    pub field_filter: FieldFilterConfig,
    pub custom_fields: Vec<CustomFieldConfig>,
}

fn global_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".jira-mcp")
        .join("config.json")
}

/// Load global + project config and apply environment overrides.
pub fn load_config(project_dir: &Path) -> Config {
    let mut cfg = load_config_files(&[global_config_path(), project_dir.join(PROJECT_CONFIG_FILE)]);
    apply_env_overrides(&mut cfg, |k| std::env::var(k).ok());
    cfg
}

/// Deep-merge the given JSON files in order, then deserialize.
pub fn load_config_files(paths: &[PathBuf]) -> Config {
    let mut merged = Value::Object(Map::new());
    for path in paths {
        load_layer_into(&mut merged, path);
    }
    match serde_json::from_value::<Config>(merged) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("[config] WARN: merged config is invalid ({e}); using defaults");
            Config::default()
        }
    }
}

/// `lookup` is injected so tests don't touch the process environment.
pub fn apply_env_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(url) = lookup("JIRA_URL").filter(|s| !s.trim().is_empty()) {
        cfg.jira.base_url = url;
    }
    if let Some(token) = lookup("JIRA_PERSONAL_TOKEN").filter(|s| !s.trim().is_empty()) {
        cfg.jira.personal_token = Some(token);
    }
    if let Some(secs) = lookup("JIRA_TIMEOUT_SECS") {
        match secs.trim().parse::<u64>() {
            Ok(n) if n > 0 => cfg.jira.timeout_secs = n,
            _ => eprintln!("[config] WARN: ignoring JIRA_TIMEOUT_SECS={secs:?}"),
        }
    }
}

fn load_layer_into(dst: &mut Value, path: &Path) {
    if !path.exists() {
        return;
    }
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("[config] WARN: could not read {}: {e}", path.display());
            return;
        }
    };
    match serde_json::from_str::<Value>(&text) {
        Ok(v @ Value::Object(_)) => deep_merge(dst, v),
        Ok(_) => eprintln!("[config] WARN: {} is not a JSON object; skipped", path.display()),
        Err(e) => eprintln!("[config] WARN: could not parse {}: {e}", path.display()),
    }
}

/// Recursively merge `src` into `dst`.
///
/// - **Object/map**: keys from `src` are merged into `dst` recursively.
/// - **Array**: items from `src` are appended if not already present in `dst`.
/// - **Scalar** (`bool`, `number`, `string`, `null`): `src` overwrites `dst`.
pub fn deep_merge(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Object(d), Value::Object(s)) => {
            for (k, v) in s {
                deep_merge(d.entry(k).or_insert(Value::Null), v);
            }
        }
        (Value::Array(d), Value::Array(s)) => {
            for item in s {
                if !d.contains(&item) {
                    d.push(item);
                }
            }
        }
        (dst, src) => *dst = src,
    }
}
