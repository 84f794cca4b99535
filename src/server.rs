use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::io::{BufRead, Write};

use crate::client::{JiraApi, JiraClient};
use crate::config::{load_config, Config};
use crate::error::ToolError;
use crate::field_filter::top_level_fields;
use crate::field_gate::{envelope, hoist_issue_fields, parse_fields_arg, FieldGate, FieldSelection};
use crate::schema::{EntityType, Registry};
use crate::validator::FieldValidator;

/// Issue attributes Jira always returns outside `fields`; never sent upstream.
const ISSUE_ENVELOPE_KEYS: [&str; 4] = ["id", "key", "self", "expand"];

pub struct ServerState {
    registry: Registry,
    cfg: Config,
    api: Option<Box<dyn JiraApi>>,
}

/// Where a tool's payload lives and how to shape it.
struct Fetch<'a> {
    tool: &'static str,
    entity: EntityType,
    path: String,
    query: Vec<(&'a str, String)>,
    /// Paged payloads: only this array is projected.
    items_key: Option<&'static str>,
}

impl ServerState {
    pub fn new(registry: Registry, cfg: Config, api: Option<Box<dyn JiraApi>>) -> Self {
        Self { registry, cfg, api }
    }

    /// Registry from [`build_registry`]; an HTTP client when the Jira
    /// connection is configured. Catalog errors are fatal.
    pub fn from_config(cfg: Config) -> Result<Self> {
        let registry = build_registry(&cfg)?;
        let api: Option<Box<dyn JiraApi>> = if cfg.jira.is_configured() {
            Some(Box::new(JiraClient::new(&cfg.jira)?))
        } else {
            eprintln!("[server] WARN: JIRA_URL / JIRA_PERSONAL_TOKEN not set; only local tools will work");
            None
        };
        Ok(Self::new(registry, cfg, api))
    }

    fn tool_list(&self, id: Value) -> Value {
        let fields_prop = |entity: &str| {
            json!({
                "type": "array",
                "items": { "type": "string" },
                "description": format!("Optional: dot-notation paths to return (e.g. ['key','status.name']). Run list_fields with entityType='{entity}' to see valid paths. Omit for the full payload.")
            })
        };

        json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "tools": [
                    {
                        "name": "get_issue",
                        "description": "Fetch one issue by key. Issue attributes are flattened (status.name, assignee.displayName, customfield_10001). Pass `fields` to return only what you need.",
                        "inputSchema": {
                            "type": "object",
                            "properties": {
                                "issueKey": { "type": "string", "description": "Issue key, e.g. PROJ-123" },
                                "fields": fields_prop("issue"),
                                "expand": { "type": "string", "description": "Optional: Jira expand list, e.g. 'changelog,renderedFields'" }
                            },
                            "required": ["issueKey"]
                        }
                    },
                    {
                        "name": "search_issues",
                        "description": "Search issues with JQL. Paging metadata is kept; `fields` applies to every issue in the page.",
                        "inputSchema": {
                            "type": "object",
                            "properties": {
                                "jql": { "type": "string", "description": "JQL query" },
                                "fields": fields_prop("issue"),
                                "startAt": { "type": "integer", "minimum": 0 },
                                "maxResults": { "type": "integer", "minimum": 1, "description": "Page size (default 50)" }
                            },
                            "required": ["jql"]
                        }
                    },
                    {
                        "name": "get_project",
                        "description": "Fetch one project by key or id.",
                        "inputSchema": {
                            "type": "object",
                            "properties": {
                                "projectKey": { "type": "string" },
                                "fields": fields_prop("project")
                            },
                            "required": ["projectKey"]
                        }
                    },
                    {
                        "name": "list_projects",
                        "description": "List every project visible to the token's user.",
                        "inputSchema": {
                            "type": "object",
                            "properties": { "fields": fields_prop("project") }
                        }
                    },
                    {
                        "name": "get_user",
                        "description": "Fetch a user by username.",
                        "inputSchema": {
                            "type": "object",
                            "properties": {
                                "username": { "type": "string" },
                                "fields": fields_prop("user")
                            },
                            "required": ["username"]
                        }
                    },
                    {
                        "name": "get_current_user",
                        "description": "Fetch the user the access token belongs to.",
                        "inputSchema": {
                            "type": "object",
                            "properties": { "fields": fields_prop("user") }
                        }
                    },
                    {
                        "name": "search_users",
                        "description": "Find users by username, name or email fragment.",
                        "inputSchema": {
                            "type": "object",
                            "properties": {
                                "query": { "type": "string" },
                                "maxResults": { "type": "integer", "minimum": 1 },
                                "fields": fields_prop("user")
                            },
                            "required": ["query"]
                        }
                    },
                    {
                        "name": "list_boards",
                        "description": "List agile boards, optionally for one project.",
                        "inputSchema": {
                            "type": "object",
                            "properties": {
                                "projectKey": { "type": "string" },
                                "startAt": { "type": "integer", "minimum": 0 },
                                "maxResults": { "type": "integer", "minimum": 1 },
                                "fields": fields_prop("agile")
                            }
                        }
                    },
                    {
                        "name": "get_board",
                        "description": "Fetch one agile board.",
                        "inputSchema": {
                            "type": "object",
                            "properties": {
                                "boardId": { "type": "integer" },
                                "fields": fields_prop("agile")
                            },
                            "required": ["boardId"]
                        }
                    },
                    {
                        "name": "list_sprints",
                        "description": "List sprints of a board, optionally filtered by state (future, active, closed).",
                        "inputSchema": {
                            "type": "object",
                            "properties": {
                                "boardId": { "type": "integer" },
                                "state": { "type": "string" },
                                "fields": fields_prop("agile")
                            },
                            "required": ["boardId"]
                        }
                    },
                    {
                        "name": "get_sprint",
                        "description": "Fetch one sprint.",
                        "inputSchema": {
                            "type": "object",
                            "properties": {
                                "sprintId": { "type": "integer" },
                                "fields": fields_prop("agile")
                            },
                            "required": ["sprintId"]
                        }
                    },
                    {
                        "name": "get_server_info",
                        "description": "Jira version, deployment type and base URL.",
                        "inputSchema": {
                            "type": "object",
                            "properties": { "fields": fields_prop("system") }
                        }
                    },
                    {
                        "name": "validate_fields",
                        "description": "Check field paths for an entity type without calling Jira. Returns valid/invalid paths and suggestions.",
                        "inputSchema": {
                            "type": "object",
                            "properties": {
                                "entityType": { "type": "string", "enum": ["issue", "project", "user", "agile", "system"] },
                                "fields": { "type": "array", "items": { "type": "string" } }
                            },
                            "required": ["entityType", "fields"]
                        }
                    },
                    {
                        "name": "list_fields",
                        "description": "Show every requestable field and path for an entity type.",
                        "inputSchema": {
                            "type": "object",
                            "properties": {
                                "entityType": { "type": "string", "enum": ["issue", "project", "user", "agile", "system"] }
                            },
                            "required": ["entityType"]
                        }
                    }
                ]
            }
        })
    }

    fn tool_call(&self, id: Value, params: &Value) -> Value {
        let name = params.get("name").and_then(|n| n.as_str()).unwrap_or("");
        let args = params.get("arguments").cloned().unwrap_or(json!({}));

        let ok = |text: String| {
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "content": [{"type":"text","text": text }], "isError": false }
            })
        };

        let err = |msg: String| {
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "content": [{"type":"text","text": msg }], "isError": true }
            })
        };

        match self.call(name, &args) {
            Ok(Some(v)) => ok(serde_json::to_string_pretty(&v).unwrap_or_else(|_| v.to_string())),
            Ok(None) => err(format!("Tool not found: {name}")),
            Err(e) => err(e.to_string()),
        }
    }

    /// `Ok(None)` for an unknown tool name.
    fn call(&self, name: &str, args: &Value) -> Result<Option<Value>, ToolError> {
        let fetch = match name {
            "validate_fields" => return self.validate_fields(args).map(Some),
            "list_fields" => return self.list_fields(args).map(Some),
            "get_issue" => {
                let key = path_segment(args, "issueKey")?;
                let mut query = Vec::new();
                if let Some(expand) = optional_str(args, "expand") {
                    query.push(("expand", expand.to_string()));
                }
                Fetch {
                    tool: "get_issue",
                    entity: EntityType::Issue,
                    path: format!("/rest/api/2/issue/{key}"),
                    query,
                    items_key: None,
                }
            }
            "search_issues" => {
                let jql = required_str(args, "jql")?;
                let mut query = vec![("jql", jql.to_string())];
                query.push(("startAt", optional_u64(args, "startAt")?.unwrap_or(0).to_string()));
                query.push(("maxResults", optional_u64(args, "maxResults")?.unwrap_or(50).to_string()));
                Fetch {
                    tool: "search_issues",
                    entity: EntityType::Issue,
                    path: "/rest/api/2/search".to_string(),
                    query,
                    items_key: Some("issues"),
                }
            }
            "get_project" => Fetch {
                tool: "get_project",
                entity: EntityType::Project,
                path: format!("/rest/api/2/project/{}", path_segment(args, "projectKey")?),
                query: vec![],
                items_key: None,
            },
            "list_projects" => Fetch {
                tool: "list_projects",
                entity: EntityType::Project,
                path: "/rest/api/2/project".to_string(),
                query: vec![],
                items_key: None,
            },
            "get_user" => Fetch {
                tool: "get_user",
                entity: EntityType::User,
                path: "/rest/api/2/user".to_string(),
                query: vec![("username", required_str(args, "username")?.to_string())],
                items_key: None,
            },
            "get_current_user" => Fetch {
                tool: "get_current_user",
                entity: EntityType::User,
                path: "/rest/api/2/myself".to_string(),
                query: vec![],
                items_key: None,
            },
            "search_users" => {
                let mut query = vec![("username", required_str(args, "query")?.to_string())];
                if let Some(n) = optional_u64(args, "maxResults")? {
                    query.push(("maxResults", n.to_string()));
                }
                Fetch {
                    tool: "search_users",
                    entity: EntityType::User,
                    path: "/rest/api/2/user/search".to_string(),
                    query,
                    items_key: None,
                }
            }
            "list_boards" => {
                let mut query = Vec::new();
                if let Some(p) = optional_str(args, "projectKey") {
                    query.push(("projectKeyOrId", p.to_string()));
                }
                if let Some(n) = optional_u64(args, "startAt")? {
                    query.push(("startAt", n.to_string()));
                }
                if let Some(n) = optional_u64(args, "maxResults")? {
                    query.push(("maxResults", n.to_string()));
                }
                Fetch {
                    tool: "list_boards",
                    entity: EntityType::Agile,
                    path: "/rest/agile/1.0/board".to_string(),
                    query,
                    items_key: Some("values"),
                }
            }
            "get_board" => Fetch {
                tool: "get_board",
                entity: EntityType::Agile,
                path: format!("/rest/agile/1.0/board/{}", required_id(args, "boardId")?),
                query: vec![],
                items_key: None,
            },
            "list_sprints" => {
                let board = required_id(args, "boardId")?;
                let mut query = Vec::new();
                if let Some(state) = optional_str(args, "state") {
                    query.push(("state", state.to_string()));
                }
                Fetch {
                    tool: "list_sprints",
                    entity: EntityType::Agile,
                    path: format!("/rest/agile/1.0/board/{board}/sprint"),
                    query,
                    items_key: Some("values"),
                }
            }
            "get_sprint" => Fetch {
                tool: "get_sprint",
                entity: EntityType::Agile,
                path: format!("/rest/agile/1.0/sprint/{}", required_id(args, "sprintId")?),
                query: vec![],
                items_key: None,
            },
            "get_server_info" => Fetch {
                tool: "get_server_info",
                entity: EntityType::System,
                path: "/rest/api/2/serverInfo".to_string(),
                query: vec![],
                items_key: None,
            },
            _ => return Ok(None),
        };
        self.fetch_shaped(fetch, args).map(Some)
    }

    fn fetch_shaped(&self, mut fetch: Fetch<'_>, args: &Value) -> Result<Value, ToolError> {
        let entity = fetch.entity.as_str();
        let gate = FieldGate::new(&self.registry, &self.cfg.field_filter);
        // Rejection happens here, before any upstream call.
        let sel = gate.select(entity, parse_fields_arg(args)?)?;

        let api = self.api.as_deref().ok_or(ToolError::NotConfigured)?;

        if fetch.entity == EntityType::Issue {
            if let Some(upstream) = upstream_issue_fields(&sel) {
                fetch.query.push(("fields", upstream));
            }
        }

        let raw = api
            .get_json(&fetch.path, &fetch.query)
            .map_err(|source| ToolError::Upstream {
                context: fetch.tool.to_string(),
                source,
            })?;

        let raw = if fetch.entity == EntityType::Issue {
            hoist_issues(raw, fetch.items_key)
        } else {
            raw
        };

        let shaped = match fetch.items_key {
            Some(key) => gate.shape_items(entity, raw, key, &sel),
            None => gate.shape(entity, raw, &sel),
        };
        Ok(envelope(shaped, &sel))
    }

    fn validate_fields(&self, args: &Value) -> Result<Value, ToolError> {
        let entity = required_str(args, "entityType")?;
        let fields = parse_fields_arg(args)?.ok_or(ToolError::MissingArgument("fields"))?;
        let validator = FieldValidator::new(&self.registry).with_max_suggestions(self.cfg.field_filter.max_suggestions);
        match validator.validate(entity, &fields) {
            Ok(result) => serde_json::to_value(&result).map_err(|e| ToolError::InvalidArgument {
                name: "fields",
                reason: e.to_string(),
            }),
            Err(e) => Err(ToolError::InvalidArgument {
                name: "fields",
                reason: e.to_string(),
            }),
        }
    }

    fn list_fields(&self, args: &Value) -> Result<Value, ToolError> {
        let entity = required_str(args, "entityType")?;
        let def = self.registry.get(entity).map_err(|e| ToolError::InvalidArgument {
            name: "entityType",
            reason: format!(
                "{e} (expected one of: {})",
                self.registry.entity_types().map(|t| t.as_str()).collect::<Vec<_>>().join(", ")
            ),
        })?;
        Ok(def.to_json())
    }

    /// Handle one JSON-RPC message; `None` for notifications.
    pub fn handle_message(&self, msg: &Value) -> Option<Value> {
        // Notifications carry no "id" and get no reply.
        let id = msg.get("id").cloned()?;
        let method = msg.get("method").and_then(|m| m.as_str()).unwrap_or("");

        let reply = match method {
            "initialize" => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "protocolVersion": msg.get("params").and_then(|p| p.get("protocolVersion")).cloned().unwrap_or(json!("2024-11-05")),
                    "capabilities": { "tools": { "listChanged": false } },
                    "serverInfo": { "name": "jira-server-mcp", "version": env!("CARGO_PKG_VERSION") }
                }
            }),
            "ping" => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {}
            }),
            "tools/list" => self.tool_list(id),
            "tools/call" => {
                let params = msg.get("params").cloned().unwrap_or(json!({}));
                self.tool_call(id, &params)
            }
            // No resources or prompts are exposed.
            "resources/list" => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "resources": [] }
            }),
            "prompts/list" => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "prompts": [] }
            }),
            _ => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": format!("Method not found: {method}") }
            }),
        };
        Some(reply)
    }
}

/// Builtin catalogs with the configured custom fields registered on `issue`.
pub fn build_registry(cfg: &Config) -> Result<Registry> {
    let custom = cfg.custom_fields.iter().map(|c| c.to_field_definition()).collect();
    Registry::builtin()
        .and_then(|r| r.extend(EntityType::Issue, custom))
        .context("building field registry")
}

/// Distinct top-level issue fields for Jira's `fields=` parameter.
fn upstream_issue_fields(sel: &FieldSelection) -> Option<String> {
    let paths = sel.paths.as_deref()?;
    let top: Vec<String> = top_level_fields(paths)
        .into_iter()
        .filter(|f| !ISSUE_ENVELOPE_KEYS.contains(&f.as_str()))
        .collect();
    if top.is_empty() {
        None
    } else {
        Some(top.join(","))
    }
}

fn hoist_issues(raw: Value, items_key: Option<&str>) -> Value {
    match items_key {
        None => hoist_issue_fields(raw),
        Some(key) => {
            let mut raw = raw;
            if let Some(Value::Array(items)) = raw.get_mut(key) {
                let hoisted: Vec<Value> = items.drain(..).map(hoist_issue_fields).collect();
                *items = hoisted;
            }
            raw
        }
    }
}

fn required_str<'a>(args: &'a Value, name: &'static str) -> Result<&'a str, ToolError> {
    args.get(name)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(ToolError::MissingArgument(name))
}

fn optional_str<'a>(args: &'a Value, name: &str) -> Option<&'a str> {
    args.get(name)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn optional_u64(args: &Value, name: &'static str) -> Result<Option<u64>, ToolError> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_u64().map(Some).ok_or_else(|| ToolError::InvalidArgument {
            name,
            reason: format!("expected a non-negative integer, found {v}"),
        }),
    }
}

/// Board / sprint ids: a number or a numeric string.
fn required_id(args: &Value, name: &'static str) -> Result<u64, ToolError> {
    match args.get(name) {
        None | Some(Value::Null) => Err(ToolError::MissingArgument(name)),
        Some(Value::String(s)) => s.trim().parse::<u64>().map_err(|_| ToolError::InvalidArgument {
            name,
            reason: format!("expected a numeric id, found {s:?}"),
        }),
        Some(v) => v.as_u64().ok_or_else(|| ToolError::InvalidArgument {
            name,
            reason: format!("expected a numeric id, found {v}"),
        }),
    }
}

/// Issue / project keys go into the URL path: letters, digits, `-` and `_` only.
fn path_segment<'a>(args: &'a Value, name: &'static str) -> Result<&'a str, ToolError> {
    let s = required_str(args, name)?;
    if s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        Ok(s)
    } else {
        Err(ToolError::InvalidArgument {
            name,
            reason: format!("{s:?} is not a valid key"),
        })
    }
}

pub fn run_stdio_server() -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to get current dir")?;
    let state = ServerState::from_config(load_config(&cwd))?;
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    serve(&state, stdin.lock(), stdout.lock())
}

/// Line-delimited JSON-RPC loop; returns when `input` is exhausted.
pub fn serve(state: &ServerState, input: impl BufRead, mut output: impl Write) -> Result<()> {
    for line in input.lines() {
        let Ok(line) = line else { continue };
        if line.trim().is_empty() {
            continue;
        }

        let msg: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(_) => continue,
        };

        let Some(reply) = state.handle_message(&msg) else { continue };
        writeln!(output, "{}", reply)?;
        output.flush()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    type Calls = Rc<RefCell<Vec<(String, Vec<(String, String)>)>>>;

    struct FakeApi {
        responses: HashMap<String, Value>,
        calls: Calls,
    }

    impl JiraApi for FakeApi {
        fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
            self.calls.borrow_mut().push((
                path.to_string(),
                query.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            ));
            self.responses
                .get(path)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("GET {path} returned HTTP 404: Issue does not exist"))
        }
    }

    fn state_with(responses: Vec<(&str, Value)>) -> (ServerState, Calls) {
        let calls: Calls = Rc::default();
        let api = FakeApi {
            responses: responses.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            calls: calls.clone(),
        };
        let state = ServerState::new(Registry::builtin().unwrap(), Config::default(), Some(Box::new(api)));
        (state, calls)
    }

    fn call_tool(state: &ServerState, name: &str, args: Value) -> (bool, String) {
        let reply = state
            .handle_message(&json!({
                "jsonrpc": "2.0", "id": 7, "method": "tools/call",
                "params": { "name": name, "arguments": args }
            }))
            .unwrap();
        let result = &reply["result"];
        (
            result["isError"].as_bool().unwrap(),
            result["content"][0]["text"].as_str().unwrap().to_string(),
        )
    }

    fn issue_fixture() -> Value {
        json!({
            "id": "10001",
            "key": "PROJ-1",
            "self": "https://jira.example.com/rest/api/2/issue/10001",
            "fields": {
                "summary": "Broken login",
                "status": {"name": "Open", "statusCategory": {"key": "new", "name": "To Do"}},
                "assignee": {"name": "ann", "displayName": "Ann", "active": true},
                "customfield_10001": 5
            }
        })
    }

    #[test]
    fn get_issue_projects_requested_paths() {
        let (state, calls) = state_with(vec![("/rest/api/2/issue/PROJ-1", issue_fixture())]);
        let (is_err, text) = call_tool(
            &state,
            "get_issue",
            json!({"issueKey": "PROJ-1", "fields": ["key", "status.statusCategory.key", "assignee.displayName", "assignee.active"]}),
        );
        assert!(!is_err, "{text}");
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            v,
            json!({"key": "PROJ-1", "status": {"statusCategory": {"key": "new"}}, "assignee": {"displayName": "Ann", "active": true}})
        );

        let calls = calls.borrow();
        assert_eq!(calls.len(), 1);
        let fields_q = calls[0].1.iter().find(|(k, _)| k == "fields").map(|(_, v)| v.as_str());
        assert_eq!(fields_q, Some("status,assignee"));
    }

    #[test]
    fn partial_invalid_fields_wrap_with_warning() {
        let (state, _calls) = state_with(vec![("/rest/api/2/issue/PROJ-1", issue_fixture())]);
        let (is_err, text) = call_tool(
            &state,
            "get_issue",
            json!({"issueKey": "PROJ-1", "fields": ["summary", "sumary.text"]}),
        );
        assert!(!is_err);
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["data"], json!({"summary": "Broken login"}));
        assert!(v["warning"].as_str().unwrap().contains("sumary.text"));
    }

    #[test]
    fn all_invalid_fields_fail_before_fetch() {
        let (state, calls) = state_with(vec![("/rest/api/2/issue/PROJ-1", issue_fixture())]);
        let (is_err, text) = call_tool(&state, "get_issue", json!({"issueKey": "PROJ-1", "fields": ["bogus1", "bogus2"]}));
        assert!(is_err);
        assert!(text.contains("bogus1, bogus2"), "{text}");
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn no_fields_returns_full_flattened_issue() {
        let (state, calls) = state_with(vec![("/rest/api/2/issue/PROJ-1", issue_fixture())]);
        let (_, text) = call_tool(&state, "get_issue", json!({"issueKey": "PROJ-1"}));
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["summary"], "Broken login");
        assert_eq!(v["customfield_10001"], 5);
        assert!(v.get("fields").is_none());
        assert!(calls.borrow()[0].1.iter().all(|(k, _)| k != "fields"));
    }

    #[test]
    fn search_projects_each_issue_and_keeps_paging() {
        let page = json!({"startAt": 0, "maxResults": 50, "total": 2, "issues": [issue_fixture(), {"id": "2", "key": "PROJ-2", "fields": {"summary": "x"}}]});
        let (state, calls) = state_with(vec![("/rest/api/2/search", page)]);
        let (is_err, text) = call_tool(&state, "search_issues", json!({"jql": "project = PROJ", "fields": ["key", "status.name"]}));
        assert!(!is_err, "{text}");
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["total"], 2);
        assert_eq!(v["issues"], json!([{"key": "PROJ-1", "status": {"name": "Open"}}, {"key": "PROJ-2"}]));
        let q = &calls.borrow()[0].1;
        assert!(q.contains(&("jql".to_string(), "project = PROJ".to_string())));
        assert!(q.contains(&("maxResults".to_string(), "50".to_string())));
    }

    #[test]
    fn list_projects_maps_array() {
        let projects = json!([{"key": "A", "name": "Alpha", "id": "1"}, {"key": "B", "name": "Beta", "id": "2"}]);
        let (state, _) = state_with(vec![("/rest/api/2/project", projects)]);
        let (_, text) = call_tool(&state, "list_projects", json!({"fields": ["key"]}));
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v, json!([{"key": "A"}, {"key": "B"}]));
    }

    #[test]
    fn sprint_tools_accept_string_ids() {
        let sprints = json!({"maxResults": 50, "isLast": true, "values": [{"id": 3, "name": "S1", "state": "active", "goal": "ship"}]});
        let (state, calls) = state_with(vec![("/rest/agile/1.0/board/12/sprint", sprints)]);
        let (is_err, text) = call_tool(&state, "list_sprints", json!({"boardId": "12", "state": "active", "fields": ["name", "state"]}));
        assert!(!is_err, "{text}");
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["values"], json!([{"name": "S1", "state": "active"}]));
        assert_eq!(v["isLast"], true);
        assert_eq!(calls.borrow()[0].1, vec![("state".to_string(), "active".to_string())]);
    }

    #[test]
    fn upstream_errors_are_tool_errors() {
        let (state, _) = state_with(vec![]);
        let (is_err, text) = call_tool(&state, "get_issue", json!({"issueKey": "NOPE-1"}));
        assert!(is_err);
        assert!(text.starts_with("get_issue failed"), "{text}");
        assert!(text.contains("404"));
    }

    #[test]
    fn bad_arguments_are_rejected() {
        let (state, calls) = state_with(vec![]);
        assert!(call_tool(&state, "get_issue", json!({})).0);
        assert!(call_tool(&state, "get_issue", json!({"issueKey": "../admin"})).0);
        assert!(call_tool(&state, "get_board", json!({"boardId": "twelve"})).0);
        assert!(call_tool(&state, "search_issues", json!({"jql": "x", "maxResults": -1})).0);
        assert!(call_tool(&state, "get_issue", json!({"issueKey": "A-1", "fields": [1, 2]})).0);
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn fetch_without_connection_reports_not_configured() {
        let state = ServerState::new(Registry::builtin().unwrap(), Config::default(), None);
        let (is_err, text) = call_tool(&state, "get_current_user", json!({}));
        assert!(is_err);
        assert!(text.contains("not configured"));
        // invalid fields still fail first
        let (_, text) = call_tool(&state, "get_current_user", json!({"fields": ["bogus"]}));
        assert!(text.starts_with("None of the requested fields are valid for user"));
    }

    #[test]
    fn validate_and_list_fields_work_offline() {
        let state = ServerState::new(Registry::builtin().unwrap(), Config::default(), None);
        let (is_err, text) = call_tool(
            &state,
            "validate_fields",
            json!({"entityType": "issue", "fields": ["status.statusCategory.key", "nonexistent"]}),
        );
        assert!(!is_err);
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["isValid"], false);
        assert_eq!(v["validPaths"], json!(["status.statusCategory.key"]));
        assert_eq!(v["invalidPaths"], json!(["nonexistent"]));
        assert!(!v["suggestions"]["nonexistent"].as_array().unwrap().is_empty());

        let (is_err, text) = call_tool(&state, "list_fields", json!({"entityType": "agile"}));
        assert!(!is_err);
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["entityType"], "agile");
        assert!(v["totalFields"].as_u64().unwrap() > 0);

        let (is_err, text) = call_tool(&state, "list_fields", json!({"entityType": "workflow"}));
        assert!(is_err);
        assert!(text.contains("issue, project, user, agile, system"), "{text}");
    }

    #[test]
    fn protocol_methods() {
        let state = ServerState::new(Registry::builtin().unwrap(), Config::default(), None);
        assert!(state.handle_message(&json!({"jsonrpc": "2.0", "method": "notifications/initialized"})).is_none());
        let r = state.handle_message(&json!({"jsonrpc": "2.0", "id": 1, "method": "nope"})).unwrap();
        assert_eq!(r["error"]["code"], -32601);
        let r = state.handle_message(&json!({"jsonrpc": "2.0", "id": 2, "method": "tools/call", "params": {"name": "nope"}})).unwrap();
        assert_eq!(r["result"]["isError"], true);
    }

    #[test]
    fn serve_skips_garbage_lines() {
        let state = ServerState::new(Registry::builtin().unwrap(), Config::default(), None);
        let input = "not json\n\n{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n";
        let mut out: Vec<u8> = Vec::new();
        serve(&state, input.as_bytes(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("\"id\":1"));
    }
}
