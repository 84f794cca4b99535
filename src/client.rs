use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::time::Duration;

use crate::config::JiraConfig;

/// Read-only access to the Jira REST API.
///
/// `path` is relative to the base URL (`/rest/api/2/myself`); `query` pairs are
/// URL-encoded by the implementation.
pub trait JiraApi {
    fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value>;
}

/// Blocking ureq client authenticated with a personal access token.
pub struct JiraClient {
    agent: ureq::Agent,
    base_url: String,
    token: String,
}

const MAX_ERROR_BODY: usize = 500;

impl JiraClient {
    pub fn new(cfg: &JiraConfig) -> Result<Self> {
        let base_url = cfg.base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(anyhow!("jira.base_url is empty"));
        }
        let token = cfg
            .personal_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .context("jira.personal_token is not set")?
            .to_string();
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .user_agent(concat!("jira-server-mcp/", env!("CARGO_PKG_VERSION")))
            .build();
        Ok(Self { agent, base_url, token })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

impl JiraApi for JiraClient {
    fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = self.url(path);
        let mut req = self
            .agent
            .get(&url)
            .set("Authorization", &format!("Bearer {}", self.token))
            .set("Accept", "application/json");
        for (k, v) in query {
            req = req.query(k, v);
        }

        match req.call() {
            Ok(resp) => resp
                .into_json::<Value>()
                .with_context(|| format!("decoding JSON from GET {path}")),
            Err(ureq::Error::Status(code, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                Err(anyhow!(
                    "GET {path} returned HTTP {code}: {}",
                    error_excerpt(&body)
                ))
            }
            Err(e) => Err(anyhow!(e).context(format!("GET {path}"))),
        }
    }
}

/// Jira error bodies are `{"errorMessages": [...], "errors": {...}}`; fall back
/// to the raw text, truncated.
fn error_excerpt(body: &str) -> String {
    if let Ok(v) = serde_json::from_str::<Value>(body) {
        let mut parts: Vec<String> = v
            .get("errorMessages")
            .and_then(|m| m.as_array())
            .map(|a| a.iter().filter_map(|s| s.as_str().map(String::from)).collect())
            .unwrap_or_default();
        if let Some(errors) = v.get("errors").and_then(|e| e.as_object()) {
            for (k, msg) in errors {
                parts.push(format!("{k}: {}", msg.as_str().unwrap_or_default()));
            }
        }
        if !parts.is_empty() {
            return parts.join("; ");
        }
    }
    let trimmed = body.trim();
    if trimmed.chars().count() > MAX_ERROR_BODY {
        let cut: String = trimmed.chars().take(MAX_ERROR_BODY).collect();
        format!("{cut}…")
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_requires_url_and_token() {
        let mut cfg = JiraConfig::default();
        assert!(JiraClient::new(&cfg).is_err());
        cfg.base_url = "https://jira.example.com/".into();
        assert!(JiraClient::new(&cfg).is_err());
        cfg.personal_token = Some("  ".into());
        assert!(JiraClient::new(&cfg).is_err());
        cfg.personal_token = Some("pat".into());
        let client = JiraClient::new(&cfg).unwrap();
        assert_eq!(client.url("/rest/api/2/myself"), "https://jira.example.com/rest/api/2/myself");
        assert_eq!(client.url("rest/api/2/myself"), "https://jira.example.com/rest/api/2/myself");
    }

    #[test]
    fn error_excerpt_prefers_jira_messages() {
        let body = r#"{"errorMessages": ["Issue does not exist"], "errors": {"jql": "bad query"}}"#;
        assert_eq!(error_excerpt(body), "Issue does not exist; jql: bad query");
        assert_eq!(error_excerpt("  plain text  "), "plain text");
        let long = "x".repeat(MAX_ERROR_BODY + 10);
        assert!(error_excerpt(&long).ends_with('…'));
    }
}
