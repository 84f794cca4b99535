//! Field-path validation against the schema registry, with typo suggestions.
//!
//! Matching is exact: no trimming, no case folding, no dot normalisation.
//! Suggestions are ranked by a deterministic integer score so the same input
//! always produces the same list.

use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::error::FieldError;
use crate::schema::{EntityType, FieldInfo, Frequency, Registry, ResourceDefinition, ValueType};

/// Longest path the validator will score; longer input is a caller bug.
pub const MAX_PATH_LEN: usize = 256;

pub const DEFAULT_MAX_SUGGESTIONS: usize = 5;

/// Candidates scoring below this are not offered (out of ~1000 for a close match).
const SUGGESTION_THRESHOLD: u32 = 500;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub valid_paths: Vec<String>,
    pub invalid_paths: Vec<String>,
    pub suggestions: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_info: Option<BTreeMap<String, FieldInfo>>,
}

impl ValidationResult {
    /// Everything accepted, nothing checked.
    pub fn pass_through(paths: &[String]) -> Self {
        Self {
            is_valid: true,
            valid_paths: paths.to_vec(),
            invalid_paths: Vec::new(),
            suggestions: BTreeMap::new(),
            path_info: None,
        }
    }
}

fn custom_field_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^customfield_\d+$").expect("static regex"))
}

/// `customfield_10001` or `customfield_10001.value`: dynamic issue keys that are
/// never enumerated in the catalog.
pub fn is_custom_field_path(path: &str) -> bool {
    let mut segments = path.split('.');
    let Some(first) = segments.next() else { return false };
    custom_field_re().is_match(first) && segments.all(|s| !s.is_empty())
}

pub struct FieldValidator<'r> {
    registry: &'r Registry,
    max_suggestions: usize,
}

impl<'r> FieldValidator<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            max_suggestions: DEFAULT_MAX_SUGGESTIONS,
        }
    }

    pub fn with_max_suggestions(mut self, n: usize) -> Self {
        self.max_suggestions = n.clamp(1, 10);
        self
    }

    pub fn validate(&self, entity_type: &str, paths: &[String]) -> Result<ValidationResult, FieldError> {
        if let Some(p) = paths.iter().find(|p| p.len() > MAX_PATH_LEN) {
            return Err(FieldError::PathTooLong {
                len: p.len(),
                max: MAX_PATH_LEN,
            });
        }

        let def = match self.registry.get(entity_type) {
            Ok(def) => def,
            Err(_e) => {
                crate::debug_log!("[validator] {_e}; accepting {} path(s) unchecked", paths.len());
                return Ok(ValidationResult::pass_through(paths));
            }
        };

        let mut valid_paths = Vec::new();
        let mut invalid_paths = Vec::new();
        let mut suggestions: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut path_info: BTreeMap<String, FieldInfo> = BTreeMap::new();

        for path in paths {
            if let Some(info) = def.resolve(path) {
                path_info.insert(path.clone(), info);
                valid_paths.push(path.clone());
            } else if def.entity_type() == EntityType::Issue && is_custom_field_path(path) {
                path_info.insert(path.clone(), custom_field_info(path));
                valid_paths.push(path.clone());
            } else {
                if !suggestions.contains_key(path) {
                    suggestions.insert(path.clone(), self.suggest(def, path));
                }
                invalid_paths.push(path.clone());
            }
        }

        Ok(ValidationResult {
            is_valid: invalid_paths.is_empty(),
            valid_paths,
            invalid_paths,
            suggestions,
            path_info: Some(path_info),
        })
    }

    /// Closest known paths for `requested`, best first, at most `max_suggestions`.
    pub fn suggest(&self, def: &ResourceDefinition, requested: &str) -> Vec<String> {
        let req = requested.to_lowercase();
        let mut scored: Vec<(u32, Frequency, &str)> = def
            .all_paths()
            .filter_map(|cand| {
                let s = score(&req, &cand.to_lowercase());
                if s < SUGGESTION_THRESHOLD {
                    return None;
                }
                let freq = def.access_path(cand).map(|a| a.frequency).unwrap_or_default();
                Some((s, freq, cand))
            })
            .collect();

        if scored.is_empty() {
            return fallback_suggestions(def, self.max_suggestions);
        }

        scored.sort_by(|(sa, fa, pa), (sb, fb, pb)| {
            sb.cmp(sa)
                .then_with(|| fa.rank().cmp(&fb.rank()))
                .then_with(|| pa.cmp(pb))
        });
        scored
            .into_iter()
            .take(self.max_suggestions)
            .map(|(_, _, p)| p.to_string())
            .collect()
    }
}

/// Validate with the default suggestion count.
pub fn validate_field_paths(
    registry: &Registry,
    entity_type: &str,
    paths: &[String],
) -> Result<ValidationResult, FieldError> {
    FieldValidator::new(registry).validate(entity_type, paths)
}

fn custom_field_info(path: &str) -> FieldInfo {
    let field_id = path.split('.').next().unwrap_or(path).to_string();
    FieldInfo {
        field_name: field_id.clone(),
        field_id,
        path: path.to_string(),
        value_type: ValueType::Object,
        description: "Custom field (not in the catalog)".to_string(),
        frequency: Frequency::Low,
        custom: true,
    }
}

/// Common-usage paths, then high-frequency paths, deduplicated.
fn fallback_suggestions(def: &ResourceDefinition, limit: usize) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let high = def
        .all_paths()
        .filter(|p| matches!(def.access_path(p).map(|a| a.frequency), Some(Frequency::High)));
    for p in def.common_usage().chain(high) {
        if out.len() >= limit {
            break;
        }
        if !out.iter().any(|o| o == p) {
            out.push(p.to_string());
        }
    }
    out
}

fn last_segment(p: &str) -> &str {
    p.rsplit('.').next().unwrap_or(p)
}

fn first_segment(p: &str) -> &str {
    p.split('.').next().unwrap_or(p)
}

/// 0..=1000: 1000 for identical strings, 0 for nothing in common.
fn similarity(a: &str, b: &str) -> u32 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1000;
    }
    let dist = levenshtein(a, b).min(max_len);
    ((max_len - dist) * 1000 / max_len) as u32
}

/// Both inputs already lowercased. Full-path similarity weighs 3:2 against the
/// final segment's, plus flat bonuses for containment and shared segments.
fn score(req: &str, cand: &str) -> u32 {
    let req_last = last_segment(req);
    let cand_last = last_segment(cand);
    let mut s = (similarity(req, cand) * 3 + similarity(req_last, cand_last) * 2) / 5;

    if cand.starts_with(req) || (req.len() >= 3 && cand.contains(req)) {
        s += 250;
    }
    if !req_last.is_empty() && req_last == cand_last {
        s += 100;
    }
    if first_segment(req) == first_segment(cand) && !first_segment(req).is_empty() {
        s += 100;
    }
    s
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur: Vec<usize> = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            cur[j + 1] = (prev[j + 1] + 1).min(cur[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn registry() -> Registry {
        Registry::builtin().unwrap()
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("status", "status"), 0);
        assert_eq!(levenshtein("stauts", "status"), 2);
    }

    #[test]
    fn valid_and_invalid_are_partitioned() {
        let reg = registry();
        let r = validate_field_paths(&reg, "issue", &paths(&["status.statusCategory.key", "nonexistent"])).unwrap();
        assert!(!r.is_valid);
        assert_eq!(r.valid_paths, paths(&["status.statusCategory.key"]));
        assert_eq!(r.invalid_paths, paths(&["nonexistent"]));
        assert!(!r.suggestions["nonexistent"].is_empty());
        let info = &r.path_info.as_ref().unwrap()["status.statusCategory.key"];
        assert_eq!(info.field_id, "status");
    }

    #[test]
    fn duplicates_are_preserved_in_order() {
        let reg = registry();
        let input = paths(&["summary", "bogus", "summary", "bogus", "key"]);
        let r = validate_field_paths(&reg, "issue", &input).unwrap();
        assert_eq!(r.valid_paths, paths(&["summary", "summary", "key"]));
        assert_eq!(r.invalid_paths, paths(&["bogus", "bogus"]));
        assert_eq!(r.valid_paths.len() + r.invalid_paths.len(), input.len());
        assert_eq!(r.suggestions.len(), 1);
    }

    #[test]
    fn empty_input_is_vacuously_valid() {
        let reg = registry();
        let r = validate_field_paths(&reg, "project", &[]).unwrap();
        assert!(r.is_valid);
        assert!(r.valid_paths.is_empty());
        assert!(r.invalid_paths.is_empty());
    }

    #[test]
    fn unknown_entity_passes_everything_through() {
        let reg = registry();
        let input = paths(&["anything", "at.all"]);
        let r = validate_field_paths(&reg, "workflow", &input).unwrap();
        assert!(r.is_valid);
        assert_eq!(r.valid_paths, input);
        assert!(r.path_info.is_none());
    }

    #[test]
    fn no_normalisation_of_dots_or_case() {
        let reg = registry();
        let input = paths(&["status.", ".status", "status..name", "Status", " status"]);
        let r = validate_field_paths(&reg, "issue", &input).unwrap();
        assert!(r.valid_paths.is_empty());
        assert_eq!(r.invalid_paths, input);
    }

    #[test]
    fn zero_depth_field_path_is_valid() {
        let reg = registry();
        let r = validate_field_paths(&reg, "issue", &paths(&["status", "labels"])).unwrap();
        assert!(r.is_valid);
    }

    #[test]
    fn all_invalid_yields_no_valid_paths() {
        let reg = registry();
        for entity in ["issue", "project", "user", "agile", "system"] {
            let r = validate_field_paths(&reg, entity, &paths(&["bogus1", "bogus2"])).unwrap();
            assert!(!r.is_valid, "{entity}");
            assert!(r.valid_paths.is_empty(), "{entity}");
            assert_eq!(r.invalid_paths.len(), 2);
        }
    }

    #[test]
    fn custom_fields_are_accepted_for_issues_only() {
        let reg = registry();
        let input = paths(&["customfield_10001", "customfield_10002.value"]);
        let r = validate_field_paths(&reg, "issue", &input).unwrap();
        assert!(r.is_valid);
        assert!(r.path_info.as_ref().unwrap()["customfield_10001"].custom);

        let r = validate_field_paths(&reg, "issue", &paths(&["customfield_10001.", "customfield_x"])).unwrap();
        assert_eq!(r.invalid_paths.len(), 2);

        let r = validate_field_paths(&reg, "project", &paths(&["customfield_10001"])).unwrap();
        assert!(!r.is_valid);
    }

    #[test]
    fn typo_suggests_the_intended_path_first() {
        let reg = registry();
        let r = validate_field_paths(&reg, "issue", &paths(&["stauts.name", "assignee.displayname"])).unwrap();
        assert_eq!(r.suggestions["stauts.name"][0], "status.name");
        assert_eq!(r.suggestions["assignee.displayname"][0], "assignee.displayName");
    }

    #[test]
    fn bare_leaf_suggests_every_nested_match() {
        let reg = registry();
        let r = validate_field_paths(&reg, "issue", &paths(&["displayName"])).unwrap();
        let s = &r.suggestions["displayName"];
        let mut top: Vec<&str> = s.iter().take(3).map(String::as_str).collect();
        top.sort();
        assert_eq!(top, vec!["assignee.displayName", "creator.displayName", "reporter.displayName"]);
        // equal scores: alphabetical
        let a = s.iter().position(|p| p == "assignee.displayName").unwrap();
        let r = s.iter().position(|p| p == "reporter.displayName").unwrap();
        assert!(a < r);
    }

    #[test]
    fn suggestions_are_bounded_and_deterministic() {
        let reg = registry();
        let v = FieldValidator::new(&reg).with_max_suggestions(3);
        let a = v.validate("issue", &paths(&["status.x"])).unwrap();
        let b = v.validate("issue", &paths(&["status.x"])).unwrap();
        assert_eq!(a, b);
        assert!(a.suggestions["status.x"].len() <= 3);
        assert!(!a.suggestions["status.x"].is_empty());
    }

    #[test]
    fn garbage_falls_back_to_common_paths() {
        let reg = registry();
        let r = validate_field_paths(&reg, "user", &paths(&["qqqqqqqqqqqqqqqq"])).unwrap();
        let s = &r.suggestions["qqqqqqqqqqqqqqqq"];
        assert_eq!(s[0], "name");
        assert!(s.len() <= DEFAULT_MAX_SUGGESTIONS);
    }

    #[test]
    fn overlong_path_is_an_error() {
        let reg = registry();
        let long = "a".repeat(MAX_PATH_LEN + 1);
        let err = validate_field_paths(&reg, "issue", &[long]).unwrap_err();
        assert!(matches!(err, FieldError::PathTooLong { .. }));
    }
}
