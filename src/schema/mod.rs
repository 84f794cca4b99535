//! Field catalogs per entity type and the reverse path index built from them.
//!
//! Catalogs are authored as YAML under `schema/catalog/` and embedded into the
//! binary. [`Registry::builtin`] parses them once at startup; after that the
//! registry is read-only and shared by reference across tool calls.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::SchemaError;

const ISSUE_CATALOG: &str = include_str!("catalog/issue.yml");
const PROJECT_CATALOG: &str = include_str!("catalog/project.yml");
const USER_CATALOG: &str = include_str!("catalog/user.yml");
const AGILE_CATALOG: &str = include_str!("catalog/agile.yml");
const SYSTEM_CATALOG: &str = include_str!("catalog/system.yml");

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Issue,
    Project,
    User,
    Agile,
    System,
}

impl EntityType {
    pub const ALL: [EntityType; 5] = [
        EntityType::Issue,
        EntityType::Project,
        EntityType::User,
        EntityType::Agile,
        EntityType::System,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Issue => "issue",
            EntityType::Project => "project",
            EntityType::User => "user",
            EntityType::Agile => "agile",
            EntityType::System => "system",
        }
    }

    /// Exact, lowercase match on the entity name.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.as_str() == s)
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Object,
    String,
    Array,
    Number,
    Boolean,
}

/// Semantic type of the value an access path lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

/// How often callers ask for a path. Ranking hint only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    High,
    Medium,
    Low,
}

impl Default for Frequency {
    fn default() -> Self {
        Frequency::Medium
    }
}

impl Frequency {
    /// 0 for high; lower sorts first.
    pub fn rank(self) -> u8 {
        match self {
            Frequency::High => 0,
            Frequency::Medium => 1,
            Frequency::Low => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessPath {
    pub path: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default)]
    pub frequency: Frequency,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub access_paths: Vec<AccessPath>,
    #[serde(default)]
    pub examples: Vec<String>,
    /// Groups of paths usually requested together.
    #[serde(default)]
    pub common_usage: Vec<Vec<String>>,
}

/// Resolved metadata for one valid path.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldInfo {
    pub field_id: String,
    pub field_name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    pub description: String,
    pub frequency: Frequency,
    /// Set for `customfield_*` paths accepted without registration.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub custom: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogFile {
    version: String,
    last_updated: String,
    fields: Vec<FieldDefinition>,
}

/// Full schema for one entity type.
///
/// `path_index` and `ordered_paths` are derived from `fields` and rebuilt by every
/// constructor, so there is no way to observe them out of sync.
#[derive(Debug, Clone)]
pub struct ResourceDefinition {
    entity_type: EntityType,
    fields: BTreeMap<String, FieldDefinition>,
    /// Field ids in declaration order.
    field_order: Vec<String>,
    path_index: HashMap<String, (String, usize)>,
    ordered_paths: Vec<String>,
    version: String,
    last_updated: String,
}

impl ResourceDefinition {
    pub fn new(
        entity_type: EntityType,
        version: impl Into<String>,
        last_updated: impl Into<String>,
        fields: Vec<FieldDefinition>,
    ) -> Result<Self, SchemaError> {
        let entity = entity_type.as_str();
        let mut by_id: BTreeMap<String, FieldDefinition> = BTreeMap::new();
        let mut field_order: Vec<String> = Vec::with_capacity(fields.len());
        let mut path_index: HashMap<String, (String, usize)> = HashMap::new();
        let mut ordered_paths: Vec<String> = Vec::new();

        for field in fields {
            if by_id.contains_key(&field.id) {
                return Err(SchemaError::DuplicateField {
                    entity: entity.to_string(),
                    field: field.id,
                });
            }
            for (i, ap) in field.access_paths.iter().enumerate() {
                if !is_rooted_at(&ap.path, &field.id) {
                    return Err(SchemaError::UnrootedPath {
                        entity: entity.to_string(),
                        field: field.id.clone(),
                        path: ap.path.clone(),
                    });
                }
                if let Some((owner, _)) = path_index.get(&ap.path) {
                    return Err(SchemaError::DuplicatePath {
                        entity: entity.to_string(),
                        path: ap.path.clone(),
                        first: owner.clone(),
                        second: field.id.clone(),
                    });
                }
                path_index.insert(ap.path.clone(), (field.id.clone(), i));
                ordered_paths.push(ap.path.clone());
            }
            field_order.push(field.id.clone());
            by_id.insert(field.id.clone(), field);
        }

        Ok(Self {
            entity_type,
            fields: by_id,
            field_order,
            path_index,
            ordered_paths,
            version: version.into(),
            last_updated: last_updated.into(),
        })
    }

    fn from_yaml(entity_type: EntityType, text: &str) -> Result<Self, SchemaError> {
        let file: CatalogFile = serde_yaml::from_str(text).map_err(|source| SchemaError::Catalog {
            entity: entity_type.as_str().to_string(),
            source,
        })?;
        Self::new(entity_type, file.version, file.last_updated, file.fields)
    }

    /// Append fields and rebuild the index; rejects anything `new` would reject.
    pub fn with_fields(self, extra: Vec<FieldDefinition>) -> Result<Self, SchemaError> {
        let Self {
            entity_type,
            mut fields,
            field_order,
            version,
            last_updated,
            ..
        } = self;
        let mut all: Vec<FieldDefinition> = field_order
            .iter()
            .filter_map(|id| fields.remove(id))
            .collect();
        all.extend(extra);
        Self::new(entity_type, version, last_updated, all)
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn last_updated(&self) -> &str {
        &self.last_updated
    }

    pub fn total_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn field(&self, id: &str) -> Option<&FieldDefinition> {
        self.fields.get(id)
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = &FieldDefinition> + '_ {
        self.field_order.iter().filter_map(|id| self.fields.get(id))
    }

    pub fn is_known_path(&self, path: &str) -> bool {
        self.path_index.contains_key(path)
    }

    /// Owning field id for a registered path.
    pub fn field_id_for(&self, path: &str) -> Option<&str> {
        self.path_index.get(path).map(|(id, _)| id.as_str())
    }

    pub fn access_path(&self, path: &str) -> Option<&AccessPath> {
        let (id, i) = self.path_index.get(path)?;
        self.fields.get(id)?.access_paths.get(*i)
    }

    pub fn resolve(&self, path: &str) -> Option<FieldInfo> {
        let (id, i) = self.path_index.get(path)?;
        let field = self.fields.get(id)?;
        let ap = field.access_paths.get(*i)?;
        Some(FieldInfo {
            field_id: field.id.clone(),
            field_name: field.name.clone(),
            path: ap.path.clone(),
            value_type: ap.value_type,
            description: if ap.description.is_empty() {
                field.description.clone()
            } else {
                ap.description.clone()
            },
            frequency: ap.frequency,
            custom: false,
        })
    }

    /// Every registered path in declaration order. Each call starts over.
    pub fn all_paths(&self) -> impl Iterator<Item = &str> + '_ {
        self.ordered_paths.iter().map(String::as_str)
    }

    /// Registered paths from every `commonUsage` group, in declaration order.
    pub fn common_usage(&self) -> impl Iterator<Item = &str> + '_ {
        self.fields()
            .flat_map(|f| f.common_usage.iter())
            .flat_map(|group| group.iter())
            .map(String::as_str)
            .filter(|p| self.is_known_path(p))
    }

    /// Catalog summary for the `list_fields` tool.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "entityType": self.entity_type,
            "version": self.version,
            "lastUpdated": self.last_updated,
            "totalFields": self.total_fields(),
            "fields": self.fields().collect::<Vec<_>>(),
        })
    }
}

fn is_rooted_at(path: &str, field_id: &str) -> bool {
    match path.strip_prefix(field_id) {
        Some("") => true,
        Some(rest) => rest.starts_with('.'),
        None => false,
    }
}

/// All entity schemas. Immutable once built.
#[derive(Debug, Clone)]
pub struct Registry {
    resources: BTreeMap<EntityType, ResourceDefinition>,
}

impl Registry {
    /// Parse the embedded catalogs. Any error here is a packaging bug.
    pub fn builtin() -> Result<Self, SchemaError> {
        Self::from_definitions(vec![
            ResourceDefinition::from_yaml(EntityType::Issue, ISSUE_CATALOG)?,
            ResourceDefinition::from_yaml(EntityType::Project, PROJECT_CATALOG)?,
            ResourceDefinition::from_yaml(EntityType::User, USER_CATALOG)?,
            ResourceDefinition::from_yaml(EntityType::Agile, AGILE_CATALOG)?,
            ResourceDefinition::from_yaml(EntityType::System, SYSTEM_CATALOG)?,
        ])
    }

    /// Build from explicit definitions; a repeated entity type replaces the
    /// earlier one.
    pub fn from_definitions(defs: Vec<ResourceDefinition>) -> Result<Self, SchemaError> {
        let mut resources = BTreeMap::new();
        for def in defs {
            resources.insert(def.entity_type(), def);
        }
        Ok(Self { resources })
    }

    /// Register extra fields for one entity type (rebuilds its path index).
    pub fn extend(mut self, entity: EntityType, extra: Vec<FieldDefinition>) -> Result<Self, SchemaError> {
        if extra.is_empty() {
            return Ok(self);
        }
        let def = match self.resources.remove(&entity) {
            Some(def) => def.with_fields(extra)?,
            None => ResourceDefinition::new(entity, "1.0.0", "", extra)?,
        };
        self.resources.insert(entity, def);
        Ok(self)
    }

    pub fn get(&self, entity_type: &str) -> Result<&ResourceDefinition, SchemaError> {
        EntityType::parse(entity_type)
            .and_then(|e| self.resources.get(&e))
            .ok_or_else(|| SchemaError::UnknownEntityType(entity_type.to_string()))
    }

    pub fn is_known_path(&self, entity_type: &str, path: &str) -> bool {
        self.get(entity_type).map(|d| d.is_known_path(path)).unwrap_or(false)
    }

    pub fn resolve(&self, entity_type: &str, path: &str) -> Option<FieldInfo> {
        self.get(entity_type).ok()?.resolve(path)
    }

    /// Empty iterator for an unknown entity type.
    pub fn all_paths<'a>(&'a self, entity_type: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.get(entity_type).ok().into_iter().flat_map(|d| d.all_paths())
    }

    pub fn entity_types(&self) -> impl Iterator<Item = EntityType> + '_ {
        self.resources.keys().copied()
    }
}
