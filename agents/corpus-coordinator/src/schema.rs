//! Master schema index
//!
//! Loads the project's master schema once at startup and indexes every leaf
//! path with its scalar kind and enum set, plus every non-leaf prefix. The
//! schema file is the project's custom nested description, not standard
//! JSON Schema: a leaf is an object carrying only the meta keys
//! `description`, `type`, `valeurs_possibles`, `pickOne`; plain objects
//! recurse; arrays describe their element template through the first
//! element. Any other node kind is a load error.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use chrono::NaiveDate;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{CoordinatorError, Result};

const LEAF_META_KEYS: &[&str] = &["description", "type", "valeurs_possibles", "pickOne"];

/// One step in a schema or payload path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathSegment {
    /// An object key
    Key(String),
    /// The element position of a list, rendered as `*`
    Items,
}

/// A path from the schema root to a node
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath(pub Vec<PathSegment>);

impl FieldPath {
    pub fn root() -> Self {
        FieldPath(Vec::new())
    }

    /// Parse a dotted path where `*` marks a list position
    pub fn from_dotted(path: &str) -> Self {
        if path.is_empty() {
            return Self::root();
        }
        FieldPath(
            path.split('.')
                .map(|part| {
                    if part == "*" {
                        PathSegment::Items
                    } else {
                        PathSegment::Key(part.to_string())
                    }
                })
                .collect(),
        )
    }

    pub fn child(&self, key: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Key(key.to_string()));
        FieldPath(segments)
    }

    pub fn items(&self) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Items);
        FieldPath(segments)
    }

    pub fn starts_with(&self, prefix: &FieldPath) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }

    /// Local key name of the leaf, skipping a trailing list marker
    pub fn leaf_key(&self) -> Option<&str> {
        self.0.iter().rev().find_map(|segment| match segment {
            PathSegment::Key(key) => Some(key.as_str()),
            PathSegment::Items => None,
        })
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0
            .iter()
            .any(|segment| matches!(segment, PathSegment::Key(k) if k == key))
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "<root>");
        }
        let parts: Vec<&str> = self
            .0
            .iter()
            .map(|segment| match segment {
                PathSegment::Key(key) => key.as_str(),
                PathSegment::Items => "*",
            })
            .collect();
        write!(f, "{}", parts.join("."))
    }
}

/// Scalar kinds a leaf can declare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Text,
    Integer,
    Number,
    Boolean,
    /// ISO-8601 day string
    Date,
}

impl ScalarKind {
    fn from_marker(marker: &str) -> Option<Self> {
        match marker {
            "string" => Some(ScalarKind::Text),
            "integer" => Some(ScalarKind::Integer),
            "number" => Some(ScalarKind::Number),
            "boolean" => Some(ScalarKind::Boolean),
            "date" => Some(ScalarKind::Date),
            _ => None,
        }
    }
}

/// Declared shape of a leaf
#[derive(Debug, Clone)]
pub struct LeafSpec {
    pub kind: ScalarKind,
    /// Enum set; empty when the leaf is a free scalar
    pub allowed_values: Vec<String>,
}

impl LeafSpec {
    pub fn is_enum(&self) -> bool {
        !self.allowed_values.is_empty()
    }
}

/// Constant-time queries over the master schema
#[derive(Debug)]
pub struct SchemaIndex {
    nodes: HashSet<FieldPath>,
    leaves: BTreeMap<FieldPath, LeafSpec>,
}

impl SchemaIndex {
    /// Load and index the master schema file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            CoordinatorError::schema(format!("cannot read {}: {err}", path.display()))
        })?;
        let value: Value = serde_json::from_str(&text).map_err(|err| {
            CoordinatorError::schema(format!("invalid JSON in {}: {err}", path.display()))
        })?;
        Self::from_value(&value)
    }

    /// Index an already-parsed schema document
    pub fn from_value(schema: &Value) -> Result<Self> {
        if !schema.is_object() {
            return Err(CoordinatorError::schema("schema root must be an object"));
        }
        let mut index = SchemaIndex {
            nodes: HashSet::new(),
            leaves: BTreeMap::new(),
        };
        index.walk(schema, FieldPath::root())?;
        if index.leaves.is_empty() {
            return Err(CoordinatorError::schema("schema declares no leaves"));
        }
        Ok(index)
    }

    fn walk(&mut self, node: &Value, path: FieldPath) -> Result<()> {
        self.nodes.insert(path.clone());
        if let Some(spec) = leaf_descriptor(node, &path)? {
            self.leaves.insert(path, spec);
            return Ok(());
        }
        match node {
            Value::Object(map) => {
                for (key, child) in map {
                    self.walk(child, path.child(key))?;
                }
                Ok(())
            }
            Value::Array(items) => {
                let items_path = path.items();
                self.nodes.insert(items_path.clone());
                if let Some(template) = items.first() {
                    self.walk(template, items_path)?;
                }
                Ok(())
            }
            other => Err(CoordinatorError::schema(format!(
                "unsupported schema node at {path}: {}",
                json_type_name(other)
            ))),
        }
    }

    pub fn is_leaf(&self, path: &FieldPath) -> bool {
        self.leaves.contains_key(path)
    }

    pub fn leaf_spec(&self, path: &FieldPath) -> Option<&LeafSpec> {
        self.leaves.get(path)
    }

    /// Known non-leaf node, including list positions
    pub fn is_prefix(&self, path: &FieldPath) -> bool {
        self.nodes.contains(path) && !self.leaves.contains_key(path)
    }

    pub fn enum_values(&self, path: &FieldPath) -> Option<&[String]> {
        self.leaves
            .get(path)
            .filter(|spec| spec.is_enum())
            .map(|spec| spec.allowed_values.as_slice())
    }

    /// All leaves whose path starts with the prefix, in path order
    pub fn leaves_under<'a>(
        &'a self,
        prefix: &'a FieldPath,
    ) -> impl Iterator<Item = (&'a FieldPath, &'a LeafSpec)> {
        self.leaves
            .iter()
            .filter(move |(path, _)| path.starts_with(prefix))
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// Check a scalar value against the leaf declared at `path`
    pub fn validate_leaf(&self, path: &FieldPath, value: &Value) -> Result<()> {
        let spec = self.leaves.get(path).ok_or_else(|| {
            CoordinatorError::schema(format!("unknown leaf path: {path}"))
        })?;
        if let Some(problem) = leaf_mismatch(spec, value) {
            return Err(CoordinatorError::schema(format!("{path}: {problem}")));
        }
        Ok(())
    }

    /// Walk a candidate payload and collect every schema violation
    pub fn schema_violations(&self, payload: &Value) -> Vec<String> {
        let mut errors = Vec::new();
        self.check_node(payload, &FieldPath::root(), &mut errors);
        errors
    }

    fn check_node(&self, node: &Value, path: &FieldPath, errors: &mut Vec<String>) {
        if !self.nodes.contains(path) {
            errors.push(format!("unknown path: {path}"));
            return;
        }
        match node {
            Value::Object(map) => {
                if self.leaves.contains_key(path) {
                    errors.push(format!("object at leaf path: {path}"));
                    return;
                }
                for (key, child) in map {
                    let child_path = path.child(key);
                    if !self.nodes.contains(&child_path) {
                        errors.push(format!("unknown key: {child_path}"));
                        continue;
                    }
                    self.check_node(child, &child_path, errors);
                }
            }
            Value::Array(items) => {
                let items_path = path.items();
                if !self.nodes.contains(&items_path) {
                    errors.push(format!("list not allowed at: {path}"));
                    return;
                }
                for item in items {
                    self.check_node(item, &items_path, errors);
                }
            }
            scalar => match self.leaves.get(path) {
                Some(spec) => {
                    if let Some(problem) = leaf_mismatch(spec, scalar) {
                        errors.push(format!("{path}: {problem}"));
                    }
                }
                None => errors.push(format!("scalar at non-leaf path: {path}")),
            },
        }
    }
}

fn leaf_descriptor(node: &Value, path: &FieldPath) -> Result<Option<LeafSpec>> {
    let map = match node {
        Value::Object(map) => map,
        _ => return Ok(None),
    };
    if !map.keys().any(|key| LEAF_META_KEYS.contains(&key.as_str())) {
        return Ok(None);
    }
    if map.keys().any(|key| !LEAF_META_KEYS.contains(&key.as_str())) {
        // Structural node that happens to carry a meta-named child.
        return Ok(None);
    }
    if map.get("type").is_some_and(Value::is_object) {
        return Ok(None);
    }

    let allowed_values = enum_values_from_descriptor(map);
    let kind = match map.get("type") {
        Some(Value::String(marker)) => ScalarKind::from_marker(marker).ok_or_else(|| {
            CoordinatorError::schema(format!("unknown type marker at {path}: {marker}"))
        })?,
        Some(other) => {
            return Err(CoordinatorError::schema(format!(
                "invalid type marker at {path}: {}",
                json_type_name(other)
            )))
        }
        // Descriptive leaves without a marker hold names, labels, laws.
        None => ScalarKind::Text,
    };
    Ok(Some(LeafSpec {
        kind,
        allowed_values,
    }))
}

fn enum_values_from_descriptor(map: &serde_json::Map<String, Value>) -> Vec<String> {
    let raw = map
        .get("valeurs_possibles")
        .and_then(Value::as_array)
        .or_else(|| map.get("pickOne").and_then(Value::as_array));
    let Some(items) = raw else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}

fn leaf_mismatch(spec: &LeafSpec, value: &Value) -> Option<String> {
    if spec.is_enum() {
        return match value.as_str() {
            Some(text) if spec.allowed_values.iter().any(|allowed| allowed == text) => None,
            _ => Some(format!(
                "value outside enum (got {value}, expected one of {:?})",
                spec.allowed_values
            )),
        };
    }
    match spec.kind {
        ScalarKind::Text if value.is_string() => None,
        ScalarKind::Text => Some(type_error("string", value)),
        ScalarKind::Boolean if value.is_boolean() => None,
        ScalarKind::Boolean => Some(type_error("boolean", value)),
        ScalarKind::Integer if value.as_i64().is_some() => None,
        ScalarKind::Integer => Some(type_error("integer", value)),
        // Integers are accepted where floats are expected.
        ScalarKind::Number if value.as_f64().is_some() => None,
        ScalarKind::Number => Some(type_error("number", value)),
        ScalarKind::Date => match value.as_str() {
            Some(text) if parse_iso_date(text).is_some() => None,
            _ => Some(type_error("ISO-8601 date", value)),
        },
    }
}

fn type_error(expected: &str, value: &Value) -> String {
    format!("expected {expected}, got {}", json_type_name(value))
}

pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Parse a `YYYY-MM-DD` day string
pub fn parse_iso_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

/// Walk a payload and collect every sparse-invariant violation: nulls,
/// empty strings, empty objects, empty lists.
pub fn sparse_violations(payload: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    sparse_walk(payload, &FieldPath::root(), &mut errors);
    errors
}

fn sparse_walk(node: &Value, path: &FieldPath, errors: &mut Vec<String>) {
    match node {
        Value::Null => errors.push(format!("null at {path}")),
        Value::String(text) => {
            if text.trim().is_empty() {
                errors.push(format!("empty string at {path}"));
            }
        }
        Value::Object(map) => {
            if map.is_empty() {
                errors.push(format!("empty object at {path}"));
                return;
            }
            for (key, child) in map {
                sparse_walk(child, &path.child(key), errors);
            }
        }
        Value::Array(items) => {
            if items.is_empty() {
                errors.push(format!("empty list at {path}"));
                return;
            }
            for item in items {
                sparse_walk(item, &path.items(), errors);
            }
        }
        Value::Bool(_) | Value::Number(_) => {}
    }
}

/// Set a scalar at `path`, creating intermediate objects and first list
/// elements along the way. List markers address the first element, which is
/// how the generator accumulates leaves into a single template entry.
pub fn set_path_value(payload: &mut Value, path: &FieldPath, value: Value) {
    let mut node = payload;
    let mut pending = Some(value);
    for (idx, segment) in path.0.iter().enumerate() {
        let last = idx == path.0.len() - 1;
        let next_is_items = matches!(path.0.get(idx + 1), Some(PathSegment::Items));
        match segment {
            PathSegment::Key(key) => {
                let map = match node {
                    Value::Object(map) => map,
                    _ => return,
                };
                if last {
                    if let Some(value) = pending.take() {
                        map.insert(key.clone(), value);
                    }
                    return;
                }
                let entry = map.entry(key.clone()).or_insert_with(|| {
                    if next_is_items {
                        Value::Array(Vec::new())
                    } else {
                        Value::Object(serde_json::Map::new())
                    }
                });
                if next_is_items && !entry.is_array() {
                    *entry = Value::Array(Vec::new());
                } else if !next_is_items && !entry.is_object() {
                    *entry = Value::Object(serde_json::Map::new());
                }
                node = entry;
            }
            PathSegment::Items => {
                let list = match node {
                    Value::Array(list) => list,
                    _ => return,
                };
                if list.is_empty() {
                    list.push(if last {
                        Value::Null
                    } else if next_is_items {
                        Value::Array(Vec::new())
                    } else {
                        Value::Object(serde_json::Map::new())
                    });
                }
                if last {
                    if let Some(value) = pending.take() {
                        list[0] = value;
                    }
                    return;
                }
                node = &mut list[0];
            }
        }
    }
}

/// True when the path resolves to at least one present value; list markers
/// match any element.
pub fn path_present(payload: &Value, path: &FieldPath) -> bool {
    present_from(payload, &path.0)
}

fn present_from(node: &Value, segments: &[PathSegment]) -> bool {
    let Some((head, rest)) = segments.split_first() else {
        return true;
    };
    match head {
        PathSegment::Key(key) => node
            .as_object()
            .and_then(|map| map.get(key))
            .is_some_and(|child| present_from(child, rest)),
        PathSegment::Items => node
            .as_array()
            .is_some_and(|items| items.iter().any(|item| present_from(item, rest))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixture() -> Value {
        json!({
            "famille": {
                "defunt": {
                    "nom": {"description": "nom complet"},
                    "statut_matrimonial": {
                        "valeurs_possibles": ["CELIBATAIRE", "MARIE", "PACSE", "DIVORCE", "VEUF"]
                    },
                    "date_deces": {"type": "string", "description": "date ISO"},
                    "age_au_deces": {"type": "number"}
                },
                "descendants": {
                    "enfants": [{
                        "nom": {"description": "nom"},
                        "est_mineur": {"type": "boolean"}
                    }]
                }
            },
            "patrimoine": {
                "actifs": [{
                    "libelle": {"description": "libellé"},
                    "valeur": {"type": "number"}
                }]
            }
        })
    }

    #[test]
    fn test_index_finds_leaves_and_prefixes() {
        let index = SchemaIndex::from_value(&fixture()).unwrap();
        let nom = FieldPath::from_dotted("famille.defunt.nom");
        assert!(index.is_leaf(&nom));
        assert!(index.is_prefix(&FieldPath::from_dotted("famille.defunt")));
        assert!(index.is_prefix(&FieldPath::from_dotted("famille.descendants.enfants.*")));
        assert_eq!(
            index
                .enum_values(&FieldPath::from_dotted("famille.defunt.statut_matrimonial"))
                .map(<[String]>::len),
            Some(5)
        );
        let patrimoine_path = FieldPath::from_dotted("patrimoine");
        let under: Vec<_> = index.leaves_under(&patrimoine_path).collect();
        assert_eq!(under.len(), 2);
    }

    #[test]
    fn test_unknown_node_kind_rejected() {
        let schema = json!({"famille": {"defunt": "oops"}});
        let err = SchemaIndex::from_value(&schema).unwrap_err();
        assert!(err.to_string().contains("unsupported schema node"));
    }

    #[test]
    fn test_unknown_type_marker_rejected() {
        let schema = json!({"x": {"type": "datetime"}});
        let err = SchemaIndex::from_value(&schema).unwrap_err();
        assert!(err.to_string().contains("unknown type marker"));
    }

    #[test]
    fn test_validate_leaf_types_and_enums() {
        let index = SchemaIndex::from_value(&fixture()).unwrap();
        let statut = FieldPath::from_dotted("famille.defunt.statut_matrimonial");
        assert!(index.validate_leaf(&statut, &json!("MARIE")).is_ok());
        assert!(index.validate_leaf(&statut, &json!("INVALIDE")).is_err());
        let age = FieldPath::from_dotted("famille.defunt.age_au_deces");
        assert!(index.validate_leaf(&age, &json!(71)).is_ok());
        assert!(index.validate_leaf(&age, &json!(71.5)).is_ok());
        assert!(index.validate_leaf(&age, &json!(true)).is_err());
    }

    #[test]
    fn test_schema_violations_flag_unknown_paths() {
        let index = SchemaIndex::from_value(&fixture()).unwrap();
        let payload = json!({
            "famille": {"defunt": {"nom": "Durand", "profession": "boulanger"}}
        });
        let errors = index.schema_violations(&payload);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("famille.defunt.profession"));
    }

    #[test]
    fn test_sparse_violations() {
        let payload = json!({
            "famille": {
                "defunt": {"nom": ""},
                "descendants": {"enfants": []},
                "notes": null
            }
        });
        let errors = sparse_violations(&payload);
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_set_and_probe_paths() {
        let mut payload = json!({});
        set_path_value(
            &mut payload,
            &FieldPath::from_dotted("famille.descendants.enfants.*.nom"),
            json!("Lucie Morel"),
        );
        set_path_value(
            &mut payload,
            &FieldPath::from_dotted("famille.descendants.enfants.*.est_mineur"),
            json!(false),
        );
        assert_eq!(
            payload["famille"]["descendants"]["enfants"][0]["nom"],
            json!("Lucie Morel")
        );
        assert!(path_present(
            &payload,
            &FieldPath::from_dotted("famille.descendants.enfants.*.nom")
        ));
        assert!(!path_present(
            &payload,
            &FieldPath::from_dotted("famille.partenaire.nom")
        ));
    }

    #[test]
    fn test_parse_iso_date() {
        assert!(parse_iso_date("2024-02-29").is_some());
        assert!(parse_iso_date("2023-02-29").is_none());
        assert!(parse_iso_date("hier").is_none());
    }
}
