//! Declarative per-collection field mapping between local and remote shapes.
//!
//! Each collection is described by a list of `{local, remote, transform}`
//! tuples consumed by one generic mapper. Adding a collection or a renamed
//! column is a data change: nothing else in the sync path knows about field
//! names.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::record::META_FIELDS;
use crate::error::{Error, Result};

/// Value conversion applied while renaming a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldTransform {
    /// Local `bool`, remote `0`/`1`
    BoolAsInt,
    /// Local object/array, remote JSON-encoded text
    JsonText,
    /// Local Unix milliseconds, remote Unix seconds
    MillisAsSeconds,
}

impl FieldTransform {
    fn to_remote(self, value: Value) -> Value {
        match (self, value) {
            (Self::BoolAsInt, Value::Bool(flag)) => Value::from(i64::from(flag)),
            (Self::JsonText, value @ (Value::Object(_) | Value::Array(_))) => {
                Value::String(value.to_string())
            }
            (Self::MillisAsSeconds, Value::Number(number)) => number
                .as_i64()
                .map_or(Value::Number(number), |millis| Value::from(millis / 1_000)),
            (_, value) => value,
        }
    }

    fn to_local(self, value: Value) -> Value {
        match (self, value) {
            (Self::BoolAsInt, Value::Number(number)) => number
                .as_i64()
                .map_or(Value::Number(number), |n| Value::Bool(n != 0)),
            (Self::JsonText, Value::String(text)) => match serde_json::from_str::<Value>(&text) {
                Ok(parsed @ (Value::Object(_) | Value::Array(_))) => parsed,
                _ => Value::String(text),
            },
            (Self::MillisAsSeconds, Value::Number(number)) => number.as_i64().map_or(
                Value::Number(number),
                |seconds| Value::from(seconds.saturating_mul(1_000)),
            ),
            (_, value) => value,
        }
    }
}

/// One renamed field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldMapping {
    pub local: String,
    pub remote: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<FieldTransform>,
}

impl FieldMapping {
    pub fn new(local: impl Into<String>, remote: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            remote: remote.into(),
            transform: None,
        }
    }

    #[must_use]
    pub const fn with_transform(mut self, transform: FieldTransform) -> Self {
        self.transform = Some(transform);
        self
    }
}

/// Field mapping for a single collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectionSchema {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldMapping>,
}

impl CollectionSchema {
    pub fn new(name: impl Into<String>, fields: Vec<FieldMapping>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// A schema that renames nothing.
    pub fn passthrough(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }

    /// Rename local payload fields to the remote's names.
    pub fn to_remote(&self, fields: Map<String, Value>) -> Map<String, Value> {
        fields
            .into_iter()
            .map(|(key, value)| {
                if is_meta(&key) {
                    return (key, value);
                }
                match self.fields.iter().find(|mapping| mapping.local == key) {
                    Some(mapping) => (
                        mapping.remote.clone(),
                        apply(mapping.transform, value, FieldTransform::to_remote),
                    ),
                    None => (key, value),
                }
            })
            .collect()
    }

    /// Rename remote payload fields to the local names.
    pub fn to_local(&self, fields: Map<String, Value>) -> Map<String, Value> {
        fields
            .into_iter()
            .map(|(key, value)| {
                if is_meta(&key) {
                    return (key, value);
                }
                match self.fields.iter().find(|mapping| mapping.remote == key) {
                    Some(mapping) => (
                        mapping.local.clone(),
                        apply(mapping.transform, value, FieldTransform::to_local),
                    ),
                    None => (key, value),
                }
            })
            .collect()
    }
}

fn is_meta(key: &str) -> bool {
    META_FIELDS.contains(&key)
}

fn apply(
    transform: Option<FieldTransform>,
    value: Value,
    convert: fn(FieldTransform, Value) -> Value,
) -> Value {
    match transform {
        Some(transform) => convert(transform, value),
        None => value,
    }
}

/// The ordered set of collections a client keeps replicas of.
///
/// Order matters: sync runs walk collections in registry order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectionRegistry {
    pub collections: Vec<CollectionSchema>,
}

impl CollectionRegistry {
    pub fn new(collections: Vec<CollectionSchema>) -> Result<Self> {
        let registry = Self { collections };
        registry.validate()?;
        Ok(registry)
    }

    /// Parse a registry from its JSON description.
    pub fn from_json(payload: &str) -> Result<Self> {
        let registry: Self = serde_json::from_str(payload)?;
        registry.validate()?;
        Ok(registry)
    }

    /// Look up a collection's schema.
    pub fn get(&self, name: &str) -> Option<&CollectionSchema> {
        self.collections.iter().find(|schema| schema.name == name)
    }

    /// Collection names in sync order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.collections.iter().map(|schema| schema.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    fn validate(&self) -> Result<()> {
        for (index, schema) in self.collections.iter().enumerate() {
            if schema.name.trim().is_empty() {
                return Err(Error::Config(format!(
                    "collection #{index} has an empty name"
                )));
            }
            if self.collections[..index]
                .iter()
                .any(|other| other.name == schema.name)
            {
                return Err(Error::Config(format!(
                    "collection '{}' is registered twice",
                    schema.name
                )));
            }
            for mapping in &schema.fields {
                if is_meta(&mapping.local) || is_meta(&mapping.remote) {
                    return Err(Error::Config(format!(
                        "collection '{}' remaps sync metadata field '{}'",
                        schema.name, mapping.local
                    )));
                }
            }
        }
        Ok(())
    }

    /// Collections of the school management client.
    pub fn school_defaults() -> Self {
        use FieldTransform::{BoolAsInt, JsonText};

        fn map(local: &str, remote: &str) -> FieldMapping {
            FieldMapping::new(local, remote)
        }

        Self {
            collections: vec![
                CollectionSchema::new(
                    "users",
                    vec![
                        map("schoolId", "school_id"),
                        map("fullName", "full_name"),
                        map("isActive", "is_active").with_transform(BoolAsInt),
                    ],
                ),
                CollectionSchema::new(
                    "schools",
                    vec![
                        map("headmasterName", "headmaster_name"),
                        map("headmasterNip", "headmaster_nip"),
                    ],
                ),
                CollectionSchema::new(
                    "classes",
                    vec![
                        map("schoolId", "school_id"),
                        map("teacherId", "teacher_id"),
                        map("gradeLevel", "grade_level"),
                        map("academicYear", "academic_year"),
                    ],
                ),
                CollectionSchema::new(
                    "students",
                    vec![
                        map("classId", "class_id"),
                        map("schoolId", "school_id"),
                        map("fullName", "full_name"),
                        map("studentNumber", "student_number"),
                        map("birthDate", "birth_date"),
                        map("parentPhone", "parent_phone"),
                    ],
                ),
                CollectionSchema::new(
                    "subjects",
                    vec![
                        map("schoolId", "school_id"),
                        map("classId", "class_id"),
                        map("passingGrade", "passing_grade"),
                    ],
                ),
                CollectionSchema::new(
                    "scores",
                    vec![
                        map("studentId", "student_id"),
                        map("subjectId", "subject_id"),
                        map("classId", "class_id"),
                        map("assessmentType", "assessment_type"),
                        map("details", "details").with_transform(JsonText),
                    ],
                ),
                CollectionSchema::new(
                    "attendance",
                    vec![map("studentId", "student_id"), map("classId", "class_id")],
                ),
                CollectionSchema::new(
                    "journals",
                    vec![
                        map("classId", "class_id"),
                        map("teacherId", "teacher_id"),
                        map("attachments", "attachments").with_transform(JsonText),
                    ],
                ),
                CollectionSchema::new(
                    "schedules",
                    vec![
                        map("classId", "class_id"),
                        map("subjectId", "subject_id"),
                        map("dayOfWeek", "day_of_week"),
                        map("startTime", "start_time"),
                        map("endTime", "end_time"),
                    ],
                ),
                CollectionSchema::new(
                    "settings",
                    vec![
                        map("schoolId", "school_id"),
                        map("value", "value").with_transform(JsonText),
                    ],
                ),
            ],
        }
    }
}

impl Default for CollectionRegistry {
    fn default() -> Self {
        Self::school_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn maps_renamed_fields_both_ways() {
        let registry = CollectionRegistry::school_defaults();
        let students = registry.get("students").unwrap();

        let local = object(json!({"classId": "c1", "fullName": "Ayu", "gender": "F"}));
        let remote = students.to_remote(local.clone());
        assert_eq!(
            remote,
            object(json!({"class_id": "c1", "full_name": "Ayu", "gender": "F"}))
        );
        assert_eq!(students.to_local(remote), local);
    }

    #[test]
    fn applies_value_transforms() {
        let registry = CollectionRegistry::school_defaults();
        let users = registry.get("users").unwrap();
        let scores = registry.get("scores").unwrap();

        let remote = users.to_remote(object(json!({"isActive": true})));
        assert_eq!(remote.get("is_active"), Some(&json!(1)));
        let local = users.to_local(object(json!({"is_active": 0})));
        assert_eq!(local.get("isActive"), Some(&json!(false)));

        let remote = scores.to_remote(object(json!({"details": {"uh1": 80}})));
        assert_eq!(remote.get("details"), Some(&json!("{\"uh1\":80}")));
        let local = scores.to_local(remote);
        assert_eq!(local.get("details"), Some(&json!({"uh1": 80})));
    }

    #[test]
    fn millis_as_seconds_round_trips_whole_seconds() {
        let schema = CollectionSchema::new(
            "journals",
            vec![FieldMapping::new("takenAt", "taken_at")
                .with_transform(FieldTransform::MillisAsSeconds)],
        );
        let remote = schema.to_remote(object(json!({"takenAt": 1_700_000_000_000_i64})));
        assert_eq!(remote.get("taken_at"), Some(&json!(1_700_000_000)));
    }

    #[test]
    fn metadata_is_never_remapped() {
        let schema = CollectionSchema::new("x", vec![FieldMapping::new("note", "id")]);
        let local = schema.to_local(object(json!({"id": "r1"})));
        assert_eq!(local.get("id"), Some(&json!("r1")));
    }

    #[test]
    fn registry_from_json_rejects_duplicates_and_meta_remaps() {
        let duplicate = r#"{"collections":[{"name":"a"},{"name":"a"}]}"#;
        assert!(CollectionRegistry::from_json(duplicate).is_err());

        let meta = r#"{"collections":[{"name":"a","fields":[{"local":"version","remote":"v"}]}]}"#;
        assert!(CollectionRegistry::from_json(meta).is_err());

        let unknown = r#"{"collections":[{"name":"a","extra":1}]}"#;
        assert!(CollectionRegistry::from_json(unknown).is_err());
    }

    #[test]
    fn registry_from_json_parses_transforms() {
        let payload = r#"{"collections":[{"name":"scores","fields":[
            {"local":"details","remote":"details","transform":"json_text"}
        ]}]}"#;
        let registry = CollectionRegistry::from_json(payload).unwrap();
        assert_eq!(
            registry.get("scores").unwrap().fields[0].transform,
            Some(FieldTransform::JsonText)
        );
    }

    #[test]
    fn school_defaults_keep_users_first() {
        let registry = CollectionRegistry::school_defaults();
        assert_eq!(registry.names().next(), Some("users"));
        assert_eq!(registry.len(), 10);
    }
}
