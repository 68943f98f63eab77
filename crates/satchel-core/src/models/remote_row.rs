//! Remote row model returned by a pull

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::record::SyncRecord;
use super::schema::CollectionSchema;

const fn initial_version() -> i64 {
    1
}

/// One row as the remote returns it: `{ id, data, updated_at, version }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRow {
    pub id: String,
    /// Collection payload in the remote's field naming
    #[serde(default, deserialize_with = "object_or_json_text")]
    pub data: Map<String, Value>,
    /// Remote write time (Unix ms)
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default = "initial_version")]
    pub version: i64,
}

impl RemoteRow {
    /// Turn the remote payload into a local record.
    ///
    /// The id is re-asserted from the row (the payload may omit or rename it),
    /// the version is the remote's, and the record is marked synced.
    pub fn into_record(self, schema: &CollectionSchema) -> SyncRecord {
        let mut fields = schema.to_local(self.data);
        let deleted = fields
            .remove("deleted")
            .is_some_and(|value| value_is_truthy(&value));
        let last_modified = fields
            .remove("lastModified")
            .and_then(|value| value.as_i64())
            .unwrap_or(self.updated_at);
        fields.remove("id");
        fields.remove("version");
        fields.remove("isSynced");

        SyncRecord {
            id: self.id,
            version: self.version,
            last_modified,
            is_synced: true,
            deleted,
            fields,
        }
    }
}

fn value_is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_i64().is_some_and(|n| n != 0),
        Value::String(text) => crate::util::parse_flag(text),
        _ => false,
    }
}

// Some remotes hand the payload back as a JSON-encoded text column.
fn object_or_json_text<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Object(map) => Ok(map),
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(serde::de::Error::custom("row data text is not a JSON object")),
            Err(error) => Err(serde::de::Error::custom(format!(
                "row data text is not valid JSON: {error}"
            ))),
        },
        Value::Null => Ok(Map::new()),
        _ => Err(serde::de::Error::custom("row data must be an object")),
    }
}
