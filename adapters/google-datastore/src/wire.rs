//! JSON shapes of the Datastore v1 REST API and their mapping to domain entities.
//!
//! int64 values (key ids, integer properties) travel as JSON strings.

use std::collections::BTreeMap;

use notebook::{Entity, EntityKey, PropertyValue};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Datastore refuses indexed string values longer than this many bytes.
pub const MAX_INDEXED_STRING_BYTES: usize = 1500;

pub const MORE_RESULTS_NOT_FINISHED: &str = "NOT_FINISHED";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionId {
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PathElement {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "int64_string")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Key {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_id: Option<PartitionId>,
    pub path: Vec<PathElement>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireEntity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Key>,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct AllocateIdsRequest {
    pub keys: Vec<Key>,
}

#[derive(Debug, Deserialize)]
pub struct AllocateIdsResponse {
    #[serde(default)]
    pub keys: Vec<Key>,
}

#[derive(Debug, Serialize)]
pub struct LookupRequest {
    pub keys: Vec<Key>,
}

#[derive(Debug, Deserialize)]
pub struct LookupResponse {
    #[serde(default)]
    pub found: Vec<EntityResult>,
    #[serde(default)]
    pub missing: Vec<EntityResult>,
    #[serde(default)]
    pub deferred: Vec<Key>,
}

#[derive(Debug, Deserialize)]
pub struct EntityResult {
    pub entity: WireEntity,
}

#[derive(Debug, Serialize)]
pub struct CommitRequest {
    pub mode: &'static str,
    pub mutations: Vec<Mutation>,
}

#[derive(Debug, Default, Serialize)]
pub struct Mutation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upsert: Option<WireEntity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete: Option<Key>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResponse {
    #[serde(default)]
    pub mutation_results: Vec<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunQueryRequest {
    pub partition_id: PartitionId,
    pub query: Query,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub kind: Vec<KindExpression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_cursor: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct KindExpression {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct RunQueryResponse {
    pub batch: QueryResultBatch,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResultBatch {
    #[serde(default)]
    pub entity_results: Vec<EntityResult>,
    #[serde(default)]
    pub end_cursor: Option<String>,
    #[serde(default)]
    pub more_results: String,
}

pub fn key_to_wire(partition: &PartitionId, key: &EntityKey) -> Key {
    Key {
        partition_id: Some(partition.clone()),
        path: vec![PathElement {
            kind: key.kind.clone(),
            id: Some(key.id),
            name: None,
        }],
    }
}

/// Key with no id yet, as sent to `allocateIds`.
pub fn incomplete_key(partition: &PartitionId, kind: &str) -> Key {
    Key {
        partition_id: Some(partition.clone()),
        path: vec![PathElement {
            kind: kind.to_string(),
            id: None,
            name: None,
        }],
    }
}

/// Domain key from the last path element. Name-keyed entities are rejected.
pub fn key_from_wire(key: &Key) -> Result<EntityKey, String> {
    let leaf = key.path.last().ok_or("key has an empty path")?;
    match (leaf.id, &leaf.name) {
        (Some(id), _) => Ok(EntityKey::new(leaf.kind.clone(), id)),
        (None, Some(name)) => Err(format!("{}({name:?}) is keyed by name", leaf.kind)),
        (None, None) => Err(format!("{} key is incomplete", leaf.kind)),
    }
}

pub fn entity_to_wire(partition: &PartitionId, entity: &Entity) -> WireEntity {
    WireEntity {
        key: Some(key_to_wire(partition, &entity.key)),
        properties: entity
            .properties
            .iter()
            .map(|(name, value)| (name.clone(), value_to_wire(value)))
            .collect(),
    }
}

pub fn entity_from_wire(entity: &WireEntity) -> Result<Entity, String> {
    let key = entity.key.as_ref().ok_or("entity without key")?;
    let mut out = Entity::new(key_from_wire(key)?);
    for (name, raw) in &entity.properties {
        // Types the domain does not model (dates, blobs, arrays...) are left out.
        if let Some(value) = value_from_wire(raw) {
            out.properties.insert(name.clone(), value);
        }
    }
    Ok(out)
}

pub fn value_to_wire(value: &PropertyValue) -> Value {
    match value {
        PropertyValue::Null => json!({ "nullValue": null }),
        PropertyValue::Boolean(b) => json!({ "booleanValue": b }),
        PropertyValue::Integer(i) => json!({ "integerValue": i.to_string() }),
        PropertyValue::String(s) if s.len() > MAX_INDEXED_STRING_BYTES => {
            json!({ "stringValue": s, "excludeFromIndexes": true })
        }
        PropertyValue::String(s) => json!({ "stringValue": s }),
    }
}

pub fn value_from_wire(raw: &Value) -> Option<PropertyValue> {
    let obj = raw.as_object()?;
    if let Some(s) = obj.get("stringValue") {
        return s.as_str().map(|s| PropertyValue::String(s.to_string()));
    }
    if let Some(i) = obj.get("integerValue") {
        return match i {
            Value::String(s) => s.parse().ok().map(PropertyValue::Integer),
            Value::Number(n) => n.as_i64().map(PropertyValue::Integer),
            _ => None,
        };
    }
    if let Some(b) = obj.get("booleanValue") {
        return b.as_bool().map(PropertyValue::Boolean);
    }
    if obj.contains_key("nullValue") {
        return Some(PropertyValue::Null);
    }
    None
}

mod int64_string {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(v: &Option<i64>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(i) => s.serialize_str(&i.to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        match Option::<Value>::deserialize(d)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => s.parse().map(Some).map_err(D::Error::custom),
            Some(Value::Number(n)) => n
                .as_i64()
                .map(Some)
                .ok_or_else(|| D::Error::custom("id out of int64 range")),
            Some(other) => Err(D::Error::custom(format!("unexpected id {other}"))),
        }
    }
}
