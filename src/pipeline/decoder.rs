//! Mutation decoder - turns raw log rows into typed mutations / 变更解码器
//!
//! Pure and total over well-formed entries. Anything else is a `DecodeError`,
//! which the projector treats as a poison entry (log, count, skip).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DecodeError;
use crate::models::{EntityKey, FeatureDescriptor, LogEntry, LogTarget, Operation, Tag};

/// Reserved xattr carrying the legacy JSON tag encoding / 旧版标签编码使用的保留扩展属性
pub const TAGS_XATTR: &str = "tags";
/// Max xattr name length in bytes / 扩展属性名最大长度
pub const XATTR_NAME_MAX_SIZE: usize = 255;
/// Max xattr value length in bytes / 扩展属性值最大长度
pub const XATTR_VALUE_MAX_SIZE: usize = 13500;

/// Entity fields carried by create/update entries / 实体字段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityBody {
    pub name: String,
    pub project_id: i64,
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub dataset_id: Option<i64>,
    #[serde(default)]
    pub version: Option<i32>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub creator: Option<String>,
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default)]
    pub featurestore_id: Option<i64>,
    /// `None` keeps the stored features on update / 为空时保留已有特征
    #[serde(default)]
    pub features: Option<Vec<FeatureDescriptor>>,
}

/// Typed index mutation / 索引变更
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mutation {
    UpsertEntity { key: EntityKey, body: EntityBody },
    DeleteEntity { key: EntityKey },
    SetXattr { key: EntityKey, name: String, value: String },
    RemoveXattr { key: EntityKey, name: String },
    SetTags { key: EntityKey, tags: Vec<Tag> },
    /// Drop every document of a removed project / 删除项目下所有文档
    PurgeProject { project_id: i64 },
}

/// Decode one log entry / 解码一条日志
pub fn decode(entry: &LogEntry) -> Result<Mutation, DecodeError> {
    let target: LogTarget = entry.entity_ref.parse()
        .map_err(|_| DecodeError::EntityRef(entry.entity_ref.clone()))?;
    let payload = parse_payload(&entry.payload)?;

    match target {
        LogTarget::Project(project_id) => match (entry.operation, payload) {
            (Operation::Delete, None) => Ok(Mutation::PurgeProject { project_id }),
            (operation, _) => Err(DecodeError::Unsupported {
                operation: operation.to_string(),
                target: target.to_string(),
            }),
        },
        LogTarget::Entity(key) => decode_entity(key, entry.operation, payload),
    }
}

fn parse_payload(raw: &str) -> Result<Option<Map<String, Value>>, DecodeError> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Null) => Ok(None),
        Ok(Value::Object(obj)) if obj.is_empty() => Ok(None),
        Ok(Value::Object(obj)) => Ok(Some(obj)),
        Ok(other) => Err(DecodeError::Payload(format!("expected object, got {}", json_kind(&other)))),
        Err(e) => Err(DecodeError::Payload(e.to_string())),
    }
}

fn decode_entity(
    key: EntityKey,
    operation: Operation,
    payload: Option<Map<String, Value>>,
) -> Result<Mutation, DecodeError> {
    let Some(mut obj) = payload else {
        return match operation {
            Operation::Delete => Ok(Mutation::DeleteEntity { key }),
            _ => Err(DecodeError::MissingField("name")),
        };
    };

    // attribute payloads carry nothing else
    if obj.len() > 1 && (obj.contains_key("xattr") || obj.contains_key("tags")) {
        let mut fields: Vec<String> = obj.keys().cloned().collect();
        fields.sort();
        return Err(DecodeError::MixedPayload(fields.join(", ")));
    }

    if let Some(xattr) = obj.remove("xattr") {
        return decode_xattr(key, operation, xattr);
    }

    if let Some(tags) = obj.remove("tags") {
        let tags = match operation {
            Operation::Delete => Vec::new(),
            _ => parse_tags(&tags)?,
        };
        return Ok(Mutation::SetTags { key, tags });
    }

    if operation == Operation::Delete {
        return Ok(Mutation::DeleteEntity { key });
    }

    if !obj.get("name").is_some_and(|v| v.as_str().is_some_and(|s| !s.is_empty())) {
        return Err(DecodeError::MissingField("name"));
    }
    if !obj.contains_key("project_id") {
        return Err(DecodeError::MissingField("project_id"));
    }
    let body: EntityBody = serde_json::from_value(Value::Object(obj))
        .map_err(|e| DecodeError::Payload(e.to_string()))?;
    if body.project_id <= 0 {
        return Err(DecodeError::InvalidProjectId(body.project_id));
    }

    Ok(Mutation::UpsertEntity { key, body })
}

fn decode_xattr(key: EntityKey, operation: Operation, xattr: Value) -> Result<Mutation, DecodeError> {
    let Value::Object(xattr) = xattr else {
        return Err(DecodeError::Payload("xattr must be an object".to_string()));
    };
    let name = xattr.get("name")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or(DecodeError::MissingField("xattr.name"))?
        .to_string();
    if name.len() > XATTR_NAME_MAX_SIZE {
        return Err(DecodeError::XattrTooLarge { len: name.len(), name, max: XATTR_NAME_MAX_SIZE });
    }

    if operation == Operation::Delete {
        if name == TAGS_XATTR {
            return Ok(Mutation::SetTags { key, tags: Vec::new() });
        }
        return Ok(Mutation::RemoveXattr { key, name });
    }

    let value = match xattr.get("value") {
        None | Some(Value::Null) => return Err(DecodeError::MissingField("xattr.value")),
        Some(v) => value_text(v),
    };
    if value.len() > XATTR_VALUE_MAX_SIZE {
        return Err(DecodeError::XattrTooLarge { name, len: value.len(), max: XATTR_VALUE_MAX_SIZE });
    }

    if name == TAGS_XATTR {
        let tags = parse_tags(&Value::String(value))?;
        return Ok(Mutation::SetTags { key, tags });
    }
    Ok(Mutation::SetXattr { key, name, value })
}

/// Accepts `[{"key","value"}]`, a `{key: value}` map, or either one as JSON text / 解析标签
fn parse_tags(raw: &Value) -> Result<Vec<Tag>, DecodeError> {
    match raw {
        Value::Null => Ok(Vec::new()),
        Value::String(text) => {
            if text.trim().is_empty() {
                return Ok(Vec::new());
            }
            let inner: Value = serde_json::from_str(text)
                .map_err(|e| DecodeError::Tags(e.to_string()))?;
            if inner.is_string() {
                return Err(DecodeError::Tags("nested string encoding".to_string()));
            }
            parse_tags(&inner)
        }
        Value::Array(items) => items.iter()
            .map(|item| {
                let key = item.get("key")
                    .and_then(Value::as_str)
                    .ok_or_else(|| DecodeError::Tags("tag without key".to_string()))?;
                let value = item.get("value").map(value_text).unwrap_or_default();
                Ok(Tag::new(key, value))
            })
            .collect(),
        Value::Object(map) => Ok(map.iter().map(|(k, v)| Tag::new(k.clone(), value_text(v))).collect()),
        other => Err(DecodeError::Tags(format!("unexpected {}", json_kind(other)))),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
