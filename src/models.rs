use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Operation log source table / 操作日志来源表
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTable {
    /// Filesystem metadata mutations (HDFSMetadataLog) / 文件系统元数据变更
    Metadata,
    /// File provenance events / 文件溯源事件
    FileProv,
    /// Application provenance events / 应用溯源事件
    AppProv,
}

impl SourceTable {
    pub const ALL: [SourceTable; 3] = [SourceTable::Metadata, SourceTable::FileProv, SourceTable::AppProv];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTable::Metadata => "metadata",
            SourceTable::FileProv => "file_prov",
            SourceTable::AppProv => "app_prov",
        }
    }

    /// Backing SQL table / 对应的数据库表
    pub fn table_name(&self) -> &'static str {
        match self {
            SourceTable::Metadata => "hdfs_metadata_log",
            SourceTable::FileProv => "file_prov_log",
            SourceTable::AppProv => "app_prov_log",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            SourceTable::Metadata => 0,
            SourceTable::FileProv => 1,
            SourceTable::AppProv => 2,
        }
    }
}

impl fmt::Display for SourceTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceTable {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "metadata" | "hdfs_metadata_log" | "hdfsmetadatalog" => Ok(SourceTable::Metadata),
            "file_prov" | "fileprov" | "file_prov_log" => Ok(SourceTable::FileProv),
            "app_prov" | "appprov" | "app_prov_log" => Ok(SourceTable::AppProv),
            other => Err(format!("unknown source table '{}'", other)),
        }
    }
}

/// Log entry operation / 日志操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "CREATE",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CREATE" | "ADD" => Ok(Operation::Create),
            "UPDATE" => Ok(Operation::Update),
            "DELETE" | "REMOVE" => Ok(Operation::Delete),
            other => Err(format!("unknown operation '{}'", other)),
        }
    }
}

/// One immutable operation log row / 一条操作日志
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub source_table: SourceTable,
    pub sequence_id: u64,
    /// `<type>:<id>`, e.g. `featuregroup:12` or `project:3`
    pub entity_ref: String,
    pub operation: Operation,
    /// JSON text, may be empty for deletes / JSON 文本
    pub payload: String,
}

/// Indexable document kind / 可索引文档类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Dataset,
    Directory,
    Featuregroup,
    Trainingdataset,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Dataset => "dataset",
            EntityType::Directory => "directory",
            EntityType::Featuregroup => "featuregroup",
            EntityType::Trainingdataset => "trainingdataset",
        }
    }

    /// Feature groups and training datasets embed features / 是否包含特征
    pub fn has_features(&self) -> bool {
        matches!(self, EntityType::Featuregroup | EntityType::Trainingdataset)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dataset" | "ds" => Ok(EntityType::Dataset),
            "directory" | "dir" | "inode" => Ok(EntityType::Directory),
            "featuregroup" | "featuregroups" | "fg" => Ok(EntityType::Featuregroup),
            "trainingdataset" | "trainingdatasets" | "td" => Ok(EntityType::Trainingdataset),
            other => Err(format!("unknown entity type '{}'", other)),
        }
    }
}

/// Document key: (entity_type, entity_id) / 文档主键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub entity_type: EntityType,
    pub entity_id: i64,
}

impl EntityKey {
    pub fn new(entity_type: EntityType, entity_id: i64) -> Self {
        Self { entity_type, entity_id }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.entity_id)
    }
}

/// What a log entry's `entity_ref` points at / 日志条目指向的对象
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    Entity(EntityKey),
    Project(i64),
}

impl FromStr for LogTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s.trim().split_once(':')
            .ok_or_else(|| format!("missing ':' in '{}'", s))?;
        let id: i64 = id.trim().parse()
            .map_err(|_| format!("bad id in '{}'", s))?;
        if kind.trim().eq_ignore_ascii_case("project") {
            return Ok(LogTarget::Project(id));
        }
        Ok(LogTarget::Entity(EntityKey::new(kind.trim().parse()?, id)))
    }
}

impl fmt::Display for LogTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogTarget::Entity(key) => write!(f, "{}", key),
            LogTarget::Project(id) => write!(f, "project:{}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self { key: key.into(), value: value.into() }
    }
}

/// Column of a feature group or training dataset / 特征描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureDescriptor {
    pub name: String,
    #[serde(rename = "type", default)]
    pub feature_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub primary: bool,
}

/// One document per indexable entity / 每个实体一个索引文档
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDocument {
    pub entity_type: EntityType,
    pub entity_id: i64,
    pub name: String,
    pub parent_project_id: i64,
    pub parent_project_name: String,
    /// Owning dataset inode / 所属数据集
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    /// Unix seconds / 创建时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub featurestore_id: Option<i64>,
    #[serde(default)]
    pub xattrs: BTreeMap<String, String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub features: Vec<FeatureDescriptor>,
}

impl IndexDocument {
    pub fn new(key: EntityKey, name: impl Into<String>, project_id: i64, project_name: impl Into<String>) -> Self {
        Self {
            entity_type: key.entity_type,
            entity_id: key.entity_id,
            name: name.into(),
            parent_project_id: project_id,
            parent_project_name: project_name.into(),
            dataset_id: None,
            version: None,
            description: None,
            creator: None,
            created: None,
            featurestore_id: None,
            xattrs: BTreeMap::new(),
            tags: Vec::new(),
            features: Vec::new(),
        }
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type, self.entity_id)
    }

    /// Directory name on disk: versioned entities live in `<name>_<version>` / 磁盘上的目录名
    pub fn dir_name(&self) -> String {
        match (self.entity_type.has_features(), self.version) {
            (true, Some(version)) => format!("{}_{}", self.name, version),
            _ => self.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_target_parse() {
        assert_eq!(
            "featuregroup:12".parse::<LogTarget>().unwrap(),
            LogTarget::Entity(EntityKey::new(EntityType::Featuregroup, 12))
        );
        assert_eq!("PROJECT:3".parse::<LogTarget>().unwrap(), LogTarget::Project(3));
        assert!("featuregroup".parse::<LogTarget>().is_err());
        assert!("feature:1".parse::<LogTarget>().is_err());
        assert!("dataset:abc".parse::<LogTarget>().is_err());
    }

    #[test]
    fn test_source_table_names() {
        assert_eq!("HDFSMetadataLog".parse::<SourceTable>().unwrap(), SourceTable::Metadata);
        assert_eq!(SourceTable::FileProv.table_name(), "file_prov_log");
        for (i, table) in SourceTable::ALL.iter().enumerate() {
            assert_eq!(table.index(), i);
            assert_eq!(table.as_str().parse::<SourceTable>().unwrap(), *table);
        }
    }

    #[test]
    fn test_dir_name_uses_version_for_featurestore_entities() {
        let mut fg = IndexDocument::new(EntityKey::new(EntityType::Featuregroup, 1), "car1", 1, "p");
        fg.version = Some(1);
        assert_eq!(fg.dir_name(), "car1_1");

        let mut ds = IndexDocument::new(EntityKey::new(EntityType::Dataset, 2), "car1", 1, "p");
        ds.version = Some(1);
        assert_eq!(ds.dir_name(), "car1");
    }

    #[test]
    fn test_document_serializes_camel_case() {
        let doc = IndexDocument::new(EntityKey::new(EntityType::Dataset, 7), "car1", 1, "demo");
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["parentProjectId"], 1);
        assert_eq!(json["entityType"], "DATASET");
        assert!(json.get("version").is_none());
    }
}
