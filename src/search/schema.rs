//! Search query and result schema / 搜索查询与结果的 Schema 定义

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::QueryError;
use crate::models::{EntityType, Tag};

/// Requested document kind / 搜索类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SearchKind {
    Any,
    Dataset,
    Directory,
    Featuregroup,
    Trainingdataset,
    Feature,
}

impl SearchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchKind::Any => "ANY",
            SearchKind::Dataset => "DATASET",
            SearchKind::Directory => "DIRECTORY",
            SearchKind::Featuregroup => "FEATUREGROUP",
            SearchKind::Trainingdataset => "TRAININGDATASET",
            SearchKind::Feature => "FEATURE",
        }
    }

    /// Whether whole-entity hits of this type are wanted / 是否返回该类型的实体命中
    pub fn accepts(&self, entity_type: EntityType) -> bool {
        *self == SearchKind::Any || *self == SearchKind::from(entity_type)
    }

    /// Whether embedded feature hits are wanted / 是否返回特征命中
    pub fn wants_features(&self) -> bool {
        matches!(self, SearchKind::Any | SearchKind::Feature)
    }

    /// Parse a user supplied kind, empty means ANY / 解析查询参数
    pub fn parse_param(raw: Option<&str>) -> Result<Self, QueryError> {
        match raw.map(str::trim) {
            None | Some("") => Ok(SearchKind::Any),
            Some(s) => s.parse(),
        }
    }
}

impl From<EntityType> for SearchKind {
    fn from(entity_type: EntityType) -> Self {
        match entity_type {
            EntityType::Dataset => SearchKind::Dataset,
            EntityType::Directory => SearchKind::Directory,
            EntityType::Featuregroup => SearchKind::Featuregroup,
            EntityType::Trainingdataset => SearchKind::Trainingdataset,
        }
    }
}

impl fmt::Display for SearchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchKind {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ANY" | "ALL" => Ok(SearchKind::Any),
            "DATASET" | "DATASETS" => Ok(SearchKind::Dataset),
            "DIRECTORY" | "DIRECTORIES" | "INODE" => Ok(SearchKind::Directory),
            "FEATUREGROUP" | "FEATUREGROUPS" => Ok(SearchKind::Featuregroup),
            "TRAININGDATASET" | "TRAININGDATASETS" => Ok(SearchKind::Trainingdataset),
            "FEATURE" | "FEATURES" => Ok(SearchKind::Feature),
            _ => Err(QueryError::InvalidKind(s.to_string())),
        }
    }
}

/// Visibility of a query / 搜索范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "lowercase")]
pub enum Scope {
    /// Every project; access filtering happens outside the index / 全局
    Global,
    Project(i64),
    /// Documents inside one dataset / 数据集内
    Dataset(i64),
}

impl Scope {
    pub fn validate(&self) -> Result<(), QueryError> {
        match self {
            Scope::Global => Ok(()),
            Scope::Project(id) if *id <= 0 => Err(QueryError::InvalidScope(format!("project id {}", id))),
            Scope::Dataset(id) if *id <= 0 => Err(QueryError::InvalidScope(format!("dataset id {}", id))),
            _ => Ok(()),
        }
    }
}

/// Search query / 搜索查询
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub scope: Scope,
    pub kind: SearchKind,
    pub term: String,
    /// Defaults to the configured max results / 默认使用配置的最大结果数
    pub limit: Option<usize>,
}

impl SearchQuery {
    pub fn new(scope: Scope, kind: SearchKind, term: impl Into<String>) -> Self {
        Self {
            scope,
            kind,
            term: term.into(),
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Fields of a document that caused the match / 命中字段
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Highlights {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Matching xattrs, key -> value / 命中的扩展属性
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub other_xattrs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
    /// Matching feature names / 命中的特征名
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<String>,
}

impl Highlights {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.other_xattrs.is_empty()
            && self.tags.is_empty()
            && self.features.is_empty()
    }

    /// Names of the highlighted fields / 命中字段名列表
    pub fn fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.name.is_some() {
            fields.push("name");
        }
        if self.description.is_some() {
            fields.push("description");
        }
        if !self.other_xattrs.is_empty() {
            fields.push("otherXattrs");
        }
        if !self.tags.is_empty() {
            fields.push("tags");
        }
        if !self.features.is_empty() {
            fields.push("features");
        }
        fields
    }
}

/// Back-reference from a feature hit to the entity embedding it / 特征所属实体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRef {
    pub id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i32>,
}

/// One search hit / 搜索命中
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    /// Never `ANY` / 不会是 ANY
    #[serde(rename = "type")]
    pub kind: SearchKind,
    /// Entity id; for feature hits the owning entity / 实体ID，特征命中时为所属实体
    #[serde(rename = "id")]
    pub entity_id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub featurestore_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_id: Option<i64>,
    pub parent_project_id: i64,
    pub parent_project_name: String,
    /// Projects through which the hit is reachable / 可访问的项目
    pub access_projects: BTreeMap<i64, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub featuregroup: Option<OwnerRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trainingdataset: Option<OwnerRef>,
    pub highlights: Highlights,
    pub score: u32,
}

impl SearchHit {
    /// Name of the feature for feature hits / 特征命中的特征名
    pub fn feature_name(&self) -> Option<&str> {
        (self.kind == SearchKind::Feature).then_some(self.name.as_str())
    }
}

/// Hits grouped by kind for the REST layer / 按类型分组的结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub datasets: Vec<SearchHit>,
    pub directories: Vec<SearchHit>,
    pub featuregroups: Vec<SearchHit>,
    pub trainingdatasets: Vec<SearchHit>,
    pub features: Vec<SearchHit>,
}

impl SearchResults {
    pub fn from_hits(hits: Vec<SearchHit>) -> Self {
        let mut results = Self::default();
        for hit in hits {
            match hit.kind {
                SearchKind::Dataset => results.datasets.push(hit),
                SearchKind::Directory => results.directories.push(hit),
                SearchKind::Featuregroup => results.featuregroups.push(hit),
                SearchKind::Trainingdataset => results.trainingdatasets.push(hit),
                SearchKind::Feature => results.features.push(hit),
                SearchKind::Any => {}
            }
        }
        results
    }

    pub fn total(&self) -> usize {
        self.datasets.len()
            + self.directories.len()
            + self.featuregroups.len()
            + self.trainingdatasets.len()
            + self.features.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_aliases() {
        assert_eq!("featuregroups".parse::<SearchKind>().unwrap(), SearchKind::Featuregroup);
        assert_eq!("ALL".parse::<SearchKind>().unwrap(), SearchKind::Any);
        assert_eq!(SearchKind::parse_param(Some(" ")).unwrap(), SearchKind::Any);
        assert_eq!(
            "car".parse::<SearchKind>(),
            Err(QueryError::InvalidKind("car".to_string()))
        );
    }

    #[test]
    fn test_kind_accepts() {
        assert!(SearchKind::Any.accepts(EntityType::Directory));
        assert!(SearchKind::Featuregroup.accepts(EntityType::Featuregroup));
        assert!(!SearchKind::Feature.accepts(EntityType::Featuregroup));
        assert!(SearchKind::Feature.wants_features());
        assert!(!SearchKind::Dataset.wants_features());
    }

    #[test]
    fn test_scope_validation() {
        assert!(Scope::Global.validate().is_ok());
        assert!(Scope::Project(3).validate().is_ok());
        assert!(matches!(Scope::Dataset(0).validate(), Err(QueryError::InvalidScope(_))));
    }

    #[test]
    fn test_highlight_fields() {
        let mut highlights = Highlights::default();
        assert!(highlights.is_empty());
        highlights.other_xattrs.insert("hobby".into(), "cars".into());
        highlights.tags.push(Tag::new("dog", "Luna"));
        assert_eq!(highlights.fields(), vec!["otherXattrs", "tags"]);

        let json = serde_json::to_value(&highlights).unwrap();
        assert_eq!(json["otherXattrs"]["hobby"], "cars");
        assert!(json.get("name").is_none());
    }
}
