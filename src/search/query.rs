//! Query engine - scoped free-text search over committed documents / 查询引擎

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::engine::SearchIndex;
use super::schema::{Highlights, OwnerRef, Scope, SearchHit, SearchKind, SearchQuery, SearchResults};
use super::tokenizer::QueryTerm;
use crate::error::QueryError;
use crate::models::{EntityType, FeatureDescriptor, IndexDocument};

const EXACT_NAME_SCORE: u32 = 4;
const NAME_SCORE: u32 = 2;
const FIELD_SCORE: u32 = 1;

/// Kinds the featurestore endpoint serves / 特征存储搜索允许的类型
const FEATURESTORE_KINDS: [SearchKind; 4] = [
    SearchKind::Any,
    SearchKind::Featuregroup,
    SearchKind::Trainingdataset,
    SearchKind::Feature,
];

/// Stateless over the index; safe to share across request handlers / 查询引擎
#[derive(Clone)]
pub struct QueryEngine {
    index: Arc<SearchIndex>,
    max_results: usize,
}

impl QueryEngine {
    pub fn new(index: Arc<SearchIndex>, max_results: usize) -> Self {
        Self { index, max_results }
    }

    /// Ranked hits for a query / 返回排序后的命中
    pub fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, QueryError> {
        query.scope.validate()?;
        let term = QueryTerm::parse(&query.term).ok_or(QueryError::EmptyTerm)?;
        let limit = query.limit.unwrap_or(self.max_results);

        let mut hits = self.index.scan(|docs| {
            let mut hits = Vec::new();
            for doc in docs.filter(|doc| in_scope(doc, query.scope)) {
                collect_hits(doc, &term, query, &mut hits);
            }
            hits
        });

        hits.sort_by(compare_hits);
        hits.truncate(limit);
        tracing::debug!("Search '{}' ({:?}, {}) -> {} hits", term.as_str(), query.scope, query.kind, hits.len());
        Ok(hits)
    }

    /// Project-local search; feature hits are only served by the featurestore endpoint / 项目内搜索
    pub fn search_project(&self, project_id: i64, term: &str) -> Result<SearchResults, QueryError> {
        let query = SearchQuery::new(Scope::Project(project_id), SearchKind::Any, term);
        let hits = self.search(&query)?
            .into_iter()
            .filter(|hit| hit.kind != SearchKind::Feature)
            .collect();
        Ok(SearchResults::from_hits(hits))
    }

    /// Search inside one dataset / 数据集内搜索
    pub fn search_dataset(&self, dataset_id: i64, term: &str) -> Result<SearchResults, QueryError> {
        let query = SearchQuery::new(Scope::Dataset(dataset_id), SearchKind::Any, term);
        let hits = self.search(&query)?
            .into_iter()
            .filter(|hit| hit.kind != SearchKind::Feature)
            .collect();
        Ok(SearchResults::from_hits(hits))
    }

    /// Featurestore search of a project, restricted to featurestore kinds / 特征存储搜索
    pub fn search_featurestore(
        &self,
        project_id: i64,
        kind: SearchKind,
        term: &str,
    ) -> Result<SearchResults, QueryError> {
        if !FEATURESTORE_KINDS.contains(&kind) {
            return Err(QueryError::KindNotAllowed {
                kind: kind.to_string(),
                endpoint: "featurestore",
            });
        }
        let query = SearchQuery::new(Scope::Project(project_id), kind, term);
        let hits = self.search(&query)?
            .into_iter()
            .filter(|hit| FEATURESTORE_KINDS.contains(&hit.kind))
            .collect();
        Ok(SearchResults::from_hits(hits))
    }

    /// Search across all projects / 全局搜索
    pub fn search_global(&self, kind: SearchKind, term: &str) -> Result<SearchResults, QueryError> {
        let hits = self.search(&SearchQuery::new(Scope::Global, kind, term))?;
        Ok(SearchResults::from_hits(hits))
    }
}

fn in_scope(doc: &IndexDocument, scope: Scope) -> bool {
    match scope {
        Scope::Global => true,
        Scope::Project(id) => doc.parent_project_id == id,
        Scope::Dataset(id) => doc.dataset_id == Some(id),
    }
}

fn collect_hits(doc: &IndexDocument, term: &QueryTerm, query: &SearchQuery, hits: &mut Vec<SearchHit>) {
    let matched_features: Vec<&FeatureDescriptor> = doc.features.iter()
        .filter(|feature| term.matches(&feature.name))
        .collect();

    if query.kind.accepts(doc.entity_type) {
        let mut highlights = Highlights::default();
        let mut score = 0;

        if term.matches(&doc.name) {
            highlights.name = Some(doc.name.clone());
            score += if term.is_exact(&doc.name) { EXACT_NAME_SCORE } else { NAME_SCORE };
        }
        if let Some(description) = doc.description.as_deref().filter(|d| term.matches(d)) {
            highlights.description = Some(description.to_string());
            score += FIELD_SCORE;
        }
        for (key, value) in &doc.xattrs {
            if term.matches(value) {
                highlights.other_xattrs.insert(key.clone(), value.clone());
            }
        }
        if !highlights.other_xattrs.is_empty() {
            score += FIELD_SCORE;
        }
        highlights.tags = doc.tags.iter()
            .filter(|tag| term.matches(&tag.key) || term.matches(&tag.value))
            .cloned()
            .collect();
        if !highlights.tags.is_empty() {
            score += FIELD_SCORE;
        }
        highlights.features = matched_features.iter().map(|f| f.name.clone()).collect();
        if !highlights.features.is_empty() {
            score += FIELD_SCORE;
        }

        if !highlights.is_empty() {
            hits.push(entity_hit(doc, query.scope, highlights, score));
        }
    }

    if query.kind.wants_features() && doc.entity_type.has_features() {
        for feature in matched_features {
            hits.push(feature_hit(doc, feature, term));
        }
    }
}

fn entity_hit(doc: &IndexDocument, scope: Scope, highlights: Highlights, score: u32) -> SearchHit {
    let name = match scope {
        Scope::Dataset(_) => doc.dir_name(),
        _ => doc.name.clone(),
    };
    SearchHit {
        kind: SearchKind::from(doc.entity_type),
        entity_id: doc.entity_id,
        name,
        version: doc.version,
        description: doc.description.clone(),
        creator: doc.creator.clone(),
        created: doc.created,
        featurestore_id: doc.featurestore_id,
        dataset_id: doc.dataset_id,
        parent_project_id: doc.parent_project_id,
        parent_project_name: doc.parent_project_name.clone(),
        access_projects: access_projects(doc),
        featuregroup: None,
        trainingdataset: None,
        highlights,
        score,
    }
}

fn feature_hit(doc: &IndexDocument, feature: &FeatureDescriptor, term: &QueryTerm) -> SearchHit {
    let owner = OwnerRef {
        id: doc.entity_id,
        name: doc.name.clone(),
        version: doc.version,
    };
    let (featuregroup, trainingdataset) = match doc.entity_type {
        EntityType::Trainingdataset => (None, Some(owner)),
        _ => (Some(owner), None),
    };
    let highlights = Highlights {
        name: Some(feature.name.clone()),
        features: vec![feature.name.clone()],
        ..Highlights::default()
    };
    let score = if term.is_exact(&feature.name) { EXACT_NAME_SCORE } else { NAME_SCORE };

    SearchHit {
        kind: SearchKind::Feature,
        entity_id: doc.entity_id,
        name: feature.name.clone(),
        version: doc.version,
        description: (!feature.description.is_empty()).then(|| feature.description.clone()),
        creator: doc.creator.clone(),
        created: doc.created,
        featurestore_id: doc.featurestore_id,
        dataset_id: doc.dataset_id,
        parent_project_id: doc.parent_project_id,
        parent_project_name: doc.parent_project_name.clone(),
        access_projects: access_projects(doc),
        featuregroup,
        trainingdataset,
        highlights,
        score,
    }
}

fn access_projects(doc: &IndexDocument) -> BTreeMap<i64, String> {
    BTreeMap::from([(doc.parent_project_id, doc.parent_project_name.clone())])
}

/// Score desc, then entity id, type and feature name ascending / 排序规则
fn compare_hits(a: &SearchHit, b: &SearchHit) -> Ordering {
    b.score.cmp(&a.score)
        .then(a.entity_id.cmp(&b.entity_id))
        .then(a.kind.cmp(&b.kind))
        .then(a.feature_name().cmp(&b.feature_name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityKey, SourceTable, Tag};
    use crate::pipeline::decoder::{EntityBody, Mutation};
    use crate::search::engine::IndexWriter;

    fn body(name: &str, project_id: i64) -> EntityBody {
        EntityBody {
            name: name.to_string(),
            project_id,
            project_name: format!("project{}", project_id),
            dataset_id: Some(100 + project_id),
            version: Some(1),
            description: None,
            creator: None,
            created: None,
            featurestore_id: Some(project_id),
            features: None,
        }
    }

    fn load(writer: &mut IndexWriter, mutations: Vec<Mutation>) {
        let mut batch = writer.begin(SourceTable::Metadata);
        for (seq, mutation) in mutations.into_iter().enumerate() {
            writer.stage(&mut batch, seq as u64 + 1, mutation).unwrap();
        }
        writer.publish(batch);
    }

    fn key(entity_type: EntityType, id: i64) -> EntityKey {
        EntityKey::new(entity_type, id)
    }

    /// car1, car2, othername1..3 in project 1, othername2 with car=audi, othername3 with hobby=cars
    fn car_fixture() -> QueryEngine {
        let (index, mut writer) = SearchIndex::new();
        let mut mutations = Vec::new();
        for (id, name) in [(1, "car1"), (2, "car2"), (3, "othername1"), (4, "othername2"), (5, "othername3")] {
            mutations.push(Mutation::UpsertEntity { key: key(EntityType::Featuregroup, id), body: body(name, 1) });
        }
        mutations.push(Mutation::SetXattr { key: key(EntityType::Featuregroup, 4), name: "car".into(), value: "audi".into() });
        mutations.push(Mutation::SetXattr { key: key(EntityType::Featuregroup, 5), name: "hobby".into(), value: "cars".into() });
        mutations.push(Mutation::UpsertEntity { key: key(EntityType::Dataset, 6), body: body("car_elsewhere", 2) });
        load(&mut writer, mutations);
        QueryEngine::new(index, 100)
    }

    #[test]
    fn test_search_completeness() {
        let engine = car_fixture();
        let hits = engine.search(&SearchQuery::new(Scope::Project(1), SearchKind::Featuregroup, "car")).unwrap();
        let names: Vec<&str> = hits.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["car1", "car2", "othername3"]);

        let other = &hits[2];
        assert_eq!(other.highlights.fields(), vec!["otherXattrs"]);
        assert_eq!(other.highlights.other_xattrs["hobby"], "cars");
        assert!(hits.iter().all(|h| !h.highlights.is_empty()));
    }

    #[test]
    fn test_scope_isolation() {
        let engine = car_fixture();
        let local = engine.search(&SearchQuery::new(Scope::Project(1), SearchKind::Any, "car")).unwrap();
        assert!(local.iter().all(|h| h.parent_project_id == 1));

        let global = engine.search_global(SearchKind::Any, "car").unwrap();
        assert_eq!(global.total(), 4);
        assert_eq!(global.datasets.len(), 1);
        assert_eq!(global.datasets[0].parent_project_id, 2);
        assert_eq!(global.datasets[0].access_projects[&2], "project2");
    }

    #[test]
    fn test_tag_search() {
        let (index, mut writer) = SearchIndex::new();
        load(&mut writer, vec![
            Mutation::UpsertEntity { key: key(EntityType::Featuregroup, 1), body: body("animals", 1) },
            Mutation::SetTags { key: key(EntityType::Featuregroup, 1), tags: vec![Tag::new("dog", "Luna")] },
        ]);
        let engine = QueryEngine::new(index, 100);

        let results = engine.search_featurestore(1, SearchKind::Featuregroup, "dog").unwrap();
        assert_eq!(results.featuregroups.len(), 1);
        assert_eq!(results.featuregroups[0].highlights.fields(), vec!["tags"]);

        let results = engine.search_featurestore(1, SearchKind::Any, "luna").unwrap();
        assert_eq!(results.featuregroups[0].highlights.tags, vec![Tag::new("dog", "Luna")]);
    }

    #[test]
    fn test_feature_hit_references_owner() {
        let (index, mut writer) = SearchIndex::new();
        let mut fg = body("animals", 1);
        fg.features = Some(vec![
            FeatureDescriptor { name: "dog".into(), feature_type: "INT".into(), description: String::new(), primary: true },
            FeatureDescriptor { name: "cat".into(), feature_type: "INT".into(), description: String::new(), primary: false },
        ]);
        let mut td = body("pets_td", 1);
        td.features = Some(vec![
            FeatureDescriptor { name: "hotdog".into(), feature_type: "STRING".into(), description: "snack".into(), primary: false },
        ]);
        load(&mut writer, vec![
            Mutation::UpsertEntity { key: key(EntityType::Featuregroup, 4), body: fg },
            Mutation::UpsertEntity { key: key(EntityType::Trainingdataset, 9), body: td },
        ]);
        let engine = QueryEngine::new(index, 100);

        let hits = engine.search(&SearchQuery::new(Scope::Project(1), SearchKind::Feature, "dog")).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.kind == SearchKind::Feature));
        assert_eq!(hits[0].name, "dog");
        assert_eq!(hits[0].featuregroup.as_ref().unwrap().id, 4);
        assert!(hits[0].trainingdataset.is_none());
        assert_eq!(hits[1].trainingdataset.as_ref().unwrap().name, "pets_td");

        let any = engine.search_featurestore(1, SearchKind::Any, "dog").unwrap();
        assert_eq!(any.featuregroups[0].highlights.features, vec!["dog"]);
        assert_eq!(any.features.len(), 2);
    }

    #[test]
    fn test_ranking_prefers_exact_name() {
        let (index, mut writer) = SearchIndex::new();
        load(&mut writer, vec![
            Mutation::UpsertEntity { key: key(EntityType::Dataset, 1), body: body("cars_raw", 1) },
            Mutation::UpsertEntity { key: key(EntityType::Dataset, 2), body: body("cars", 1) },
            Mutation::SetXattr { key: key(EntityType::Dataset, 3), name: "k".into(), value: "cars".into() },
            Mutation::UpsertEntity { key: key(EntityType::Dataset, 3), body: body("other", 1) },
        ]);
        let engine = QueryEngine::new(index, 100);

        let hits = engine.search(&SearchQuery::new(Scope::Global, SearchKind::Any, "CARS")).unwrap();
        let ids: Vec<i64> = hits.iter().map(|h| h.entity_id).collect();
        assert_eq!(ids, vec![2, 1, 3]);

        let limited = engine.search(&SearchQuery::new(Scope::Global, SearchKind::Any, "cars").with_limit(1)).unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_dataset_scope_uses_dir_name() {
        let engine = car_fixture();
        let results = engine.search_dataset(101, "car1").unwrap();
        assert_eq!(results.featuregroups.len(), 1);
        assert_eq!(results.featuregroups[0].name, "car1_1");
        assert!(engine.search_dataset(102, "car1").unwrap().featuregroups.is_empty());
    }

    #[test]
    fn test_query_errors() {
        let engine = car_fixture();
        assert_eq!(engine.search_global(SearchKind::Any, "  "), Err(QueryError::EmptyTerm));
        assert!(matches!(
            engine.search_featurestore(1, SearchKind::Dataset, "car"),
            Err(QueryError::KindNotAllowed { .. })
        ));
        assert!(matches!(engine.search_project(0, "car"), Err(QueryError::InvalidScope(_))));
    }
}
