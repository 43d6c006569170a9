//! Search request model.
//!
//! These are the structures handed to a [`crate::backend::SearchBackend`]:
//! filter clauses, aggregation trees and the request envelope. They render to
//! the JSON body of an Elasticsearch-style search request with `to_json`.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::ast::{RangeBound, SortOrder, SCORE_FIELD};

/// How the scores of matching nested documents combine into the parent score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreMode {
    Sum,
    Avg,
}

impl ScoreMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreMode::Sum => "sum",
            ScoreMode::Avg => "avg",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoolQuery {
    pub must: Vec<Clause>,
    pub should: Vec<Clause>,
    pub must_not: Vec<Clause>,
    /// Like `must`, without contributing to the score.
    pub filter: Vec<Clause>,
    pub minimum_should_match: Option<u32>,
}

/// A backend query clause.
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    MatchAll,
    MatchNone,
    Term { field: String, value: Value },
    Terms { field: String, values: Vec<Value> },
    Range { field: String, bound: RangeBound, value: Value },
    Exists { field: String },
    Bool(BoolQuery),
    Nested { path: String, query: Box<Clause>, score_mode: Option<ScoreMode> },
    /// Matches documents whose `field` holds one of the ids stored in another
    /// document (`index`/`doc_type`/`id`, array under `path`).
    TermsLookup { field: String, index: String, doc_type: String, id: String, path: String },
    /// Every match scores 1.
    ConstantScore(Box<Clause>),
    /// Replaces the score of `query` matches with the result of `script`.
    FunctionScore { query: Box<Clause>, script: String },
}

impl Clause {
    pub fn to_json(&self) -> Value {
        match self {
            Clause::MatchAll => json!({ "match_all": {} }),
            Clause::MatchNone => json!({ "match_none": {} }),
            Clause::Term { field, value } => json!({ "term": { field.as_str(): value } }),
            Clause::Terms { field, values } => json!({ "terms": { field.as_str(): values } }),
            Clause::Range { field, bound, value } => {
                json!({ "range": { field.as_str(): { bound.as_str(): value } } })
            }
            Clause::Exists { field } => json!({ "exists": { "field": field } }),
            Clause::Bool(bool_query) => {
                let mut body = Map::new();
                for (occur, clauses) in [
                    ("must", &bool_query.must),
                    ("should", &bool_query.should),
                    ("must_not", &bool_query.must_not),
                    ("filter", &bool_query.filter),
                ] {
                    if !clauses.is_empty() {
                        body.insert(occur.to_string(), clauses.iter().map(Clause::to_json).collect());
                    }
                }
                if let Some(minimum) = bool_query.minimum_should_match {
                    body.insert("minimum_should_match".to_string(), Value::from(minimum));
                }
                json!({ "bool": body })
            }
            Clause::Nested { path, query, score_mode } => {
                let mut body = Map::new();
                body.insert("path".to_string(), Value::from(path.as_str()));
                body.insert("query".to_string(), query.to_json());
                if let Some(mode) = score_mode {
                    body.insert("score_mode".to_string(), Value::from(mode.as_str()));
                }
                json!({ "nested": body })
            }
            Clause::TermsLookup { field, index, doc_type, id, path } => json!({
                "terms": {
                    field.as_str(): { "index": index, "type": doc_type, "id": id, "path": path }
                }
            }),
            Clause::ConstantScore(filter) => json!({ "constant_score": { "filter": filter.to_json() } }),
            Clause::FunctionScore { query, script } => json!({
                "function_score": {
                    "query": query.to_json(),
                    "script_score": { "script": script },
                    "boost_mode": "replace"
                }
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AggregationKind {
    /// Ignores the query; buckets over every document of the type.
    Global,
    Filter(Clause),
    Nested { path: String },
    Terms { field: String, size: usize },
    /// Counts documents without a value for `field`.
    Missing { field: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub kind: AggregationKind,
    pub aggregations: BTreeMap<String, Aggregation>,
}

impl Aggregation {
    pub fn new(kind: AggregationKind) -> Self {
        Self { kind, aggregations: BTreeMap::new() }
    }

    pub fn with(mut self, name: impl Into<String>, child: Aggregation) -> Self {
        self.aggregations.insert(name.into(), child);
        self
    }

    pub fn to_json(&self) -> Value {
        let (key, body) = match &self.kind {
            AggregationKind::Global => ("global", json!({})),
            AggregationKind::Filter(clause) => ("filter", clause.to_json()),
            AggregationKind::Nested { path } => ("nested", json!({ "path": path })),
            AggregationKind::Terms { field, size } => ("terms", json!({ "field": field, "size": size })),
            AggregationKind::Missing { field } => ("missing", json!({ "field": field })),
        };
        let mut out = Map::new();
        out.insert(key.to_string(), body);
        if !self.aggregations.is_empty() {
            out.insert("aggs".to_string(), aggregations_to_json(&self.aggregations));
        }
        Value::Object(out)
    }
}

fn aggregations_to_json(aggregations: &BTreeMap<String, Aggregation>) -> Value {
    aggregations
        .iter()
        .map(|(name, agg)| (name.clone(), agg.to_json()))
        .collect::<Map<String, Value>>()
        .into()
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortSpec {
    pub field: String,
    pub order: SortOrder,
}

impl SortSpec {
    pub fn to_json(&self) -> Value {
        if self.field == SCORE_FIELD {
            json!({ SCORE_FIELD: { "order": self.order.as_str() } })
        } else {
            json!({ self.field.as_str(): { "order": self.order.as_str(), "missing": "_last" } })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    Search,
    /// Only the number of matches is wanted.
    Count,
}

/// A complete request against one index and document type.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub index: String,
    pub doc_type: String,
    pub mode: RequestMode,
    pub query: Clause,
    pub aggregations: BTreeMap<String, Aggregation>,
    /// Source fields to return per hit.
    pub fields: Vec<String>,
    pub sort: Vec<SortSpec>,
    pub from: usize,
    pub size: usize,
}

impl SearchRequest {
    /// Request body; index and type travel outside it.
    pub fn to_json(&self) -> Value {
        let mut body = Map::new();
        body.insert("query".to_string(), self.query.to_json());
        if self.mode == RequestMode::Count {
            return Value::Object(body);
        }

        body.insert("_source".to_string(), json!(self.fields));
        if !self.sort.is_empty() {
            body.insert("sort".to_string(), self.sort.iter().map(SortSpec::to_json).collect());
        }
        body.insert("from".to_string(), Value::from(self.from));
        body.insert("size".to_string(), Value::from(self.size));
        if !self.aggregations.is_empty() {
            body.insert("aggs".to_string(), aggregations_to_json(&self.aggregations));
        }
        Value::Object(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_omits_empty_occurrences() {
        let clause = Clause::Bool(BoolQuery {
            should: vec![
                Clause::Term { field: "a".to_string(), value: json!("x") },
                Clause::Exists { field: "b".to_string() },
            ],
            minimum_should_match: Some(1),
            ..BoolQuery::default()
        });
        assert_eq!(
            clause.to_json(),
            json!({ "bool": {
                "should": [ { "term": { "a": "x" } }, { "exists": { "field": "b" } } ],
                "minimum_should_match": 1
            } })
        );
    }

    #[test]
    fn test_nested_and_range() {
        let clause = Clause::Nested {
            path: "gene".to_string(),
            query: Box::new(Clause::Range { field: "gene.start".to_string(), bound: RangeBound::Gte, value: json!(10) }),
            score_mode: Some(ScoreMode::Sum),
        };
        assert_eq!(
            clause.to_json(),
            json!({ "nested": { "path": "gene", "query": { "range": { "gene.start": { "gte": 10 } } }, "score_mode": "sum" } })
        );
    }

    #[test]
    fn test_facet_aggregation_tree() {
        let agg = Aggregation::new(AggregationKind::Global).with(
            "filtered",
            Aggregation::new(AggregationKind::Filter(Clause::MatchAll))
                .with("terms", Aggregation::new(AggregationKind::Terms { field: "donor_sex".to_string(), size: 5 }))
                .with("missing", Aggregation::new(AggregationKind::Missing { field: "donor_sex".to_string() })),
        );
        assert_eq!(
            agg.to_json(),
            json!({
                "global": {},
                "aggs": { "filtered": {
                    "filter": { "match_all": {} },
                    "aggs": {
                        "missing": { "missing": { "field": "donor_sex" } },
                        "terms": { "terms": { "field": "donor_sex", "size": 5 } }
                    }
                } }
            })
        );
    }

    #[test]
    fn test_count_request_has_only_query() {
        let request = SearchRequest {
            index: "portal".to_string(),
            doc_type: "project".to_string(),
            mode: RequestMode::Count,
            query: Clause::MatchAll,
            aggregations: BTreeMap::new(),
            fields: vec!["_project_id".to_string()],
            sort: vec![SortSpec { field: "_project_id".to_string(), order: SortOrder::Asc }],
            from: 0,
            size: 10,
        };
        assert_eq!(request.to_json(), json!({ "query": { "match_all": {} } }));

        let search = SearchRequest { mode: RequestMode::Search, ..request };
        let body = search.to_json();
        assert_eq!(body["sort"], json!([{ "_project_id": { "order": "asc", "missing": "_last" } }]));
        assert_eq!(body["_source"], json!(["_project_id"]));
        assert!(body.get("aggs").is_none());
    }
}
