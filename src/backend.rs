//! Search execution boundary.
//!
//! [`SearchBackend`] is the seam between the compiler and whatever runs the
//! request. [`InMemoryBackend`] evaluates requests against JSON documents
//! held in memory: it backs the integration tests and the interactive shell.
//!
//! Scoring in the in-memory backend is simplified: plain filters
//! score 0, `constant_score` scores 1, nested queries combine the scores of
//! their matching sub-documents, and `function_score` supports only the
//! `_score` script.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::ast::{RangeBound, SortOrder, SCORE_FIELD};
use crate::compiler::{FILTERED_AGG, MISSING_AGG, NESTED_AGG, TERMS_AGG};
use crate::config::read_config_file;
use crate::error::BackendError;
use crate::query::{Aggregation, AggregationKind, BoolQuery, Clause, RequestMode, ScoreMode, SearchRequest, SortSpec};

/// Runs compiled requests.
pub trait SearchBackend: Send + Sync {
    fn execute(&self, request: &SearchRequest) -> Result<SearchResponse, BackendError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hit {
    pub id: String,
    pub score: f64,
    /// Selected source fields by physical path.
    pub fields: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bucket {
    pub key: Value,
    pub doc_count: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct AggregationResult {
    pub doc_count: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub buckets: Vec<Bucket>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub aggregations: BTreeMap<String, AggregationResult>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SearchResponse {
    pub total: u64,
    pub hits: Vec<Hit>,
    pub aggregations: BTreeMap<String, AggregationResult>,
}

/// Value counts of one facet.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Facet {
    pub buckets: Vec<Bucket>,
    /// Documents (or nested documents) without a value.
    pub missing: u64,
}

impl Facet {
    pub fn total(&self) -> u64 {
        self.buckets.iter().map(|b| b.doc_count).sum::<u64>() + self.missing
    }

    pub fn count(&self, key: &str) -> Option<u64> {
        self.buckets.iter().find(|b| b.key == key).map(|b| b.doc_count)
    }
}

impl SearchResponse {
    /// Facet counts keyed by facet name, read out of the facet aggregations.
    pub fn facets(&self) -> BTreeMap<String, Facet> {
        let mut facets = BTreeMap::new();
        for (name, global) in &self.aggregations {
            let Some(filtered) = global.aggregations.get(FILTERED_AGG) else {
                continue;
            };
            let counts = filtered.aggregations.get(NESTED_AGG).unwrap_or(filtered);
            let facet = Facet {
                buckets: counts.aggregations.get(TERMS_AGG).map(|t| t.buckets.clone()).unwrap_or_default(),
                missing: counts.aggregations.get(MISSING_AGG).map_or(0, |m| m.doc_count),
            };
            facets.insert(name.clone(), facet);
        }
        facets
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Document {
    pub id: String,
    pub source: Value,
}

#[derive(Debug, Deserialize)]
struct RawLookup {
    index: String,
    #[serde(rename = "type")]
    doc_type: String,
    id: String,
    source: Value,
}

#[derive(Debug, Deserialize)]
struct Fixtures {
    #[serde(default)]
    documents: HashMap<String, Vec<Document>>,
    #[serde(default)]
    lookups: Vec<RawLookup>,
}

/// Documents and id-set lookups held in memory, keyed by document type.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    documents: HashMap<String, Vec<Document>>,
    lookups: HashMap<(String, String, String), Value>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a fixture file:
    /// `{ "documents": { "<type>": [{ "id", "source" }] }, "lookups": [{ "index", "type", "id", "source" }] }`.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, BackendError> {
        let content = read_config_file(path.as_ref()).map_err(|e| BackendError::new(e.message))?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self, BackendError> {
        let fixtures: Fixtures = serde_json::from_str(content)
            .map_err(|e| BackendError::new(format!("cannot parse fixtures: {}", e)))?;
        let mut backend = InMemoryBackend { documents: fixtures.documents, lookups: HashMap::new() };
        for lookup in fixtures.lookups {
            backend.add_lookup(&lookup.index, &lookup.doc_type, &lookup.id, lookup.source);
        }
        Ok(backend)
    }

    pub fn insert(&mut self, doc_type: &str, document: Document) {
        self.documents.entry(doc_type.to_string()).or_default().push(document);
    }

    /// Registers a document that `terms` lookups can read ids from.
    pub fn add_lookup(&mut self, index: &str, doc_type: &str, id: &str, source: Value) {
        self.lookups.insert((index.to_string(), doc_type.to_string(), id.to_string()), source);
    }

    pub fn document_count(&self, doc_type: &str) -> usize {
        self.documents.get(doc_type).map_or(0, Vec::len)
    }

    /// Score of the clause in `scope`, `None` when it does not match.
    fn evaluate(&self, clause: &Clause, scope: Scope<'_>) -> Result<Option<f64>, BackendError> {
        let matched = |hit: bool| if hit { Some(0.0) } else { None };
        Ok(match clause {
            Clause::MatchAll => Some(0.0),
            Clause::MatchNone => None,
            Clause::Term { field, value } => matched(scope.values(field).iter().any(|v| equal(v, value))),
            Clause::Terms { field, values } => matched(
                scope
                    .values(field)
                    .iter()
                    .any(|v| values.iter().any(|wanted| equal(v, wanted))),
            ),
            Clause::Range { field, bound, value } => matched(scope.values(field).iter().any(|v| {
                compare_values(v, value).is_some_and(|ordering| match bound {
                    RangeBound::Gt => ordering == Ordering::Greater,
                    RangeBound::Gte => ordering != Ordering::Less,
                    RangeBound::Lt => ordering == Ordering::Less,
                    RangeBound::Lte => ordering != Ordering::Greater,
                })
            })),
            Clause::Exists { field } => matched(!scope.values(field).is_empty()),
            Clause::Bool(bool_query) => self.evaluate_bool(bool_query, scope)?,
            Clause::Nested { path, query, score_mode } => {
                let mut scores = Vec::new();
                for child in scope.nested(path) {
                    if let Some(score) = self.evaluate(query, child)? {
                        scores.push(score);
                    }
                }
                if scores.is_empty() {
                    None
                } else {
                    Some(combine(&scores, score_mode.unwrap_or(ScoreMode::Avg)))
                }
            }
            Clause::TermsLookup { field, index, doc_type, id, path } => {
                let key = (index.clone(), doc_type.clone(), id.clone());
                match self.lookups.get(&key) {
                    Some(source) => {
                        let ids = Scope::root(source).values(path);
                        matched(scope.values(field).iter().any(|v| ids.iter().any(|id| equal(v, id))))
                    }
                    None => None,
                }
            }
            Clause::ConstantScore(filter) => self.evaluate(filter, scope)?.map(|_| 1.0),
            Clause::FunctionScore { query, script } => {
                if script != SCORE_FIELD {
                    return Err(BackendError::new(format!("unsupported score script `{}`", script)));
                }
                self.evaluate(query, scope)?
            }
        })
    }

    fn evaluate_bool(&self, bool_query: &BoolQuery, scope: Scope<'_>) -> Result<Option<f64>, BackendError> {
        let mut score = 0.0;
        for clause in &bool_query.must {
            match self.evaluate(clause, scope)? {
                Some(s) => score += s,
                None => return Ok(None),
            }
        }
        for clause in &bool_query.filter {
            if self.evaluate(clause, scope)?.is_none() {
                return Ok(None);
            }
        }
        for clause in &bool_query.must_not {
            if self.evaluate(clause, scope)?.is_some() {
                return Ok(None);
            }
        }

        let mut should_matches = 0;
        for clause in &bool_query.should {
            if let Some(s) = self.evaluate(clause, scope)? {
                should_matches += 1;
                score += s;
            }
        }
        let only_should = bool_query.must.is_empty() && bool_query.filter.is_empty();
        let required = bool_query
            .minimum_should_match
            .unwrap_or(if only_should && !bool_query.should.is_empty() { 1 } else { 0 });
        if should_matches < required {
            return Ok(None);
        }
        Ok(Some(score))
    }

    fn aggregate(&self, aggregation: &Aggregation, input: &[Scope<'_>], all: &[Scope<'_>]) -> Result<AggregationResult, BackendError> {
        let scopes: Vec<Scope<'_>> = match &aggregation.kind {
            AggregationKind::Global => all.to_vec(),
            AggregationKind::Filter(clause) => {
                let mut kept = Vec::new();
                for scope in input {
                    if self.evaluate(clause, *scope)?.is_some() {
                        kept.push(*scope);
                    }
                }
                kept
            }
            AggregationKind::Nested { path } => input.iter().flat_map(|scope| scope.nested(path)).collect(),
            AggregationKind::Terms { .. } => input.to_vec(),
            AggregationKind::Missing { field } => {
                input.iter().copied().filter(|scope| scope.values(field).is_empty()).collect()
            }
        };

        let buckets = match &aggregation.kind {
            AggregationKind::Terms { field, size } => terms_buckets(&scopes, field, *size),
            _ => Vec::new(),
        };

        let mut aggregations = BTreeMap::new();
        for (name, child) in &aggregation.aggregations {
            aggregations.insert(name.clone(), self.aggregate(child, &scopes, all)?);
        }

        Ok(AggregationResult { doc_count: scopes.len() as u64, buckets, aggregations })
    }
}

impl SearchBackend for InMemoryBackend {
    fn execute(&self, request: &SearchRequest) -> Result<SearchResponse, BackendError> {
        let documents = self
            .documents
            .get(&request.doc_type)
            .ok_or_else(|| BackendError::new(format!("unknown document type `{}`", request.doc_type)))?;

        let mut matches: Vec<(&Document, f64)> = Vec::new();
        for document in documents {
            if let Some(score) = self.evaluate(&request.query, Scope::root(&document.source))? {
                matches.push((document, score));
            }
        }
        let total = matches.len() as u64;
        debug!(doc_type = %request.doc_type, total, "executed in-memory search");

        if request.mode == RequestMode::Count {
            return Ok(SearchResponse { total, ..SearchResponse::default() });
        }

        matches.sort_by(|a, b| compare_hits(a, b, &request.sort));
        let hits = matches
            .iter()
            .skip(request.from)
            .take(request.size)
            .map(|(document, score)| Hit {
                id: document.id.clone(),
                score: *score,
                fields: project(&document.source, &request.fields),
            })
            .collect();

        let all: Vec<Scope<'_>> = documents.iter().map(|d| Scope::root(&d.source)).collect();
        let matched: Vec<Scope<'_>> = matches.iter().map(|(d, _)| Scope::root(&d.source)).collect();
        let mut aggregations = BTreeMap::new();
        for (name, aggregation) in &request.aggregations {
            aggregations.insert(name.clone(), self.aggregate(aggregation, &matched, &all)?);
        }

        Ok(SearchResponse { total, hits, aggregations })
    }
}

/// A document, or one nested sub-document located at `prefix`.
#[derive(Debug, Clone, Copy)]
struct Scope<'a> {
    prefix: &'a str,
    object: &'a Value,
}

impl<'a> Scope<'a> {
    fn root(object: &'a Value) -> Self {
        Scope { prefix: "", object }
    }

    fn relative<'p>(&self, path: &'p str) -> Option<&'p str> {
        if self.prefix.is_empty() {
            return Some(path);
        }
        path.strip_prefix(self.prefix)?.strip_prefix('.')
    }

    /// Non-null values at `path`; arrays along the way are flattened.
    fn values(&self, path: &str) -> Vec<&'a Value> {
        let mut out = Vec::new();
        if let Some(relative) = self.relative(path) {
            let segments: Vec<&str> = relative.split('.').collect();
            collect_values(self.object, &segments, &mut out);
        }
        out
    }

    fn nested(&self, path: &'a str) -> Vec<Scope<'a>> {
        self.values(path)
            .into_iter()
            .filter(|value| value.is_object())
            .map(|object| Scope { prefix: path, object })
            .collect()
    }
}

fn collect_values<'v>(value: &'v Value, segments: &[&str], out: &mut Vec<&'v Value>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_values(item, segments, out);
            }
        }
        Value::Null => {}
        _ => match segments.split_first() {
            None => out.push(value),
            Some((head, rest)) => {
                if let Some(child) = value.get(*head) {
                    collect_values(child, rest, out);
                }
            }
        },
    }
}

/// Numbers compare as f64, strings lexicographically, booleans false < true.
/// Mismatched types are not comparable.
fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn equal(left: &Value, right: &Value) -> bool {
    compare_values(left, right) == Some(Ordering::Equal)
}

fn combine(scores: &[f64], mode: ScoreMode) -> f64 {
    match mode {
        ScoreMode::Sum => scores.iter().sum(),
        ScoreMode::Avg => scores.iter().sum::<f64>() / scores.len() as f64,
    }
}

/// Buckets by distinct value; a document counts once per value it holds.
/// Largest buckets first, ties by key.
fn terms_buckets(scopes: &[Scope<'_>], field: &str, size: usize) -> Vec<Bucket> {
    let mut counts: BTreeMap<String, Bucket> = BTreeMap::new();
    for scope in scopes {
        let mut seen: Vec<String> = Vec::new();
        for value in scope.values(field) {
            let key = value.to_string();
            if seen.contains(&key) {
                continue;
            }
            counts
                .entry(key.clone())
                .or_insert_with(|| Bucket { key: value.clone(), doc_count: 0 })
                .doc_count += 1;
            seen.push(key);
        }
    }

    let mut buckets: Vec<Bucket> = counts.into_values().collect();
    buckets.sort_by(|a, b| {
        b.doc_count
            .cmp(&a.doc_count)
            .then_with(|| compare_values(&a.key, &b.key).unwrap_or(Ordering::Equal))
    });
    buckets.truncate(size);
    buckets
}

/// Asc sorts on the smallest value of a multi-valued field, desc on the
/// largest. Documents without a value go last either way.
fn compare_hits(a: &(&Document, f64), b: &(&Document, f64), sort: &[SortSpec]) -> Ordering {
    for spec in sort {
        let ordering = if spec.field == SCORE_FIELD {
            let ordering = a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal);
            match spec.order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        } else {
            match (sort_key(a.0, spec), sort_key(b.0, spec)) {
                (Some(x), Some(y)) => {
                    let ordering = compare_values(x, y).unwrap_or(Ordering::Equal);
                    match spec.order {
                        SortOrder::Asc => ordering,
                        SortOrder::Desc => ordering.reverse(),
                    }
                }
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn sort_key<'d>(document: &'d Document, spec: &SortSpec) -> Option<&'d Value> {
    let values = Scope::root(&document.source).values(&spec.field);
    let wanted = match spec.order {
        SortOrder::Asc => Ordering::Less,
        SortOrder::Desc => Ordering::Greater,
    };
    values.into_iter().reduce(|best, candidate| {
        if compare_values(candidate, best) == Some(wanted) {
            candidate
        } else {
            best
        }
    })
}

fn project(source: &Value, fields: &[String]) -> BTreeMap<String, Value> {
    let scope = Scope::root(source);
    let mut projected = BTreeMap::new();
    for field in fields {
        let mut values = scope.values(field);
        match values.len() {
            0 => {}
            1 => {
                projected.insert(field.clone(), values.remove(0).clone());
            }
            _ => {
                projected.insert(field.clone(), Value::Array(values.into_iter().cloned().collect()));
            }
        }
    }
    projected
}
