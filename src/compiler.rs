//! Lowers a rewritten AST into a [`SearchRequest`].
//!
//! The compiler expects the tree produced by the rewriting passes: gene-set
//! fields expanded, nested leaves scoped and facets resolved into
//! `FilterAggregation`s. It does no rewriting of its own apart from the
//! relevance scoring wrapper for types that define one.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::ast::{ExpressionNode, SortField, SortOrder, TermsAggregation, SCORE_FIELD};
use crate::config::CompilerConfig;
use crate::error::{ConfigurationError, PqlError};
use crate::query::{
    Aggregation, AggregationKind, BoolQuery, Clause, RequestMode, ScoreMode, SearchRequest, SortSpec,
};
use crate::registry::{ScoringModel, TypeModel};

/// Child aggregation names of a facet.
pub const FILTERED_AGG: &str = "filtered";
pub const NESTED_AGG: &str = "nested";
pub const TERMS_AGG: &str = "terms";
pub const MISSING_AGG: &str = "missing";

pub struct QueryCompiler<'a> {
    index: &'a str,
    model: &'a TypeModel,
    config: &'a CompilerConfig,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(index: &'a str, model: &'a TypeModel, config: &'a CompilerConfig) -> Self {
        Self { index, model, config }
    }

    pub fn compile(&self, root: &ExpressionNode) -> Result<SearchRequest, PqlError> {
        if !matches!(root, ExpressionNode::Root(_)) {
            return Err(ConfigurationError::new("compiler expects a Root node").into());
        }

        let filter = root.root_filter();
        let base = match filter {
            Some(node) => self.compile_filter(node)?,
            None => Clause::MatchAll,
        };

        let mut request = SearchRequest {
            index: self.index.to_string(),
            doc_type: self.model.index_type().to_string(),
            mode: RequestMode::Count,
            query: base,
            aggregations: BTreeMap::new(),
            fields: Vec::new(),
            sort: Vec::new(),
            from: 0,
            size: 0,
        };

        if root.is_count() {
            debug!(doc_type = %request.doc_type, "compiled count request");
            return Ok(request);
        }

        request.mode = RequestMode::Search;
        if let Some(scoring) = self.model.scoring() {
            request.query = self.score(scoring, request.query, filter)?;
        }
        if let Some(aggregations) = root.root_aggregations() {
            for aggregation in aggregations {
                let (name, compiled) = self.compile_facet(aggregation)?;
                request.aggregations.insert(name, compiled);
            }
        }

        let mut select = None;
        let mut sort = None;
        let mut limit = None;
        for child in root.root_children() {
            match child {
                ExpressionNode::Select(fields) => select = Some(fields.as_slice()),
                ExpressionNode::Sort(fields) => sort = Some(fields.as_slice()),
                ExpressionNode::Limit { from, size } => limit = Some((*from, *size)),
                _ => {}
            }
        }

        request.fields = select.unwrap_or_else(|| self.model.default_fields()).to_vec();
        request.sort = self.sort(sort.unwrap_or_else(|| self.model.default_sort()));

        let (from, size) = limit.unwrap_or((0, self.config.default_size));
        if size > self.config.max_size {
            warn!(requested = size, max_size = self.config.max_size, "page size clamped");
        }
        request.from = from;
        request.size = size.min(self.config.max_size);

        debug!(
            doc_type = %request.doc_type,
            facets = request.aggregations.len(),
            from = request.from,
            size = request.size,
            "compiled search request"
        );
        Ok(request)
    }

    /// Compiles one filter subtree.
    pub fn compile_filter(&self, node: &ExpressionNode) -> Result<Clause, PqlError> {
        Ok(match node {
            ExpressionNode::Term { field, value } => Clause::Term { field: field.clone(), value: value.to_json() },
            ExpressionNode::Terms { values, .. } if values.is_empty() => Clause::MatchNone,
            ExpressionNode::Terms { field, values } => Clause::Terms {
                field: field.clone(),
                values: values.iter().map(|v| v.to_json()).collect(),
            },
            ExpressionNode::Range { field, bound, value } => Clause::Range {
                field: field.clone(),
                bound: *bound,
                value: value.to_json(),
            },
            ExpressionNode::Exists { field } => Clause::Exists { field: field.clone() },
            ExpressionNode::Missing { field } => Clause::Bool(BoolQuery {
                must_not: vec![Clause::Exists { field: field.clone() }],
                ..BoolQuery::default()
            }),
            ExpressionNode::And(children) => Clause::Bool(BoolQuery {
                must: self.compile_all(children)?,
                ..BoolQuery::default()
            }),
            ExpressionNode::Or(children) => Clause::Bool(BoolQuery {
                should: self.compile_all(children)?,
                minimum_should_match: Some(1),
                ..BoolQuery::default()
            }),
            ExpressionNode::Not(inner) => Clause::Bool(BoolQuery {
                must_not: vec![self.compile_filter(inner)?],
                ..BoolQuery::default()
            }),
            ExpressionNode::Bool { must, should, must_not } => Clause::Bool(BoolQuery {
                must: self.compile_all(must)?,
                should: self.compile_all(should)?,
                must_not: self.compile_all(must_not)?,
                filter: Vec::new(),
                minimum_should_match: (!should.is_empty()).then_some(1),
            }),
            ExpressionNode::Nested { path, inner } => {
                if !self.model.is_nested_path(path) {
                    return Err(ConfigurationError::new(format!(
                        "`{}` is not a nested path of {}",
                        path,
                        self.model.entity_type()
                    ))
                    .into());
                }
                Clause::Nested { path: path.clone(), query: Box::new(self.compile_filter(inner)?), score_mode: None }
            }
            ExpressionNode::TermsLookup(lookup) => Clause::TermsLookup {
                field: lookup.field.clone(),
                index: lookup.index.clone(),
                doc_type: lookup.doc_type.clone(),
                id: lookup.id.clone(),
                path: lookup.path.clone(),
            },
            ExpressionNode::MatchAll => Clause::MatchAll,
            _ => return Err(ConfigurationError::new("request node found inside a filter").into()),
        })
    }

    fn compile_all(&self, children: &[ExpressionNode]) -> Result<Vec<Clause>, PqlError> {
        children.iter().map(|child| self.compile_filter(child)).collect()
    }

    /// `global` → `filtered` (the facet's own filter) → optional `nested` → `terms` + `missing`.
    fn compile_facet(&self, node: &ExpressionNode) -> Result<(String, Aggregation), PqlError> {
        let ExpressionNode::FilterAggregation { filters, inner } = node else {
            return Err(ConfigurationError::new("facets must be resolved before compilation").into());
        };
        let TermsAggregation { name, field, nested, size } = inner;
        let size = size.unwrap_or(self.config.max_facet_buckets);

        let counts = |agg: Aggregation| {
            agg.with(TERMS_AGG, Aggregation::new(AggregationKind::Terms { field: field.clone(), size }))
                .with(MISSING_AGG, Aggregation::new(AggregationKind::Missing { field: field.clone() }))
        };

        let filtered = Aggregation::new(AggregationKind::Filter(self.compile_filter(filters)?));
        let filtered = match nested {
            Some(path) => {
                if !self.model.is_nested_path(path) {
                    return Err(ConfigurationError::new(format!(
                        "facet `{}` uses unknown nested path `{}`",
                        name, path
                    ))
                    .into());
                }
                filtered.with(NESTED_AGG, counts(Aggregation::new(AggregationKind::Nested { path: path.clone() })))
            }
            None => counts(filtered),
        };

        Ok((name.clone(), Aggregation::new(AggregationKind::Global).with(FILTERED_AGG, filtered)))
    }

    /// Ranks matches by how many nested documents of the scoring kind satisfy
    /// the filter's constraints on that kind. The base query only filters.
    fn score(&self, scoring: &ScoringModel, base: Clause, filter: Option<&ExpressionNode>) -> Result<Clause, PqlError> {
        let inner = match filter {
            Some(filter) => self.scoring_filter(filter, &scoring.path)?,
            None => None,
        };

        Ok(Clause::Bool(BoolQuery {
            should: vec![Clause::FunctionScore {
                query: Box::new(Clause::Nested {
                    path: scoring.path.clone(),
                    query: Box::new(Clause::ConstantScore(Box::new(inner.unwrap_or(Clause::MatchAll)))),
                    score_mode: Some(ScoreMode::Sum),
                }),
                script: scoring.script.clone(),
            }],
            filter: vec![base],
            ..BoolQuery::default()
        }))
    }

    /// Constraints of `node` on the nested documents at `path`, keeping the
    /// boolean structure around them. Negated constraints never score.
    /// `None` means `node` says nothing about those documents.
    fn scoring_filter(&self, node: &ExpressionNode, path: &str) -> Result<Option<Clause>, PqlError> {
        Ok(match node {
            ExpressionNode::Nested { path: nested, inner } if nested == path => Some(self.compile_filter(inner)?),
            ExpressionNode::And(children) => self.scoring_all(children, path)?,
            ExpressionNode::Or(children) => self.scoring_any(children, path)?,
            ExpressionNode::Bool { must, should, .. } => {
                let parts: Vec<Clause> = [self.scoring_all(must, path)?, self.scoring_any(should, path)?]
                    .into_iter()
                    .flatten()
                    .collect();
                conjunction(parts)
            }
            _ => None,
        })
    }

    fn scoring_parts(&self, children: &[ExpressionNode], path: &str) -> Result<Vec<Clause>, PqlError> {
        let mut parts = Vec::new();
        for child in children {
            parts.extend(self.scoring_filter(child, path)?);
        }
        Ok(parts)
    }

    fn scoring_all(&self, children: &[ExpressionNode], path: &str) -> Result<Option<Clause>, PqlError> {
        Ok(conjunction(self.scoring_parts(children, path)?))
    }

    fn scoring_any(&self, children: &[ExpressionNode], path: &str) -> Result<Option<Clause>, PqlError> {
        let mut parts = self.scoring_parts(children, path)?;
        Ok(match parts.len() {
            0 => None,
            1 => parts.pop(),
            _ => Some(Clause::Bool(BoolQuery { should: parts, minimum_should_match: Some(1), ..BoolQuery::default() })),
        })
    }

    fn sort(&self, fields: &[SortField]) -> Vec<SortSpec> {
        let mut sort: Vec<SortSpec> = fields
            .iter()
            .map(|f| SortSpec { field: f.field.clone(), order: f.order })
            .collect();
        let scored_first = sort.first().is_some_and(|s| s.field == SCORE_FIELD);
        if self.model.scoring().is_some() && !scored_first {
            sort.push(SortSpec { field: SCORE_FIELD.to_string(), order: SortOrder::Desc });
        }
        sort
    }
}

fn conjunction(mut parts: Vec<Clause>) -> Option<Clause> {
    match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => Some(Clause::Bool(BoolQuery { must: parts, ..BoolQuery::default() })),
    }
}
