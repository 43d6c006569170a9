//! End-to-end query processing for one registry and configuration.
//!
//! ```text
//! text ─ parse ─▶ AST ─ gene sets ─▶ nested scopes ─▶ facets ─▶ compile ─▶ SearchRequest ─ execute ─▶ SearchResponse
//! ```
//!
//! The engine holds only shared read-only state, so one instance can serve
//! concurrent callers.

use std::sync::Arc;

use tracing::{debug, info};

use crate::ast::{ExpressionNode, TermsLookup};
use crate::backend::{SearchBackend, SearchResponse};
use crate::compiler::QueryCompiler;
use crate::config::CompilerConfig;
use crate::error::PqlError;
use crate::passes::{expand_gene_sets, resolve_facets, scope_nested_fields};
use crate::query::SearchRequest;
use crate::registry::{EntityType, Registry, TypeModel};

#[derive(Debug, Clone)]
pub struct PqlEngine {
    registry: Arc<Registry>,
    config: CompilerConfig,
}

impl PqlEngine {
    pub fn new(registry: Arc<Registry>, config: CompilerConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    fn model(&self, entity_type: EntityType) -> Result<&TypeModel, PqlError> {
        Ok(self.registry.model(entity_type)?)
    }

    /// Parses `text` into the AST for `entity_type`, before any rewriting.
    pub fn parse(&self, entity_type: EntityType, text: &str) -> Result<ExpressionNode, PqlError> {
        let model = self.model(entity_type)?;
        crate::parser::parse(text, model)
    }

    /// Parses and runs every rewriting pass.
    pub fn prepare(&self, entity_type: EntityType, text: &str) -> Result<ExpressionNode, PqlError> {
        let root = self.parse(entity_type, text)?;
        self.rewrite(entity_type, &root)
    }

    fn rewrite(&self, entity_type: EntityType, root: &ExpressionNode) -> Result<ExpressionNode, PqlError> {
        let model = self.model(entity_type)?;
        let root = expand_gene_sets(root, model)?;
        let root = scope_nested_fields(&root, model)?;
        let root = resolve_facets(&root, &self.config)?;
        debug!(%entity_type, ast = ?root, "rewrote query");
        Ok(root)
    }

    pub fn compile(&self, entity_type: EntityType, text: &str) -> Result<SearchRequest, PqlError> {
        let root = self.prepare(entity_type, text)?;
        self.compile_root(entity_type, &root)
    }

    /// Compiles `text` restricted to the documents whose `lookup.field` holds
    /// one of the ids stored in the lookup document.
    pub fn compile_with_lookup(
        &self,
        entity_type: EntityType,
        text: &str,
        lookup: TermsLookup,
    ) -> Result<SearchRequest, PqlError> {
        let root = self.parse(entity_type, text)?;
        let root = with_lookup(root, lookup);
        let root = self.rewrite(entity_type, &root)?;
        self.compile_root(entity_type, &root)
    }

    fn compile_root(&self, entity_type: EntityType, root: &ExpressionNode) -> Result<SearchRequest, PqlError> {
        let model = self.model(entity_type)?;
        QueryCompiler::new(self.registry.index(), model, &self.config).compile(root)
    }

    /// Compiles and runs `text` against `backend`.
    pub fn execute(
        &self,
        backend: &dyn SearchBackend,
        entity_type: EntityType,
        text: &str,
    ) -> Result<SearchResponse, PqlError> {
        let request = self.compile(entity_type, text)?;
        let response = backend.execute(&request)?;
        info!(%entity_type, query = text, total = response.total, hits = response.hits.len(), "query executed");
        Ok(response)
    }
}

/// Conjoins a lookup filter with the query's own filter.
fn with_lookup(root: ExpressionNode, lookup: TermsLookup) -> ExpressionNode {
    let children = match root {
        ExpressionNode::Root(children) => children,
        other => return other,
    };

    let mut rebuilt = Vec::with_capacity(children.len() + 1);
    let mut lookup = Some(ExpressionNode::TermsLookup(lookup));
    for child in children {
        match child {
            ExpressionNode::Filter(existing) => {
                if let Some(lookup) = lookup.take() {
                    rebuilt.push(ExpressionNode::Filter(Box::new(ExpressionNode::Bool {
                        must: vec![*existing, lookup],
                        should: Vec::new(),
                        must_not: Vec::new(),
                    })));
                }
            }
            other => rebuilt.push(other),
        }
    }
    if let Some(lookup) = lookup {
        // Filter goes after Select and Aggregations.
        let position = rebuilt
            .iter()
            .position(|child| !matches!(child, ExpressionNode::Select(_) | ExpressionNode::Aggregations(_)))
            .unwrap_or(rebuilt.len());
        rebuilt.insert(position, ExpressionNode::Filter(Box::new(lookup)));
    }
    ExpressionNode::Root(rebuilt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::query::{Clause, RequestMode};
    use serde_json::json;

    fn engine() -> PqlEngine {
        PqlEngine::new(Arc::new(Registry::builtin().unwrap()), CompilerConfig::default())
    }

    fn lookup() -> TermsLookup {
        TermsLookup {
            field: "_project_id".to_string(),
            index: "terms-lookup".to_string(),
            doc_type: "project-ids".to_string(),
            id: "set-1".to_string(),
            path: "values".to_string(),
        }
    }

    #[test]
    fn test_prepare_runs_passes_in_order() {
        let root = engine()
            .prepare(EntityType::DonorCentric, "facets(gene.type),eq(gene.geneSetId,'GS1'),eq(gene.type,'protein_coding')")
            .unwrap();
        let query = root.root_filter().unwrap();
        // the expanded gene set keeps its own gene scope next to the gene.type one
        let mut scopes = Vec::new();
        query.collect(&|node| matches!(node, ExpressionNode::Nested { .. }), &mut scopes);
        assert_eq!(scopes.len(), 2);
        assert_eq!(query.count_field("gene.pathway"), 1);

        let ExpressionNode::FilterAggregation { filters, .. } = &root.root_aggregations().unwrap()[0] else {
            panic!("Expected resolved facet");
        };
        assert_eq!(filters.count_field("gene.biotype"), 0);
        assert_eq!(filters.count_field("gene.curated_set"), 1);
    }

    #[test]
    fn test_compile_with_lookup_conjoins_filter() {
        let request = engine()
            .compile_with_lookup(EntityType::Project, "eq(primarySite,'Brain')", lookup())
            .unwrap();
        assert_eq!(
            request.query.to_json(),
            json!({ "bool": { "must": [
                { "term": { "primary_site": "Brain" } },
                { "terms": { "_project_id": {
                    "index": "terms-lookup", "type": "project-ids", "id": "set-1", "path": "values"
                } } }
            ] } })
        );
    }

    #[test]
    fn test_compile_with_lookup_without_filter() {
        let request = engine().compile_with_lookup(EntityType::Project, "count()", lookup()).unwrap();
        assert_eq!(request.mode, RequestMode::Count);
        assert!(matches!(request.query, Clause::TermsLookup { .. }));
    }

    #[test]
    fn test_errors_keep_their_class() {
        let engine = engine();
        let syntax = engine.compile(EntityType::Project, "eq(id,").unwrap_err();
        let semantic = engine.compile(EntityType::Project, "eq(colour,'red')").unwrap_err();
        assert_eq!(syntax.class(), ErrorClass::Client);
        assert!(matches!(syntax, PqlError::Syntax(_)));
        assert!(matches!(semantic, PqlError::Semantic(_)));

        let empty = PqlEngine::new(
            Arc::new(Registry::from_json_str(r#"{ "index": "i", "types": {} }"#).unwrap()),
            CompilerConfig::default(),
        );
        let config = empty.compile(EntityType::Project, "").unwrap_err();
        assert_eq!(config.class(), ErrorClass::Server);
    }
}
