//! Facet self-exclusion.
//!
//! A facet counts values of one field under the query's filter with every
//! condition on that same field removed, so the user can still see the
//! alternatives to what is already selected. Each facet therefore gets its
//! own copy of the filter. The original filter is moved into a `Query` node
//! that drives hits, paging and scoring.

use tracing::debug;

use crate::ast::ExpressionNode;
use crate::config::CompilerConfig;
use crate::error::{ConfigurationError, PqlError};

/// Returns the tree unchanged (as a copy) when it requests no facets.
pub fn resolve_facets(root: &ExpressionNode, config: &CompilerConfig) -> Result<ExpressionNode, PqlError> {
    let ExpressionNode::Root(children) = root else {
        return Err(ConfigurationError::new("facet resolution expects a Root node").into());
    };
    let Some(aggregations) = root.root_aggregations() else {
        return Ok(root.clone());
    };

    let filter = root.root_filter();
    let mut resolved = Vec::with_capacity(aggregations.len());
    for aggregation in aggregations {
        match aggregation {
            ExpressionNode::TermsAggregation(facet) => {
                let filters = filter
                    .and_then(|filter| strip_field(filter, &facet.field))
                    .unwrap_or(ExpressionNode::MatchAll);
                let mut inner = facet.clone();
                inner.size = Some(config.max_facet_buckets);
                debug!(facet = %facet.name, field = %facet.field, "resolved facet filter");
                resolved.push(ExpressionNode::FilterAggregation { filters: Box::new(filters), inner });
            }
            // already resolved
            other => resolved.push(other.clone()),
        }
    }

    let query = filter.cloned().unwrap_or(ExpressionNode::MatchAll);
    let mut query = Some(query);
    let mut rebuilt = Vec::with_capacity(children.len() + 1);
    for child in children {
        match child {
            ExpressionNode::Aggregations(_) => {
                rebuilt.push(ExpressionNode::Aggregations(std::mem::take(&mut resolved)));
                rebuilt.extend(query.take().map(|q| ExpressionNode::Query(Box::new(q))));
            }
            ExpressionNode::Filter(_) | ExpressionNode::Query(_) => {}
            other => rebuilt.push(other.clone()),
        }
    }

    Ok(ExpressionNode::Root(rebuilt))
}

/// Copy of `node` without the leaf conditions on `field`. Containers left
/// empty disappear; `None` means nothing remains.
pub fn strip_field(node: &ExpressionNode, field: &str) -> Option<ExpressionNode> {
    match node {
        ExpressionNode::And(children) => {
            let kept = strip_all(children, field);
            (!kept.is_empty()).then(|| ExpressionNode::and(kept))
        }
        ExpressionNode::Or(children) => {
            let kept = strip_all(children, field);
            (!kept.is_empty()).then(|| ExpressionNode::or(kept))
        }
        ExpressionNode::Bool { must, should, must_not } => {
            let mut must = strip_all(must, field);
            let mut should = strip_all(should, field);
            let mut must_not = strip_all(must_not, field);
            match (must.len(), should.len(), must_not.len()) {
                (0, 0, 0) => None,
                (1, 0, 0) => must.pop(),
                (0, 1, 0) => should.pop(),
                (0, 0, 1) => must_not.pop().map(|child| ExpressionNode::Not(Box::new(child))),
                _ => Some(ExpressionNode::Bool { must, should, must_not }),
            }
        }
        ExpressionNode::Not(inner) => {
            strip_field(inner, field).map(|inner| ExpressionNode::Not(Box::new(inner)))
        }
        ExpressionNode::Nested { path, inner } => strip_field(inner, field).map(|inner| ExpressionNode::Nested {
            path: path.clone(),
            inner: Box::new(inner),
        }),
        leaf if leaf.field() == Some(field) => None,
        other => Some(other.clone()),
    }
}

fn strip_all(children: &[ExpressionNode], field: &str) -> Vec<ExpressionNode> {
    children.iter().filter_map(|child| strip_field(child, field)).collect()
}
