//! AST rewriting passes.
//!
//! Every pass reads a finished tree and returns a new one; input trees are
//! never modified. The engine runs them in a fixed order:
//!
//! 1. [`gene_set`]: synthetic gene-set fields become disjunctions over the
//!    concrete pathway / curated set / GO term fields.
//! 2. [`nested`]: leaves on nested fields are wrapped in `Nested` scopes.
//! 3. [`facets`]: each facet gets a copy of the filter without its own field.

pub mod facets;
pub mod gene_set;
pub mod nested;

pub use facets::resolve_facets;
pub use gene_set::expand_gene_sets;
pub use nested::scope_nested_fields;

use crate::ast::ExpressionNode;
use crate::error::PqlError;

/// Rebuilds the container nodes of `node`, handing every child to `rewrite`.
/// Leaves are cloned unchanged.
pub(crate) fn map_children<F>(node: &ExpressionNode, mut rewrite: F) -> Result<ExpressionNode, PqlError>
where
    F: FnMut(&ExpressionNode) -> Result<ExpressionNode, PqlError>,
{
    Ok(match node {
        ExpressionNode::Root(children) => ExpressionNode::Root(all(children, &mut rewrite)?),
        ExpressionNode::And(children) => ExpressionNode::And(all(children, &mut rewrite)?),
        ExpressionNode::Or(children) => ExpressionNode::Or(all(children, &mut rewrite)?),
        ExpressionNode::Aggregations(children) => ExpressionNode::Aggregations(all(children, &mut rewrite)?),
        ExpressionNode::Bool { must, should, must_not } => ExpressionNode::Bool {
            must: all(must, &mut rewrite)?,
            should: all(should, &mut rewrite)?,
            must_not: all(must_not, &mut rewrite)?,
        },
        ExpressionNode::Filter(inner) => ExpressionNode::Filter(Box::new(rewrite(inner)?)),
        ExpressionNode::Query(inner) => ExpressionNode::Query(Box::new(rewrite(inner)?)),
        ExpressionNode::Not(inner) => ExpressionNode::Not(Box::new(rewrite(inner)?)),
        ExpressionNode::Nested { path, inner } => ExpressionNode::Nested {
            path: path.clone(),
            inner: Box::new(rewrite(inner)?),
        },
        ExpressionNode::FilterAggregation { filters, inner } => ExpressionNode::FilterAggregation {
            filters: Box::new(rewrite(filters)?),
            inner: inner.clone(),
        },
        leaf => leaf.clone(),
    })
}

fn all<F>(children: &[ExpressionNode], rewrite: &mut F) -> Result<Vec<ExpressionNode>, PqlError>
where
    F: FnMut(&ExpressionNode) -> Result<ExpressionNode, PqlError>,
{
    children.iter().map(|child| rewrite(child)).collect()
}
