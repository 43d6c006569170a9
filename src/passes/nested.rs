//! Nested scoping of leaf filters.
//!
//! Fields stored inside repeated sub-documents (a donor's genes, a
//! mutation's observations) can only be matched through a nested query on
//! the sub-document path. This pass wraps such leaves in `Nested` nodes.
//! Sibling leaves under one `And` that share a path go into one scope, so
//! that they must hold on the same sub-document.

use std::collections::HashMap;

use crate::ast::ExpressionNode;
use crate::error::PqlError;
use crate::passes::map_children;
use crate::registry::TypeModel;

pub fn scope_nested_fields(node: &ExpressionNode, model: &TypeModel) -> Result<ExpressionNode, PqlError> {
    rewrite(node, model, None)
}

/// True when the enclosing scope is exactly `path`. Fields of a shallower
/// level are not visible from inside a deeper scope.
fn covers(enclosing: Option<&str>, path: &str) -> bool {
    enclosing == Some(path)
}

/// Nested path a leaf still has to be wrapped in, if any.
fn pending_scope<'m>(model: &'m TypeModel, leaf: &ExpressionNode, enclosing: Option<&str>) -> Option<&'m str> {
    if matches!(leaf, ExpressionNode::TermsLookup(_)) {
        return None;
    }
    let field = model.field_by_path(leaf.field()?)?;
    let path = model.nested_path_of(field)?;
    (!covers(enclosing, path)).then_some(path)
}

fn rewrite(node: &ExpressionNode, model: &TypeModel, enclosing: Option<&str>) -> Result<ExpressionNode, PqlError> {
    match node {
        // A nested document with the field missing is not the same as no
        // nested document having it.
        ExpressionNode::Missing { field } => Ok(match pending_scope(model, node, enclosing) {
            Some(path) => ExpressionNode::Not(Box::new(ExpressionNode::Nested {
                path: path.to_string(),
                inner: Box::new(ExpressionNode::Exists { field: field.clone() }),
            })),
            None => node.clone(),
        }),
        ExpressionNode::And(children) => Ok(ExpressionNode::and(group(children, model, enclosing)?)),
        ExpressionNode::Nested { path, inner } => Ok(ExpressionNode::Nested {
            path: path.clone(),
            inner: Box::new(rewrite(inner, model, Some(path.as_str()))?),
        }),
        leaf => match pending_scope(model, leaf, enclosing) {
            Some(path) => Ok(ExpressionNode::Nested { path: path.to_string(), inner: Box::new(leaf.clone()) }),
            None => map_children(node, |child| rewrite(child, model, enclosing)),
        },
    }
}

/// Rewrites the members of an `And`, merging leaves with the same pending
/// scope into one `Nested` at the position of the first of them.
fn group(children: &[ExpressionNode], model: &TypeModel, enclosing: Option<&str>) -> Result<Vec<ExpressionNode>, PqlError> {
    let mut out: Vec<ExpressionNode> = Vec::with_capacity(children.len());
    let mut scopes: HashMap<&str, usize> = HashMap::new();

    for child in children {
        let pending = match child {
            ExpressionNode::Missing { .. } => None,
            _ => pending_scope(model, child, enclosing),
        };
        let Some(path) = pending else {
            out.push(rewrite(child, model, enclosing)?);
            continue;
        };

        match scopes.get(path) {
            Some(&index) => {
                if let ExpressionNode::Nested { inner, .. } = &mut out[index] {
                    match inner.as_mut() {
                        ExpressionNode::And(members) => members.push(child.clone()),
                        single => {
                            let first = std::mem::replace(single, ExpressionNode::MatchAll);
                            *single = ExpressionNode::And(vec![first, child.clone()]);
                        }
                    }
                }
            }
            None => {
                scopes.insert(path, out.len());
                out.push(ExpressionNode::Nested { path: path.to_string(), inner: Box::new(child.clone()) });
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Terminal;
    use crate::registry::{EntityType, Registry};

    fn term(field: &str, value: &str) -> ExpressionNode {
        ExpressionNode::Term { field: field.to_string(), value: Terminal::String(value.to_string()) }
    }

    fn nested(path: &str, inner: ExpressionNode) -> ExpressionNode {
        ExpressionNode::Nested { path: path.to_string(), inner: Box::new(inner) }
    }

    fn scoped(entity_type: EntityType, node: &ExpressionNode) -> ExpressionNode {
        let registry = Registry::builtin().unwrap();
        scope_nested_fields(node, registry.model(entity_type).unwrap()).unwrap()
    }

    #[test]
    fn test_single_leaf_is_wrapped() {
        let filter = ExpressionNode::Terms {
            field: "ssm_occurrence.observation.sequencing_strategy".to_string(),
            values: vec![Terminal::String("WGA".to_string())],
        };
        assert_eq!(
            scoped(EntityType::MutationCentric, &filter),
            nested("ssm_occurrence.observation", filter.clone())
        );
    }

    #[test]
    fn test_siblings_share_one_scope() {
        let filter = ExpressionNode::And(vec![
            term("gene._gene_id", "G1"),
            term("donor_sex", "male"),
            term("gene.symbol", "TP53"),
        ]);
        assert_eq!(
            scoped(EntityType::DonorCentric, &filter),
            ExpressionNode::And(vec![
                nested(
                    "gene",
                    ExpressionNode::And(vec![term("gene._gene_id", "G1"), term("gene.symbol", "TP53")])
                ),
                term("donor_sex", "male"),
            ])
        );
    }

    #[test]
    fn test_disjuncts_are_scoped_separately() {
        let filter = ExpressionNode::Or(vec![term("gene._gene_id", "G1"), term("gene.symbol", "TP53")]);
        assert_eq!(
            scoped(EntityType::DonorCentric, &filter),
            ExpressionNode::Or(vec![
                nested("gene", term("gene._gene_id", "G1")),
                nested("gene", term("gene.symbol", "TP53")),
            ])
        );
    }

    #[test]
    fn test_enclosing_scope_is_reused() {
        let filter = nested("gene", term("gene.symbol", "TP53"));
        assert_eq!(scoped(EntityType::DonorCentric, &filter), filter);
    }

    #[test]
    fn test_deeper_scope_inside_enclosing_one() {
        let filter = nested("gene", term("gene.ssm.mutation_type", "substitution"));
        assert_eq!(
            scoped(EntityType::DonorCentric, &filter),
            nested("gene", nested("gene.ssm", term("gene.ssm.mutation_type", "substitution")))
        );
    }

    #[test]
    fn test_shallower_field_inside_deeper_scope_gets_its_own() {
        let filter = nested("gene.ssm", term("gene.symbol", "TP53"));
        assert_eq!(
            scoped(EntityType::DonorCentric, &filter),
            nested("gene.ssm", nested("gene", term("gene.symbol", "TP53")))
        );
    }

    #[test]
    fn test_missing_on_nested_field() {
        let filter = ExpressionNode::Missing { field: "gene.biotype".to_string() };
        assert_eq!(
            scoped(EntityType::DonorCentric, &filter),
            ExpressionNode::Not(Box::new(nested(
                "gene",
                ExpressionNode::Exists { field: "gene.biotype".to_string() }
            )))
        );
    }

    #[test]
    fn test_flat_fields_are_untouched() {
        let filter = ExpressionNode::Root(vec![ExpressionNode::Filter(Box::new(ExpressionNode::And(vec![
            term("donor_sex", "male"),
            ExpressionNode::Not(Box::new(term("_project_id", "P1"))),
        ])))]);
        assert_eq!(scoped(EntityType::DonorCentric, &filter), filter);
    }
}
