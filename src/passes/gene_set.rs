//! Gene-set expansion.
//!
//! Gene-set membership is not indexed under a single field. A filter on one
//! of the synthetic fields (`gene.pathwayId`, `gene.goTermId`, ...) is
//! rewritten into a disjunction over the concrete fields stored next to the
//! gene, evaluated within the gene's nested scope of the current entity type.

use tracing::trace;

use crate::ast::{ExpressionNode, Terminal};
use crate::error::{ConfigurationError, PqlError};
use crate::passes::map_children;
use crate::registry::{GeneSetField, Scope, TypeModel};

/// Logical kind that owns gene-set annotations.
const GENE_KIND: &str = "gene";

pub fn expand_gene_sets(node: &ExpressionNode, model: &TypeModel) -> Result<ExpressionNode, PqlError> {
    rewrite(node, model, None)
}

fn rewrite(node: &ExpressionNode, model: &TypeModel, enclosing: Option<&str>) -> Result<ExpressionNode, PqlError> {
    match node {
        ExpressionNode::Term { field, value } => match gene_set_of(model, field) {
            Some(gene_set) => expand(model, enclosing, field, gene_set, |concrete| ExpressionNode::Terms {
                field: concrete,
                values: vec![value.clone()],
            }),
            None => Ok(node.clone()),
        },
        ExpressionNode::Terms { field, values } => match gene_set_of(model, field) {
            Some(gene_set) => expand(model, enclosing, field, gene_set, |concrete| terms(concrete, values)),
            None => Ok(node.clone()),
        },
        ExpressionNode::Exists { field } => match gene_set_of(model, field) {
            Some(gene_set) => expand(model, enclosing, field, gene_set, |field| ExpressionNode::Exists { field }),
            None => Ok(node.clone()),
        },
        // Missing from the union means no concrete field exists.
        ExpressionNode::Missing { field } => match gene_set_of(model, field) {
            Some(gene_set) => {
                let exists = expand(model, enclosing, field, gene_set, |field| ExpressionNode::Exists { field })?;
                Ok(ExpressionNode::Not(Box::new(exists)))
            }
            None => Ok(node.clone()),
        },
        ExpressionNode::Nested { path, inner } => Ok(ExpressionNode::Nested {
            path: path.clone(),
            inner: Box::new(rewrite(inner, model, Some(path.as_str()))?),
        }),
        _ => map_children(node, |child| rewrite(child, model, enclosing)),
    }
}

fn terms(field: String, values: &[Terminal]) -> ExpressionNode {
    ExpressionNode::Terms { field, values: values.to_vec() }
}

fn gene_set_of(model: &TypeModel, path: &str) -> Option<GeneSetField> {
    model.field_by_path(path).and_then(|field| field.gene_set)
}

/// Concrete fields live in the object holding the synthetic field.
fn concrete_fields(synthetic: &str, gene_set: GeneSetField) -> Vec<String> {
    let parent = synthetic.rsplit_once('.').map(|(parent, _)| parent);
    gene_set
        .concrete_fields()
        .into_iter()
        .map(|suffix| match parent {
            Some(parent) => format!("{}.{}", parent, suffix),
            None => suffix.to_string(),
        })
        .collect()
}

fn expand<F>(
    model: &TypeModel,
    enclosing: Option<&str>,
    field: &str,
    gene_set: GeneSetField,
    leaf: F,
) -> Result<ExpressionNode, PqlError>
where
    F: Fn(String) -> ExpressionNode,
{
    let scope = model.scope_of(GENE_KIND).ok_or_else(|| {
        ConfigurationError::new(format!(
            "{} has no `{}` scope for gene set field `{}`",
            model.entity_type(),
            GENE_KIND,
            field
        ))
    })?;

    let fields = concrete_fields(field, gene_set);
    trace!(field, expanded = fields.len(), "expanding gene set field");
    let disjunction = ExpressionNode::Or(fields.into_iter().map(leaf).collect());

    Ok(match scope {
        Scope::Nested(path) if enclosing != Some(path) => ExpressionNode::Nested {
            path: path.to_string(),
            inner: Box::new(disjunction),
        },
        _ => disjunction,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{EntityType, Registry};

    fn model(registry: &Registry, entity_type: EntityType) -> &TypeModel {
        registry.model(entity_type).unwrap()
    }

    fn string(s: &str) -> Terminal {
        Terminal::String(s.to_string())
    }

    fn disjunct_fields(node: &ExpressionNode) -> Vec<&str> {
        let ExpressionNode::Or(children) = node else {
            panic!("Expected disjunction, got {:?}", node);
        };
        children.iter().filter_map(|child| child.field()).collect()
    }

    #[test]
    fn test_union_expands_to_five_fields_in_gene_scope() {
        let registry = Registry::builtin().unwrap();
        let donors = model(&registry, EntityType::DonorCentric);
        let filter = ExpressionNode::Term { field: "gene.gene_set_id".to_string(), value: string("GS1") };

        let expanded = expand_gene_sets(&filter, donors).unwrap();
        let ExpressionNode::Nested { path, inner } = &expanded else {
            panic!("Expected nested scope");
        };
        assert_eq!(path, "gene");
        assert_eq!(
            disjunct_fields(inner),
            vec![
                "gene.go_term.biological_process",
                "gene.go_term.cellular_component",
                "gene.go_term.molecular_function",
                "gene.pathway",
                "gene.curated_set",
            ]
        );
        let ExpressionNode::Or(children) = inner.as_ref() else { unreachable!() };
        assert!(children.iter().all(|child| matches!(
            child,
            ExpressionNode::Terms { values, .. } if values == &vec![string("GS1")]
        )));
    }

    #[test]
    fn test_values_are_preserved() {
        let registry = Registry::builtin().unwrap();
        let mutations = model(&registry, EntityType::MutationCentric);
        let filter = ExpressionNode::Terms {
            field: "transcript.gene.pathway_id".to_string(),
            values: vec![string("R-1"), string("R-2")],
        };

        let expanded = expand_gene_sets(&filter, mutations).unwrap();
        assert_eq!(
            expanded,
            ExpressionNode::Nested {
                path: "transcript".to_string(),
                inner: Box::new(ExpressionNode::Or(vec![ExpressionNode::Terms {
                    field: "transcript.gene.pathway".to_string(),
                    values: vec![string("R-1"), string("R-2")],
                }])),
            }
        );
    }

    #[test]
    fn test_gene_centric_needs_no_nesting() {
        let registry = Registry::builtin().unwrap();
        let genes = model(&registry, EntityType::GeneCentric);
        let filter = ExpressionNode::Term { field: "go_term_id".to_string(), value: string("GO:1") };

        let expanded = expand_gene_sets(&filter, genes).unwrap();
        assert_eq!(
            disjunct_fields(&expanded),
            vec!["go_term.biological_process", "go_term.cellular_component", "go_term.molecular_function"]
        );
    }

    #[test]
    fn test_enclosing_gene_scope_is_reused() {
        let registry = Registry::builtin().unwrap();
        let donors = model(&registry, EntityType::DonorCentric);
        let filter = ExpressionNode::Nested {
            path: "gene".to_string(),
            inner: Box::new(ExpressionNode::And(vec![
                ExpressionNode::Term { field: "gene.symbol".to_string(), value: string("TP53") },
                ExpressionNode::Term { field: "gene.curated_set_id".to_string(), value: string("CS1") },
            ])),
        };

        let expanded = expand_gene_sets(&filter, donors).unwrap();
        let mut scopes = Vec::new();
        expanded.collect(&|node| matches!(node, ExpressionNode::Nested { .. }), &mut scopes);
        assert_eq!(scopes.len(), 1);
        assert_eq!(expanded.count_field("gene.curated_set"), 1);
        assert_eq!(expanded.count_field("gene.curated_set_id"), 0);
    }

    #[test]
    fn test_other_fields_are_untouched() {
        let registry = Registry::builtin().unwrap();
        let donors = model(&registry, EntityType::DonorCentric);
        let filter = ExpressionNode::Root(vec![ExpressionNode::Filter(Box::new(ExpressionNode::Not(Box::new(
            ExpressionNode::Term { field: "donor_sex".to_string(), value: string("male") },
        ))))]);
        assert_eq!(expand_gene_sets(&filter, donors).unwrap(), filter);
    }

    #[test]
    fn test_missing_scope_is_configuration_error() {
        let json = r#"{
            "index": "i",
            "types": {
                "project": {
                    "index_type": "project",
                    "kind": "project",
                    "fields": { "project.pathwayId": { "path": "pathway_id", "gene_set": "pathway" } }
                }
            }
        }"#;
        let registry = Registry::from_json_str(json).unwrap();
        let projects = model(&registry, EntityType::Project);
        let filter = ExpressionNode::Term { field: "pathway_id".to_string(), value: string("R-1") };

        let err = expand_gene_sets(&filter, projects).unwrap_err();
        assert!(matches!(err, PqlError::Configuration(_)));
    }
}
