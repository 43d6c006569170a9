//! Turns the parsed call tree into an AST for one entity type.
//!
//! Arity and argument shape are checked here (reported as syntax errors), and
//! every field reference is resolved against the type model so that the AST
//! only ever carries physical paths (unknown fields are semantic errors).

use crate::ast::{ExpressionNode, RangeBound, SortField, SortOrder, TermsAggregation, Terminal, SCORE_FIELD};
use crate::error::{PqlError, SemanticError, SyntaxError};
use crate::parser::{Arg, Call, Sign};
use crate::registry::{ResolvedField, Scope, TypeModel};
use crate::token::Span;

pub struct AstBuilder<'a> {
    source: &'a str,
    model: &'a TypeModel,
}

impl<'a> AstBuilder<'a> {
    pub fn new(source: &'a str, model: &'a TypeModel) -> Self {
        Self { source, model }
    }

    /// Builds the Root node. Top-level filters are AND-ed together.
    pub fn build(&self, calls: &[Call<'_>]) -> Result<ExpressionNode, PqlError> {
        let mut select = None;
        let mut facets = None;
        let mut sort = None;
        let mut limit = None;
        let mut count = None;
        let mut filters = Vec::new();

        for call in calls {
            match call.name {
                "select" => {
                    self.ensure_unique(&select, call)?;
                    select = Some(self.build_select(call)?);
                }
                "facets" => {
                    self.ensure_unique(&facets, call)?;
                    facets = Some(self.build_facets(call)?);
                }
                "sort" => {
                    self.ensure_unique(&sort, call)?;
                    sort = Some(self.build_sort(call)?);
                }
                "limit" => {
                    self.ensure_unique(&limit, call)?;
                    limit = Some(self.build_limit(call)?);
                }
                "count" => {
                    self.ensure_unique(&count, call)?;
                    self.expect_arity(call, 0)?;
                    count = Some(ExpressionNode::Count);
                }
                _ => filters.push(self.build_filter(call)?),
            }
        }

        let mut children = Vec::new();
        children.extend(select);
        children.extend(facets);
        if !filters.is_empty() {
            children.push(ExpressionNode::Filter(Box::new(ExpressionNode::and(filters))));
        }
        children.extend(sort);
        children.extend(limit);
        children.extend(count);

        Ok(ExpressionNode::Root(children))
    }

    fn ensure_unique<T>(&self, slot: &Option<T>, call: &Call<'_>) -> Result<(), SyntaxError> {
        if slot.is_some() {
            return Err(self.syntax(format!("`{}` may appear only once", call.name), call.span));
        }
        Ok(())
    }

    fn syntax(&self, message: String, span: Span) -> SyntaxError {
        SyntaxError::at(message, self.source, span)
    }

    fn semantic(&self, message: String, span: Span) -> SemanticError {
        SemanticError::at(message, self.source, span)
    }

    fn expect_arity(&self, call: &Call<'_>, expected: usize) -> Result<(), SyntaxError> {
        if call.args.len() != expected {
            return Err(self.syntax(
                format!("`{}` expects {} argument(s), found {}", call.name, expected, call.args.len()),
                call.span,
            ));
        }
        Ok(())
    }

    fn expect_min_arity(&self, call: &Call<'_>, minimum: usize) -> Result<(), SyntaxError> {
        if call.args.len() < minimum {
            return Err(self.syntax(
                format!(
                    "`{}` expects at least {} argument(s), found {}",
                    call.name,
                    minimum,
                    call.args.len()
                ),
                call.span,
            ));
        }
        Ok(())
    }

    /// Resolves an unsigned identifier argument to a field of the type.
    fn field(&self, arg: &Arg<'_>) -> Result<ResolvedField<'a>, PqlError> {
        match arg {
            Arg::Ident { name, sign: None, span } => self.model.resolve(name).ok_or_else(|| {
                self.semantic(format!("Unknown field for {}", self.model.entity_type()), *span)
                    .into()
            }),
            other => Err(self.syntax("Expected a field name".to_string(), other.span()).into()),
        }
    }

    fn literal(&self, arg: &Arg<'_>) -> Result<Terminal, SyntaxError> {
        match arg {
            Arg::Literal { value, .. } => Ok(value.clone()),
            other => Err(self.syntax(
                "Expected a quoted string or number literal".to_string(),
                other.span(),
            )),
        }
    }

    fn build_select(&self, call: &Call<'_>) -> Result<ExpressionNode, PqlError> {
        self.expect_min_arity(call, 1)?;
        if let [Arg::Star(_)] = call.args.as_slice() {
            return Ok(ExpressionNode::Select(self.model.default_fields().to_vec()));
        }

        let mut paths: Vec<String> = Vec::new();
        for arg in &call.args {
            let path = self.field(arg)?.model.path.clone();
            if !paths.contains(&path) {
                paths.push(path);
            }
        }
        Ok(ExpressionNode::Select(paths))
    }

    fn build_facets(&self, call: &Call<'_>) -> Result<ExpressionNode, PqlError> {
        self.expect_min_arity(call, 1)?;
        let fields: Vec<ResolvedField<'a>> = if let [Arg::Star(_)] = call.args.as_slice() {
            self.model.facetable_fields().collect()
        } else {
            let mut fields = Vec::new();
            for arg in &call.args {
                let field = self.field(arg)?;
                if !field.model.facetable {
                    return Err(self.semantic("Field is not facetable".to_string(), arg.span()).into());
                }
                fields.push(field);
            }
            fields
        };

        let mut aggregations: Vec<ExpressionNode> = Vec::new();
        for field in fields {
            let name = self.model.alias(field.name).to_string();
            let duplicate = aggregations.iter().any(|agg| {
                matches!(agg, ExpressionNode::TermsAggregation(existing) if existing.name == name)
            });
            if duplicate {
                continue;
            }
            aggregations.push(ExpressionNode::TermsAggregation(TermsAggregation {
                name,
                field: field.model.path.clone(),
                nested: self.model.nested_path_of(field.model).map(str::to_string),
                size: None,
            }));
        }
        Ok(ExpressionNode::Aggregations(aggregations))
    }

    fn build_sort(&self, call: &Call<'_>) -> Result<ExpressionNode, PqlError> {
        self.expect_min_arity(call, 1)?;
        let mut sorts = Vec::new();
        for arg in &call.args {
            let Arg::Ident { name, sign, span } = arg else {
                return Err(self.syntax("Expected a sort field".to_string(), arg.span()).into());
            };
            let order = match sign {
                Some(Sign::Minus) => SortOrder::Desc,
                Some(Sign::Plus) | None => SortOrder::Asc,
            };
            let field = if *name == SCORE_FIELD {
                SCORE_FIELD.to_string()
            } else {
                self.model
                    .resolve(name)
                    .map(|f| f.model.path.clone())
                    .ok_or_else(|| {
                        self.semantic(format!("Unknown sort field for {}", self.model.entity_type()), *span)
                    })?
            };
            sorts.push(SortField { field, order });
        }
        Ok(ExpressionNode::Sort(sorts))
    }

    fn build_limit(&self, call: &Call<'_>) -> Result<ExpressionNode, PqlError> {
        let count = |arg: &Arg<'_>| -> Result<usize, SyntaxError> {
            match arg {
                Arg::Literal { value: Terminal::Integer(n), .. } if *n >= 0 => Ok(*n as usize),
                other => Err(self.syntax("Expected a non-negative integer".to_string(), other.span())),
            }
        };

        match call.args.as_slice() {
            [size] => Ok(ExpressionNode::Limit { from: 0, size: count(size)? }),
            [from, size] => Ok(ExpressionNode::Limit { from: count(from)?, size: count(size)? }),
            _ => Err(self
                .syntax(
                    format!("`limit` expects 1 or 2 arguments, found {}", call.args.len()),
                    call.span,
                )
                .into()),
        }
    }

    fn build_filter(&self, call: &Call<'_>) -> Result<ExpressionNode, PqlError> {
        match call.name {
            "eq" | "ne" => {
                self.expect_arity(call, 2)?;
                let field = self.field(&call.args[0])?;
                let value = self.literal(&call.args[1])?;
                let term = ExpressionNode::Term { field: field.model.path.clone(), value };
                if call.name == "ne" {
                    Ok(ExpressionNode::Not(Box::new(term)))
                } else {
                    Ok(term)
                }
            }
            "gt" | "ge" | "lt" | "le" => {
                self.expect_arity(call, 2)?;
                let field = self.field(&call.args[0])?;
                if field.model.gene_set.is_some() {
                    return Err(self
                        .semantic("Range is not supported on gene set fields".to_string(), call.args[0].span())
                        .into());
                }
                let value = self.literal(&call.args[1])?;
                if field.model.value_type.is_numeric() && !value.is_numeric() {
                    return Err(self
                        .semantic("Expected a numeric value for this field".to_string(), call.args[1].span())
                        .into());
                }
                let bound = match call.name {
                    "gt" => RangeBound::Gt,
                    "ge" => RangeBound::Gte,
                    "lt" => RangeBound::Lt,
                    _ => RangeBound::Lte,
                };
                Ok(ExpressionNode::Range { field: field.model.path.clone(), bound, value })
            }
            "in" => {
                self.expect_min_arity(call, 2)?;
                let field = self.field(&call.args[0])?;
                let mut values: Vec<Terminal> = Vec::new();
                for arg in &call.args[1..] {
                    let value = self.literal(arg)?;
                    if !values.contains(&value) {
                        values.push(value);
                    }
                }
                Ok(ExpressionNode::Terms { field: field.model.path.clone(), values })
            }
            "exists" | "missing" => {
                self.expect_arity(call, 1)?;
                let field = self.field(&call.args[0])?.model.path.clone();
                if call.name == "exists" {
                    Ok(ExpressionNode::Exists { field })
                } else {
                    Ok(ExpressionNode::Missing { field })
                }
            }
            "and" | "or" => {
                self.expect_min_arity(call, 1)?;
                let children = self.build_filters(&call.args)?;
                if call.name == "and" {
                    Ok(ExpressionNode::and(children))
                } else {
                    Ok(ExpressionNode::or(children))
                }
            }
            "not" => {
                self.expect_arity(call, 1)?;
                let mut children = self.build_filters(&call.args)?;
                Ok(ExpressionNode::Not(Box::new(children.remove(0))))
            }
            "nested" => self.build_nested(call),
            other => Err(self
                .syntax(format!("`{}` cannot be used as a filter", other), call.span)
                .into()),
        }
    }

    fn build_filters(&self, args: &[Arg<'_>]) -> Result<Vec<ExpressionNode>, PqlError> {
        args.iter()
            .map(|arg| match arg {
                Arg::Call(call) => self.build_filter(call),
                other => Err(self.syntax("Expected a filter".to_string(), other.span()).into()),
            })
            .collect()
    }

    /// `nested(path, filter, ...)`: `path` is a nested kind (`gene`) or a
    /// registered nested path of the type.
    fn build_nested(&self, call: &Call<'_>) -> Result<ExpressionNode, PqlError> {
        self.expect_min_arity(call, 2)?;
        let Arg::Ident { name, sign: None, span } = &call.args[0] else {
            return Err(self.syntax("Expected a nested path".to_string(), call.args[0].span()).into());
        };

        let path = match self.model.scope_of(name) {
            Some(Scope::Nested(path)) => path.to_string(),
            _ if self.model.is_nested_path(name) => name.to_string(),
            _ => {
                return Err(self
                    .semantic(format!("Not a nested path of {}", self.model.entity_type()), *span)
                    .into())
            }
        };

        let inner = ExpressionNode::and(self.build_filters(&call.args[1..])?);

        let prefix = format!("{}.", path);
        let mut leaves = Vec::new();
        inner.collect(&|node| node.field().is_some(), &mut leaves);
        if let Some(outside) = leaves
            .iter()
            .filter_map(|leaf| leaf.field())
            .find(|field| !field.starts_with(&prefix))
        {
            return Err(self
                .semantic(format!("Field `{}` is not inside nested path `{}`", outside, path), call.span)
                .into());
        }

        Ok(ExpressionNode::Nested { path, inner: Box::new(inner) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::registry::{EntityType, Registry};

    fn parse_for(entity_type: EntityType, input: &str) -> Result<ExpressionNode, PqlError> {
        let registry = Registry::builtin().unwrap();
        parse(input, registry.model(entity_type).unwrap())
    }

    fn filter_of(root: &ExpressionNode) -> &ExpressionNode {
        root.root_filter().expect("filter")
    }

    #[test]
    fn test_eq_resolves_physical_path() {
        let root = parse_for(EntityType::MutationCentric, "eq(id,'MU2')").unwrap();
        assert_eq!(
            filter_of(&root),
            &ExpressionNode::Term { field: "_mutation_id".to_string(), value: Terminal::String("MU2".to_string()) }
        );
    }

    #[test]
    fn test_ne_becomes_not_term() {
        let root = parse_for(EntityType::MutationCentric, "ne(id,'MU1')").unwrap();
        assert!(matches!(filter_of(&root), ExpressionNode::Not(inner) if matches!(**inner, ExpressionNode::Term { .. })));
    }

    #[test]
    fn test_top_level_filters_are_anded() {
        let root = parse_for(EntityType::DonorCentric, "eq(gender,'male'),gt(ageAtDiagnosis,40)").unwrap();
        let ExpressionNode::And(children) = filter_of(&root) else {
            panic!("Expected implicit AND");
        };
        assert_eq!(children.len(), 2);
        assert!(matches!(
            &children[1],
            ExpressionNode::Range { field, bound: RangeBound::Gt, value: Terminal::Integer(40) } if field == "donor_age_at_diagnosis"
        ));
    }

    #[test]
    fn test_in_deduplicates_values() {
        let root = parse_for(EntityType::MutationCentric, "in(sequencingStrategyNested,'WGA','WGD','WGA')").unwrap();
        let ExpressionNode::Terms { field, values } = filter_of(&root) else {
            panic!("Expected terms");
        };
        assert_eq!(field, "ssm_occurrence.observation.sequencing_strategy");
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_root_layout() {
        let root = parse_for(
            EntityType::DonorCentric,
            "count(),limit(5,20),sort(-_score,id),eq(gender,'male'),facets(gender),select(*)",
        )
        .unwrap();
        let children = root.root_children();
        assert!(matches!(children[0], ExpressionNode::Select(_)));
        assert!(matches!(children[1], ExpressionNode::Aggregations(_)));
        assert!(matches!(children[2], ExpressionNode::Filter(_)));
        assert!(matches!(&children[3], ExpressionNode::Sort(s) if s[0].field == SCORE_FIELD && s[0].order == SortOrder::Desc));
        assert_eq!(children[4], ExpressionNode::Limit { from: 5, size: 20 });
        assert_eq!(children[5], ExpressionNode::Count);
    }

    #[test]
    fn test_facets_star_uses_facetable_fields() {
        let root = parse_for(EntityType::Project, "facets(*)").unwrap();
        let aggs = root.root_aggregations().unwrap();
        let names: Vec<_> = aggs
            .iter()
            .map(|agg| match agg {
                ExpressionNode::TermsAggregation(t) => t.name.as_str(),
                _ => panic!("Expected terms aggregation"),
            })
            .collect();
        assert_eq!(names, vec!["availableDataTypes", "primaryCountries", "primarySite"]);
    }

    #[test]
    fn test_nested_facet_carries_nested_path() {
        let root = parse_for(EntityType::MutationCentric, "facets(sequencingStrategyNested)").unwrap();
        let aggs = root.root_aggregations().unwrap();
        assert_eq!(
            aggs[0],
            ExpressionNode::TermsAggregation(TermsAggregation {
                name: "sequencingStrategyNested".to_string(),
                field: "ssm_occurrence.observation.sequencing_strategy".to_string(),
                nested: Some("ssm_occurrence.observation".to_string()),
                size: None,
            })
        );
    }

    #[test]
    fn test_non_facetable_field_is_semantic_error() {
        let err = parse_for(EntityType::DonorCentric, "facets(id)").unwrap_err();
        assert!(matches!(err, PqlError::Semantic(e) if e.fragment == "id"));
    }

    #[test]
    fn test_unknown_field_is_semantic_error() {
        let err = parse_for(EntityType::GeneSet, "eq(colour,'red')").unwrap_err();
        let PqlError::Semantic(e) = err else {
            panic!("Expected semantic error");
        };
        assert_eq!(e.fragment, "colour");
        assert!(e.message.contains("gene-set"));
    }

    #[test]
    fn test_field_valid_for_one_type_only() {
        assert!(parse_for(EntityType::MutationCentric, "eq(sequencingStrategyNested,'WGA')").is_ok());
        assert!(matches!(
            parse_for(EntityType::DonorCentric, "eq(sequencingStrategyNested,'WGA')"),
            Err(PqlError::Semantic(_))
        ));
    }

    #[test]
    fn test_arity_mismatch_is_syntax_error() {
        let err = parse_for(EntityType::DonorCentric, "eq(gender)").unwrap_err();
        assert!(matches!(err, PqlError::Syntax(e) if e.fragment == "eq(gender)"));
        assert!(matches!(parse_for(EntityType::DonorCentric, "count(1)"), Err(PqlError::Syntax(_))));
        assert!(matches!(parse_for(EntityType::DonorCentric, "limit(1,2,3)"), Err(PqlError::Syntax(_))));
        assert!(matches!(parse_for(EntityType::DonorCentric, "not(eq(gender,'a'),eq(gender,'b'))"), Err(PqlError::Syntax(_))));
    }

    #[test]
    fn test_unquoted_value_is_syntax_error() {
        assert!(matches!(parse_for(EntityType::DonorCentric, "eq(gender,male)"), Err(PqlError::Syntax(_))));
    }

    #[test]
    fn test_duplicate_clause_is_syntax_error() {
        assert!(matches!(parse_for(EntityType::DonorCentric, "select(*),select(id)"), Err(PqlError::Syntax(_))));
    }

    #[test]
    fn test_request_clause_inside_filter_is_syntax_error() {
        assert!(matches!(parse_for(EntityType::DonorCentric, "and(eq(gender,'a'),count())"), Err(PqlError::Syntax(_))));
    }

    #[test]
    fn test_range_requires_numeric_value_on_numeric_field() {
        let err = parse_for(EntityType::Project, "gt(testedDonorCount,'many')").unwrap_err();
        assert!(matches!(err, PqlError::Semantic(e) if e.fragment == "'many'"));
    }

    #[test]
    fn test_nested_by_kind() {
        let root = parse_for(EntityType::DonorCentric, "nested(gene,eq(gene.id,'G1'),eq(gene.symbol,'TP53'))").unwrap();
        let ExpressionNode::Nested { path, inner } = filter_of(&root) else {
            panic!("Expected nested");
        };
        assert_eq!(path, "gene");
        assert!(matches!(**inner, ExpressionNode::And(ref c) if c.len() == 2));
    }

    #[test]
    fn test_nested_rejects_fields_outside_path() {
        let err = parse_for(EntityType::DonorCentric, "nested(gene,eq(gender,'male'))").unwrap_err();
        assert!(matches!(err, PqlError::Semantic(e) if e.message.contains("donor_sex")));
    }

    #[test]
    fn test_nested_unknown_path() {
        assert!(matches!(
            parse_for(EntityType::Project, "nested(gene,eq(id,'P1'))"),
            Err(PqlError::Semantic(_))
        ));
    }

    #[test]
    fn test_select_fields() {
        let root = parse_for(EntityType::MutationCentric, "select(id,type,id)").unwrap();
        assert_eq!(
            root.root_children()[0],
            ExpressionNode::Select(vec!["_mutation_id".to_string(), "mutation_type".to_string()])
        );
    }

    #[test]
    fn test_empty_query_is_bare_root() {
        assert_eq!(parse_for(EntityType::Project, "").unwrap(), ExpressionNode::Root(Vec::new()));
    }
}
