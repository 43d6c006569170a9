//! Type/field registry.
//!
//! For every entity type the registry knows which logical field names exist,
//! where they live physically in the indexed documents, and at which nested
//! path each logical entity kind is stored. The same kind nests at a different
//! depth depending on the view: observations sit under `gene.ssm.observation`
//! in donor-centric documents but under `ssm_occurrence.observation` in
//! mutation-centric ones.
//!
//! The registry is loaded once at startup (from JSON, or the built-in model)
//! and is read-only afterwards, so it can be shared across threads behind an
//! `Arc` without locking.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::ast::{SortField, SortOrder, SCORE_FIELD};
use crate::config::{read_config_file, ConfigError};
use crate::error::ConfigurationError;

const BUILTIN_REGISTRY: &str = include_str!("../config/registry.json");

/// The document categories the portal can query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityType {
    DonorCentric,
    GeneCentric,
    MutationCentric,
    ObservationCentric,
    Project,
    GeneSet,
}

impl EntityType {
    pub const ALL: [EntityType; 6] = [
        EntityType::DonorCentric,
        EntityType::GeneCentric,
        EntityType::MutationCentric,
        EntityType::ObservationCentric,
        EntityType::Project,
        EntityType::GeneSet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::DonorCentric => "donor-centric",
            EntityType::GeneCentric => "gene-centric",
            EntityType::MutationCentric => "mutation-centric",
            EntityType::ObservationCentric => "observation-centric",
            EntityType::Project => "project",
            EntityType::GeneSet => "gene-set",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ConfigError::new(format!("unknown entity type `{}`", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    #[default]
    String,
    Long,
    Double,
    Boolean,
}

impl ValueType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, ValueType::Long | ValueType::Double)
    }
}

/// Synthetic gene-set fields, each standing for one or more concrete fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneSetField {
    Pathway,
    CuratedSet,
    GoTerm,
    Union,
}

const PATHWAY: &str = "pathway";
const CURATED_SET: &str = "curated_set";
const GO_TERMS: [&str; 3] = [
    "go_term.biological_process",
    "go_term.cellular_component",
    "go_term.molecular_function",
];

impl GeneSetField {
    /// Concrete field names, relative to the object holding the gene.
    pub fn concrete_fields(&self) -> Vec<&'static str> {
        match self {
            GeneSetField::Pathway => vec![PATHWAY],
            GeneSetField::CuratedSet => vec![CURATED_SET],
            GeneSetField::GoTerm => GO_TERMS.to_vec(),
            GeneSetField::Union => {
                let mut fields = GO_TERMS.to_vec();
                fields.push(PATHWAY);
                fields.push(CURATED_SET);
                fields
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FieldModel {
    /// Physical dotted path in the document.
    pub path: String,
    #[serde(rename = "type", default)]
    pub value_type: ValueType,
    /// Logical kind whose nested path scopes this field.
    #[serde(default)]
    pub nested: Option<String>,
    #[serde(default)]
    pub facetable: bool,
    #[serde(default)]
    pub gene_set: Option<GeneSetField>,
}

/// Where a logical kind lives inside documents of one entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope<'a> {
    /// The kind is the document itself.
    Root,
    Nested(&'a str),
}

/// Relevance scoring by overlap with a nested sub-document.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringModel {
    pub kind: String,
    /// Resolved nested path of `kind`.
    pub path: String,
    pub script: String,
}

#[derive(Debug, Deserialize)]
struct RawScoring {
    nested: String,
    script: String,
}

#[derive(Debug, Deserialize)]
struct RawTypeModel {
    index_type: String,
    kind: String,
    #[serde(default)]
    nested: BTreeMap<String, String>,
    fields: BTreeMap<String, FieldModel>,
    #[serde(default)]
    default_fields: Vec<String>,
    #[serde(default)]
    default_sort: Vec<String>,
    #[serde(default)]
    scoring: Option<RawScoring>,
}

#[derive(Debug, Deserialize)]
struct RawRegistry {
    index: String,
    types: BTreeMap<String, RawTypeModel>,
}

/// A canonical field name together with its mapping.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedField<'a> {
    pub name: &'a str,
    pub model: &'a FieldModel,
}

/// Field layout of one entity type.
#[derive(Debug, Clone)]
pub struct TypeModel {
    entity_type: EntityType,
    index_type: String,
    kind: String,
    nested: BTreeMap<String, String>,
    fields: BTreeMap<String, FieldModel>,
    by_path: HashMap<String, String>,
    default_fields: Vec<String>,
    default_sort: Vec<SortField>,
    scoring: Option<ScoringModel>,
}

impl TypeModel {
    fn from_raw(entity_type: EntityType, raw: RawTypeModel) -> Result<Self, ConfigError> {
        let invalid = |message: String| ConfigError::new(format!("{}: {}", entity_type, message));

        for (name, field) in &raw.fields {
            if let Some(kind) = &field.nested {
                if !raw.nested.contains_key(kind) {
                    return Err(invalid(format!(
                        "field `{}` is nested under unknown kind `{}`",
                        name, kind
                    )));
                }
            }
        }

        let mut by_path = HashMap::new();
        for (name, field) in &raw.fields {
            by_path.entry(field.path.clone()).or_insert_with(|| name.clone());
        }

        let mut model = TypeModel {
            entity_type,
            index_type: raw.index_type,
            kind: raw.kind,
            nested: raw.nested,
            fields: raw.fields,
            by_path,
            default_fields: Vec::new(),
            default_sort: Vec::new(),
            scoring: None,
        };

        for name in &raw.default_fields {
            let path = model
                .resolve(name)
                .map(|f| f.model.path.clone())
                .ok_or_else(|| invalid(format!("unknown default field `{}`", name)))?;
            model.default_fields.push(path);
        }

        for key in &raw.default_sort {
            let (order, name) = match key.strip_prefix('-') {
                Some(rest) => (SortOrder::Desc, rest),
                None => (SortOrder::Asc, key.trim_start_matches('+')),
            };
            let field = if name == SCORE_FIELD {
                SCORE_FIELD.to_string()
            } else {
                model
                    .resolve(name)
                    .map(|f| f.model.path.clone())
                    .ok_or_else(|| invalid(format!("unknown default sort field `{}`", name)))?
            };
            model.default_sort.push(SortField { field, order });
        }

        if let Some(scoring) = raw.scoring {
            let path = model
                .nested
                .get(&scoring.nested)
                .cloned()
                .ok_or_else(|| invalid(format!("scoring kind `{}` is not nested", scoring.nested)))?;
            model.scoring = Some(ScoringModel { kind: scoring.nested, path, script: scoring.script });
        }

        Ok(model)
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    /// Document type name in the backend index.
    pub fn index_type(&self) -> &str {
        &self.index_type
    }

    /// The logical kind of the documents themselves, e.g. `donor`.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Looks a field up by canonical name, then qualified with the own kind.
    pub fn resolve(&self, name: &str) -> Option<ResolvedField<'_>> {
        if let Some((name, model)) = self.fields.get_key_value(name) {
            return Some(ResolvedField { name, model });
        }
        let qualified = format!("{}.{}", self.kind, name);
        self.fields
            .get_key_value(&qualified)
            .map(|(name, model)| ResolvedField { name, model })
    }

    pub fn field_by_path(&self, path: &str) -> Option<&FieldModel> {
        self.by_path.get(path).and_then(|name| self.fields.get(name))
    }

    pub fn scope_of(&self, kind: &str) -> Option<Scope<'_>> {
        if kind == self.kind {
            return Some(Scope::Root);
        }
        self.nested.get(kind).map(|path| Scope::Nested(path.as_str()))
    }

    /// Nested path a field must be evaluated under, if any.
    pub fn nested_path_of(&self, field: &FieldModel) -> Option<&str> {
        field
            .nested
            .as_deref()
            .and_then(|kind| self.nested.get(kind))
            .map(String::as_str)
    }

    pub fn is_nested_path(&self, path: &str) -> bool {
        self.nested.values().any(|p| p == path)
    }

    /// Canonical names of facetable fields, in name order.
    pub fn facetable_fields(&self) -> impl Iterator<Item = ResolvedField<'_>> {
        self.fields
            .iter()
            .filter(|(_, model)| model.facetable)
            .map(|(name, model)| ResolvedField { name, model })
    }

    /// Short name of a canonical field: the own-kind prefix is dropped.
    pub fn alias<'n>(&self, canonical: &'n str) -> &'n str {
        canonical
            .strip_prefix(self.kind.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
            .unwrap_or(canonical)
    }

    /// Physical paths projected when a query does not select fields.
    pub fn default_fields(&self) -> &[String] {
        &self.default_fields
    }

    pub fn default_sort(&self) -> &[SortField] {
        &self.default_sort
    }

    pub fn scoring(&self) -> Option<&ScoringModel> {
        self.scoring.as_ref()
    }
}

/// All entity types of one index.
#[derive(Debug, Clone)]
pub struct Registry {
    index: String,
    types: HashMap<EntityType, TypeModel>,
}

impl Registry {
    /// The field mapping shipped with the crate.
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_json_str(BUILTIN_REGISTRY)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = read_config_file(path.as_ref())?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let raw: RawRegistry = serde_json::from_str(content)
            .map_err(|e| ConfigError::new(format!("cannot parse registry: {}", e)))?;

        let mut types = HashMap::new();
        for (name, raw_type) in raw.types {
            let entity_type: EntityType = name.parse()?;
            types.insert(entity_type, TypeModel::from_raw(entity_type, raw_type)?);
        }

        Ok(Registry { index: raw.index, types })
    }

    /// Backend index holding every entity type.
    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn model(&self, entity_type: EntityType) -> Result<&TypeModel, ConfigurationError> {
        self.types.get(&entity_type).ok_or_else(|| {
            ConfigurationError::new(format!("no type model registered for {}", entity_type))
        })
    }

    pub fn entity_types(&self) -> Vec<EntityType> {
        let mut types: Vec<_> = self.types.keys().copied().collect();
        types.sort();
        types
    }
}
