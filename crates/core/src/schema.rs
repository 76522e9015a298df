//! Label schema registry
//!
//! The versioned taxonomy every label in the dataset must conform to: the
//! binary values, the ordered score dimensions and the error categories with
//! the perturbation that produces each one. A loaded schema is immutable.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::row::Row;
use crate::{Error, Result};

const BUILTIN_SCHEMA: &str = include_str!("../../../schema/synced_ende_v1.yaml");

/// Transformation applied to a reference translation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PerturbationKind {
    Identity,
    NegationFlip,
    NumericSubstitution,
    EntitySwap,
    Omission,
    SafetyOmission,
    ToxicInsertion,
    Mistranslation,
}

impl PerturbationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::NegationFlip => "negation-flip",
            Self::NumericSubstitution => "numeric-substitution",
            Self::EntitySwap => "entity-swap",
            Self::Omission => "omission",
            Self::SafetyOmission => "safety-omission",
            Self::ToxicInsertion => "toxic-insertion",
            Self::Mistranslation => "mistranslation",
        }
    }
}

impl fmt::Display for PerturbationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PerturbationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "identity" => Ok(Self::Identity),
            "negation-flip" => Ok(Self::NegationFlip),
            "numeric-substitution" => Ok(Self::NumericSubstitution),
            "entity-swap" => Ok(Self::EntitySwap),
            "omission" => Ok(Self::Omission),
            "safety-omission" => Ok(Self::SafetyOmission),
            "toxic-insertion" => Ok(Self::ToxicInsertion),
            "mistranslation" => Ok(Self::Mistranslation),
            other => Err(Error::Parse(format!("unknown perturbation kind '{}'", other))),
        }
    }
}

/// One score dimension and its permitted range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionSpec {
    pub name: String,
    pub min: u8,
    pub max: u8,
}

/// An error category as written in the schema document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub perturbation: PerturbationKind,
    pub binary: String,
    /// Multi-class label; defaults to the category name
    #[serde(default)]
    pub multiclass: Option<String>,
    /// Categories tried, in order, when this one cannot be injected
    #[serde(default)]
    pub fallbacks: Vec<String>,
    /// Narrower per-dimension ranges, keyed by dimension name
    #[serde(default)]
    pub score_ranges: BTreeMap<String, (u8, u8)>,
    #[serde(default)]
    pub default_scores: Option<Vec<u8>>,
}

/// Serialized form of a schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDocument {
    pub version: String,
    pub binary: Vec<String>,
    pub dimensions: Vec<DimensionSpec>,
    pub categories: Vec<CategorySpec>,
}

/// A validated category with ranges resolved per dimension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub name: String,
    pub description: String,
    pub perturbation: PerturbationKind,
    pub binary: String,
    pub multiclass: String,
    pub fallbacks: Vec<String>,
    /// One inclusive range per schema dimension
    pub ranges: Vec<(u8, u8)>,
    pub default_scores: Option<Vec<u8>>,
}

impl Category {
    /// Categories that introduce an error. Identity categories label clean rows.
    pub fn is_error(&self) -> bool {
        self.perturbation != PerturbationKind::Identity
    }
}

/// Which label field a value is checked against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelDimension {
    Binary,
    MultiClass,
    /// Score dimension by schema index
    Score(usize),
}

/// A label value to validate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelValue<'a> {
    Text(&'a str),
    Score(u8),
}

/// Why a row's label set does not conform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelIssue {
    /// A label field is missing altogether
    Incomplete(String),
    /// A value is present but outside the schema
    Invalid(String),
}

impl fmt::Display for LabelIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incomplete(detail) => write!(f, "incomplete labels: {}", detail),
            Self::Invalid(detail) => write!(f, "invalid labels: {}", detail),
        }
    }
}

/// Immutable, versioned label taxonomy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSchema {
    version: String,
    binary: Vec<String>,
    dimensions: Vec<DimensionSpec>,
    categories: Vec<Category>,
}

impl LabelSchema {
    /// The SynCED-EnDe v1 taxonomy shipped with the crate.
    pub fn builtin() -> Result<Self> {
        Self::from_yaml_str(BUILTIN_SCHEMA)
    }

    /// Load a schema document; the format follows the file extension.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::MissingSchema(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        let schema = match extension.as_deref() {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content)?,
            Some("toml") => {
                let doc: SchemaDocument = toml::from_str(&content)
                    .map_err(|e| Error::Parse(format!("{}: {}", path.display(), e)))?;
                Self::from_document(doc)?
            }
            Some("json") => {
                let doc: SchemaDocument = serde_json::from_str(&content)
                    .map_err(|e| Error::Parse(format!("{}: {}", path.display(), e)))?;
                Self::from_document(doc)?
            }
            _ => {
                return Err(Error::MissingSchema(format!(
                    "{}: unsupported schema format (use .yaml, .toml or .json)",
                    path.display()
                )))
            }
        };

        info!(
            "Loaded label schema {} ({} categories, {} dimensions) from {}",
            schema.version,
            schema.categories.len(),
            schema.dimensions.len(),
            path.display()
        );
        Ok(schema)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let doc: SchemaDocument =
            serde_yaml::from_str(content).map_err(|e| Error::Parse(e.to_string()))?;
        Self::from_document(doc)
    }

    /// Validate a document and resolve per-category ranges.
    pub fn from_document(doc: SchemaDocument) -> Result<Self> {
        let invalid = |msg: String| Error::SchemaViolation(format!("schema {}: {}", doc.version, msg));

        if doc.version.trim().is_empty() {
            return Err(Error::SchemaViolation("schema version is empty".to_string()));
        }
        if doc.binary.is_empty() {
            return Err(invalid("no binary label values".to_string()));
        }
        if doc.categories.is_empty() {
            return Err(invalid("no categories".to_string()));
        }

        let mut dim_names = HashSet::new();
        for dim in &doc.dimensions {
            if !dim_names.insert(dim.name.as_str()) {
                return Err(invalid(format!("duplicate dimension '{}'", dim.name)));
            }
            if dim.min > dim.max {
                return Err(invalid(format!("dimension '{}' has min > max", dim.name)));
            }
        }

        let names: HashSet<&str> = doc.categories.iter().map(|c| c.name.as_str()).collect();
        if names.len() != doc.categories.len() {
            return Err(invalid("duplicate category name".to_string()));
        }

        let mut categories = Vec::with_capacity(doc.categories.len());
        let mut multiclass_labels = HashSet::new();
        for spec in &doc.categories {
            if !doc.binary.contains(&spec.binary) {
                return Err(invalid(format!(
                    "category '{}' uses unknown binary value '{}'",
                    spec.name, spec.binary
                )));
            }
            let multiclass = spec.multiclass.clone().unwrap_or_else(|| spec.name.clone());
            if !multiclass_labels.insert(multiclass.clone()) {
                return Err(invalid(format!("multi-class label '{}' is not unique", multiclass)));
            }

            for fallback in &spec.fallbacks {
                if fallback == &spec.name || !names.contains(fallback.as_str()) {
                    return Err(invalid(format!(
                        "category '{}' has invalid fallback '{}'",
                        spec.name, fallback
                    )));
                }
            }

            for name in spec.score_ranges.keys() {
                if !dim_names.contains(name.as_str()) {
                    return Err(invalid(format!(
                        "category '{}' narrows unknown dimension '{}'",
                        spec.name, name
                    )));
                }
            }

            let mut ranges = Vec::with_capacity(doc.dimensions.len());
            for dim in &doc.dimensions {
                let (lo, hi) = spec
                    .score_ranges
                    .get(&dim.name)
                    .copied()
                    .unwrap_or((dim.min, dim.max));
                if lo > hi || lo < dim.min || hi > dim.max {
                    return Err(invalid(format!(
                        "category '{}' range for '{}' is outside {}..={}",
                        spec.name, dim.name, dim.min, dim.max
                    )));
                }
                ranges.push((lo, hi));
            }

            if let Some(scores) = &spec.default_scores {
                if scores.len() != ranges.len()
                    || scores.iter().zip(&ranges).any(|(s, (lo, hi))| s < lo || s > hi)
                {
                    return Err(invalid(format!(
                        "category '{}' default scores do not fit its ranges",
                        spec.name
                    )));
                }
            }

            categories.push(Category {
                name: spec.name.clone(),
                description: spec.description.clone(),
                perturbation: spec.perturbation,
                binary: spec.binary.clone(),
                multiclass,
                fallbacks: spec.fallbacks.clone(),
                ranges,
                default_scores: spec.default_scores.clone(),
            });
        }

        debug!("Validated schema {} with {} categories", doc.version, categories.len());

        Ok(Self {
            version: doc.version,
            binary: doc.binary,
            dimensions: doc.dimensions,
            categories,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn binary_values(&self) -> &[String] {
        &self.binary
    }

    pub fn dimensions(&self) -> &[DimensionSpec] {
        &self.dimensions
    }

    pub fn dimension_names(&self) -> impl Iterator<Item = &str> {
        self.dimensions.iter().map(|d| d.name.as_str())
    }

    pub fn dimension_index(&self, name: &str) -> Option<usize> {
        self.dimensions.iter().position(|d| d.name == name)
    }

    /// Category names in registry order. The order never changes.
    pub fn categories(&self) -> Vec<&str> {
        self.categories.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn category_specs(&self) -> &[Category] {
        &self.categories
    }

    pub fn category(&self, name: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.name == name)
    }

    pub fn category_for_multiclass(&self, label: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.multiclass == label)
    }

    /// Error categories in registry order.
    pub fn error_categories(&self) -> impl Iterator<Item = &Category> {
        self.categories.iter().filter(|c| c.is_error())
    }

    /// Pure membership check of one label value.
    pub fn validate(&self, value: &LabelValue<'_>, dimension: &LabelDimension) -> bool {
        match (dimension, value) {
            (LabelDimension::Binary, LabelValue::Text(text)) => {
                self.binary.iter().any(|b| b == text)
            }
            (LabelDimension::MultiClass, LabelValue::Text(text)) => {
                self.category_for_multiclass(text).is_some()
            }
            (LabelDimension::Score(idx), LabelValue::Score(score)) => self
                .dimensions
                .get(*idx)
                .map(|d| *score >= d.min && *score <= d.max)
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Check a full label set for completeness and coherence.
    ///
    /// The multi-class label must belong to a category whose binary value
    /// matches the row, and each score must sit inside that category's range.
    pub fn validate_labels(
        &self,
        binary: Option<&str>,
        multiclass: Option<&str>,
        dims: &[u8],
    ) -> std::result::Result<(), LabelIssue> {
        let binary = binary
            .filter(|b| !b.is_empty())
            .ok_or_else(|| LabelIssue::Incomplete("binary label missing".to_string()))?;
        let multiclass = multiclass
            .filter(|m| !m.is_empty())
            .ok_or_else(|| LabelIssue::Incomplete("multi-class label missing".to_string()))?;
        if dims.len() != self.dimensions.len() {
            return Err(LabelIssue::Incomplete(format!(
                "expected {} dimension scores, found {}",
                self.dimensions.len(),
                dims.len()
            )));
        }

        if !self.validate(&LabelValue::Text(binary), &LabelDimension::Binary) {
            return Err(LabelIssue::Invalid(format!("unknown binary label '{}'", binary)));
        }
        let category = self.category_for_multiclass(multiclass).ok_or_else(|| {
            LabelIssue::Invalid(format!("unknown multi-class label '{}'", multiclass))
        })?;
        if category.binary != binary {
            return Err(LabelIssue::Invalid(format!(
                "multi-class '{}' implies binary '{}', found '{}'",
                multiclass, category.binary, binary
            )));
        }

        for (idx, (score, (lo, hi))) in dims.iter().zip(&category.ranges).enumerate() {
            if !self.validate(&LabelValue::Score(*score), &LabelDimension::Score(idx))
                || score < lo
                || score > hi
            {
                return Err(LabelIssue::Invalid(format!(
                    "{}={} outside {}..={} for {}",
                    self.dimensions[idx].name, score, lo, hi, category.name
                )));
            }
        }

        Ok(())
    }

    pub fn validate_row(&self, row: &Row) -> std::result::Result<(), LabelIssue> {
        self.validate_labels(
            row.label_binary.as_deref(),
            row.label_multiclass.as_deref(),
            &row.label_dims,
        )
    }

    pub fn to_document(&self) -> SchemaDocument {
        SchemaDocument {
            version: self.version.clone(),
            binary: self.binary.clone(),
            dimensions: self.dimensions.clone(),
            categories: self
                .categories
                .iter()
                .map(|c| CategorySpec {
                    name: c.name.clone(),
                    description: c.description.clone(),
                    perturbation: c.perturbation,
                    binary: c.binary.clone(),
                    multiclass: Some(c.multiclass.clone()),
                    fallbacks: c.fallbacks.clone(),
                    score_ranges: self
                        .dimensions
                        .iter()
                        .zip(&c.ranges)
                        .filter(|(d, r)| **r != (d.min, d.max))
                        .map(|(d, r)| (d.name.clone(), *r))
                        .collect(),
                    default_scores: c.default_scores.clone(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_builtin_schema() {
        let schema = LabelSchema::builtin().unwrap();
        assert_eq!(schema.version(), "synced_ende_v1");
        assert_eq!(schema.categories(), vec!["NAM", "NUM", "SEN", "SAF", "TOX", "NOT"]);
        assert_eq!(schema.dimensions().len(), 5);
        assert_eq!(schema.error_categories().count(), 5);
        assert_eq!(schema.category("SEN").unwrap().fallbacks[0], "NUM");
    }

    #[test]
    fn test_validate_single_values() {
        let schema = LabelSchema::builtin().unwrap();
        assert!(schema.validate(&LabelValue::Text("ERR"), &LabelDimension::Binary));
        assert!(!schema.validate(&LabelValue::Text("MAYBE"), &LabelDimension::Binary));
        assert!(schema.validate(&LabelValue::Text("TOX"), &LabelDimension::MultiClass));
        assert!(!schema.validate(&LabelValue::Text("XYZ"), &LabelDimension::MultiClass));
        assert!(schema.validate(&LabelValue::Score(5), &LabelDimension::Score(0)));
        assert!(!schema.validate(&LabelValue::Score(6), &LabelDimension::Score(0)));
        assert!(!schema.validate(&LabelValue::Score(3), &LabelDimension::Score(9)));
        assert!(!schema.validate(&LabelValue::Score(3), &LabelDimension::Binary));
    }

    #[test]
    fn test_validate_labels() {
        let schema = LabelSchema::builtin().unwrap();
        assert!(schema.validate_labels(Some("ERR"), Some("NUM"), &[3, 4, 1, 2, 3]).is_ok());
        assert!(schema.validate_labels(Some("NOT"), Some("NOT"), &[5, 1, 1, 1, 1]).is_ok());

        assert!(matches!(
            schema.validate_labels(None, Some("NUM"), &[3, 4, 1, 2, 3]),
            Err(LabelIssue::Incomplete(_))
        ));
        assert!(matches!(
            schema.validate_labels(Some("ERR"), Some("NUM"), &[3, 4]),
            Err(LabelIssue::Incomplete(_))
        ));
        // binary disagrees with category
        assert!(matches!(
            schema.validate_labels(Some("NOT"), Some("NUM"), &[3, 4, 1, 2, 3]),
            Err(LabelIssue::Invalid(_))
        ));
        // SEN requires severity >= 3
        assert!(matches!(
            schema.validate_labels(Some("ERR"), Some("SEN"), &[1, 2, 1, 1, 5]),
            Err(LabelIssue::Invalid(_))
        ));
    }

    #[test]
    fn test_rejects_bad_fallback() {
        let mut doc = LabelSchema::builtin().unwrap().to_document();
        doc.categories[0].fallbacks.push("MISSING".to_string());
        assert!(matches!(
            LabelSchema::from_document(doc),
            Err(Error::SchemaViolation(_))
        ));
    }

    #[test]
    fn test_rejects_out_of_range_defaults() {
        let mut doc = LabelSchema::builtin().unwrap().to_document();
        let last = doc.categories.len() - 1;
        doc.categories[last].default_scores = Some(vec![5, 5, 1, 1, 1]);
        assert!(LabelSchema::from_document(doc).is_err());
    }

    #[test]
    fn test_document_roundtrip_preserves_schema() {
        let schema = LabelSchema::builtin().unwrap();
        let again = LabelSchema::from_document(schema.to_document()).unwrap();
        assert_eq!(schema, again);
    }

    #[test]
    fn test_load_by_extension() {
        let schema = LabelSchema::builtin().unwrap();
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, "{}", serde_json::to_string(&schema.to_document()).unwrap()).unwrap();
        assert_eq!(LabelSchema::load(file.path()).unwrap(), schema);

        let txt = NamedTempFile::new().unwrap();
        assert!(matches!(LabelSchema::load(txt.path()), Err(Error::MissingSchema(_))));
        assert!(matches!(
            LabelSchema::load(Path::new("/nonexistent/schema.yaml")),
            Err(Error::MissingSchema(_))
        ));
    }
}
