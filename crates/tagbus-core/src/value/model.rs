//! Model definitions: named, versioned, ordered lists of typed items.
//!
//! A model file is TOML:
//!
//! ```toml
//! path = "geometry/pose"
//! version = "1.0"
//!
//! [[items]]
//! name = "position"
//! type = "model:geometry/point@1.0"   # by reference
//!
//! [[items]]
//! name = "heading"
//! type = "float"
//!
//! [[items]]
//! name = "covariance"
//! type = "model"                      # embedded
//! [items.model]
//! path = "geometry/cov2"
//! version = "1.0"
//! [[items.model.items]]
//! name = "xx"
//! type = "float"
//! ```
//!
//! Item order and names are fixed for a given version: the wire encoding is
//! positional and never carries names.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::data_type::{DataType, ModelSpec};
use super::error::ValueError;

/// Pointer to a model definition, written `path@version`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelRef {
    pub path: String,
    pub version: String,
}

impl ModelRef {
    pub fn new(path: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.path, self.version)
    }
}

impl FromStr for ModelRef {
    type Err = ValueError;

    /// Splits at the last `@`; both halves must be non-empty.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once('@') {
            Some((path, version)) if !path.is_empty() && !version.is_empty() => {
                Ok(ModelRef::new(path, version))
            }
            _ => Err(ValueError::MalformedModelRef(s.to_string())),
        }
    }
}

/// One named item of a model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelItem {
    pub name: String,
    pub data_type: DataType,
    pub properties: BTreeMap<String, String>,
}

/// A model definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub path: String,
    pub version: String,
    pub items: Vec<ModelItem>,
    pub properties: BTreeMap<String, String>,
}

impl ModelConfig {
    pub fn new(path: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            version: version.into(),
            items: Vec::new(),
            properties: BTreeMap::new(),
        }
    }

    /// Appends an item; builder style.
    pub fn with_item(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.items.push(ModelItem {
            name: name.into(),
            data_type,
            properties: BTreeMap::new(),
        });
        self
    }

    pub fn model_ref(&self) -> ModelRef {
        ModelRef::new(self.path.clone(), self.version.clone())
    }

    /// Position and definition of the item called `name`.
    pub fn item(&self, name: &str) -> Option<(usize, &ModelItem)> {
        self.items.iter().enumerate().find(|(_, item)| item.name == name)
    }

    /// `true` when every nested model is embedded.
    pub fn is_resolved(&self) -> bool {
        self.items.iter().all(|item| item.data_type.is_resolved())
    }

    /// Rejects duplicate item names, recursively through embedded models.
    pub fn validate(&self) -> Result<(), ValueError> {
        let mut seen = HashSet::new();
        for item in &self.items {
            if !seen.insert(item.name.as_str()) {
                return Err(ValueError::InvalidModel {
                    path: self.model_ref().to_string(),
                    reason: format!("duplicate item {:?}", item.name),
                });
            }
            if let DataType::Model(ModelSpec::Embedded(inner)) = &item.data_type {
                inner.validate()?;
            }
        }
        Ok(())
    }

    /// Parses a model file.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::InvalidModel`] for TOML syntax errors, unknown
    /// item types or duplicate item names.
    pub fn from_toml_str(content: &str) -> Result<Self, ValueError> {
        let file: ModelFile = toml::from_str(content).map_err(|e| ValueError::InvalidModel {
            path: "<toml>".to_string(),
            reason: e.to_string(),
        })?;
        let config = ModelConfig::try_from(file)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialises to the model file format.
    pub fn to_toml_string(&self) -> Result<String, ValueError> {
        toml::to_string_pretty(&ModelFile::from(self)).map_err(|e| ValueError::InvalidModel {
            path: self.model_ref().to_string(),
            reason: e.to_string(),
        })
    }
}

// ── File representation ───────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct ModelFile {
    path: String,
    version: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    properties: BTreeMap<String, String>,
    #[serde(default)]
    items: Vec<ItemFile>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ItemFile {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model: Option<Box<ModelFile>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    properties: BTreeMap<String, String>,
}

/// `type = "model"` with an inline `model` table.
const EMBEDDED_KIND: &str = "model";

impl TryFrom<ModelFile> for ModelConfig {
    type Error = ValueError;

    fn try_from(file: ModelFile) -> Result<Self, Self::Error> {
        let path = format!("{}@{}", file.path, file.version);
        let mut items = Vec::with_capacity(file.items.len());
        for item in file.items {
            let data_type = match (item.kind.as_str(), item.model) {
                (EMBEDDED_KIND, Some(inner)) => DataType::model(ModelConfig::try_from(*inner)?),
                (EMBEDDED_KIND, None) => {
                    return Err(ValueError::InvalidModel {
                        path,
                        reason: format!("item {:?} is an embedded model without a model table", item.name),
                    });
                }
                (kind, _) => kind.parse().map_err(|e: ValueError| ValueError::InvalidModel {
                    path: path.clone(),
                    reason: format!("item {:?}: {e}", item.name),
                })?,
            };
            items.push(ModelItem {
                name: item.name,
                data_type,
                properties: item.properties,
            });
        }
        Ok(ModelConfig {
            path: file.path,
            version: file.version,
            items,
            properties: file.properties,
        })
    }
}

impl From<&ModelConfig> for ModelFile {
    fn from(config: &ModelConfig) -> Self {
        let items = config
            .items
            .iter()
            .map(|item| match &item.data_type {
                DataType::Model(ModelSpec::Embedded(inner)) => ItemFile {
                    name: item.name.clone(),
                    kind: EMBEDDED_KIND.to_string(),
                    model: Some(Box::new(ModelFile::from(inner.as_ref()))),
                    properties: item.properties.clone(),
                },
                other => ItemFile {
                    name: item.name.clone(),
                    kind: other.to_string(),
                    model: None,
                    properties: item.properties.clone(),
                },
            })
            .collect();
        ModelFile {
            path: config.path.clone(),
            version: config.version.clone(),
            properties: config.properties.clone(),
            items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POSE: &str = r#"
path = "geometry/pose"
version = "1.0"

[[items]]
name = "position"
type = "model:geometry/point@1.0"

[[items]]
name = "heading"
type = "float"
[items.properties]
unit = "rad"

[[items]]
name = "tags"
type = "string[]"

[[items]]
name = "covariance"
type = "model"
[items.model]
path = "geometry/cov2"
version = "1.0"
[[items.model.items]]
name = "xx"
type = "float"
"#;

    #[test]
    fn test_parse_model_file_with_reference_and_embedded_items() {
        // Act
        let config = ModelConfig::from_toml_str(POSE).unwrap();

        // Assert
        assert_eq!(config.model_ref(), ModelRef::new("geometry/pose", "1.0"));
        assert_eq!(config.items.len(), 4);
        assert_eq!(config.items[0].data_type, DataType::model_ref("geometry/point", "1.0"));
        assert_eq!(config.items[1].properties.get("unit").map(String::as_str), Some("rad"));
        assert_eq!(config.items[2].data_type, DataType::STRING_LIST);
        assert!(config.items[3].data_type.is_resolved());
        assert!(!config.is_resolved());
    }

    #[test]
    fn test_model_file_round_trips_through_toml() {
        let config = ModelConfig::from_toml_str(POSE).unwrap();
        let text = config.to_toml_string().unwrap();
        let reparsed = ModelConfig::from_toml_str(&text).unwrap();
        assert_eq!(reparsed, config);
    }

    #[test]
    fn test_duplicate_item_names_are_rejected() {
        let text = r#"
path = "p"
version = "1"
[[items]]
name = "a"
type = "int"
[[items]]
name = "a"
type = "bool"
"#;
        let err = ModelConfig::from_toml_str(text).unwrap_err();
        assert!(matches!(err, ValueError::InvalidModel { .. }));
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_embedded_kind_without_table_is_rejected() {
        let text = r#"
path = "p"
version = "1"
[[items]]
name = "inner"
type = "model"
"#;
        assert!(matches!(
            ModelConfig::from_toml_str(text),
            Err(ValueError::InvalidModel { .. })
        ));
    }

    #[test]
    fn test_model_ref_splits_at_last_at_sign() {
        let r: ModelRef = "ns/user@host@2".parse().unwrap();
        assert_eq!(r.path, "ns/user@host");
        assert_eq!(r.version, "2");
        assert!("@1".parse::<ModelRef>().is_err());
        assert!("p@".parse::<ModelRef>().is_err());
    }

    #[test]
    fn test_item_lookup_returns_position() {
        let config = ModelConfig::new("p", "1")
            .with_item("a", DataType::INT)
            .with_item("b", DataType::BOOL);
        let (idx, item) = config.item("b").unwrap();
        assert_eq!(idx, 1);
        assert_eq!(item.data_type, DataType::BOOL);
        assert!(config.item("c").is_none());
    }
}
