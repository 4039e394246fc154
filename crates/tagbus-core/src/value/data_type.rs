//! The closed set of data types a tag, parameter or body field may have.
//!
//! Types have a textual form used in configuration files and in the node
//! metadata document:
//!
//! | Type | Text |
//! |---|---|
//! | scalar | `int`, `long`, `float`, `string`, `bool` |
//! | homogeneous list | `int[]`, `long[]`, `float[]`, `string[]`, `bool[]` |
//! | model | `model:<path>@<version>` |
//!
//! Embedded models are written as their reference: the text form only ever
//! carries the pointer, resolution happens on whichever side needs the
//! schema.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::error::ValueError;
use super::model::{ModelConfig, ModelRef};

/// Prefix of the textual form of a model type.
pub const MODEL_TYPE_PREFIX: &str = "model:";

/// Scalar element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BaseType {
    Int = 0x01,
    Long = 0x02,
    Float = 0x03,
    String = 0x04,
    Bool = 0x05,
}

impl BaseType {
    pub const ALL: [BaseType; 5] = [
        BaseType::Int,
        BaseType::Long,
        BaseType::Float,
        BaseType::String,
        BaseType::Bool,
    ];

    /// Lower-case name used in the text form.
    pub fn name(self) -> &'static str {
        match self {
            BaseType::Int => "int",
            BaseType::Long => "long",
            BaseType::Float => "float",
            BaseType::String => "string",
            BaseType::Bool => "bool",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        BaseType::ALL.into_iter().find(|b| b.name() == name)
    }
}

impl TryFrom<u8> for BaseType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(BaseType::Int),
            0x02 => Ok(BaseType::Long),
            0x03 => Ok(BaseType::Float),
            0x04 => Ok(BaseType::String),
            0x05 => Ok(BaseType::Bool),
            _ => Err(()),
        }
    }
}

/// Schema of a model-typed item: either the full definition or a pointer to
/// it.
///
/// Two specs are equal when they designate the same `path@version`, whether
/// embedded or referenced.
#[derive(Debug, Clone)]
pub enum ModelSpec {
    Embedded(Arc<ModelConfig>),
    Reference(ModelRef),
}

impl ModelSpec {
    /// The `path@version` pointer of this model.
    pub fn model_ref(&self) -> ModelRef {
        match self {
            ModelSpec::Embedded(config) => config.model_ref(),
            ModelSpec::Reference(r) => r.clone(),
        }
    }

    /// Returns the embedded definition, if any.
    pub fn config(&self) -> Option<&Arc<ModelConfig>> {
        match self {
            ModelSpec::Embedded(config) => Some(config),
            ModelSpec::Reference(_) => None,
        }
    }
}

impl PartialEq for ModelSpec {
    fn eq(&self, other: &Self) -> bool {
        self.model_ref() == other.model_ref()
    }
}

/// A tag, parameter or body field type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum DataType {
    Base(BaseType),
    List(BaseType),
    Model(ModelSpec),
}

impl DataType {
    pub const INT: DataType = DataType::Base(BaseType::Int);
    pub const LONG: DataType = DataType::Base(BaseType::Long);
    pub const FLOAT: DataType = DataType::Base(BaseType::Float);
    pub const STRING: DataType = DataType::Base(BaseType::String);
    pub const BOOL: DataType = DataType::Base(BaseType::Bool);
    pub const INT_LIST: DataType = DataType::List(BaseType::Int);
    pub const LONG_LIST: DataType = DataType::List(BaseType::Long);
    pub const FLOAT_LIST: DataType = DataType::List(BaseType::Float);
    pub const STRING_LIST: DataType = DataType::List(BaseType::String);
    pub const BOOL_LIST: DataType = DataType::List(BaseType::Bool);

    /// Model type embedding `config`.
    pub fn model(config: ModelConfig) -> Self {
        DataType::Model(ModelSpec::Embedded(Arc::new(config)))
    }

    /// Model type pointing at `path@version`.
    pub fn model_ref(path: impl Into<String>, version: impl Into<String>) -> Self {
        DataType::Model(ModelSpec::Reference(ModelRef::new(path, version)))
    }

    pub fn is_model(&self) -> bool {
        matches!(self, DataType::Model(_))
    }

    /// `true` when no model reference is left anywhere in the type.
    pub fn is_resolved(&self) -> bool {
        match self {
            DataType::Base(_) | DataType::List(_) => true,
            DataType::Model(ModelSpec::Reference(_)) => false,
            DataType::Model(ModelSpec::Embedded(config)) => config.is_resolved(),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Base(b) => f.write_str(b.name()),
            DataType::List(b) => write!(f, "{}[]", b.name()),
            DataType::Model(spec) => write!(f, "{MODEL_TYPE_PREFIX}{}", spec.model_ref()),
        }
    }
}

impl FromStr for DataType {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(reference) = s.strip_prefix(MODEL_TYPE_PREFIX) {
            return Ok(DataType::Model(ModelSpec::Reference(reference.parse()?)));
        }
        if let Some(element) = s.strip_suffix("[]") {
            return BaseType::from_name(element)
                .map(DataType::List)
                .ok_or_else(|| ValueError::UnsupportedType(s.to_string()));
        }
        BaseType::from_name(s)
            .map(DataType::Base)
            .ok_or_else(|| ValueError::UnsupportedType(s.to_string()))
    }
}

impl From<DataType> for String {
    fn from(value: DataType) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for DataType {
    type Error = ValueError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_scalar_and_list_type_parses_its_own_text() {
        for base in BaseType::ALL {
            let scalar = DataType::Base(base);
            let list = DataType::List(base);
            assert_eq!(scalar.to_string().parse::<DataType>().unwrap(), scalar);
            assert_eq!(list.to_string().parse::<DataType>().unwrap(), list);
        }
    }

    #[test]
    fn test_model_reference_text_form() {
        let ty: DataType = "model:geometry/point@1.2".parse().unwrap();
        assert_eq!(ty, DataType::model_ref("geometry/point", "1.2"));
        assert_eq!(ty.to_string(), "model:geometry/point@1.2");
        assert!(!ty.is_resolved());
    }

    #[test]
    fn test_embedded_model_serialises_as_reference() {
        // Arrange
        let embedded = DataType::model(ModelConfig::new("geo/point", "1").with_item("x", DataType::FLOAT));

        // Act
        let json = serde_json::to_string(&embedded).unwrap();

        // Assert
        assert_eq!(json, "\"model:geo/point@1\"");
        assert_eq!(embedded, DataType::model_ref("geo/point", "1"));
        assert!(embedded.is_resolved());
    }

    #[test]
    fn test_unknown_type_name_is_unsupported() {
        assert!(matches!("double".parse::<DataType>(), Err(ValueError::UnsupportedType(_))));
        assert!(matches!("double[]".parse::<DataType>(), Err(ValueError::UnsupportedType(_))));
        assert!(matches!("model:nover".parse::<DataType>(), Err(ValueError::MalformedModelRef(_))));
    }

    #[test]
    fn test_base_type_byte_round_trip() {
        for base in BaseType::ALL {
            assert_eq!(BaseType::try_from(base as u8), Ok(base));
        }
        assert!(BaseType::try_from(0x7F).is_err());
    }
}
