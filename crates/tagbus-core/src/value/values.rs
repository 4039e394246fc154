//! Runtime values mirroring [`DataType`].

use super::data_type::{BaseType, DataType, ModelSpec};
use super::error::ValueError;
use super::model::ModelConfig;

/// A typed value: scalar, homogeneous list, or model.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Long(i64),
    Float(f64),
    String(String),
    Bool(bool),
    IntList(Vec<i32>),
    LongList(Vec<i64>),
    FloatList(Vec<f64>),
    StringList(Vec<String>),
    BoolList(Vec<bool>),
    Model(ModelValue),
}

impl Value {
    /// Short label of the value's shape, for error messages.
    pub fn type_label(&self) -> String {
        match self {
            Value::Int(_) => BaseType::Int.name().to_string(),
            Value::Long(_) => BaseType::Long.name().to_string(),
            Value::Float(_) => BaseType::Float.name().to_string(),
            Value::String(_) => BaseType::String.name().to_string(),
            Value::Bool(_) => BaseType::Bool.name().to_string(),
            Value::IntList(_) => DataType::INT_LIST.to_string(),
            Value::LongList(_) => DataType::LONG_LIST.to_string(),
            Value::FloatList(_) => DataType::FLOAT_LIST.to_string(),
            Value::StringList(_) => DataType::STRING_LIST.to_string(),
            Value::BoolList(_) => DataType::BOOL_LIST.to_string(),
            Value::Model(_) => "model".to_string(),
        }
    }

    /// Checks that `self` has the shape of `data_type`.
    ///
    /// Embedded models are checked item by item (names, order, nested
    /// types; unset items always conform).  A model *reference* only checks
    /// that the value is a model.
    pub fn conforms_to(&self, data_type: &DataType) -> bool {
        match (self, data_type) {
            (Value::Int(_), DataType::Base(BaseType::Int))
            | (Value::Long(_), DataType::Base(BaseType::Long))
            | (Value::Float(_), DataType::Base(BaseType::Float))
            | (Value::String(_), DataType::Base(BaseType::String))
            | (Value::Bool(_), DataType::Base(BaseType::Bool))
            | (Value::IntList(_), DataType::List(BaseType::Int))
            | (Value::LongList(_), DataType::List(BaseType::Long))
            | (Value::FloatList(_), DataType::List(BaseType::Float))
            | (Value::StringList(_), DataType::List(BaseType::String))
            | (Value::BoolList(_), DataType::List(BaseType::Bool)) => true,
            (Value::Model(_), DataType::Model(ModelSpec::Reference(_))) => true,
            (Value::Model(m), DataType::Model(ModelSpec::Embedded(config))) => m.conforms_to(config),
            _ => false,
        }
    }

    /// Fails with [`ValueError::TypeMismatch`] unless `self` conforms.
    pub fn check(&self, data_type: &DataType) -> Result<(), ValueError> {
        if self.conforms_to(data_type) {
            Ok(())
        } else {
            Err(ValueError::TypeMismatch {
                expected: data_type.to_string(),
                found: self.type_label(),
            })
        }
    }

    pub fn as_model(&self) -> Option<&ModelValue> {
        match self {
            Value::Model(m) => Some(m),
            _ => None,
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v)
            }
        })*
    };
}

impl_from! {
    i32 => Int,
    i64 => Long,
    f64 => Float,
    String => String,
    bool => Bool,
    Vec<i32> => IntList,
    Vec<i64> => LongList,
    Vec<f64> => FloatList,
    Vec<String> => StringList,
    Vec<bool> => BoolList,
    ModelValue => Model,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

/// One item of a model value.  `None` means the item was not supplied and
/// stays unset on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelField {
    pub name: String,
    pub value: Option<Value>,
}

/// A model value: one field per schema item, in schema order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModelValue {
    fields: Vec<ModelField>,
}

impl ModelValue {
    pub fn new(fields: Vec<ModelField>) -> Self {
        Self { fields }
    }

    /// A value of `config` with every item unset.
    pub fn empty(config: &ModelConfig) -> Self {
        Self {
            fields: config
                .items
                .iter()
                .map(|item| ModelField {
                    name: item.name.clone(),
                    value: None,
                })
                .collect(),
        }
    }

    /// Builds a value of `config` from `(name, value)` pairs; items not
    /// mentioned stay unset.
    ///
    /// # Errors
    ///
    /// [`ValueError::UnknownField`] for names outside the schema,
    /// [`ValueError::TypeMismatch`] for values of the wrong type.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tagbus_core::{DataType, ModelConfig, ModelValue, Value};
    ///
    /// let point = ModelConfig::new("geo/point", "1")
    ///     .with_item("x", DataType::FLOAT)
    ///     .with_item("y", DataType::FLOAT);
    /// let v = ModelValue::build(&point, [("x", Value::Float(1.5))]).unwrap();
    /// assert_eq!(v.get("x"), Some(&Value::Float(1.5)));
    /// assert_eq!(v.get("y"), None);
    /// ```
    pub fn build<'a, I>(config: &ModelConfig, pairs: I) -> Result<Self, ValueError>
    where
        I: IntoIterator<Item = (&'a str, Value)>,
    {
        let mut value = Self::empty(config);
        for (name, v) in pairs {
            let (_, item) = config
                .item(name)
                .ok_or_else(|| ValueError::UnknownField(format!("{}.{name}", config.path)))?;
            v.check(&item.data_type)?;
            value.set(name, v)?;
        }
        Ok(value)
    }

    pub fn fields(&self) -> &[ModelField] {
        &self.fields
    }

    /// Value of the item `name`, if set.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .and_then(|f| f.value.as_ref())
    }

    /// Sets the item `name`.
    pub fn set(&mut self, name: &str, value: Value) -> Result<(), ValueError> {
        let field = self
            .fields
            .iter_mut()
            .find(|f| f.name == name)
            .ok_or_else(|| ValueError::UnknownField(name.to_string()))?;
        field.value = Some(value);
        Ok(())
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Number of items that carry a value.
    pub fn set_count(&self) -> usize {
        self.fields.iter().filter(|f| f.value.is_some()).count()
    }

    fn conforms_to(&self, config: &ModelConfig) -> bool {
        self.fields.len() == config.items.len()
            && self.fields.iter().zip(&config.items).all(|(field, item)| {
                field.name == item.name
                    && field
                        .value
                        .as_ref()
                        .map_or(true, |v| v.conforms_to(&item.data_type))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point() -> ModelConfig {
        ModelConfig::new("geo/point", "1")
            .with_item("x", DataType::FLOAT)
            .with_item("y", DataType::FLOAT)
    }

    #[test]
    fn test_scalar_values_conform_only_to_their_type() {
        assert!(Value::Int(1).conforms_to(&DataType::INT));
        assert!(!Value::Int(1).conforms_to(&DataType::LONG));
        assert!(!Value::Bool(true).conforms_to(&DataType::INT));
        assert!(Value::from(vec![1.0, 2.0]).conforms_to(&DataType::FLOAT_LIST));
    }

    #[test]
    fn test_partial_model_value_conforms() {
        // Arrange
        let config = point();
        let value = Value::Model(ModelValue::build(&config, [("y", Value::Float(2.0))]).unwrap());

        // Act / Assert
        assert!(value.conforms_to(&DataType::model(config)));
    }

    #[test]
    fn test_model_value_with_wrong_item_type_is_rejected() {
        let err = ModelValue::build(&point(), [("x", Value::Int(1))]).unwrap_err();
        assert_eq!(
            err,
            ValueError::TypeMismatch {
                expected: "float".into(),
                found: "int".into()
            }
        );
    }

    #[test]
    fn test_unknown_item_name_is_rejected() {
        let err = ModelValue::build(&point(), [("z", Value::Float(1.0))]).unwrap_err();
        assert!(matches!(err, ValueError::UnknownField(name) if name == "geo/point.z"));
    }

    #[test]
    fn test_model_value_for_other_schema_does_not_conform() {
        let other = ModelConfig::new("geo/point", "1").with_item("x", DataType::FLOAT);
        let value = Value::Model(ModelValue::empty(&point()));
        assert!(!value.conforms_to(&DataType::model(other)));
    }

    #[test]
    fn test_check_reports_labels() {
        let err = Value::from("hi").check(&DataType::INT_LIST).unwrap_err();
        assert_eq!(err.to_string(), "type mismatch: expected int[], found string");
    }
}
