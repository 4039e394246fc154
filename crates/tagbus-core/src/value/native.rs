//! Conversion between typed [`Value`]s and untyped native values
//! (`serde_json::Value`), as typed on a command line or read from a JSON
//! document.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value as Native};

use super::data_type::{BaseType, DataType, ModelSpec};
use super::error::ValueError;
use super::model::ModelConfig;
use super::values::{ModelField, ModelValue, Value};

/// How a native mapping with fewer keys than the model's items is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartialPolicy {
    /// Every item must be present; a missing key is [`ValueError::MissingField`].
    Strict,
    /// Missing keys leave the item unset.
    #[default]
    Partial,
}

/// Infers the data type of an untyped scalar or list.
///
/// Strings are checked first and booleans before numbers.  Integers that
/// fit in 32 bits are `int`, other integers `long`, anything with a
/// fractional part `float`.  Lists must be non-empty and homogeneous; a list
/// mixing `int` and `long` elements is `long[]`.
///
/// Maps, `null`, nested lists and integers above `i64::MAX` are
/// [`ValueError::UnsupportedType`]: model shapes are never inferred.
///
/// # Examples
///
/// ```rust
/// use serde_json::json;
/// use tagbus_core::{type_of, DataType};
///
/// assert_eq!(type_of(&json!(true)).unwrap(), DataType::BOOL);
/// assert_eq!(type_of(&json!(3)).unwrap(), DataType::INT);
/// assert_eq!(type_of(&json!([1, 5_000_000_000i64])).unwrap(), DataType::LONG_LIST);
/// ```
pub fn type_of(native: &Native) -> Result<DataType, ValueError> {
    match native {
        Native::Array(items) => {
            let first = items
                .first()
                .ok_or_else(|| ValueError::UnsupportedType("empty list".to_string()))?;
            let mut element = scalar_type_of(first)?;
            for item in &items[1..] {
                element = match (element, scalar_type_of(item)?) {
                    (a, b) if a == b => a,
                    (BaseType::Int, BaseType::Long) | (BaseType::Long, BaseType::Int) => BaseType::Long,
                    (a, b) => {
                        return Err(ValueError::UnsupportedType(format!(
                            "mixed list of {} and {}",
                            a.name(),
                            b.name()
                        )))
                    }
                };
            }
            Ok(DataType::List(element))
        }
        other => scalar_type_of(other).map(DataType::Base),
    }
}

fn scalar_type_of(native: &Native) -> Result<BaseType, ValueError> {
    match native {
        Native::String(_) => Ok(BaseType::String),
        Native::Bool(_) => Ok(BaseType::Bool),
        Native::Number(n) => number_type(n),
        Native::Null => Err(ValueError::UnsupportedType("null".to_string())),
        Native::Array(_) => Err(ValueError::UnsupportedType("nested list".to_string())),
        Native::Object(_) => Err(ValueError::UnsupportedType(
            "map (model types need an explicit schema)".to_string(),
        )),
    }
}

fn number_type(n: &Number) -> Result<BaseType, ValueError> {
    if let Some(i) = n.as_i64() {
        Ok(if i32::try_from(i).is_ok() {
            BaseType::Int
        } else {
            BaseType::Long
        })
    } else if n.is_u64() {
        Err(ValueError::UnsupportedType(format!("integer {n} out of range")))
    } else {
        Ok(BaseType::Float)
    }
}

/// Converts a native value to a [`Value`] of `data_type`.
///
/// Integers are accepted for `float` items.  Model types must be resolved
/// and take a JSON object: unknown keys are always rejected, missing keys
/// follow `policy`.
pub fn from_native(native: &Native, data_type: &DataType, policy: PartialPolicy) -> Result<Value, ValueError> {
    match data_type {
        DataType::Base(base) => scalar_from_native(native, *base, data_type),
        DataType::List(base) => {
            let items = native.as_array().ok_or_else(|| mismatch(data_type, native))?;
            list_from_native(items, *base, data_type)
        }
        DataType::Model(ModelSpec::Reference(r)) => Err(ValueError::UnresolvedModel(r.to_string())),
        DataType::Model(ModelSpec::Embedded(config)) => {
            let map = native.as_object().ok_or_else(|| mismatch(data_type, native))?;
            model_from_native(map, config, policy).map(Value::Model)
        }
    }
}

fn model_from_native(
    map: &Map<String, Native>,
    config: &ModelConfig,
    policy: PartialPolicy,
) -> Result<ModelValue, ValueError> {
    if let Some(unknown) = map.keys().find(|k| config.item(k).is_none()) {
        return Err(ValueError::UnknownField(format!("{}.{unknown}", config.path)));
    }
    let mut fields = Vec::with_capacity(config.items.len());
    for item in &config.items {
        let value = match map.get(&item.name) {
            Some(native) => Some(from_native(native, &item.data_type, policy)?),
            None if policy == PartialPolicy::Strict => {
                return Err(ValueError::MissingField(format!("{}.{}", config.path, item.name)))
            }
            None => None,
        };
        fields.push(ModelField {
            name: item.name.clone(),
            value,
        });
    }
    Ok(ModelValue::new(fields))
}

fn scalar_from_native(native: &Native, base: BaseType, data_type: &DataType) -> Result<Value, ValueError> {
    let err = || mismatch(data_type, native);
    Ok(match base {
        BaseType::Int => Value::Int(as_int(native).ok_or_else(err)?),
        BaseType::Long => Value::Long(native.as_i64().ok_or_else(err)?),
        BaseType::Float => Value::Float(native.as_f64().ok_or_else(err)?),
        BaseType::String => Value::String(as_string(native).ok_or_else(err)?),
        BaseType::Bool => Value::Bool(native.as_bool().ok_or_else(err)?),
    })
}

fn list_from_native(items: &[Native], base: BaseType, data_type: &DataType) -> Result<Value, ValueError> {
    Ok(match base {
        BaseType::Int => Value::IntList(collect_with(items, as_int, data_type)?),
        BaseType::Long => Value::LongList(collect_with(items, Native::as_i64, data_type)?),
        BaseType::Float => Value::FloatList(collect_with(items, Native::as_f64, data_type)?),
        BaseType::String => Value::StringList(collect_with(items, as_string, data_type)?),
        BaseType::Bool => Value::BoolList(collect_with(items, Native::as_bool, data_type)?),
    })
}

fn collect_with<T>(
    items: &[Native],
    extract: fn(&Native) -> Option<T>,
    data_type: &DataType,
) -> Result<Vec<T>, ValueError> {
    items
        .iter()
        .map(|n| extract(n).ok_or_else(|| mismatch(data_type, n)))
        .collect()
}

fn as_int(native: &Native) -> Option<i32> {
    native.as_i64().and_then(|i| i32::try_from(i).ok())
}

fn as_string(native: &Native) -> Option<String> {
    native.as_str().map(str::to_string)
}

fn mismatch(data_type: &DataType, native: &Native) -> ValueError {
    let found = match native {
        Native::Null => "null",
        Native::Bool(_) => "bool",
        Native::Number(_) => "number",
        Native::String(_) => "string",
        Native::Array(_) => "list",
        Native::Object(_) => "map",
    };
    ValueError::TypeMismatch {
        expected: data_type.to_string(),
        found: found.to_string(),
    }
}

/// Converts a [`Value`] back to a native value.  Models become objects
/// holding only the items that are set.  Non-finite floats become `null`.
pub fn to_native(value: &Value) -> Native {
    match value {
        Value::Int(v) => Native::from(*v),
        Value::Long(v) => Native::from(*v),
        Value::Float(v) => float_to_native(*v),
        Value::String(s) => Native::from(s.as_str()),
        Value::Bool(b) => Native::from(*b),
        Value::IntList(items) => items.iter().map(|v| Native::from(*v)).collect(),
        Value::LongList(items) => items.iter().map(|v| Native::from(*v)).collect(),
        Value::FloatList(items) => items.iter().map(|v| float_to_native(*v)).collect(),
        Value::StringList(items) => items.iter().map(|s| Native::from(s.as_str())).collect(),
        Value::BoolList(items) => items.iter().map(|b| Native::from(*b)).collect(),
        Value::Model(model) => Native::Object(
            model
                .fields()
                .iter()
                .filter_map(|f| f.value.as_ref().map(|v| (f.name.clone(), to_native(v))))
                .collect(),
        ),
    }
}

fn float_to_native(v: f64) -> Native {
    Number::from_f64(v).map_or(Native::Null, Native::Number)
}
