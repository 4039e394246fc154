//! Named field maps: method parameters and reply bodies.
//!
//! A field map travels as an ordinary model value whose items are the
//! schema's field names in sorted order, so parameters and bodies share the
//! value codec with tag values.

use std::collections::BTreeMap;

use serde_json::{Map, Value as Native};

use super::error::ProtocolError;
use crate::value::{
    decode, encode, from_native, to_native, DataType, ModelConfig, ModelField, ModelValue, PartialPolicy, Value,
    ValueError,
};

/// Field name → type.  Sorted, which fixes the wire order.
pub type Schema = BTreeMap<String, DataType>;

/// Field name → value.
pub type Fields = BTreeMap<String, Value>;

/// Model definition equivalent to `schema`.
fn schema_model(schema: &Schema) -> ModelConfig {
    schema
        .iter()
        .fold(ModelConfig::new("fields", "0"), |config, (name, ty)| {
            config.with_item(name.clone(), ty.clone())
        })
}

fn encode_fields(fields: &Fields, schema: &Schema) -> Result<Vec<u8>, ProtocolError> {
    let mut items = Vec::with_capacity(schema.len());
    for (name, ty) in schema {
        let value = match fields.get(name) {
            Some(v) => {
                v.check(ty)?;
                Some(v.clone())
            }
            None => None,
        };
        items.push(ModelField {
            name: name.clone(),
            value,
        });
    }
    Ok(encode(&Value::Model(ModelValue::new(items))))
}

fn decode_fields(bytes: &[u8], schema: &Schema) -> Result<Fields, ProtocolError> {
    let value = decode(bytes, &DataType::model(schema_model(schema)))?;
    let model = value
        .as_model()
        .ok_or_else(|| ProtocolError::Malformed("field map is not a model".to_string()))?;
    Ok(model
        .fields()
        .iter()
        .filter_map(|f| f.value.clone().map(|v| (f.name.clone(), v)))
        .collect())
}

fn key_difference(fields: &Fields, schema: &Schema) -> (Vec<String>, Vec<String>) {
    let missing = schema.keys().filter(|k| !fields.contains_key(*k)).cloned().collect();
    let unexpected = fields.keys().filter(|k| !schema.contains_key(*k)).cloned().collect();
    (missing, unexpected)
}

/// Encodes call parameters.  The keys must match the parameter table
/// exactly and every value must have the declared type.
///
/// # Errors
///
/// [`ProtocolError::ParameterMismatch`] when keys are missing or
/// unexpected, [`ProtocolError::Value`] on a type mismatch.
pub fn encode_parameters(params: &Fields, schema: &Schema) -> Result<Vec<u8>, ProtocolError> {
    let (missing, unexpected) = key_difference(params, schema);
    if !missing.is_empty() || !unexpected.is_empty() {
        return Err(ProtocolError::ParameterMismatch { missing, unexpected });
    }
    encode_fields(params, schema)
}

/// Decodes call parameters; every declared parameter must be present.
/// `schema` must be resolved.
pub fn decode_parameters(bytes: &[u8], schema: &Schema) -> Result<Fields, ProtocolError> {
    let params = decode_fields(bytes, schema)?;
    let (missing, _) = key_difference(&params, schema);
    if !missing.is_empty() {
        return Err(ProtocolError::ParameterMismatch {
            missing,
            unexpected: Vec::new(),
        });
    }
    Ok(params)
}

/// Encodes a reply body.  Any subset of the declared fields may be given.
pub fn encode_body(body: &Fields, schema: &Schema) -> Result<Vec<u8>, ProtocolError> {
    if let Some(unknown) = body.keys().find(|k| !schema.contains_key(*k)) {
        return Err(ValueError::UnknownField(unknown.clone()).into());
    }
    encode_fields(body, schema)
}

/// Decodes a reply body, returning only the fields that were sent.
/// `schema` must be resolved.
pub fn decode_body(bytes: &[u8], schema: &Schema) -> Result<Fields, ProtocolError> {
    decode_fields(bytes, schema)
}

/// Converts a native JSON object to fields of `schema`.  Unknown keys are
/// rejected; missing keys are simply absent (callers decide whether that is
/// acceptable).  Model-typed fields follow `policy`.
pub fn fields_from_native(
    native: &Map<String, Native>,
    schema: &Schema,
    policy: PartialPolicy,
) -> Result<Fields, ProtocolError> {
    native
        .iter()
        .map(|(name, v)| {
            let ty = schema
                .get(name)
                .ok_or_else(|| ProtocolError::ParameterMismatch {
                    missing: Vec::new(),
                    unexpected: vec![name.clone()],
                })?;
            Ok((name.clone(), from_native(v, ty, policy)?))
        })
        .collect()
}

/// Converts fields to a native JSON object.
pub fn fields_to_native(fields: &Fields) -> Native {
    Native::Object(fields.iter().map(|(k, v)| (k.clone(), to_native(v))).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::from([
            ("speed".to_string(), DataType::FLOAT),
            ("label".to_string(), DataType::STRING),
        ])
    }

    #[test]
    fn test_parameters_round_trip() {
        // Arrange
        let params = Fields::from([
            ("speed".to_string(), Value::Float(0.5)),
            ("label".to_string(), Value::from("slow")),
        ]);

        // Act
        let bytes = encode_parameters(&params, &schema()).unwrap();
        let decoded = decode_parameters(&bytes, &schema()).unwrap();

        // Assert
        assert_eq!(decoded, params);
    }

    #[test]
    fn test_parameter_mismatch_lists_missing_and_unexpected() {
        let params = Fields::from([
            ("speed".to_string(), Value::Float(0.5)),
            ("colour".to_string(), Value::from("red")),
        ]);
        let err = encode_parameters(&params, &schema()).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::ParameterMismatch {
                missing: vec!["label".into()],
                unexpected: vec!["colour".into()],
            }
        );
    }

    #[test]
    fn test_parameter_of_wrong_type_is_rejected() {
        let params = Fields::from([
            ("speed".to_string(), Value::Int(1)),
            ("label".to_string(), Value::from("x")),
        ]);
        assert!(matches!(
            encode_parameters(&params, &schema()),
            Err(ProtocolError::Value(ValueError::TypeMismatch { .. }))
        ));
    }

    #[test]
    fn test_body_subset_is_allowed() {
        let body = Fields::from([("label".to_string(), Value::from("done"))]);
        let bytes = encode_body(&body, &schema()).unwrap();
        assert_eq!(decode_body(&bytes, &schema()).unwrap(), body);
    }

    #[test]
    fn test_decoding_partial_parameters_fails() {
        let body = Fields::from([("label".to_string(), Value::from("done"))]);
        let bytes = encode_body(&body, &schema()).unwrap();
        assert!(matches!(
            decode_parameters(&bytes, &schema()),
            Err(ProtocolError::ParameterMismatch { .. })
        ));
    }

    #[test]
    fn test_empty_schema_encodes_empty_model() {
        let bytes = encode_parameters(&Fields::new(), &Schema::new()).unwrap();
        assert!(decode_parameters(&bytes, &Schema::new()).unwrap().is_empty());
    }

    #[test]
    fn test_native_fields_convert_against_schema() {
        let native = json!({"speed": 2, "label": "fast"});
        let fields = fields_from_native(native.as_object().unwrap(), &schema(), PartialPolicy::Partial).unwrap();
        assert_eq!(fields.get("speed"), Some(&Value::Float(2.0)));
        assert_eq!(fields_to_native(&fields), json!({"speed": 2.0, "label": "fast"}));

        let unknown = json!({"colour": "red"});
        assert!(fields_from_native(unknown.as_object().unwrap(), &schema(), PartialPolicy::Partial).is_err());
    }
}
