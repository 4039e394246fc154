//! Binary codec shared by tag values, method parameters and reply bodies.
//!
//! Wire format:
//! ```text
//! frame  = [version:1][value]
//! value  = [tag:1][payload]
//!
//! tag      payload
//! 0x01     int     i32
//! 0x02     long    i64
//! 0x03     float   f64
//! 0x04     string  [len:4][utf8]
//! 0x05     bool    [0|1]
//! 0x1n     list of base type n: [count:4][payload]*   (no per-element tag)
//! 0x20     model:  [count:2] then per item [present:1][value]?
//! ```
//! All multi-byte integers are big-endian.  Item names never appear on the
//! wire, so an embedded model and a model reference to the same definition
//! produce identical bytes.
//!
//! # Why a type tag when the decoder already has the schema? (for beginners)
//!
//! The decoder is always given the expected [`DataType`], so the tag byte is
//! redundant for well-behaved peers.  It turns a schema mismatch between two
//! peers (for example an out-of-date model version) into a clean
//! [`ValueError::TypeMismatch`] instead of silently mis-reading bytes.

use super::data_type::{BaseType, DataType, ModelSpec};
use super::error::ValueError;
use super::model::ModelConfig;
use super::resolver::MAX_MODEL_DEPTH;
use super::values::{ModelField, ModelValue, Value};

/// Version byte written at the start of every encoded value.
pub const VALUE_FORMAT_VERSION: u8 = 1;

const LIST_FLAG: u8 = 0x10;
const MODEL_TAG: u8 = 0x20;

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes `value` into a self-contained byte frame.
///
/// Encoding is deterministic: the same logical value always produces the
/// same bytes.  Unset model items are written as absent, never defaulted.
///
/// # Examples
///
/// ```rust
/// use tagbus_core::{decode, encode, DataType, Value};
///
/// let bytes = encode(&Value::Int(-7));
/// assert_eq!(decode(&bytes, &DataType::INT).unwrap(), Value::Int(-7));
/// ```
pub fn encode(value: &Value) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16);
    buf.push(VALUE_FORMAT_VERSION);
    write_value(&mut buf, value);
    buf
}

/// Decodes a frame produced by [`encode`] against the expected type.
///
/// Model types must be resolved (see [`crate::ModelResolver::resolve_type`]);
/// a remaining reference fails with [`ValueError::UnresolvedModel`].
///
/// # Errors
///
/// - [`ValueError::InsufficientData`] when the frame is truncated.
/// - [`ValueError::UnsupportedVersion`] for an unknown version byte.
/// - [`ValueError::TypeMismatch`] when a tag disagrees with `data_type`.
/// - [`ValueError::Malformed`] for invalid UTF-8, bad flags or trailing bytes.
pub fn decode(bytes: &[u8], data_type: &DataType) -> Result<Value, ValueError> {
    let mut reader = Reader::new(bytes);
    let version = reader.read_u8()?;
    if version != VALUE_FORMAT_VERSION {
        return Err(ValueError::UnsupportedVersion(version));
    }
    let value = read_value(&mut reader, data_type, 0)?;
    if reader.remaining() != 0 {
        return Err(ValueError::Malformed(format!(
            "{} trailing bytes after value",
            reader.remaining()
        )));
    }
    Ok(value)
}

// ── Encoding ──────────────────────────────────────────────────────────────────

fn type_tag(value: &Value) -> u8 {
    match value {
        Value::Int(_) => BaseType::Int as u8,
        Value::Long(_) => BaseType::Long as u8,
        Value::Float(_) => BaseType::Float as u8,
        Value::String(_) => BaseType::String as u8,
        Value::Bool(_) => BaseType::Bool as u8,
        Value::IntList(_) => LIST_FLAG | BaseType::Int as u8,
        Value::LongList(_) => LIST_FLAG | BaseType::Long as u8,
        Value::FloatList(_) => LIST_FLAG | BaseType::Float as u8,
        Value::StringList(_) => LIST_FLAG | BaseType::String as u8,
        Value::BoolList(_) => LIST_FLAG | BaseType::Bool as u8,
        Value::Model(_) => MODEL_TAG,
    }
}

fn write_value(buf: &mut Vec<u8>, value: &Value) {
    buf.push(type_tag(value));
    match value {
        Value::Int(v) => buf.extend_from_slice(&v.to_be_bytes()),
        Value::Long(v) => buf.extend_from_slice(&v.to_be_bytes()),
        Value::Float(v) => buf.extend_from_slice(&v.to_be_bytes()),
        Value::String(s) => write_string(buf, s),
        Value::Bool(b) => buf.push(u8::from(*b)),
        Value::IntList(items) => write_list(buf, items, |buf, v| buf.extend_from_slice(&v.to_be_bytes())),
        Value::LongList(items) => write_list(buf, items, |buf, v| buf.extend_from_slice(&v.to_be_bytes())),
        Value::FloatList(items) => write_list(buf, items, |buf, v| buf.extend_from_slice(&v.to_be_bytes())),
        Value::StringList(items) => write_list(buf, items, |buf, s| write_string(buf, s)),
        Value::BoolList(items) => write_list(buf, items, |buf, b| buf.push(u8::from(*b))),
        Value::Model(model) => {
            let fields = model.fields();
            buf.extend_from_slice(&(fields.len() as u16).to_be_bytes());
            for field in fields {
                match &field.value {
                    Some(v) => {
                        buf.push(1);
                        write_value(buf, v);
                    }
                    None => buf.push(0),
                }
            }
        }
    }
}

fn write_list<T>(buf: &mut Vec<u8>, items: &[T], write: impl Fn(&mut Vec<u8>, &T)) {
    buf.extend_from_slice(&(items.len() as u32).to_be_bytes());
    for item in items {
        write(buf, item);
    }
}

/// Writes a 4-byte length prefix followed by the UTF-8 bytes.
fn write_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
}

// ── Decoding ──────────────────────────────────────────────────────────────────

fn read_value(reader: &mut Reader<'_>, data_type: &DataType, depth: usize) -> Result<Value, ValueError> {
    let tag = reader.read_u8()?;
    let expected = expected_tag(data_type);
    if tag != expected {
        return Err(ValueError::TypeMismatch {
            expected: data_type.to_string(),
            found: describe_tag(tag),
        });
    }
    match data_type {
        DataType::Base(base) => read_scalar(reader, *base),
        DataType::List(base) => read_list(reader, *base),
        DataType::Model(ModelSpec::Reference(r)) => Err(ValueError::UnresolvedModel(r.to_string())),
        DataType::Model(ModelSpec::Embedded(config)) => read_model(reader, config, depth + 1),
    }
}

fn read_scalar(reader: &mut Reader<'_>, base: BaseType) -> Result<Value, ValueError> {
    Ok(match base {
        BaseType::Int => Value::Int(reader.read_i32()?),
        BaseType::Long => Value::Long(reader.read_i64()?),
        BaseType::Float => Value::Float(reader.read_f64()?),
        BaseType::String => Value::String(reader.read_string()?),
        BaseType::Bool => Value::Bool(reader.read_bool()?),
    })
}

fn read_list(reader: &mut Reader<'_>, base: BaseType) -> Result<Value, ValueError> {
    let count = reader.read_u32()? as usize;
    // Every element is at least one byte; reject absurd counts before allocating.
    reader.require(count)?;
    Ok(match base {
        BaseType::Int => Value::IntList(read_n(reader, count, Reader::read_i32)?),
        BaseType::Long => Value::LongList(read_n(reader, count, Reader::read_i64)?),
        BaseType::Float => Value::FloatList(read_n(reader, count, Reader::read_f64)?),
        BaseType::String => Value::StringList(read_n(reader, count, Reader::read_string)?),
        BaseType::Bool => Value::BoolList(read_n(reader, count, Reader::read_bool)?),
    })
}

fn read_n<'a, T>(
    reader: &mut Reader<'a>,
    count: usize,
    read: fn(&mut Reader<'a>) -> Result<T, ValueError>,
) -> Result<Vec<T>, ValueError> {
    (0..count).map(|_| read(reader)).collect()
}

fn read_model(reader: &mut Reader<'_>, config: &ModelConfig, depth: usize) -> Result<Value, ValueError> {
    if depth > MAX_MODEL_DEPTH {
        return Err(ValueError::ModelTooDeep {
            reference: config.model_ref().to_string(),
            limit: MAX_MODEL_DEPTH,
        });
    }
    let count = reader.read_u16()? as usize;
    if count != config.items.len() {
        return Err(ValueError::Malformed(format!(
            "model {} has {} items, frame carries {count}",
            config.model_ref(),
            config.items.len()
        )));
    }
    let mut fields = Vec::with_capacity(count);
    for item in &config.items {
        let value = match reader.read_u8()? {
            0 => None,
            1 => Some(read_value(reader, &item.data_type, depth)?),
            other => {
                return Err(ValueError::Malformed(format!(
                    "invalid presence flag 0x{other:02X} for item {:?}",
                    item.name
                )))
            }
        };
        fields.push(ModelField {
            name: item.name.clone(),
            value,
        });
    }
    Ok(Value::Model(ModelValue::new(fields)))
}

fn expected_tag(data_type: &DataType) -> u8 {
    match data_type {
        DataType::Base(base) => *base as u8,
        DataType::List(base) => LIST_FLAG | *base as u8,
        DataType::Model(_) => MODEL_TAG,
    }
}

fn describe_tag(tag: u8) -> String {
    if tag == MODEL_TAG {
        return "model".to_string();
    }
    match BaseType::try_from(tag & !LIST_FLAG) {
        Ok(base) if tag & LIST_FLAG != 0 => format!("{}[]", base.name()),
        Ok(base) => base.name().to_string(),
        Err(()) => format!("unknown tag 0x{tag:02X}"),
    }
}

// ── Utility helpers ───────────────────────────────────────────────────────────

/// Cursor over an encoded frame.
struct Reader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    fn require(&self, needed: usize) -> Result<(), ValueError> {
        if self.remaining() < needed {
            Err(ValueError::InsufficientData {
                needed: self.offset + needed,
                available: self.buf.len(),
            })
        } else {
            Ok(())
        }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], ValueError> {
        self.require(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.offset..self.offset + N]);
        self.offset += N;
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8, ValueError> {
        Ok(self.take::<1>()?[0])
    }

    fn read_u16(&mut self) -> Result<u16, ValueError> {
        Ok(u16::from_be_bytes(self.take()?))
    }

    fn read_u32(&mut self) -> Result<u32, ValueError> {
        Ok(u32::from_be_bytes(self.take()?))
    }

    fn read_i32(&mut self) -> Result<i32, ValueError> {
        Ok(i32::from_be_bytes(self.take()?))
    }

    fn read_i64(&mut self) -> Result<i64, ValueError> {
        Ok(i64::from_be_bytes(self.take()?))
    }

    fn read_f64(&mut self) -> Result<f64, ValueError> {
        Ok(f64::from_be_bytes(self.take()?))
    }

    fn read_bool(&mut self) -> Result<bool, ValueError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(ValueError::Malformed(format!("invalid bool byte 0x{other:02X}"))),
        }
    }

    /// Reads a 4-byte length prefix and then that many UTF-8 bytes.
    fn read_string(&mut self) -> Result<String, ValueError> {
        let len = self.read_u32()? as usize;
        self.require(len)?;
        let bytes = &self.buf[self.offset..self.offset + len];
        let s = std::str::from_utf8(bytes)
            .map_err(|e| ValueError::Malformed(format!("invalid UTF-8: {e}")))?
            .to_string();
        self.offset += len;
        Ok(s)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
