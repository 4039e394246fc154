//! Response tables: the codes a tag or method may reply with, their kind and
//! the schema of their body.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use super::codes::{self, REASON_FIELD};
use super::error::ProtocolError;
use super::fields::Schema;
use crate::value::{DataType, ModelResolver, ValueError};

/// Classification of a reply.  `Ok` and `Err` end a method call, `Info`
/// does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    Ok,
    Err,
    Info,
}

impl ResponseKind {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ResponseKind::Info)
    }

    /// Byte used in the reply frame.
    pub fn to_byte(self) -> u8 {
        match self {
            ResponseKind::Ok => 1,
            ResponseKind::Err => 2,
            ResponseKind::Info => 3,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(ResponseKind::Ok),
            2 => Some(ResponseKind::Err),
            3 => Some(ResponseKind::Info),
            _ => None,
        }
    }
}

/// One entry of a response table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSpec {
    pub code: i32,
    pub kind: ResponseKind,
    /// Body fields; a reply may carry any subset of them.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub body: Schema,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

impl ResponseSpec {
    pub fn new(code: i32, kind: ResponseKind) -> Self {
        Self {
            code,
            kind,
            body: Schema::new(),
            properties: BTreeMap::new(),
        }
    }

    pub fn ok(code: i32) -> Self {
        Self::new(code, ResponseKind::Ok)
    }

    pub fn err(code: i32) -> Self {
        Self::new(code, ResponseKind::Err)
    }

    pub fn info(code: i32) -> Self {
        Self::new(code, ResponseKind::Info)
    }

    /// Adds a body field; builder style.
    pub fn with_field(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.body.insert(name.into(), data_type);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Definition of a built-in code (`OK`, `ERR`, `CALLBACK_ERR`).
    pub fn builtin(code: i32) -> Option<Self> {
        match code {
            codes::OK => Some(Self::ok(codes::OK)),
            codes::ERR => Some(Self::err(codes::ERR).with_field(REASON_FIELD, DataType::STRING)),
            codes::CALLBACK_ERR => Some(Self::err(codes::CALLBACK_ERR).with_field(REASON_FIELD, DataType::STRING)),
            _ => None,
        }
    }

    fn resolve(&self, resolver: &ModelResolver) -> Result<Self, ValueError> {
        let body = self
            .body
            .iter()
            .map(|(name, ty)| Ok((name.clone(), resolver.resolve_type(ty)?)))
            .collect::<Result<Schema, ValueError>>()?;
        Ok(Self { body, ..self.clone() })
    }
}

/// The registered responses of one tag or method, in declaration order.
///
/// Serialises as a plain list of [`ResponseSpec`]s.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponseTable {
    specs: Vec<ResponseSpec>,
}

impl ResponseTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a response; builder style.  Consistency is checked by
    /// [`validate`](Self::validate).
    pub fn with(mut self, spec: ResponseSpec) -> Self {
        self.specs.push(spec);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResponseSpec> {
        self.specs.iter()
    }

    /// The registered response for `code`, ignoring built-ins.
    pub fn lookup(&self, code: i32) -> Option<&ResponseSpec> {
        self.specs.iter().find(|s| s.code == code)
    }

    /// The registered response for `code`, falling back to the built-in
    /// codes.
    pub fn lookup_with_builtins(&self, code: i32) -> Option<Cow<'_, ResponseSpec>> {
        self.lookup(code)
            .map(Cow::Borrowed)
            .or_else(|| ResponseSpec::builtin(code).map(Cow::Owned))
    }

    /// First registered response of `kind`.
    pub fn first_of_kind(&self, kind: ResponseKind) -> Option<&ResponseSpec> {
        self.specs.iter().find(|s| s.kind == kind)
    }

    /// Rejects reserved or duplicated codes, and `Info` responses unless
    /// `allow_info` (tag writes have a single reply, so no `Info`).
    pub fn validate(&self, allow_info: bool) -> Result<(), ProtocolError> {
        let mut seen = HashSet::new();
        for spec in &self.specs {
            if codes::is_reserved(spec.code) {
                return Err(ProtocolError::InvalidTable(format!(
                    "code {} is reserved (0..={})",
                    spec.code,
                    codes::RESERVED_MAX
                )));
            }
            if !seen.insert(spec.code) {
                return Err(ProtocolError::InvalidTable(format!("code {} registered twice", spec.code)));
            }
            if !allow_info && spec.kind == ResponseKind::Info {
                return Err(ProtocolError::InvalidTable(format!(
                    "code {} is an info response, which tag writes cannot send",
                    spec.code
                )));
            }
        }
        Ok(())
    }

    /// Resolves every model reference in the body schemas.
    pub fn resolve(&self, resolver: &ModelResolver) -> Result<Self, ValueError> {
        Ok(Self {
            specs: self
                .specs
                .iter()
                .map(|s| s.resolve(resolver))
                .collect::<Result<_, _>>()?,
        })
    }
}

impl FromIterator<ResponseSpec> for ResponseTable {
    fn from_iter<I: IntoIterator<Item = ResponseSpec>>(iter: I) -> Self {
        Self {
            specs: iter.into_iter().collect(),
        }
    }
}
