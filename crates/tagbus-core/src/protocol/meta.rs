//! Node metadata: the `META` document a node serves, describing its tags,
//! methods, tag groups and subnodes.
//!
//! The same structures describe a node in its TOML configuration file, so
//! a configuration and the metadata it produces have one schema.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::error::ProtocolError;
use super::fields::Schema;
use super::responses::ResponseTable;
use crate::value::{DataType, ModelResolver, ValueError};

/// A tag: a named typed data point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagMeta {
    pub path: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub writable: bool,
    /// Replies a write may produce; empty for read-only tags.
    #[serde(default, skip_serializing_if = "ResponseTable::is_empty")]
    pub responses: ResponseTable,
}

impl TagMeta {
    /// A read-only tag.
    pub fn new(path: impl Into<String>, data_type: DataType) -> Self {
        Self {
            path: path.into(),
            data_type,
            properties: BTreeMap::new(),
            writable: false,
            responses: ResponseTable::new(),
        }
    }

    /// Makes the tag writable with the given reply table.
    pub fn writable(mut self, responses: ResponseTable) -> Self {
        self.writable = true;
        self.responses = responses;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// A remotely callable method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodMeta {
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub parameters: Schema,
    #[serde(default)]
    pub responses: ResponseTable,
}

impl MethodMeta {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            description: String::new(),
            parameters: Schema::new(),
            responses: ResponseTable::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.parameters.insert(name.into(), data_type);
        self
    }

    pub fn with_responses(mut self, responses: ResponseTable) -> Self {
        self.responses = responses;
        self
    }
}

/// Several writable tags written together under one path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagGroupMeta {
    pub path: String,
    pub members: Vec<String>,
}

/// A nested addressing scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubnodeMeta {
    pub name: String,
    #[serde(flatten)]
    pub component: ComponentMeta,
}

/// Everything a node or subnode exposes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ComponentMeta {
    #[serde(default)]
    pub tags: Vec<TagMeta>,
    #[serde(default)]
    pub methods: Vec<MethodMeta>,
    #[serde(default)]
    pub groups: Vec<TagGroupMeta>,
    #[serde(default)]
    pub subnodes: Vec<SubnodeMeta>,
}

impl ComponentMeta {
    pub fn tag(&self, path: &str) -> Option<&TagMeta> {
        self.tags.iter().find(|t| t.path == path)
    }

    pub fn method(&self, path: &str) -> Option<&MethodMeta> {
        self.methods.iter().find(|m| m.path == path)
    }

    pub fn group(&self, path: &str) -> Option<&TagGroupMeta> {
        self.groups.iter().find(|g| g.path == path)
    }

    pub fn subnode(&self, name: &str) -> Option<&SubnodeMeta> {
        self.subnodes.iter().find(|s| s.name == name)
    }

    /// Follows a chain of subnode names from this component.
    pub fn descend<'a, I>(&self, names: I) -> Option<&ComponentMeta>
    where
        I: IntoIterator<Item = &'a str>,
    {
        names
            .into_iter()
            .try_fold(self, |component, name| component.subnode(name).map(|s| &s.component))
    }

    /// Copy of this component with every model reference embedded.
    pub fn resolve(&self, resolver: &ModelResolver) -> Result<Self, ValueError> {
        let tags = self
            .tags
            .iter()
            .map(|t| {
                Ok(TagMeta {
                    data_type: resolver.resolve_type(&t.data_type)?,
                    responses: t.responses.resolve(resolver)?,
                    ..t.clone()
                })
            })
            .collect::<Result<_, ValueError>>()?;
        let methods = self
            .methods
            .iter()
            .map(|m| {
                let parameters = m
                    .parameters
                    .iter()
                    .map(|(name, ty)| Ok((name.clone(), resolver.resolve_type(ty)?)))
                    .collect::<Result<Schema, ValueError>>()?;
                Ok(MethodMeta {
                    parameters,
                    responses: m.responses.resolve(resolver)?,
                    ..m.clone()
                })
            })
            .collect::<Result<_, ValueError>>()?;
        let subnodes = self
            .subnodes
            .iter()
            .map(|s| {
                Ok(SubnodeMeta {
                    name: s.name.clone(),
                    component: s.component.resolve(resolver)?,
                })
            })
            .collect::<Result<_, ValueError>>()?;
        Ok(Self {
            tags,
            methods,
            groups: self.groups.clone(),
            subnodes,
        })
    }
}

/// The `META` document of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMeta {
    pub prefix: String,
    pub name: String,
    #[serde(flatten)]
    pub component: ComponentMeta,
}

impl NodeMeta {
    pub fn to_json(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::Malformed(format!("META serialisation failed: {e}")))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::Malformed(format!("invalid META document: {e}")))
    }
}
