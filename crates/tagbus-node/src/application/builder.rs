//! Node construction and configuration-time validation.
//!
//! A node is described (in code or from a TOML file), handlers are attached,
//! and [`NodeBuilder::build`] checks the whole description before anything
//! touches the network.  Every mistake below is reported as a
//! [`ConfigError`]:
//!
//! - two tags, methods, groups or subnodes with the same path or name, or a
//!   group sharing its path with a tag;
//! - a writable tag without handler or without response table, or whose
//!   table uses a reserved code, repeats a code or contains an INFO code;
//! - a method without handler, or whose table is inconsistent;
//! - a handler attached to a path that is not a writable tag or method;
//! - a group member that is not a writable tag of the same component;
//! - a model reference that cannot be resolved;
//! - a prefix with a `NODE` or `*` segment, a node or subnode name that is
//!   not a single plain segment, or a tag, group or method path with a `*`
//!   segment.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tagbus_core::keyspace::{check_name, check_path};
use tagbus_core::{ComponentMeta, KeyError, MethodMeta, ModelResolver, NodeAddress, SubnodeMeta, TagGroupMeta, TagMeta};

use super::method_call::MethodHandler;
use super::node::{Component, Node};
use super::tag_write::TagWriteHandler;
use crate::domain::config::{ConfigError, NodeFileConfig};

/// Description of one node or subnode under construction.
#[derive(Default)]
pub struct ComponentBuilder {
    tags: Vec<TagMeta>,
    methods: Vec<MethodMeta>,
    groups: Vec<TagGroupMeta>,
    subnodes: Vec<(String, ComponentBuilder)>,
    write_handlers: Vec<(String, Arc<dyn TagWriteHandler>)>,
    method_handlers: Vec<(String, Arc<dyn MethodHandler>)>,
}

impl ComponentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from existing metadata (e.g. a configuration file); handlers
    /// still have to be attached.
    pub fn from_meta(meta: &ComponentMeta) -> Self {
        Self {
            tags: meta.tags.clone(),
            methods: meta.methods.clone(),
            groups: meta.groups.clone(),
            subnodes: meta
                .subnodes
                .iter()
                .map(|s| (s.name.clone(), Self::from_meta(&s.component)))
                .collect(),
            write_handlers: Vec::new(),
            method_handlers: Vec::new(),
        }
    }

    /// Adds a tag.  A writable tag also needs [`on_write`](Self::on_write).
    pub fn tag(mut self, meta: TagMeta) -> Self {
        self.tags.push(meta);
        self
    }

    /// Adds a writable tag together with its handler.
    pub fn writable_tag(self, meta: TagMeta, handler: Arc<dyn TagWriteHandler>) -> Self {
        let path = meta.path.clone();
        self.tag(meta).on_write(path, handler)
    }

    /// Adds a method together with its handler.
    pub fn method(mut self, meta: MethodMeta, handler: Arc<dyn MethodHandler>) -> Self {
        let path = meta.path.clone();
        self.methods.push(meta);
        self.on_call(path, handler)
    }

    pub fn group(mut self, meta: TagGroupMeta) -> Self {
        self.groups.push(meta);
        self
    }

    pub fn subnode(mut self, name: impl Into<String>, component: ComponentBuilder) -> Self {
        self.subnodes.push((name.into(), component));
        self
    }

    /// Attaches the write handler of the writable tag `path`.
    pub fn on_write(mut self, path: impl Into<String>, handler: Arc<dyn TagWriteHandler>) -> Self {
        self.set_write_handler(path, handler);
        self
    }

    /// Attaches the handler of the method `path`.
    pub fn on_call(mut self, path: impl Into<String>, handler: Arc<dyn MethodHandler>) -> Self {
        self.set_method_handler(path, handler);
        self
    }

    /// Attaches the write handler of `path`, replacing any earlier one.
    pub fn set_write_handler(&mut self, path: impl Into<String>, handler: Arc<dyn TagWriteHandler>) {
        replace_handler(&mut self.write_handlers, path.into(), handler);
    }

    /// Attaches the method handler of `path`, replacing any earlier one.
    pub fn set_method_handler(&mut self, path: impl Into<String>, handler: Arc<dyn MethodHandler>) {
        replace_handler(&mut self.method_handlers, path.into(), handler);
    }

    pub fn tags(&self) -> &[TagMeta] {
        &self.tags
    }

    pub fn methods(&self) -> &[MethodMeta] {
        &self.methods
    }

    /// The subnode `name`, to attach its handlers.
    pub fn subnode_mut(&mut self, name: &str) -> Option<&mut ComponentBuilder> {
        self.subnodes.iter_mut().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    /// Names of the subnodes, in declaration order.
    pub fn subnode_names(&self) -> impl Iterator<Item = &str> {
        self.subnodes.iter().map(|(n, _)| n.as_str())
    }

    /// The description as metadata, without handlers.
    pub fn meta(&self) -> ComponentMeta {
        ComponentMeta {
            tags: self.tags.clone(),
            methods: self.methods.clone(),
            groups: self.groups.clone(),
            subnodes: self
                .subnodes
                .iter()
                .map(|(name, c)| SubnodeMeta {
                    name: name.clone(),
                    component: c.meta(),
                })
                .collect(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for tag in &self.tags {
            check_path(&tag.path).map_err(|e| invalid_key("tag path", &tag.path, e))?;
        }
        for method in &self.methods {
            check_path(&method.path).map_err(|e| invalid_key("method path", &method.path, e))?;
        }
        for group in &self.groups {
            check_path(&group.path).map_err(|e| invalid_key("group path", &group.path, e))?;
        }
        for (name, _) in &self.subnodes {
            check_name(name).map_err(|e| invalid_key("subnode name", name, e))?;
        }

        unique("tag", self.tags.iter().map(|t| t.path.as_str()))?;
        unique("method", self.methods.iter().map(|m| m.path.as_str()))?;
        unique(
            "group",
            self.groups.iter().map(|g| g.path.as_str()).chain(self.tags.iter().map(|t| t.path.as_str())),
        )?;
        unique("subnode", self.subnodes.iter().map(|(n, _)| n.as_str()))?;

        let write_handlers: HashSet<&str> = self.write_handlers.iter().map(|(p, _)| p.as_str()).collect();
        for tag in &self.tags {
            let has_handler = write_handlers.contains(tag.path.as_str());
            if !tag.writable {
                if has_handler {
                    return Err(ConfigError::UnknownHandlerTarget {
                        kind: "writable tag",
                        path: tag.path.clone(),
                    });
                }
                continue;
            }
            if tag.responses.is_empty() {
                return Err(ConfigError::MissingResponses {
                    kind: "tag",
                    path: tag.path.clone(),
                });
            }
            tag.responses
                .validate(false)
                .map_err(|source| ConfigError::InvalidResponses {
                    path: tag.path.clone(),
                    source,
                })?;
            if !has_handler {
                return Err(ConfigError::MissingHandler {
                    kind: "tag",
                    path: tag.path.clone(),
                });
            }
        }
        if let Some((path, _)) = self
            .write_handlers
            .iter()
            .find(|(p, _)| !self.tags.iter().any(|t| &t.path == p))
        {
            return Err(ConfigError::UnknownHandlerTarget {
                kind: "writable tag",
                path: path.clone(),
            });
        }

        let method_handlers: HashSet<&str> = self.method_handlers.iter().map(|(p, _)| p.as_str()).collect();
        for method in &self.methods {
            method
                .responses
                .validate(true)
                .map_err(|source| ConfigError::InvalidResponses {
                    path: method.path.clone(),
                    source,
                })?;
            if !method_handlers.contains(method.path.as_str()) {
                return Err(ConfigError::MissingHandler {
                    kind: "method",
                    path: method.path.clone(),
                });
            }
        }
        if let Some((path, _)) = self
            .method_handlers
            .iter()
            .find(|(p, _)| !self.methods.iter().any(|m| &m.path == p))
        {
            return Err(ConfigError::UnknownHandlerTarget {
                kind: "method",
                path: path.clone(),
            });
        }

        for group in &self.groups {
            for member in &group.members {
                let writable = self.tags.iter().any(|t| &t.path == member && t.writable);
                if !writable {
                    return Err(ConfigError::InvalidGroupMember {
                        group: group.path.clone(),
                        member: member.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Validates this component and its subnodes and resolves their types.
    pub(crate) fn build(self, address: NodeAddress, resolver: &ModelResolver) -> Result<Component, ConfigError> {
        self.validate()?;
        let meta = self.meta();
        let own = ComponentMeta {
            tags: self.tags,
            methods: self.methods,
            groups: self.groups,
            subnodes: Vec::new(),
        };
        let resolved = own.resolve(resolver)?;

        let children: Vec<(String, Arc<Component>)> = self
            .subnodes
            .into_iter()
            .map(|(name, builder)| {
                let child = builder.build(address.subnode(name.clone()), resolver)?;
                Ok((name, Arc::new(child)))
            })
            .collect::<Result<_, ConfigError>>()?;

        Ok(Component {
            address,
            meta,
            resolved,
            write_handlers: self.write_handlers.into_iter().collect::<HashMap<_, _>>(),
            method_handlers: self.method_handlers.into_iter().collect::<HashMap<_, _>>(),
            children,
        })
    }
}

impl std::fmt::Debug for ComponentBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentBuilder")
            .field("tags", &self.tags.len())
            .field("methods", &self.methods.len())
            .field("groups", &self.groups.len())
            .field("subnodes", &self.subnodes.len())
            .finish()
    }
}

fn unique<'a>(kind: &'static str, paths: impl Iterator<Item = &'a str>) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for path in paths {
        if !seen.insert(path) {
            return Err(ConfigError::DuplicatePath {
                kind,
                path: path.to_string(),
            });
        }
    }
    Ok(())
}

fn invalid_key(kind: &'static str, value: &str, source: KeyError) -> ConfigError {
    ConfigError::InvalidKey {
        kind,
        value: value.to_string(),
        source,
    }
}

fn replace_handler<H: ?Sized>(handlers: &mut Vec<(String, Arc<H>)>, path: String, handler: Arc<H>) {
    match handlers.iter_mut().find(|(p, _)| *p == path) {
        Some(slot) => slot.1 = handler,
        None => handlers.push((path, handler)),
    }
}

// ── NodeBuilder ───────────────────────────────────────────────────────────────

/// Builds a [`Node`]: its identity plus the root component.
///
/// ```rust,no_run
/// use tagbus_core::{DataType, ModelResolver, ResponseSpec, ResponseTable, TagMeta};
/// use tagbus_node::{tag_write_fn, NodeBuilder};
///
/// let node = NodeBuilder::new("plant", "press1")
///     .tag(TagMeta::new("temperature", DataType::FLOAT))
///     .writable_tag(
///         TagMeta::new("setpoint", DataType::INT).writable(
///             ResponseTable::new().with(ResponseSpec::ok(200)).with(ResponseSpec::err(400)),
///         ),
///         tag_write_fn(|_, responder| async move {
///             responder.reply_code(200)?;
///             Ok::<_, anyhow::Error>(())
///         }),
///     )
///     .build(&ModelResolver::new())
///     .unwrap();
/// ```
#[derive(Debug)]
pub struct NodeBuilder {
    address: NodeAddress,
    root: ComponentBuilder,
}

impl NodeBuilder {
    pub fn new(prefix: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: NodeAddress::new(prefix, name),
            root: ComponentBuilder::new(),
        }
    }

    /// Starts from a node description file; handlers still have to be
    /// attached.
    pub fn from_config(config: &NodeFileConfig) -> Self {
        Self {
            address: NodeAddress::new(config.session.prefix.clone(), config.session.name.clone()),
            root: ComponentBuilder::from_meta(&config.component()),
        }
    }

    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    pub fn root(&self) -> &ComponentBuilder {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut ComponentBuilder {
        &mut self.root
    }

    pub fn tag(mut self, meta: TagMeta) -> Self {
        self.root = self.root.tag(meta);
        self
    }

    pub fn writable_tag(mut self, meta: TagMeta, handler: Arc<dyn TagWriteHandler>) -> Self {
        self.root = self.root.writable_tag(meta, handler);
        self
    }

    pub fn method(mut self, meta: MethodMeta, handler: Arc<dyn MethodHandler>) -> Self {
        self.root = self.root.method(meta, handler);
        self
    }

    pub fn group(mut self, meta: TagGroupMeta) -> Self {
        self.root = self.root.group(meta);
        self
    }

    pub fn subnode(mut self, name: impl Into<String>, component: ComponentBuilder) -> Self {
        self.root = self.root.subnode(name, component);
        self
    }

    pub fn on_write(mut self, path: impl Into<String>, handler: Arc<dyn TagWriteHandler>) -> Self {
        self.root = self.root.on_write(path, handler);
        self
    }

    pub fn on_call(mut self, path: impl Into<String>, handler: Arc<dyn MethodHandler>) -> Self {
        self.root = self.root.on_call(path, handler);
        self
    }

    /// Validates the whole description and resolves every model reference.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found, depth first.
    pub fn build(self, resolver: &ModelResolver) -> Result<Node, ConfigError> {
        self.address
            .validate()
            .map_err(|e| invalid_key("node address", &self.address.to_string(), e))?;
        let root = self.root.build(self.address, resolver)?;
        Ok(Node::new(root))
    }
}
