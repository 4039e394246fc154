//! Node runtime: serves a built node on a transport.
//!
//! # What a running node declares (for beginners)
//!
//! For the root node and every subnode ("component"):
//!
//! | Declaration                     | Topic                                  |
//! |---------------------------------|----------------------------------------|
//! | `META` queryable (JSON)         | `<base>/META`                          |
//! | write queryable per writable tag| `<base>/TAGS/WRITE/<tag>`              |
//! | write queryable per tag group   | `<base>/TAGS/WRITE/<group>`            |
//! | subscriber per method           | `<base>/METHODS/<method>/*/*`          |
//!
//! and once for the root node: a `STATE` queryable answering `ONLINE` or
//! `OFFLINE`, and the liveliness token.  `ONLINE` is published on `STATE`
//! when the node starts and `OFFLINE` when it stops.
//!
//! Every inbound write or call runs on its own tokio task, so handlers for
//! different tags, methods and invocations run in parallel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::join_all;
use tagbus_core::keyspace::{parse_topic, TopicKind};
use tagbus_core::protocol::{decode_parameters, ReplyFrame, ResponseTable, Schema};
use tagbus_core::{
    decode, encode, ComponentMeta, DataType, NodeAddress, NodeMeta, ProtocolError, Value, ValueError,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::bind::{BindError, BindTarget, TagBind};
use super::method_call::{serve_call, MethodCall, MethodContext, MethodHandler};
use super::tag_write::{group_type, reject_write, serve_write, TagResponder, TagWriteHandler, TagWriteRequest};
use crate::infrastructure::transport::{
    DeclarationId, Query, QueryCallback, Sample, SampleCallback, SampleKind, Transport, TransportError,
};

/// Errors raised by a running node.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The component has no tag with this path.
    #[error("unknown tag {0:?}")]
    UnknownTag(String),

    /// No subnode with this name.
    #[error("unknown subnode {0:?}")]
    UnknownSubnode(String),

    /// The value does not have the tag's type.
    #[error("invalid tag value: {0}")]
    Value(#[from] ValueError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Value served on a node's `STATE` topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Online,
    Offline,
}

impl NodeState {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeState::Online => "ONLINE",
            NodeState::Offline => "OFFLINE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ONLINE" => Some(NodeState::Online),
            "OFFLINE" => Some(NodeState::Offline),
            _ => None,
        }
    }

    /// The state as an encoded string value.
    pub fn encode(self) -> Vec<u8> {
        encode(&Value::String(self.as_str().to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        match decode(bytes, &DataType::STRING).ok()? {
            Value::String(s) => Self::parse(&s),
            _ => None,
        }
    }
}

// ── Component ─────────────────────────────────────────────────────────────────

/// A validated node or subnode: its metadata and handlers.
pub(crate) struct Component {
    pub(crate) address: NodeAddress,
    /// As described, served on `META`; includes the subnodes.
    pub(crate) meta: ComponentMeta,
    /// This level only, with every model reference embedded.
    pub(crate) resolved: ComponentMeta,
    pub(crate) write_handlers: HashMap<String, Arc<dyn TagWriteHandler>>,
    pub(crate) method_handlers: HashMap<String, Arc<dyn MethodHandler>>,
    pub(crate) children: Vec<(String, Arc<Component>)>,
}

impl Component {
    fn child(&self, name: &str) -> Option<&Arc<Component>> {
        self.children.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }
}

/// `root` followed by all of its descendants, breadth first.
fn flatten(root: &Arc<Component>) -> Vec<Arc<Component>> {
    let mut out = vec![Arc::clone(root)];
    let mut i = 0;
    while i < out.len() {
        let children: Vec<_> = out[i].children.iter().map(|(_, c)| Arc::clone(c)).collect();
        out.extend(children);
        i += 1;
    }
    out
}

// ── TagPublisher ──────────────────────────────────────────────────────────────

/// Publishes tag values of one component.
#[derive(Clone)]
pub struct TagPublisher {
    transport: Arc<dyn Transport>,
    component: Arc<Component>,
}

impl TagPublisher {
    pub fn address(&self) -> &NodeAddress {
        &self.component.address
    }

    /// Broadcasts `value` on the tag's data topic.
    ///
    /// # Errors
    ///
    /// [`SessionError::UnknownTag`] if the component has no such tag and
    /// [`SessionError::Value`] if `value` does not have the tag's type.
    pub async fn publish(&self, path: &str, value: &Value) -> Result<(), SessionError> {
        let tag = self
            .component
            .resolved
            .tag(path)
            .ok_or_else(|| SessionError::UnknownTag(path.to_string()))?;
        value.check(&tag.data_type)?;
        self.transport
            .publish(&self.component.address.tag_data(path), encode(value))
            .await?;
        Ok(())
    }

    /// Mirrors a tag of this component.  Setting the bind publishes the new
    /// value directly, without the write protocol.
    pub async fn bind(&self, path: &str) -> Result<TagBind, BindError> {
        let tag = self
            .component
            .resolved
            .tag(path)
            .ok_or_else(|| SessionError::UnknownTag(path.to_string()))?;
        let bind = TagBind::open(
            Arc::clone(&self.transport),
            self.component.address.tag_data(path),
            path.to_string(),
            tag.data_type.clone(),
            BindTarget::Local(self.clone()),
        )
        .await?;
        Ok(bind)
    }
}

impl std::fmt::Debug for TagPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagPublisher")
            .field("address", &self.component.address)
            .finish()
    }
}

// ── Inbound dispatch ──────────────────────────────────────────────────────────

/// Everything needed to serve writes to one tag.
struct WriteTarget {
    path: String,
    topic: String,
    data_type: DataType,
    responses: Arc<ResponseTable>,
    handler: Arc<dyn TagWriteHandler>,
    publisher: TagPublisher,
}

impl WriteTarget {
    fn request(&self, value: Value) -> TagWriteRequest {
        TagWriteRequest {
            address: self.publisher.address().clone(),
            path: self.path.clone(),
            value,
            publisher: self.publisher.clone(),
        }
    }

    async fn dispatch(&self, query: Query) {
        let responder = TagResponder::new(query.clone(), self.topic.clone(), Arc::clone(&self.responses));
        match decode(query.payload(), &self.data_type) {
            Ok(value) => serve_write(Arc::clone(&self.handler), self.request(value), responder).await,
            Err(e) => reject_write(&responder, format!("cannot decode value of {}: {e}", self.path)),
        }
    }
}

/// A tag group: the members of one partial-model write.
struct GroupTarget {
    topic: String,
    data_type: DataType,
    members: Vec<Arc<WriteTarget>>,
}

impl GroupTarget {
    async fn dispatch(&self, query: Query) {
        let value = match decode(query.payload(), &self.data_type) {
            Ok(value) => value,
            Err(e) => {
                let responder = TagResponder::new(query, self.topic.clone(), Arc::new(ResponseTable::new()));
                reject_write(&responder, format!("cannot decode group write: {e}"));
                return;
            }
        };
        let Some(model) = value.as_model() else {
            return;
        };

        let writes = self.members.iter().filter_map(|member| {
            let value = model.get(&member.path)?.clone();
            let responder = TagResponder::new(query.clone(), member.topic.clone(), Arc::clone(&member.responses));
            Some(serve_write(Arc::clone(&member.handler), member.request(value), responder))
        });
        let served = join_all(writes).await.len();
        debug!(topic = %self.topic, members = served, "group write dispatched");
    }
}

/// Everything needed to serve calls of one method.
struct CallTarget {
    transport: Arc<dyn Transport>,
    address: NodeAddress,
    path: String,
    parameters: Schema,
    responses: Arc<ResponseTable>,
    handler: Arc<dyn MethodHandler>,
}

impl CallTarget {
    async fn dispatch(&self, sample: Sample) {
        if sample.kind != SampleKind::Put {
            return;
        }
        let parsed = match parse_topic(&sample.topic) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(topic = %sample.topic, error = %e, "ignoring call on unparsable topic");
                return;
            }
        };
        let TopicKind::MethodCall { path, caller_id, call_id } = parsed.kind else {
            return;
        };
        if path != self.path || parsed.address != self.address {
            return;
        }

        let ctx = MethodContext::new(
            Arc::clone(&self.transport),
            self.address.method_response(&path, &caller_id, &call_id),
            Arc::clone(&self.responses),
        );
        match decode_parameters(&sample.payload, &self.parameters) {
            Ok(parameters) => {
                let call = MethodCall {
                    address: self.address.clone(),
                    path,
                    parameters,
                    caller_id,
                    call_id,
                };
                serve_call(Arc::clone(&self.handler), call, ctx).await;
            }
            Err(e) => {
                debug!(topic = %sample.topic, error = %e, "rejecting call with invalid parameters");
                ctx.finish(ReplyFrame::err(format!("invalid parameters: {e}"))).await;
            }
        }
    }
}

// ── Node ──────────────────────────────────────────────────────────────────────

/// A validated node, ready to start.  Built by
/// [`NodeBuilder`](super::builder::NodeBuilder).
pub struct Node {
    root: Arc<Component>,
}

impl Node {
    pub(crate) fn new(root: Component) -> Self {
        Self { root: Arc::new(root) }
    }

    pub fn address(&self) -> &NodeAddress {
        &self.root.address
    }

    /// The `META` document this node serves.
    pub fn meta(&self) -> NodeMeta {
        node_meta(&self.root.address, &self.root.meta)
    }

    /// Declares everything on `transport` and announces the node.
    ///
    /// # Errors
    ///
    /// Returns the first transport failure; declarations made before it are
    /// withdrawn.
    pub async fn start(self, transport: Arc<dyn Transport>) -> Result<NodeSession, SessionError> {
        let address = self.root.address.clone();
        let online = Arc::new(AtomicBool::new(false));
        let mut declarations = Vec::new();

        if let Err(e) = declare_node(&transport, &self.root, &online, &mut declarations).await {
            warn!(node = %address, error = %e, "node start failed");
            for id in declarations {
                let _ = transport.undeclare(id).await;
            }
            return Err(e);
        }

        online.store(true, Ordering::Release);
        transport.publish(&address.state(), NodeState::Online.encode()).await?;
        info!(node = %address, declarations = declarations.len(), "node online");

        Ok(NodeSession {
            transport,
            root: self.root,
            declarations: Mutex::new(declarations),
            online,
        })
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node").field("address", &self.root.address).finish()
    }
}

fn node_meta(address: &NodeAddress, component: &ComponentMeta) -> NodeMeta {
    NodeMeta {
        prefix: address.prefix().to_string(),
        name: address.name().to_string(),
        component: component.clone(),
    }
}

async fn declare_node(
    transport: &Arc<dyn Transport>,
    root: &Arc<Component>,
    online: &Arc<AtomicBool>,
    declarations: &mut Vec<DeclarationId>,
) -> Result<(), SessionError> {
    for component in flatten(root) {
        declare_component(transport, &component, declarations).await?;
    }

    let state_topic = root.address.state();
    let reply_topic = state_topic.clone();
    let online = Arc::clone(online);
    let on_state: QueryCallback = Arc::new(move |query: Query| {
        let state = if online.load(Ordering::Acquire) {
            NodeState::Online
        } else {
            NodeState::Offline
        };
        let _ = query.reply(reply_topic.clone(), state.encode());
    });
    declarations.push(transport.declare_queryable(&state_topic, on_state).await?);

    declarations.push(transport.declare_token(&root.address.liveliness_token()).await?);
    Ok(())
}

async fn declare_component(
    transport: &Arc<dyn Transport>,
    component: &Arc<Component>,
    declarations: &mut Vec<DeclarationId>,
) -> Result<(), SessionError> {
    let address = &component.address;
    let publisher = TagPublisher {
        transport: Arc::clone(transport),
        component: Arc::clone(component),
    };

    // META
    let document = node_meta(address, &component.meta).to_json()?;
    let meta_topic = address.meta();
    let reply_topic = meta_topic.clone();
    let on_meta: QueryCallback = Arc::new(move |query: Query| {
        let _ = query.reply(reply_topic.clone(), document.clone());
    });
    declarations.push(transport.declare_queryable(&meta_topic, on_meta).await?);

    // Writable tags
    let mut targets: HashMap<String, Arc<WriteTarget>> = HashMap::new();
    for tag in component.resolved.tags.iter().filter(|t| t.writable) {
        let Some(handler) = component.write_handlers.get(&tag.path) else {
            warn!(node = %address, tag = %tag.path, "writable tag without handler skipped");
            continue;
        };
        let target = Arc::new(WriteTarget {
            path: tag.path.clone(),
            topic: address.tag_write(&tag.path),
            data_type: tag.data_type.clone(),
            responses: Arc::new(tag.responses.clone()),
            handler: Arc::clone(handler),
            publisher: publisher.clone(),
        });
        let dispatcher = Arc::clone(&target);
        let on_write: QueryCallback = Arc::new(move |query: Query| {
            let target = Arc::clone(&dispatcher);
            tokio::spawn(async move { target.dispatch(query).await });
        });
        declarations.push(transport.declare_queryable(&target.topic, on_write).await?);
        targets.insert(tag.path.clone(), target);
    }

    // Tag groups
    for group in &component.resolved.groups {
        let Some(data_type) = group_type(group, &component.resolved) else {
            warn!(node = %address, group = %group.path, "group with unknown members skipped");
            continue;
        };
        let members = group
            .members
            .iter()
            .filter_map(|m| targets.get(m).cloned())
            .collect();
        let target = Arc::new(GroupTarget {
            topic: address.tag_write(&group.path),
            data_type,
            members,
        });
        let topic = target.topic.clone();
        let on_group: QueryCallback = Arc::new(move |query: Query| {
            let target = Arc::clone(&target);
            tokio::spawn(async move { target.dispatch(query).await });
        });
        declarations.push(transport.declare_queryable(&topic, on_group).await?);
    }

    // Methods
    for method in &component.resolved.methods {
        let Some(handler) = component.method_handlers.get(&method.path) else {
            warn!(node = %address, method = %method.path, "method without handler skipped");
            continue;
        };
        let target = Arc::new(CallTarget {
            transport: Arc::clone(transport),
            address: address.clone(),
            path: method.path.clone(),
            parameters: method.parameters.clone(),
            responses: Arc::new(method.responses.clone()),
            handler: Arc::clone(handler),
        });
        let on_call: SampleCallback = Arc::new(move |sample: Sample| {
            let target = Arc::clone(&target);
            tokio::spawn(async move { target.dispatch(sample).await });
        });
        declarations.push(
            transport
                .subscribe(&address.method_call_pattern(&method.path), on_call)
                .await?,
        );
    }

    debug!(node = %address, "component declared");
    Ok(())
}

// ── NodeSession ───────────────────────────────────────────────────────────────

/// A running node.  Dropping the session does not withdraw it; call
/// [`stop`](Self::stop).
pub struct NodeSession {
    transport: Arc<dyn Transport>,
    root: Arc<Component>,
    declarations: Mutex<Vec<DeclarationId>>,
    online: Arc<AtomicBool>,
}

impl NodeSession {
    pub fn address(&self) -> &NodeAddress {
        &self.root.address
    }

    pub fn meta(&self) -> NodeMeta {
        node_meta(&self.root.address, &self.root.meta)
    }

    pub fn state(&self) -> NodeState {
        if self.online.load(Ordering::Acquire) {
            NodeState::Online
        } else {
            NodeState::Offline
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Publisher of the component reached through `subnodes` (empty for the
    /// root node).
    pub fn publisher(&self, subnodes: &[&str]) -> Result<TagPublisher, SessionError> {
        let component = subnodes.iter().try_fold(&self.root, |component, name| {
            component
                .child(name)
                .ok_or_else(|| SessionError::UnknownSubnode(name.to_string()))
        })?;
        Ok(TagPublisher {
            transport: Arc::clone(&self.transport),
            component: Arc::clone(component),
        })
    }

    /// Broadcasts a value of a root-node tag.
    pub async fn publish_tag(&self, path: &str, value: &Value) -> Result<(), SessionError> {
        self.publisher(&[])?.publish(path, value).await
    }

    /// Broadcasts a value of a subnode tag.
    pub async fn publish_subnode_tag(&self, subnodes: &[&str], path: &str, value: &Value) -> Result<(), SessionError> {
        self.publisher(subnodes)?.publish(path, value).await
    }

    /// Locally bound mirror of a root-node tag.
    pub async fn bind_tag(&self, path: &str) -> Result<TagBind, BindError> {
        self.publisher(&[])?.bind(path).await
    }

    /// Publishes `OFFLINE` and withdraws every declaration.  Calling it again
    /// does nothing.
    pub async fn stop(&self) -> Result<(), SessionError> {
        if !self.online.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let address = &self.root.address;
        let published = self
            .transport
            .publish(&address.state(), NodeState::Offline.encode())
            .await;

        let declarations = std::mem::take(&mut *self.declarations.lock().unwrap_or_else(PoisonError::into_inner));
        let mut first_error = published.err();
        for id in declarations {
            if let Err(e) = self.transport.undeclare(id).await {
                warn!(node = %address, %id, error = %e, "undeclare failed");
                first_error.get_or_insert(e);
            }
        }
        info!(node = %address, "node offline");
        first_error.map_or(Ok(()), |e| Err(e.into()))
    }
}

impl std::fmt::Debug for NodeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSession")
            .field("address", &self.root.address)
            .field("state", &self.state())
            .finish()
    }
}
