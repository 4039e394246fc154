//! Caller side of the protocols: discovering nodes, writing their tags and
//! calling their methods.
//!
//! # Flow (for beginners)
//!
//! ```text
//! Remote::list_nodes ──► liveliness query  <prefix>/NODE/*
//! Remote::node       ──► META query        → NodeHandle (resolved metadata)
//! NodeHandle::write_tag   ──► query on TAGS/WRITE/<path>   → one ReplyFrame
//! NodeHandle::call_method ──► publish on METHODS/<path>/<caller>/<call>
//!                             replies on …/RESPONSE        → MethodCallStream
//! ```
//!
//! Every call gets a fresh call id from a per-`Remote` counter; together
//! with the `Remote`'s UUID caller id it names a response topic no other
//! call shares, so concurrent calls never see each other's replies.
//!
//! A [`MethodCallStream`] buffers replies from the moment the call is made.
//! The caller may stop reading at any point and resume later without losing
//! anything.  The configured call timeout applies to each wait for the next
//! reply, not to the call as a whole.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, Stream};
use serde_json::{Map, Value as Native};
use tagbus_core::keyspace::{name_from_topic, node_topic, parse_topic, TopicKind, WILDCARD};
use tagbus_core::protocol::{encode_parameters, fields_from_native, ReplyFrame, ResponseTable, Schema};
use tagbus_core::{
    encode, from_native, CallIdCounter, ComponentMeta, Fields, KeyError, MethodMeta, ModelResolver, ModelValue,
    NodeAddress, NodeMeta, PartialPolicy, ProtocolError, TagGroupMeta, TagMeta, Value, ValueError,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use super::bind::{BindError, BindTarget, TagBind};
use super::node::NodeState;
use super::tag_write::group_model;
use crate::domain::config::NodeFileConfig;
use crate::infrastructure::transport::{DeclarationId, Sample, SampleCallback, SampleKind, Transport, TransportError};

/// Errors returned by the remote client.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// No reply of any kind arrived within the call timeout.
    #[error("method call on {topic} timed out after {timeout:?}")]
    CallTimeout { topic: String, timeout: Duration },

    /// The tag write was not answered within the write timeout.
    #[error("tag write on {topic} timed out after {timeout:?}")]
    WriteTimeout { topic: String, timeout: Duration },

    #[error("unknown tag: {0}")]
    UnknownTag(String),

    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("unknown tag group: {0}")]
    UnknownGroup(String),

    #[error("unknown subnode: {0}")]
    UnknownSubnode(String),

    #[error("tag {0} is not writable")]
    NotWritable(String),

    /// Nobody answered the `META` query.
    #[error("node {0} not found")]
    NodeNotFound(String),

    /// The query ended without any reply.
    #[error("no reply on {0}")]
    NoReply(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Value(#[from] ValueError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Key(#[from] KeyError),
}

// ── Configuration ─────────────────────────────────────────────────────────────

/// Timeouts and conversion policy of a [`Remote`].
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteConfig {
    /// Longest wait for the next reply of a method call.
    pub call_timeout: Duration,
    /// Longest wait for a tag write reply (also used for `META`/`STATE`).
    pub write_timeout: Duration,
    /// How native mappings with missing model items are converted.
    pub policy: PartialPolicy,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            policy: PartialPolicy::default(),
        }
    }
}

impl From<&NodeFileConfig> for RemoteConfig {
    fn from(config: &NodeFileConfig) -> Self {
        Self {
            call_timeout: config.remote.call_timeout(),
            write_timeout: config.remote.write_timeout(),
            policy: config.models.policy,
        }
    }
}

// ── Remote ────────────────────────────────────────────────────────────────────

struct RemoteInner {
    transport: Arc<dyn Transport>,
    resolver: Arc<ModelResolver>,
    config: RemoteConfig,
    caller_id: String,
    calls: CallIdCounter,
}

/// Entry point of the caller side.  Cheap to clone; clones share the caller
/// id and the call-id counter.
#[derive(Clone)]
pub struct Remote {
    inner: Arc<RemoteInner>,
}

impl Remote {
    pub fn new(transport: Arc<dyn Transport>, resolver: Arc<ModelResolver>, config: RemoteConfig) -> Self {
        Self {
            inner: Arc::new(RemoteInner {
                transport,
                resolver,
                config,
                caller_id: Uuid::new_v4().simple().to_string(),
                calls: CallIdCounter::new(),
            }),
        }
    }

    pub fn caller_id(&self) -> &str {
        &self.inner.caller_id
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.inner.config
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// Names of the nodes currently alive under `prefix`, sorted.
    pub async fn list_nodes(&self, prefix: &str) -> Result<Vec<String>, RemoteError> {
        let tokens = self.inner.transport.query_liveliness(&node_topic(prefix, WILDCARD)).await?;
        let mut names = tokens
            .iter()
            .map(|t| name_from_topic(t))
            .collect::<Result<Vec<_>, _>>()?;
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Calls `on_event` whenever a node under `prefix` comes online or goes
    /// away.  Runs until [`NodeWatch::stop`].
    pub async fn watch_nodes<F>(&self, prefix: &str, on_event: F) -> Result<NodeWatch, RemoteError>
    where
        F: Fn(NodeEvent) + Send + Sync + 'static,
    {
        let callback: SampleCallback = Arc::new(move |sample: Sample| match parse_topic(&sample.topic) {
            Ok(parsed) => on_event(match sample.kind {
                SampleKind::Put => NodeEvent::Online(parsed.address),
                SampleKind::Delete => NodeEvent::Offline(parsed.address),
            }),
            Err(e) => debug!(topic = %sample.topic, error = %e, "ignoring liveliness sample"),
        });
        let id = self
            .inner
            .transport
            .subscribe_liveliness(&node_topic(prefix, WILDCARD), callback)
            .await?;
        Ok(NodeWatch {
            transport: Arc::clone(&self.inner.transport),
            subscription: Some(id),
        })
    }

    /// Fetches and resolves the metadata of node `name`.
    ///
    /// # Errors
    ///
    /// [`RemoteError::NodeNotFound`] when no `META` reply arrives within the
    /// write timeout.
    pub async fn node(&self, prefix: &str, name: &str) -> Result<NodeHandle, RemoteError> {
        let address = NodeAddress::new(prefix, name);
        let mut replies = self.inner.transport.query(&address.meta(), Vec::new()).await?;
        let reply = match replies.recv_timeout(self.inner.config.write_timeout).await {
            Ok(Some(reply)) => reply,
            Ok(None) | Err(_) => return Err(RemoteError::NodeNotFound(address.to_string())),
        };
        let meta = NodeMeta::from_json(&reply.payload)?;
        let component = meta.component.resolve(&self.inner.resolver)?;
        debug!(node = %address, tags = component.tags.len(), methods = component.methods.len(), "node metadata fetched");
        Ok(NodeHandle {
            remote: self.clone(),
            address,
            meta: Arc::new(meta),
            component: Arc::new(component),
        })
    }

    fn next_call_id(&self) -> String {
        self.inner.calls.next().to_string()
    }
}

impl std::fmt::Debug for Remote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Remote")
            .field("caller_id", &self.inner.caller_id)
            .field("config", &self.inner.config)
            .finish()
    }
}

// ── Node discovery ────────────────────────────────────────────────────────────

/// A liveliness change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    Online(NodeAddress),
    Offline(NodeAddress),
}

/// Handle of a [`Remote::watch_nodes`] subscription.
pub struct NodeWatch {
    transport: Arc<dyn Transport>,
    subscription: Option<DeclarationId>,
}

impl NodeWatch {
    /// Stops delivering events.  Stopping twice is a no-op.
    pub async fn stop(&mut self) -> Result<(), RemoteError> {
        if let Some(id) = self.subscription.take() {
            self.transport.undeclare(id).await?;
        }
        Ok(())
    }
}

impl Drop for NodeWatch {
    fn drop(&mut self) {
        if let Some(id) = self.subscription.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let transport = Arc::clone(&self.transport);
                handle.spawn(async move {
                    let _ = transport.undeclare(id).await;
                });
            }
        }
    }
}

// ── NodeHandle ────────────────────────────────────────────────────────────────

/// A discovered node (or one of its subnodes) with resolved metadata.
#[derive(Debug, Clone)]
pub struct NodeHandle {
    remote: Remote,
    address: NodeAddress,
    meta: Arc<NodeMeta>,
    /// Resolved metadata of the component this handle addresses.
    component: Arc<ComponentMeta>,
}

impl NodeHandle {
    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    /// The `META` document of the root node, as served (unresolved).
    pub fn meta(&self) -> &NodeMeta {
        &self.meta
    }

    /// Resolved metadata of this component.
    pub fn component(&self) -> &ComponentMeta {
        &self.component
    }

    pub fn tags(&self) -> &[TagMeta] {
        &self.component.tags
    }

    pub fn methods(&self) -> &[MethodMeta] {
        &self.component.methods
    }

    pub fn groups(&self) -> &[TagGroupMeta] {
        &self.component.groups
    }

    /// Handle of the subnode `name` of this component.
    pub fn subnode(&self, name: &str) -> Result<NodeHandle, RemoteError> {
        let sub = self
            .component
            .subnode(name)
            .ok_or_else(|| RemoteError::UnknownSubnode(name.to_string()))?;
        Ok(NodeHandle {
            remote: self.remote.clone(),
            address: self.address.subnode(name),
            meta: Arc::clone(&self.meta),
            component: Arc::new(sub.component.clone()),
        })
    }

    /// Queries the node's `STATE`.  A node that does not answer is offline.
    pub async fn state(&self) -> Result<NodeState, RemoteError> {
        let mut replies = self
            .remote
            .inner
            .transport
            .query(&self.address.root().state(), Vec::new())
            .await?;
        let state = match replies.recv_timeout(self.remote.inner.config.write_timeout).await {
            Ok(Some(reply)) => NodeState::decode(&reply.payload).unwrap_or(NodeState::Offline),
            Ok(None) | Err(_) => NodeState::Offline,
        };
        Ok(state)
    }

    fn tag(&self, path: &str) -> Result<&TagMeta, RemoteError> {
        self.component
            .tag(path)
            .ok_or_else(|| RemoteError::UnknownTag(path.to_string()))
    }

    fn method(&self, path: &str) -> Result<&MethodMeta, RemoteError> {
        self.component
            .method(path)
            .ok_or_else(|| RemoteError::UnknownMethod(path.to_string()))
    }

    fn group(&self, path: &str) -> Result<&TagGroupMeta, RemoteError> {
        self.component
            .group(path)
            .ok_or_else(|| RemoteError::UnknownGroup(path.to_string()))
    }

    // ── Tag writes ────────────────────────────────────────────────────────────

    /// Writes `value` to a writable tag and returns the owner's reply.
    ///
    /// Any reply is returned as-is, including `ERR` and `CALLBACK_ERR`; use
    /// [`ReplyFrame::is_ok`] to tell success from rejection.
    ///
    /// # Errors
    ///
    /// - [`RemoteError::UnknownTag`] / [`RemoteError::NotWritable`] for a
    ///   bad path.
    /// - [`RemoteError::Value`] if `value` does not have the tag's type.
    /// - [`RemoteError::WriteTimeout`] if no reply arrives in time.
    pub async fn write_tag(&self, path: &str, value: Value) -> Result<ReplyFrame, RemoteError> {
        let tag = self.tag(path)?;
        if !tag.writable {
            return Err(RemoteError::NotWritable(path.to_string()));
        }
        value.check(&tag.data_type)?;

        let topic = self.address.tag_write(path);
        let timeout = self.remote.inner.config.write_timeout;
        let mut replies = self.remote.inner.transport.query(&topic, encode(&value)).await?;
        let reply = match replies.recv_timeout(timeout).await {
            Ok(Some(reply)) => reply,
            Ok(None) => return Err(RemoteError::NoReply(topic)),
            Err(_) => {
                warn!(%topic, ?timeout, "tag write timed out");
                return Err(RemoteError::WriteTimeout { topic, timeout });
            }
        };
        Ok(ReplyFrame::decode(&reply.payload, &tag.responses)?)
    }

    /// Like [`write_tag`](Self::write_tag), converting `native` to the tag's
    /// type first.
    pub async fn write_tag_native(&self, path: &str, native: &Native) -> Result<ReplyFrame, RemoteError> {
        let tag = self.tag(path)?;
        let value = from_native(native, &tag.data_type, self.remote.inner.config.policy)?;
        self.write_tag(path, value).await
    }

    /// Writes several members of a tag group in one message.
    ///
    /// Group writes are not atomic: every member is handled by its own
    /// handler and answers for itself, so some members may be applied while
    /// others are rejected.  Returns one `(member path, reply)` pair per
    /// member that answered before the write timeout, in arrival order.
    pub async fn write_group(&self, path: &str, values: Fields) -> Result<Vec<(String, ReplyFrame)>, RemoteError> {
        let group = self.group(path)?;
        let model = group_model(group, &self.component).ok_or_else(|| RemoteError::UnknownGroup(path.to_string()))?;
        let value = ModelValue::build(&model, values.iter().map(|(k, v)| (k.as_str(), v.clone())))?;

        let topic = self.address.tag_write(path);
        let timeout = self.remote.inner.config.write_timeout;
        let deadline = Instant::now() + timeout;
        let mut replies = self
            .remote
            .inner
            .transport
            .query(&topic, encode(&Value::Model(value)))
            .await?;

        let mut answers = Vec::with_capacity(values.len());
        let mut timed_out = false;
        while answers.len() < values.len() {
            let reply = match tokio::time::timeout_at(deadline, replies.recv()).await {
                Ok(Some(reply)) => reply,
                Ok(None) => break,
                Err(_) => {
                    warn!(%topic, answered = answers.len(), expected = values.len(), "group write timed out");
                    timed_out = true;
                    break;
                }
            };
            let member = match parse_topic(&reply.topic)?.kind {
                TopicKind::TagWrite { path } => path,
                other => {
                    debug!(topic = %reply.topic, ?other, "ignoring unexpected group reply");
                    continue;
                }
            };
            let frame = if member == group.path {
                ReplyFrame::decode(&reply.payload, &ResponseTable::new())?
            } else {
                ReplyFrame::decode(&reply.payload, &self.tag(&member)?.responses)?
            };
            answers.push((member, frame));
        }

        if answers.is_empty() && !values.is_empty() {
            return Err(if timed_out {
                RemoteError::WriteTimeout { topic, timeout }
            } else {
                RemoteError::NoReply(topic)
            });
        }
        Ok(answers)
    }

    /// Like [`write_group`](Self::write_group), converting a native mapping
    /// of member path to value first.
    pub async fn write_group_native(
        &self,
        path: &str,
        native: &Map<String, Native>,
    ) -> Result<Vec<(String, ReplyFrame)>, RemoteError> {
        let group = self.group(path)?;
        let model = group_model(group, &self.component).ok_or_else(|| RemoteError::UnknownGroup(path.to_string()))?;
        let schema: Schema = model
            .items
            .iter()
            .map(|item| (item.name.clone(), item.data_type.clone()))
            .collect();
        let values = fields_from_native(native, &schema, self.remote.inner.config.policy)?;
        self.write_group(path, values).await
    }

    // ── Method calls ──────────────────────────────────────────────────────────

    /// Calls a method and returns the stream of its replies.
    ///
    /// The response subscription is in place before the call is published,
    /// so no reply can be missed.
    ///
    /// # Errors
    ///
    /// [`RemoteError::Protocol`] with [`ProtocolError::ParameterMismatch`]
    /// when `parameters` lacks a declared parameter or has an extra one.
    pub async fn call_method(&self, path: &str, parameters: Fields) -> Result<MethodCallStream, RemoteError> {
        let method = self.method(path)?;
        let payload = encode_parameters(&parameters, &method.parameters)?;

        let caller_id = self.remote.caller_id();
        let call_id = self.remote.next_call_id();
        let call_topic = self.address.method_call(path, caller_id, &call_id);
        let response_topic = self.address.method_response(path, caller_id, &call_id);

        let transport = Arc::clone(&self.remote.inner.transport);
        let (tx, rx) = mpsc::unbounded_channel();
        let on_reply: SampleCallback = Arc::new(move |sample: Sample| {
            if sample.kind == SampleKind::Put {
                let _ = tx.send(sample.payload);
            }
        });
        let subscription = transport.subscribe(&response_topic, on_reply).await?;
        if let Err(e) = transport.publish(&call_topic, payload).await {
            let _ = transport.undeclare(subscription).await;
            return Err(e.into());
        }
        debug!(topic = %call_topic, "method call published");

        Ok(MethodCallStream {
            transport,
            subscription: Some(subscription),
            topic: response_topic,
            call_id,
            responses: Arc::new(method.responses.clone()),
            timeout: self.remote.inner.config.call_timeout,
            replies: rx,
        })
    }

    /// Like [`call_method`](Self::call_method), converting a native mapping
    /// of parameter name to value first.
    pub async fn call_method_native(
        &self,
        path: &str,
        native: &Map<String, Native>,
    ) -> Result<MethodCallStream, RemoteError> {
        let method = self.method(path)?;
        let parameters = fields_from_native(native, &method.parameters, self.remote.inner.config.policy)?;
        self.call_method(path, parameters).await
    }

    // ── Binds ─────────────────────────────────────────────────────────────────

    /// Mirrors a tag of this node.  Setting the bind performs a tag write.
    pub async fn bind_tag(&self, path: &str) -> Result<TagBind, BindError> {
        let tag = self.tag(path)?;
        let bind = TagBind::open(
            Arc::clone(&self.remote.inner.transport),
            self.address.tag_data(path),
            path.to_string(),
            tag.data_type.clone(),
            BindTarget::Remote(self.clone()),
        )
        .await?;
        Ok(bind)
    }
}

// ── MethodCallStream ──────────────────────────────────────────────────────────

/// Replies of one method call, in the order the handler sent them.
///
/// Iteration ends after the first `OK` or `ERR` reply.  Replies that arrive
/// while nobody is reading are buffered.
pub struct MethodCallStream {
    transport: Arc<dyn Transport>,
    subscription: Option<DeclarationId>,
    topic: String,
    call_id: String,
    responses: Arc<ResponseTable>,
    timeout: Duration,
    replies: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl MethodCallStream {
    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// The topic replies arrive on.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// True once a terminal reply was returned, the call timed out or it was
    /// abandoned.
    pub fn is_finished(&self) -> bool {
        self.subscription.is_none()
    }

    /// Next reply, or `None` once the call is finished.
    ///
    /// # Errors
    ///
    /// [`RemoteError::CallTimeout`] if nothing arrives within the call
    /// timeout.  The call is then finished: later replies are discarded.
    pub async fn next_reply(&mut self) -> Result<Option<ReplyFrame>, RemoteError> {
        if self.is_finished() {
            return Ok(None);
        }
        let payload = match tokio::time::timeout(self.timeout, self.replies.recv()).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                self.finish().await;
                return Err(TransportError::Closed.into());
            }
            Err(_) => {
                warn!(topic = %self.topic, timeout = ?self.timeout, "method call timed out");
                self.finish().await;
                return Err(RemoteError::CallTimeout {
                    topic: self.topic.clone(),
                    timeout: self.timeout,
                });
            }
        };
        let frame = match ReplyFrame::decode(&payload, &self.responses) {
            Ok(frame) => frame,
            Err(e) => {
                self.finish().await;
                return Err(e.into());
            }
        };
        if frame.is_terminal() {
            self.finish().await;
        }
        Ok(Some(frame))
    }

    /// Stops listening.  Replies not read yet are discarded.
    pub async fn abandon(&mut self) {
        self.finish().await;
        while self.replies.try_recv().is_ok() {}
    }

    /// Reads every remaining reply.
    pub async fn collect(mut self) -> Result<Vec<ReplyFrame>, RemoteError> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_reply().await? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// The remaining replies as a [`Stream`].  An error ends the stream.
    pub fn into_stream(self) -> impl Stream<Item = Result<ReplyFrame, RemoteError>> {
        stream::unfold(self, |mut call| async move {
            match call.next_reply().await {
                Ok(Some(frame)) => Some((Ok(frame), call)),
                Ok(None) => None,
                Err(e) => Some((Err(e), call)),
            }
        })
    }

    async fn finish(&mut self) {
        if let Some(id) = self.subscription.take() {
            if let Err(e) = self.transport.undeclare(id).await {
                debug!(topic = %self.topic, error = %e, "response subscription already gone");
            }
        }
    }
}

impl std::fmt::Debug for MethodCallStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodCallStream")
            .field("topic", &self.topic)
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl Drop for MethodCallStream {
    fn drop(&mut self) {
        if let Some(id) = self.subscription.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let transport = Arc::clone(&self.transport);
                handle.spawn(async move {
                    let _ = transport.undeclare(id).await;
                });
            }
        }
    }
}
