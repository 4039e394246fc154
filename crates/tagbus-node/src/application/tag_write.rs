//! Server side of the tag-write protocol.
//!
//! # Lifecycle of one write (for beginners)
//!
//! ```text
//! Idle → write query arrives → HandlerRunning → Replied(code) → Idle
//! ```
//!
//! The node decodes the written value against the tag's type and hands it
//! to the tag's [`TagWriteHandler`] together with a [`TagResponder`].  The
//! handler must answer exactly once with a code from the tag's response
//! table (or `CALLBACK_ERR`).  Whatever the handler does, the caller gets
//! exactly one reply:
//!
//! | Handler outcome                  | Reply sent                        |
//! |----------------------------------|-----------------------------------|
//! | calls `reply(code, ..)`          | that reply                        |
//! | returns without replying         | `CALLBACK_ERR` (auto)             |
//! | returns `Err(e)`                 | `CALLBACK_ERR` carrying `e`       |
//! | panics                           | `CALLBACK_ERR` carrying the panic |
//! | value fails to decode            | `ERR` (handler never runs)        |
//!
//! A group write carries several members in one query.  Each member is
//! handled by its own tag's handler and answers on its own write topic, so a
//! group write is not atomic: some members may accept while others reject.

use std::borrow::Cow;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use tagbus_core::protocol::{codes, Fields, ReplyFrame, ResponseKind, ResponseSpec, ResponseTable};
use tagbus_core::{ComponentMeta, DataType, ModelConfig, NodeAddress, ProtocolError, TagGroupMeta, Value};
use thiserror::Error;
use tracing::{debug, error, warn};

use super::node::TagPublisher;
use super::panic_message;
use crate::infrastructure::transport::{Query, TransportError};

/// Errors returned to a handler that replies incorrectly.  They stay local:
/// the remote party only ever sees protocol replies.
#[derive(Debug, Error)]
pub enum ReplyError {
    /// The code is neither registered nor a permitted built-in.
    #[error("reply code {0} is not registered")]
    InvalidCode(i32),

    /// A tag write has already been answered.
    #[error("the write has already been answered")]
    AlreadyReplied,

    /// A method call has already sent its terminal reply.
    #[error("the call has already sent its terminal reply")]
    AlreadyTerminated,

    /// `ok`/`err`/`info` was used with a code of another kind.
    #[error("reply code {code} is {actual:?}, not {expected:?}")]
    WrongKind {
        code: i32,
        expected: ResponseKind,
        actual: ResponseKind,
    },

    /// The body does not fit the code's schema.
    #[error("reply body rejected: {0}")]
    Protocol(#[from] ProtocolError),

    /// The reply could not be sent.
    #[error("reply not delivered: {0}")]
    Transport(#[from] TransportError),
}

// ── Handler contract ──────────────────────────────────────────────────────────

/// A decoded write addressed to one tag.
#[derive(Debug, Clone)]
pub struct TagWriteRequest {
    /// Node or subnode owning the tag.
    pub address: NodeAddress,
    pub path: String,
    pub value: Value,
    /// Publishes tag values of the same component, e.g. to confirm the
    /// accepted value.
    pub publisher: TagPublisher,
}

/// Handles writes to a writable tag.
#[async_trait]
pub trait TagWriteHandler: Send + Sync {
    /// Processes one write and answers it through `responder`.
    async fn write(&self, request: TagWriteRequest, responder: TagResponder) -> anyhow::Result<()>;
}

struct FnTagWriteHandler<F>(F);

#[async_trait]
impl<F, Fut> TagWriteHandler for FnTagWriteHandler<F>
where
    F: Fn(TagWriteRequest, TagResponder) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn write(&self, request: TagWriteRequest, responder: TagResponder) -> anyhow::Result<()> {
        (self.0)(request, responder).await
    }
}

/// Wraps an async closure as a [`TagWriteHandler`].
///
/// ```rust,no_run
/// use tagbus_node::tag_write_fn;
/// use tagbus_core::Value;
///
/// let handler = tag_write_fn(|request, responder| async move {
///     let accepted = matches!(request.value, Value::Int(v) if v <= 10);
///     responder.reply_code(if accepted { 200 } else { 400 })?;
///     Ok::<_, anyhow::Error>(())
/// });
/// ```
pub fn tag_write_fn<F, Fut>(f: F) -> Arc<dyn TagWriteHandler>
where
    F: Fn(TagWriteRequest, TagResponder) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnTagWriteHandler(f))
}

// ── TagResponder ──────────────────────────────────────────────────────────────

struct ResponderInner {
    query: Query,
    reply_topic: String,
    responses: Arc<ResponseTable>,
    replied: AtomicBool,
}

/// One-shot reply handle of a tag write.  Clones share the same state, so
/// the write is answered at most once whichever clone replies.
#[derive(Clone)]
pub struct TagResponder {
    inner: Arc<ResponderInner>,
}

impl TagResponder {
    pub(crate) fn new(query: Query, reply_topic: String, responses: Arc<ResponseTable>) -> Self {
        Self {
            inner: Arc::new(ResponderInner {
                query,
                reply_topic,
                responses,
                replied: AtomicBool::new(false),
            }),
        }
    }

    /// Answers the write with `code` and `body`.
    ///
    /// # Errors
    ///
    /// - [`ReplyError::InvalidCode`] if `code` is not in the tag's table and
    ///   is not `CALLBACK_ERR`.
    /// - [`ReplyError::AlreadyReplied`] on a second reply.
    /// - [`ReplyError::Protocol`] if `body` does not fit the code's schema.
    pub fn reply(&self, code: i32, body: Fields) -> Result<(), ReplyError> {
        let spec = match self.inner.responses.lookup(code) {
            Some(spec) => Cow::Borrowed(spec),
            None if code == codes::CALLBACK_ERR => {
                Cow::Owned(ResponseSpec::builtin(code).ok_or(ReplyError::InvalidCode(code))?)
            }
            None => return Err(ReplyError::InvalidCode(code)),
        };
        self.send(&ReplyFrame::new(code, spec.kind, body), &spec)
    }

    /// Answers with a body-less reply.
    pub fn reply_code(&self, code: i32) -> Result<(), ReplyError> {
        self.reply(code, Fields::new())
    }

    pub fn has_replied(&self) -> bool {
        self.inner.replied.load(Ordering::Acquire)
    }

    /// Topic the reply is labelled with (the tag's write topic).
    pub fn reply_topic(&self) -> &str {
        &self.inner.reply_topic
    }

    /// Framework reply with a built-in code.
    pub(crate) fn reply_builtin(&self, frame: ReplyFrame) -> Result<(), ReplyError> {
        let spec = ResponseSpec::builtin(frame.code).ok_or(ReplyError::InvalidCode(frame.code))?;
        self.send(&frame, &spec)
    }

    fn send(&self, frame: &ReplyFrame, spec: &ResponseSpec) -> Result<(), ReplyError> {
        let bytes = frame.encode(spec)?;
        if self.inner.replied.swap(true, Ordering::AcqRel) {
            return Err(ReplyError::AlreadyReplied);
        }
        self.inner.query.reply(self.inner.reply_topic.clone(), bytes)?;
        Ok(())
    }
}

impl std::fmt::Debug for TagResponder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagResponder")
            .field("reply_topic", &self.inner.reply_topic)
            .field("replied", &self.has_replied())
            .finish()
    }
}

// ── Serving ───────────────────────────────────────────────────────────────────

/// Runs `handler` on one decoded write and guarantees a reply.
pub(crate) async fn serve_write(handler: Arc<dyn TagWriteHandler>, request: TagWriteRequest, responder: TagResponder) {
    let topic = responder.reply_topic().to_string();
    let outcome = AssertUnwindSafe(handler.write(request, responder.clone()))
        .catch_unwind()
        .await;

    let reason = match outcome {
        Ok(Ok(())) if responder.has_replied() => return,
        Ok(Ok(())) => {
            warn!(%topic, "write handler returned without replying");
            "handler returned without replying".to_string()
        }
        Ok(Err(e)) => {
            warn!(%topic, error = %e, "write handler failed");
            format!("{e:#}")
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(%topic, %message, "write handler panicked");
            message
        }
    };

    if responder.has_replied() {
        debug!(%topic, "handler failure after reply, nothing more to send");
        return;
    }
    if let Err(e) = responder.reply_builtin(ReplyFrame::callback_err(reason)) {
        warn!(%topic, error = %e, "CALLBACK_ERR reply not delivered");
    }
}

/// Answers a write whose value could not be decoded.
pub(crate) fn reject_write(responder: &TagResponder, reason: String) {
    debug!(topic = responder.reply_topic(), %reason, "write rejected before dispatch");
    if let Err(e) = responder.reply_builtin(ReplyFrame::err(reason)) {
        warn!(topic = responder.reply_topic(), error = %e, "ERR reply not delivered");
    }
}

/// Wire schema of a group write: a model whose items are the members, in
/// declared order, typed as the member tags.  Returns `None` when a member
/// is not a tag of `component`.
pub fn group_model(group: &TagGroupMeta, component: &ComponentMeta) -> Option<ModelConfig> {
    group
        .members
        .iter()
        .try_fold(ModelConfig::new(format!("group/{}", group.path), "0"), |model, member| {
            let tag = component.tag(member)?;
            Some(model.with_item(member.clone(), tag.data_type.clone()))
        })
}

/// [`DataType`] of a group write payload.
pub(crate) fn group_type(group: &TagGroupMeta, component: &ComponentMeta) -> Option<DataType> {
    group_model(group, component).map(DataType::model)
}
