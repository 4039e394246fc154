//! Server side of the method-call protocol.
//!
//! # Reply state machine (for beginners)
//!
//! ```text
//! Received → HandlerRunning → { Info → Info → … } → Terminal
//! ```
//!
//! A handler answers through a [`MethodContext`].  Every reply is classified
//! by its code: `INFO` codes keep the call open, `OK` and `ERR` codes end
//! it.  Each reply call returns a [`ReplyDisposition`] telling the handler
//! whether the call is still open; once it is `Terminated`, any further
//! reply fails with [`ReplyError::AlreadyTerminated`] and nothing else is
//! sent.
//!
//! After the handler returns, the framework checks the context:
//!
//! - terminal reply sent → nothing more to do;
//! - handler returned `Ok(())` without a terminal reply → `ERR`;
//! - handler returned `Err(e)` or panicked → `CALLBACK_ERR` with the error
//!   text in the `reason` body field, after any INFO replies already sent.
//!
//! Replies are published on the call's `RESPONSE` topic in the order the
//! handler produced them.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use tagbus_core::protocol::{Fields, ReplyFrame, ResponseKind, ResponseTable};
use tagbus_core::NodeAddress;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use super::panic_message;
use super::tag_write::ReplyError;
use crate::infrastructure::transport::Transport;

/// A decoded method invocation.
#[derive(Debug, Clone)]
pub struct MethodCall {
    /// Node or subnode owning the method.
    pub address: NodeAddress,
    pub path: String,
    pub parameters: Fields,
    pub caller_id: String,
    pub call_id: String,
}

/// Whether the call is still open after a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyDisposition {
    /// An INFO reply was sent; the handler may keep replying.
    Continue,
    /// A terminal reply was sent; the handler should return.
    Terminated,
}

impl ReplyDisposition {
    pub fn is_terminated(self) -> bool {
        self == ReplyDisposition::Terminated
    }
}

/// Handles invocations of one method.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn call(&self, call: MethodCall, ctx: MethodContext) -> anyhow::Result<()>;
}

struct FnMethodHandler<F>(F);

#[async_trait]
impl<F, Fut> MethodHandler for FnMethodHandler<F>
where
    F: Fn(MethodCall, MethodContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn call(&self, call: MethodCall, ctx: MethodContext) -> anyhow::Result<()> {
        (self.0)(call, ctx).await
    }
}

/// Wraps an async closure as a [`MethodHandler`].
pub fn method_fn<F, Fut>(f: F) -> Arc<dyn MethodHandler>
where
    F: Fn(MethodCall, MethodContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnMethodHandler(f))
}

// ── MethodContext ─────────────────────────────────────────────────────────────

struct ContextInner {
    transport: Arc<dyn Transport>,
    response_topic: String,
    responses: Arc<ResponseTable>,
    terminated: AtomicBool,
    // Serialises replies so they leave in the order they were made.
    send_order: Mutex<()>,
}

/// Reply handle of one method invocation.
#[derive(Clone)]
pub struct MethodContext {
    inner: Arc<ContextInner>,
}

impl MethodContext {
    pub(crate) fn new(transport: Arc<dyn Transport>, response_topic: String, responses: Arc<ResponseTable>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                transport,
                response_topic,
                responses,
                terminated: AtomicBool::new(false),
                send_order: Mutex::new(()),
            }),
        }
    }

    /// Sends a reply with any code of the method's table or a built-in.
    ///
    /// # Errors
    ///
    /// - [`ReplyError::AlreadyTerminated`] after a terminal reply.
    /// - [`ReplyError::InvalidCode`] for an unknown code.
    /// - [`ReplyError::Protocol`] if `body` does not fit the code's schema.
    pub async fn reply(&self, code: i32, body: Fields) -> Result<ReplyDisposition, ReplyError> {
        self.send(None, code, body).await
    }

    /// Sends a progress reply; `code` must be an INFO code.
    pub async fn info(&self, code: i32, body: Fields) -> Result<ReplyDisposition, ReplyError> {
        self.send(Some(ResponseKind::Info), code, body).await
    }

    /// Ends the call successfully; `code` must be an OK code.
    pub async fn ok(&self, code: i32, body: Fields) -> Result<ReplyDisposition, ReplyError> {
        self.send(Some(ResponseKind::Ok), code, body).await
    }

    /// Ends the call with an error; `code` must be an ERR code.
    pub async fn err(&self, code: i32, body: Fields) -> Result<ReplyDisposition, ReplyError> {
        self.send(Some(ResponseKind::Err), code, body).await
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::Acquire)
    }

    pub fn response_topic(&self) -> &str {
        &self.inner.response_topic
    }

    async fn send(&self, expected: Option<ResponseKind>, code: i32, body: Fields) -> Result<ReplyDisposition, ReplyError> {
        let _order = self.inner.send_order.lock().await;
        if self.is_terminated() {
            return Err(ReplyError::AlreadyTerminated);
        }
        let spec = self
            .inner
            .responses
            .lookup_with_builtins(code)
            .ok_or(ReplyError::InvalidCode(code))?;
        if let Some(expected) = expected.filter(|k| *k != spec.kind) {
            return Err(ReplyError::WrongKind {
                code,
                expected,
                actual: spec.kind,
            });
        }
        let bytes = ReplyFrame::new(code, spec.kind, body).encode(&spec)?;
        self.inner.transport.publish(&self.inner.response_topic, bytes).await?;

        if spec.kind.is_terminal() {
            self.inner.terminated.store(true, Ordering::Release);
            Ok(ReplyDisposition::Terminated)
        } else {
            Ok(ReplyDisposition::Continue)
        }
    }

    /// Framework terminal reply, skipped if the handler already terminated.
    pub(crate) async fn finish(&self, frame: ReplyFrame) {
        if self.is_terminated() {
            return;
        }
        match self.send(None, frame.code, frame.body).await {
            Ok(_) | Err(ReplyError::AlreadyTerminated) => {}
            Err(e) => warn!(topic = %self.inner.response_topic, error = %e, "terminal reply not delivered"),
        }
    }
}

impl std::fmt::Debug for MethodContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodContext")
            .field("response_topic", &self.inner.response_topic)
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

// ── Serving ───────────────────────────────────────────────────────────────────

/// Runs `handler` on one decoded call and guarantees a terminal reply.
pub(crate) async fn serve_call(handler: Arc<dyn MethodHandler>, call: MethodCall, ctx: MethodContext) {
    let topic = ctx.response_topic().to_string();
    let outcome = AssertUnwindSafe(handler.call(call, ctx.clone())).catch_unwind().await;

    let frame = match outcome {
        Ok(Ok(())) if ctx.is_terminated() => return,
        Ok(Ok(())) => {
            debug!(%topic, "method handler returned without a terminal reply");
            ReplyFrame::err("handler returned without a terminal reply")
        }
        Ok(Err(e)) => {
            warn!(%topic, error = %e, "method handler failed");
            ReplyFrame::callback_err(format!("{e:#}"))
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(%topic, %message, "method handler panicked");
            ReplyFrame::callback_err(message)
        }
    };

    if ctx.is_terminated() {
        debug!(%topic, "handler failure after terminal reply, nothing more to send");
        return;
    }
    ctx.finish(frame).await;
}
