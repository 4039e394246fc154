//! Tag binds: client-side mirrors of a tag's last published value.
//!
//! A bind subscribes to the tag's data topic and keeps the last decoded
//! value in a `tokio::sync::watch` channel.  Many binds may exist for one
//! tag; none of them is owned by the tag.
//!
//! Setting a bind goes through the tag's owner:
//!
//! - a *remote* bind performs a tag write and fails with
//!   [`BindError::Rejected`] unless the reply is OK-kind;
//! - a *local* bind (made by the node owning the tag) publishes the value
//!   directly.
//!
//! After [`close`](TagBind::close) the subscription is gone: reads return
//! the last value seen, writes fail with [`BindError::Closed`].

use std::sync::Arc;
use std::time::SystemTime;

use tagbus_core::{decode, DataType, ResponseKind, Value};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::node::{SessionError, TagPublisher};
use super::remote::{NodeHandle, RemoteError};
use crate::infrastructure::transport::{DeclarationId, Sample, SampleCallback, SampleKind, Transport, TransportError};

/// Errors returned by a bind.
#[derive(Debug, Error)]
pub enum BindError {
    /// The bind was closed.
    #[error("tag bind is closed")]
    Closed,

    /// The owner answered the write with a non-OK reply.
    #[error("write rejected with code {code} ({kind:?}){}", reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Rejected {
        code: i32,
        kind: ResponseKind,
        reason: Option<String>,
    },

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Where a new value goes.
#[derive(Debug, Clone)]
pub(crate) enum BindTarget {
    Local(TagPublisher),
    Remote(NodeHandle),
}

/// Last value seen by a bind.
#[derive(Debug, Clone, PartialEq)]
struct Observed {
    value: Value,
    timestamp: SystemTime,
}

/// A live mirror of one tag.
pub struct TagBind {
    path: String,
    transport: Arc<dyn Transport>,
    target: BindTarget,
    subscription: Option<DeclarationId>,
    rx: watch::Receiver<Option<Observed>>,
}

impl TagBind {
    pub(crate) async fn open(
        transport: Arc<dyn Transport>,
        topic: String,
        path: String,
        data_type: DataType,
        target: BindTarget,
    ) -> Result<Self, TransportError> {
        let (tx, rx) = watch::channel(None);
        let tag = path.clone();
        let callback: SampleCallback = Arc::new(move |sample: Sample| {
            if sample.kind != SampleKind::Put {
                return;
            }
            match decode(&sample.payload, &data_type) {
                Ok(value) => {
                    tx.send_replace(Some(Observed {
                        value,
                        timestamp: sample.timestamp,
                    }));
                }
                Err(e) => warn!(tag = %tag, error = %e, "undecodable tag value ignored"),
            }
        });
        let subscription = transport.subscribe(&topic, callback).await?;
        debug!(%topic, "tag bind opened");
        Ok(Self {
            path,
            transport,
            target,
            subscription: Some(subscription),
            rx,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last value received, if any.  Still readable after close.
    pub fn value(&self) -> Option<Value> {
        self.rx.borrow().as_ref().map(|o| o.value.clone())
    }

    /// Publication time of the last value received.
    pub fn timestamp(&self) -> Option<SystemTime> {
        self.rx.borrow().as_ref().map(|o| o.timestamp)
    }

    pub fn is_closed(&self) -> bool {
        self.subscription.is_none()
    }

    /// Waits for the next value.
    ///
    /// # Errors
    ///
    /// [`BindError::Closed`] once the bind is closed.
    pub async fn changed(&mut self) -> Result<Value, BindError> {
        if self.is_closed() {
            return Err(BindError::Closed);
        }
        self.rx.changed().await.map_err(|_| BindError::Closed)?;
        self.value().ok_or(BindError::Closed)
    }

    /// Sets the tag: a write for remote binds, a publish for local ones.
    ///
    /// # Errors
    ///
    /// - [`BindError::Closed`] after [`close`](Self::close).
    /// - [`BindError::Rejected`] when the owner answers with a non-OK reply.
    pub async fn set_value(&self, value: Value) -> Result<(), BindError> {
        if self.is_closed() {
            return Err(BindError::Closed);
        }
        match &self.target {
            BindTarget::Local(publisher) => publisher.publish(&self.path, &value).await?,
            BindTarget::Remote(node) => {
                let reply = node.write_tag(&self.path, value).await?;
                if !reply.is_ok() {
                    return Err(BindError::Rejected {
                        code: reply.code,
                        kind: reply.kind,
                        reason: reply.reason().map(str::to_string),
                    });
                }
            }
        }
        Ok(())
    }

    /// Cancels the subscription.  The bind stays readable but can no longer
    /// be set.  Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<(), BindError> {
        if let Some(id) = self.subscription.take() {
            self.transport.undeclare(id).await?;
            debug!(tag = %self.path, "tag bind closed");
        }
        Ok(())
    }
}

impl std::fmt::Debug for TagBind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagBind")
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .field("value", &self.value())
            .finish()
    }
}

impl Drop for TagBind {
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
