//! Transport abstraction: publish/subscribe, query/reply and liveliness
//! tokens over `/`-delimited topics.
//!
//! # Three primitives (for beginners)
//!
//! - **Publish/subscribe** – fire-and-forget.  Every subscriber whose pattern
//!   overlaps the published topic receives a [`Sample`].  Tag values, method
//!   calls and method replies travel this way.
//! - **Query/reply** – a [`Query`] is delivered to every *queryable* whose
//!   pattern overlaps the topic; each may answer any number of times.  The
//!   caller reads answers from a [`ReplyStream`], which ends once every
//!   queryable has dropped its copy of the query.  Tag writes, `META` and
//!   `STATE` use this.
//! - **Liveliness** – a node declares a token on its base topic while it is
//!   alive.  Watchers get a `Put` sample when a token appears and a `Delete`
//!   when it goes away, and can list the tokens alive right now.
//!
//! Patterns may contain `*` segments; matching is
//! [`tagbus_core::keyspace::overlap`].

pub mod sim;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors reported by a transport.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    /// The session was closed.
    #[error("transport session is closed")]
    Closed,

    /// The declaration does not exist (or belongs to another session).
    #[error("unknown declaration {0}")]
    UnknownDeclaration(DeclarationId),

    /// No reply arrived in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The query's caller is no longer listening.
    #[error("query caller went away")]
    QueryDropped,
}

/// Handle of a subscription, queryable or liveliness token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeclarationId(pub u64);

impl fmt::Display for DeclarationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Whether a sample announces data or the removal of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    Put,
    Delete,
}

/// A message delivered to a subscriber.
#[derive(Debug, Clone)]
pub struct Sample {
    pub topic: String,
    pub payload: Vec<u8>,
    pub kind: SampleKind,
    pub timestamp: SystemTime,
}

impl Sample {
    pub fn put(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            payload,
            kind: SampleKind::Put,
            timestamp: SystemTime::now(),
        }
    }

    pub fn delete(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: Vec::new(),
            kind: SampleKind::Delete,
            timestamp: SystemTime::now(),
        }
    }
}

/// One answer to a query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryReply {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// A query as seen by a queryable.  Clones share the same reply channel;
/// the caller's [`ReplyStream`] ends when the last clone is dropped.
#[derive(Debug, Clone)]
pub struct Query {
    topic: String,
    payload: Arc<[u8]>,
    replies: mpsc::UnboundedSender<QueryReply>,
}

impl Query {
    /// Creates a query and the stream its replies arrive on.
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> (Self, ReplyStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let query = Self {
            topic: topic.into(),
            payload: payload.into(),
            replies: tx,
        };
        (query, ReplyStream { rx })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Sends one answer, labelled with `topic`.
    pub fn reply(&self, topic: impl Into<String>, payload: Vec<u8>) -> Result<(), TransportError> {
        self.replies
            .send(QueryReply {
                topic: topic.into(),
                payload,
            })
            .map_err(|_| TransportError::QueryDropped)
    }
}

/// Caller side of a query: the buffered answers, in arrival order.
#[derive(Debug)]
pub struct ReplyStream {
    rx: mpsc::UnboundedReceiver<QueryReply>,
}

impl ReplyStream {
    /// Next answer, or `None` once every queryable is done.
    pub async fn recv(&mut self) -> Option<QueryReply> {
        self.rx.recv().await
    }

    /// Like [`recv`](Self::recv), giving up after `timeout`.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<QueryReply>, TransportError> {
        tokio::time::timeout(timeout, self.rx.recv())
            .await
            .map_err(|_| TransportError::Timeout(timeout))
    }
}

/// Called for every delivered sample.  Runs on the subscriber's delivery
/// task, so it must not block; spawn for long work.
pub type SampleCallback = Arc<dyn Fn(Sample) + Send + Sync>;

/// Called for every query addressed to a queryable.
pub type QueryCallback = Arc<dyn Fn(Query) + Send + Sync>;

/// A session on a publish/subscribe/query network.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publishes `payload` on `topic` (no wildcards).
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Calls `callback` for every sample published on a topic overlapping
    /// `pattern`.  Samples reach one subscriber in publication order.
    async fn subscribe(&self, pattern: &str, callback: SampleCallback) -> Result<DeclarationId, TransportError>;

    /// Calls `callback` for every query on a topic overlapping `pattern`.
    async fn declare_queryable(&self, pattern: &str, callback: QueryCallback)
        -> Result<DeclarationId, TransportError>;

    /// Sends a query to every matching queryable.
    async fn query(&self, topic: &str, payload: Vec<u8>) -> Result<ReplyStream, TransportError>;

    /// Declares a liveliness token on `topic`.
    async fn declare_token(&self, topic: &str) -> Result<DeclarationId, TransportError>;

    /// Calls `callback` with a `Put` sample when a matching token appears and
    /// a `Delete` sample when it disappears.
    async fn subscribe_liveliness(
        &self,
        pattern: &str,
        callback: SampleCallback,
    ) -> Result<DeclarationId, TransportError>;

    /// Topics of the live tokens matching `pattern`.
    async fn query_liveliness(&self, pattern: &str) -> Result<Vec<String>, TransportError>;

    /// Removes a subscription, queryable or token of this session.
    async fn undeclare(&self, id: DeclarationId) -> Result<(), TransportError>;

    /// Removes every declaration of this session and rejects further calls.
    async fn close(&self) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reply_stream_ends_when_every_query_clone_is_dropped() {
        // Arrange
        let (query, mut stream) = Query::new("a/b", vec![1]);
        let clone = query.clone();

        // Act
        query.reply("a/b", vec![2]).unwrap();
        drop(query);
        clone.reply("a/c", vec![3]).unwrap();
        drop(clone);

        // Assert
        assert_eq!(stream.recv().await.map(|r| r.payload), Some(vec![2]));
        assert_eq!(stream.recv().await.map(|r| r.topic), Some("a/c".to_string()));
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_reply_to_dropped_stream_fails() {
        let (query, stream) = Query::new("a", Vec::new());
        drop(stream);
        assert_eq!(query.reply("a", Vec::new()), Err(TransportError::QueryDropped));
    }

    #[tokio::test]
    async fn test_recv_timeout_elapses_while_query_is_pending() {
        let (_query, mut stream) = Query::new("a", Vec::new());
        let result = stream.recv_timeout(Duration::from_millis(10)).await;
        assert_eq!(result, Err(TransportError::Timeout(Duration::from_millis(10))));
    }
}
