//! In-memory transport simulator.
//!
//! A [`SimNetwork`] is a shared registry of subscriptions, queryables and
//! liveliness tokens.  Every [`SimTransport`] opened on it behaves like a
//! separate session of a real bus: samples published by one session reach
//! the matching subscribers of every session, its own included.
//!
//! # Delivery model (for beginners)
//!
//! Each subscription owns an unbounded queue and a tokio task that drains it
//! into the callback.  Publishing only pushes onto the queues of the
//! matching subscribers, so:
//!
//! - one subscriber sees samples in the order they were published;
//! - a slow callback only delays its own queue, never the publisher or
//!   other subscribers.
//!
//! Queries are handed to each matching queryable on a task of their own.
//!
//! The registry sits behind a `RwLock`.  Dispatch takes a snapshot of the
//! matching entries under the read lock and releases it before delivering,
//! so callbacks may freely subscribe or undeclare.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tagbus_core::keyspace::overlap;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{
    DeclarationId, Query, QueryCallback, ReplyStream, Sample, SampleCallback, Transport, TransportError,
};

// ── Registry ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
struct Entry<T> {
    id: DeclarationId,
    session: u64,
    pattern: String,
    target: T,
}

type SampleSink = mpsc::UnboundedSender<Sample>;

#[derive(Default)]
struct Registry {
    subscribers: Vec<Entry<SampleSink>>,
    queryables: Vec<Entry<QueryCallback>>,
    tokens: Vec<Entry<()>>,
    liveliness: Vec<Entry<SampleSink>>,
}

impl Registry {
    /// Removes every declaration matching `pred` and returns the topics of
    /// the removed tokens.
    fn remove_where(&mut self, pred: impl Fn(DeclarationId, u64) -> bool) -> (usize, Vec<String>) {
        let before = self.len();
        self.subscribers.retain(|e| !pred(e.id, e.session));
        self.queryables.retain(|e| !pred(e.id, e.session));
        self.liveliness.retain(|e| !pred(e.id, e.session));
        let mut dropped_tokens = Vec::new();
        self.tokens.retain(|e| {
            let remove = pred(e.id, e.session);
            if remove {
                dropped_tokens.push(e.pattern.clone());
            }
            !remove
        });
        (before - self.len(), dropped_tokens)
    }

    fn len(&self) -> usize {
        self.subscribers.len() + self.queryables.len() + self.tokens.len() + self.liveliness.len()
    }
}

fn matching<T: Clone>(entries: &[Entry<T>], topic: &str) -> Vec<T> {
    entries
        .iter()
        .filter(|e| overlap(&e.pattern, topic))
        .map(|e| e.target.clone())
        .collect()
}

/// Spawns the delivery task of one subscription.
fn spawn_delivery(callback: SampleCallback) -> SampleSink {
    let (tx, mut rx) = mpsc::unbounded_channel::<Sample>();
    tokio::spawn(async move {
        while let Some(sample) = rx.recv().await {
            callback(sample);
        }
    });
    tx
}

struct Shared {
    registry: RwLock<Registry>,
    next_declaration: AtomicU64,
    next_session: AtomicU64,
}

// ── SimNetwork ────────────────────────────────────────────────────────────────

/// A simulated bus.  Cloning yields another handle to the same network.
#[derive(Clone)]
pub struct SimNetwork {
    shared: Arc<Shared>,
}

impl Default for SimNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl SimNetwork {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: RwLock::new(Registry::default()),
                next_declaration: AtomicU64::new(1),
                next_session: AtomicU64::new(1),
            }),
        }
    }

    /// Opens a new session on the network.
    pub fn session(&self) -> SimTransport {
        let id = self.shared.next_session.fetch_add(1, Ordering::Relaxed);
        debug!(session = id, "simulated session opened");
        SimTransport {
            network: self.clone(),
            session: id,
            closed: AtomicBool::new(false),
        }
    }

    /// Number of live declarations across all sessions.
    pub fn declaration_count(&self) -> usize {
        self.read().len()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Registry> {
        self.shared.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Registry> {
        self.shared.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> DeclarationId {
        DeclarationId(self.shared.next_declaration.fetch_add(1, Ordering::Relaxed))
    }

    fn notify_liveliness(&self, sample_for: impl Fn() -> Sample, topic: &str) {
        let sinks = matching(&self.read().liveliness, topic);
        for sink in sinks {
            let _ = sink.send(sample_for());
        }
    }
}

impl std::fmt::Debug for SimNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimNetwork")
            .field("declarations", &self.declaration_count())
            .finish()
    }
}

// ── SimTransport ──────────────────────────────────────────────────────────────

/// One session on a [`SimNetwork`].
#[derive(Debug)]
pub struct SimTransport {
    network: SimNetwork,
    session: u64,
    closed: AtomicBool,
}

impl SimTransport {
    pub fn network(&self) -> &SimNetwork {
        &self.network
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    fn entry<T>(&self, pattern: &str, target: T) -> Entry<T> {
        Entry {
            id: self.network.next_id(),
            session: self.session,
            pattern: pattern.to_string(),
            target,
        }
    }

    fn notify_removed_tokens(&self, tokens: &[String]) {
        for topic in tokens {
            self.network.notify_liveliness(|| Sample::delete(topic.clone()), topic);
        }
    }
}

#[async_trait]
impl Transport for SimTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.ensure_open()?;
        let sinks = matching(&self.network.read().subscribers, topic);
        trace!(topic, receivers = sinks.len(), "publish");
        for sink in sinks {
            // A closed sink means the subscription was undeclared mid-dispatch.
            let _ = sink.send(Sample::put(topic, payload.clone()));
        }
        Ok(())
    }

    async fn subscribe(&self, pattern: &str, callback: SampleCallback) -> Result<DeclarationId, TransportError> {
        self.ensure_open()?;
        let entry = self.entry(pattern, spawn_delivery(callback));
        let id = entry.id;
        self.network.write().subscribers.push(entry);
        debug!(session = self.session, %id, pattern, "subscribed");
        Ok(id)
    }

    async fn declare_queryable(
        &self,
        pattern: &str,
        callback: QueryCallback,
    ) -> Result<DeclarationId, TransportError> {
        self.ensure_open()?;
        let entry = self.entry(pattern, callback);
        let id = entry.id;
        self.network.write().queryables.push(entry);
        debug!(session = self.session, %id, pattern, "queryable declared");
        Ok(id)
    }

    async fn query(&self, topic: &str, payload: Vec<u8>) -> Result<ReplyStream, TransportError> {
        self.ensure_open()?;
        let (query, stream) = Query::new(topic, payload);
        let callbacks = matching(&self.network.read().queryables, topic);
        trace!(topic, queryables = callbacks.len(), "query");
        for callback in callbacks {
            let query = query.clone();
            tokio::spawn(async move { callback(query) });
        }
        Ok(stream)
    }

    async fn declare_token(&self, topic: &str) -> Result<DeclarationId, TransportError> {
        self.ensure_open()?;
        let entry = self.entry(topic, ());
        let id = entry.id;
        self.network.write().tokens.push(entry);
        self.network.notify_liveliness(|| Sample::put(topic, Vec::new()), topic);
        debug!(session = self.session, %id, topic, "liveliness token declared");
        Ok(id)
    }

    async fn subscribe_liveliness(
        &self,
        pattern: &str,
        callback: SampleCallback,
    ) -> Result<DeclarationId, TransportError> {
        self.ensure_open()?;
        let entry = self.entry(pattern, spawn_delivery(callback));
        let id = entry.id;
        self.network.write().liveliness.push(entry);
        Ok(id)
    }

    async fn query_liveliness(&self, pattern: &str) -> Result<Vec<String>, TransportError> {
        self.ensure_open()?;
        Ok(self
            .network
            .read()
            .tokens
            .iter()
            .filter(|e| overlap(&e.pattern, pattern))
            .map(|e| e.pattern.clone())
            .collect())
    }

    async fn undeclare(&self, id: DeclarationId) -> Result<(), TransportError> {
        self.ensure_open()?;
        let session = self.session;
        let (removed, tokens) = self.network.write().remove_where(|d, s| d == id && s == session);
        if removed == 0 {
            return Err(TransportError::UnknownDeclaration(id));
        }
        self.notify_removed_tokens(&tokens);
        debug!(session, %id, "undeclared");
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let session = self.session;
        let (removed, tokens) = self.network.write().remove_where(|_, s| s == session);
        self.notify_removed_tokens(&tokens);
        debug!(session, removed, "simulated session closed");
        Ok(())
    }
}
