//! # tagbus-core
//!
//! Shared library for tagbus containing the hierarchical key space, the typed
//! value model with its binary codec, and the protocol primitives used by
//! tag writes and method calls.
//!
//! This crate is used by both sides of the protocol: the *node* that owns
//! tags and methods, and the *remote* that discovers and calls into it.  It
//! has no async runtime and never touches the network.
//!
//! # Architecture overview
//!
//! Nodes are independent processes attached to a shared
//! publish/subscribe/query transport.  A node advertises typed data points
//! ("tags"), exposes remote-callable operations ("methods") and may nest
//! sub-components ("subnodes").  Everything a node does is addressed by a
//! `/`-delimited topic, and every payload is an encoded [`Value`].
//!
//! - **`keyspace`** – How addresses become topics and back.  Builders derive
//!   the `META`, `STATE`, `TAGS/DATA`, `TAGS/WRITE` and `METHODS` topics of a
//!   node; the parser reverses them; [`overlap`] decides whether two
//!   wildcarded topics can match the same message.
//!
//! - **`value`** – The typed value model.  A closed set of scalar and list
//!   types plus recursive, versioned *models*, encoded into a compact
//!   big-endian binary format and decoded back against a declared
//!   [`DataType`].
//!
//! - **`protocol`** – Response codes, reply frames, parameter/body field
//!   maps and the node metadata document served on `META`.

pub mod keyspace;
pub mod protocol;
pub mod value;

// Re-export the most-used types at the crate root so callers can write
// `tagbus_core::Value` instead of `tagbus_core::value::values::Value`.
pub use keyspace::{overlap, parse_topic, KeyError, NodeAddress, ParsedTopic, TopicKind};
pub use protocol::{
    codes, CallIdCounter, ComponentMeta, Fields, MethodMeta, NodeMeta, ProtocolError, ReplyFrame,
    ResponseKind, ResponseSpec, ResponseTable, Schema, SubnodeMeta, TagGroupMeta, TagMeta,
};
pub use value::{
    decode, encode, from_native, to_native, type_of, BaseType, DataType, ModelConfig, ModelField,
    MemoryModelStore, ModelItem, ModelRef, ModelResolver, ModelSpec, ModelStore, ModelValue, PartialPolicy, Value,
    ValueError,
};
