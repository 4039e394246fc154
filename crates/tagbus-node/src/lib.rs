//! # tagbus-node
//!
//! Async runtime for tagbus: serving a node's tags and methods, calling into
//! other nodes, and an in-memory transport for running both without a
//! network.
//!
//! # Layers (for beginners)
//!
//! - **`domain`** – The node description file: what a node exposes, read
//!   from TOML.  Plain data, no I/O beyond loading the file.
//! - **`application`** – The protocols.  [`application::builder`] validates
//!   a node description together with its handlers, [`application::node`]
//!   serves it, [`application::remote`] is the caller side and
//!   [`application::bind`] keeps a live mirror of one tag.
//! - **`infrastructure`** – The [`Transport`] abstraction the protocols run
//!   on, and [`SimNetwork`], an in-process implementation with exact
//!   wildcard matching and per-subscriber FIFO delivery.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::bind::{BindError, TagBind};
pub use application::builder::{ComponentBuilder, NodeBuilder};
pub use application::method_call::{method_fn, MethodCall, MethodContext, MethodHandler, ReplyDisposition};
pub use application::node::{Node, NodeSession, NodeState, SessionError, TagPublisher};
pub use application::remote::{
    MethodCallStream, NodeEvent, NodeHandle, NodeWatch, Remote, RemoteConfig, RemoteError,
};
pub use application::tag_write::{tag_write_fn, ReplyError, TagResponder, TagWriteHandler, TagWriteRequest};
pub use domain::config::{load_config, ConfigError, NodeFileConfig};
pub use infrastructure::transport::sim::{SimNetwork, SimTransport};
pub use infrastructure::transport::{Transport, TransportError};
