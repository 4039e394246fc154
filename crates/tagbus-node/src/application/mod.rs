//! Application layer: the node runtime and the remote client.
//!
//! - [`builder`] validates a node description and attaches handlers.
//! - [`node`] runs a built node on a transport.
//! - [`tag_write`] and [`method_call`] hold the handler traits and the
//!   server side of the two request/reply protocols.
//! - [`remote`] discovers nodes and drives them from the caller side.
//! - [`bind`] mirrors a tag's last value, locally or remotely.

pub mod bind;
pub mod builder;
pub mod method_call;
pub mod node;
pub mod remote;
pub mod tag_write;

use std::any::Any;

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}
