//! Infrastructure: the transport the protocols run on.

pub mod transport;
