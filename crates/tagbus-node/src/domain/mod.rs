//! Domain layer: the on-disk description of a node and the errors raised
//! while turning it into a running node.

pub mod config;
