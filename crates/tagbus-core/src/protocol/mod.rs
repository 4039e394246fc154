//! Protocol primitives shared by nodes and remote callers: response codes
//! and tables, parameter/body field maps, the reply frame codec, node
//! metadata and call-id generation.

pub mod codes;
pub mod error;
pub mod fields;
pub mod meta;
pub mod reply;
pub mod responses;
pub mod sequence;

pub use error::ProtocolError;
pub use fields::{
    decode_body, decode_parameters, encode_body, encode_parameters, fields_from_native, fields_to_native, Fields,
    Schema,
};
pub use meta::{ComponentMeta, MethodMeta, NodeMeta, SubnodeMeta, TagGroupMeta, TagMeta};
pub use reply::{ReplyFrame, REPLY_FORMAT_VERSION};
pub use responses::{ResponseKind, ResponseSpec, ResponseTable};
pub use sequence::CallIdCounter;
