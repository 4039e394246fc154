//! Hierarchical key space: topic builders, the inverse parser, and the
//! wildcard-overlap predicate.
//!
//! Every topic is a `/`-delimited list of segments.  Literal upper-case
//! marker segments (`NODE`, `TAGS`, `METHODS`, `SUBNODES`, …) separate the
//! variable parts, so a topic can always be parsed back without lookahead
//! beyond the next marker.

pub mod address;
pub mod overlap;

pub use address::{
    check_name, check_path, check_prefix, join, meta_topic, method_path_from_call_topic,
    method_path_from_response_topic, method_response_topic, method_topic, name_from_topic, node_topic,
    parse_topic, prefix_from_topic, state_topic, subnodes_topic, tag_data_topic, tag_path_from_topic,
    tag_write_topic, KeyError, NodeAddress, ParsedTopic, TopicKind,
};
pub use overlap::{matches, overlap};

// ── Marker segments ───────────────────────────────────────────────────────────

/// Separator between topic segments.
pub const SEPARATOR: char = '/';

/// Single-segment wildcard.
pub const WILDCARD: &str = "*";

/// Marks the node name; everything before it is the realm prefix.
pub const NODE: &str = "NODE";

/// Node metadata document.
pub const META: &str = "META";

/// Online/offline state.
pub const STATE: &str = "STATE";

/// Tag section marker.
pub const TAGS: &str = "TAGS";

/// Tag value broadcast (follows [`TAGS`]).
pub const DATA: &str = "DATA";

/// Tag write request (follows [`TAGS`]).
pub const WRITE: &str = "WRITE";

/// Method section marker.
pub const METHODS: &str = "METHODS";

/// Final segment of a method response topic.
pub const RESPONSE: &str = "RESPONSE";

/// Subnode nesting marker.
pub const SUBNODES: &str = "SUBNODES";
