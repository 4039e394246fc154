//! Node addresses, topic builders and the inverse topic parser.
//!
//! Topic shapes (all segments `/`-delimited, markers are case-sensitive):
//! ```text
//! <prefix>/NODE/<name>                                         liveliness
//! <prefix>/NODE/<name>/META                                    metadata
//! <prefix>/NODE/<name>/STATE                                   online/offline
//! <prefix>/NODE/<name>/TAGS/DATA/<tag-path>                    tag broadcast
//! <prefix>/NODE/<name>/TAGS/WRITE/<tag-path>                   tag write
//! <prefix>/NODE/<name>/METHODS/<path>/<caller>/<call>          method call
//! <prefix>/NODE/<name>/METHODS/<path>/<caller>/<call>/RESPONSE method reply
//! <prefix>/NODE/<name>/SUBNODES/<sub>/...                      nesting
//! ```
//! Builders never trim or normalise: whitespace and empty segments are kept
//! verbatim, so parsing a built topic always yields the original parts.

use std::fmt;

use thiserror::Error;

use super::{DATA, META, METHODS, NODE, RESPONSE, SEPARATOR, STATE, SUBNODES, TAGS, WILDCARD, WRITE};

/// Errors produced while parsing a topic.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// The topic does not have the shape expected for its kind.
    #[error("malformed address {topic:?}: {reason}")]
    MalformedAddress { topic: String, reason: String },
}

fn malformed(topic: &str, reason: impl Into<String>) -> KeyError {
    KeyError::MalformedAddress {
        topic: topic.to_string(),
        reason: reason.into(),
    }
}

// ── Topic builders ────────────────────────────────────────────────────────────

/// Concatenates segments with `/`.
///
/// No trimming or normalisation happens; `join(["a", "", "b"])` is `"a//b"`.
///
/// # Examples
///
/// ```rust
/// use tagbus_core::keyspace::join;
///
/// assert_eq!(join(["realm", "NODE", "pump"]), "realm/NODE/pump");
/// assert_eq!(join(["a", "", " b"]), "a// b");
/// ```
pub fn join<I, S>(segments: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for (i, segment) in segments.into_iter().enumerate() {
        if i > 0 {
            out.push(SEPARATOR);
        }
        out.push_str(segment.as_ref());
    }
    out
}

/// `<prefix>/NODE/<name>`, also used as the node's liveliness token.
pub fn node_topic(prefix: &str, name: &str) -> String {
    join([prefix, NODE, name])
}

/// `<prefix>/NODE/<name>/META`
pub fn meta_topic(prefix: &str, name: &str) -> String {
    join([prefix, NODE, name, META])
}

/// `<prefix>/NODE/<name>/STATE`
pub fn state_topic(prefix: &str, name: &str) -> String {
    join([prefix, NODE, name, STATE])
}

/// `<prefix>/NODE/<name>/SUBNODES`
pub fn subnodes_topic(prefix: &str, name: &str) -> String {
    join([prefix, NODE, name, SUBNODES])
}

/// `<prefix>/NODE/<name>/TAGS/DATA/<path>`
pub fn tag_data_topic(prefix: &str, name: &str, path: &str) -> String {
    join([prefix, NODE, name, TAGS, DATA, path])
}

/// `<prefix>/NODE/<name>/TAGS/WRITE/<path>`
pub fn tag_write_topic(prefix: &str, name: &str, path: &str) -> String {
    join([prefix, NODE, name, TAGS, WRITE, path])
}

/// `<prefix>/NODE/<name>/METHODS/<path>/<caller_id>/<call_id>`
pub fn method_topic(prefix: &str, name: &str, path: &str, caller_id: &str, call_id: &str) -> String {
    join([prefix, NODE, name, METHODS, path, caller_id, call_id])
}

/// `<prefix>/NODE/<name>/METHODS/<path>/<caller_id>/<call_id>/RESPONSE`
pub fn method_response_topic(
    prefix: &str,
    name: &str,
    path: &str,
    caller_id: &str,
    call_id: &str,
) -> String {
    join([prefix, NODE, name, METHODS, path, caller_id, call_id, RESPONSE])
}

// ── Segment checks ────────────────────────────────────────────────────────────

const MARKERS: [&str; 9] = [NODE, META, STATE, TAGS, DATA, WRITE, METHODS, RESPONSE, SUBNODES];

/// Checks a tag, group or method path before it is declared.
///
/// A `*` segment would turn the declared topic into a pattern on matching
/// transports, so concrete paths must not contain one.
pub fn check_path(path: &str) -> Result<(), KeyError> {
    if path.split(SEPARATOR).any(|s| s == WILDCARD) {
        return Err(malformed(path, "path contains a wildcard segment"));
    }
    Ok(())
}

/// Checks a node or subnode name: one segment, neither `*` nor a marker.
pub fn check_name(name: &str) -> Result<(), KeyError> {
    if name.contains(SEPARATOR) {
        return Err(malformed(name, "name contains '/'"));
    }
    if name == WILDCARD {
        return Err(malformed(name, "name is a wildcard"));
    }
    if MARKERS.contains(&name) {
        return Err(malformed(name, "name is a reserved marker"));
    }
    Ok(())
}

/// Checks a realm prefix: no `NODE` or `*` segment.
pub fn check_prefix(prefix: &str) -> Result<(), KeyError> {
    for segment in prefix.split(SEPARATOR) {
        if segment == NODE {
            return Err(malformed(prefix, "prefix contains the NODE marker"));
        }
        if segment == WILDCARD {
            return Err(malformed(prefix, "prefix contains a wildcard segment"));
        }
    }
    Ok(())
}

// ── NodeAddress ───────────────────────────────────────────────────────────────

/// Immutable address of a node or of one of its (possibly nested) subnodes.
///
/// The root node is `(prefix, name)`; each entry of `subnodes` descends one
/// level through a `SUBNODES/<sub>` pair.  All topic builders on this type
/// include the subnode chain, except [`NodeAddress::liveliness_token`] which
/// always identifies the root node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeAddress {
    prefix: String,
    name: String,
    subnodes: Vec<String>,
}

impl NodeAddress {
    /// Creates the address of a root node.
    pub fn new(prefix: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            name: name.into(),
            subnodes: Vec::new(),
        }
    }

    /// Returns the address of the subnode `name` nested under `self`.
    pub fn subnode(&self, name: impl Into<String>) -> Self {
        let mut child = self.clone();
        child.subnodes.push(name.into());
        child
    }

    /// Returns the address of the root node this address belongs to.
    pub fn root(&self) -> Self {
        Self::new(self.prefix.clone(), self.name.clone())
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subnode chain from the root, outermost first.
    pub fn subnodes(&self) -> &[String] {
        &self.subnodes
    }

    pub fn is_subnode(&self) -> bool {
        !self.subnodes.is_empty()
    }

    /// Checks that every topic built from this address parses back to it.
    ///
    /// # Errors
    ///
    /// [`KeyError::MalformedAddress`] naming the offending prefix or name.
    pub fn validate(&self) -> Result<(), KeyError> {
        check_prefix(&self.prefix)?;
        check_name(&self.name)?;
        self.subnodes.iter().try_for_each(|sub| check_name(sub))
    }

    /// Topic of this node or subnode with no trailing section.
    pub fn base(&self) -> String {
        let mut segments: Vec<&str> = vec![&self.prefix, NODE, &self.name];
        for sub in &self.subnodes {
            segments.push(SUBNODES);
            segments.push(sub);
        }
        join(segments)
    }

    /// Liveliness token of the root node.
    pub fn liveliness_token(&self) -> String {
        node_topic(&self.prefix, &self.name)
    }

    pub fn meta(&self) -> String {
        join([self.base().as_str(), META])
    }

    pub fn state(&self) -> String {
        join([self.base().as_str(), STATE])
    }

    pub fn subnodes_topic(&self) -> String {
        join([self.base().as_str(), SUBNODES])
    }

    pub fn tag_data(&self, path: &str) -> String {
        join([self.base().as_str(), TAGS, DATA, path])
    }

    pub fn tag_write(&self, path: &str) -> String {
        join([self.base().as_str(), TAGS, WRITE, path])
    }

    pub fn method_call(&self, path: &str, caller_id: &str, call_id: &str) -> String {
        join([self.base().as_str(), METHODS, path, caller_id, call_id])
    }

    pub fn method_response(&self, path: &str, caller_id: &str, call_id: &str) -> String {
        join([self.base().as_str(), METHODS, path, caller_id, call_id, RESPONSE])
    }

    /// Pattern matching every call of `path`, from any caller.
    pub fn method_call_pattern(&self, path: &str) -> String {
        self.method_call(path, WILDCARD, WILDCARD)
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base())
    }
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// What a topic addresses, once the node part has been stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicKind {
    /// The node (or subnode) base topic itself.
    Node,
    Meta,
    State,
    Subnodes,
    TagData { path: String },
    TagWrite { path: String },
    MethodCall { path: String, caller_id: String, call_id: String },
    MethodResponse { path: String, caller_id: String, call_id: String },
}

/// A fully parsed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTopic {
    pub address: NodeAddress,
    pub kind: TopicKind,
}

/// Parses any topic produced by the builders in this module.
///
/// # Errors
///
/// Returns [`KeyError::MalformedAddress`] when a required marker segment is
/// missing or the segment count after a marker is wrong.
///
/// # Examples
///
/// ```rust
/// use tagbus_core::keyspace::{parse_topic, tag_data_topic, TopicKind};
///
/// let topic = tag_data_topic("plant/a", "pump", "flow/rate");
/// let parsed = parse_topic(&topic).unwrap();
/// assert_eq!(parsed.address.prefix(), "plant/a");
/// assert_eq!(parsed.address.name(), "pump");
/// assert_eq!(parsed.kind, TopicKind::TagData { path: "flow/rate".into() });
/// ```
pub fn parse_topic(topic: &str) -> Result<ParsedTopic, KeyError> {
    let segments: Vec<&str> = topic.split(SEPARATOR).collect();

    let node_idx = segments
        .iter()
        .position(|s| *s == NODE)
        .ok_or_else(|| malformed(topic, "missing NODE marker"))?;
    let name = segments
        .get(node_idx + 1)
        .ok_or_else(|| malformed(topic, "missing node name after NODE"))?;

    let mut address = NodeAddress::new(join(&segments[..node_idx]), *name);
    let mut rest = &segments[node_idx + 2..];
    while rest.len() >= 2 && rest[0] == SUBNODES {
        address.subnodes.push(rest[1].to_string());
        rest = &rest[2..];
    }

    let kind = match rest {
        [] => TopicKind::Node,
        [m] if *m == META => TopicKind::Meta,
        [m] if *m == STATE => TopicKind::State,
        [m] if *m == SUBNODES => TopicKind::Subnodes,
        [t, k, path @ ..] if *t == TAGS && *k == DATA && !path.is_empty() => TopicKind::TagData {
            path: join(path),
        },
        [t, k, path @ ..] if *t == TAGS && *k == WRITE && !path.is_empty() => TopicKind::TagWrite {
            path: join(path),
        },
        [t, ..] if *t == TAGS => {
            return Err(malformed(topic, "expected DATA or WRITE followed by a tag path"));
        }
        [m, path @ .., caller, call, r] if *m == METHODS && *r == RESPONSE && !path.is_empty() => {
            TopicKind::MethodResponse {
                path: join(path),
                caller_id: caller.to_string(),
                call_id: call.to_string(),
            }
        }
        [m, path @ .., caller, call] if *m == METHODS && !path.is_empty() => TopicKind::MethodCall {
            path: join(path),
            caller_id: caller.to_string(),
            call_id: call.to_string(),
        },
        [m, ..] if *m == METHODS => {
            return Err(malformed(topic, "expected <method-path>/<caller-id>/<call-id> after METHODS"));
        }
        [other, ..] => {
            return Err(malformed(topic, format!("unexpected segment {other:?} after node name")));
        }
    };

    Ok(ParsedTopic { address, kind })
}

/// Returns the node name of any node topic.
pub fn name_from_topic(topic: &str) -> Result<String, KeyError> {
    parse_topic(topic).map(|p| p.address.name)
}

/// Returns the realm prefix of any node topic.
pub fn prefix_from_topic(topic: &str) -> Result<String, KeyError> {
    parse_topic(topic).map(|p| p.address.prefix)
}

/// Returns the tag path of a `TAGS/DATA` or `TAGS/WRITE` topic.
pub fn tag_path_from_topic(topic: &str) -> Result<String, KeyError> {
    match parse_topic(topic)?.kind {
        TopicKind::TagData { path } | TopicKind::TagWrite { path } => Ok(path),
        _ => Err(malformed(topic, "missing TAGS marker")),
    }
}

/// Returns the method path of a method call topic.
pub fn method_path_from_call_topic(topic: &str) -> Result<String, KeyError> {
    match parse_topic(topic)?.kind {
        TopicKind::MethodCall { path, .. } => Ok(path),
        _ => Err(malformed(topic, "missing METHODS marker")),
    }
}

/// Returns the method path of a method response topic.
pub fn method_path_from_response_topic(topic: &str) -> Result<String, KeyError> {
    match parse_topic(topic)?.kind {
        TopicKind::MethodResponse { path, .. } => Ok(path),
        _ => Err(malformed(topic, "missing METHODS marker or RESPONSE suffix")),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_preserves_empty_and_whitespace_segments() {
        assert_eq!(join(["a", "", "b"]), "a//b");
        assert_eq!(join([" a ", "b"]), " a /b");
        assert_eq!(join(Vec::<String>::new()), "");
    }

    #[test]
    fn test_builders_produce_documented_shapes() {
        assert_eq!(node_topic("r", "n"), "r/NODE/n");
        assert_eq!(meta_topic("r", "n"), "r/NODE/n/META");
        assert_eq!(state_topic("r", "n"), "r/NODE/n/STATE");
        assert_eq!(subnodes_topic("r", "n"), "r/NODE/n/SUBNODES");
        assert_eq!(tag_data_topic("r", "n", "t/x"), "r/NODE/n/TAGS/DATA/t/x");
        assert_eq!(tag_write_topic("r", "n", "t"), "r/NODE/n/TAGS/WRITE/t");
        assert_eq!(method_topic("r", "n", "m", "c", "1"), "r/NODE/n/METHODS/m/c/1");
        assert_eq!(
            method_response_topic("r", "n", "m", "c", "1"),
            "r/NODE/n/METHODS/m/c/1/RESPONSE"
        );
    }

    #[test]
    fn test_subnode_address_nests_every_topic() {
        // Arrange
        let addr = NodeAddress::new("r", "n").subnode("arm").subnode("wrist");

        // Act / Assert
        assert_eq!(addr.base(), "r/NODE/n/SUBNODES/arm/SUBNODES/wrist");
        assert_eq!(addr.tag_data("angle"), "r/NODE/n/SUBNODES/arm/SUBNODES/wrist/TAGS/DATA/angle");
        assert_eq!(addr.liveliness_token(), "r/NODE/n");
        assert_eq!(addr.root(), NodeAddress::new("r", "n"));
    }

    #[test]
    fn test_parse_tag_write_topic_with_subnodes() {
        // Arrange
        let addr = NodeAddress::new("site/line", "press").subnode("ram");
        let topic = addr.tag_write("pressure/target");

        // Act
        let parsed = parse_topic(&topic).unwrap();

        // Assert
        assert_eq!(parsed.address, addr);
        assert_eq!(
            parsed.kind,
            TopicKind::TagWrite {
                path: "pressure/target".into()
            }
        );
    }

    #[test]
    fn test_parse_method_call_and_response_topics() {
        let call = method_topic("r", "n", "motion/home", "caller", "7");
        let parsed = parse_topic(&call).unwrap();
        assert_eq!(
            parsed.kind,
            TopicKind::MethodCall {
                path: "motion/home".into(),
                caller_id: "caller".into(),
                call_id: "7".into(),
            }
        );

        let response = method_response_topic("r", "n", "motion/home", "caller", "7");
        assert_eq!(method_path_from_response_topic(&response).unwrap(), "motion/home");
        assert_eq!(method_path_from_call_topic(&call).unwrap(), "motion/home");
    }

    #[test]
    fn test_parse_bare_node_meta_and_state() {
        assert_eq!(parse_topic("r/NODE/n").unwrap().kind, TopicKind::Node);
        assert_eq!(parse_topic("r/NODE/n/META").unwrap().kind, TopicKind::Meta);
        assert_eq!(parse_topic("r/NODE/n/STATE").unwrap().kind, TopicKind::State);
        assert_eq!(parse_topic("r/NODE/n/SUBNODES").unwrap().kind, TopicKind::Subnodes);
    }

    #[test]
    fn test_missing_node_marker_is_malformed() {
        let result = name_from_topic("r/node/n/META");
        assert!(matches!(result, Err(KeyError::MalformedAddress { .. })));
    }

    #[test]
    fn test_tag_path_from_method_topic_is_malformed() {
        let topic = method_topic("r", "n", "m", "c", "1");
        assert!(tag_path_from_topic(&topic).is_err());
    }

    #[test]
    fn test_tags_without_path_is_malformed() {
        assert!(parse_topic("r/NODE/n/TAGS/DATA").is_err());
        assert!(parse_topic("r/NODE/n/TAGS/READ/x").is_err());
    }

    #[test]
    fn test_methods_without_ids_is_malformed() {
        assert!(parse_topic("r/NODE/n/METHODS/m/c").is_err());
        assert!(method_path_from_call_topic("r/NODE/n/TAGS/DATA/x").is_err());
    }

    #[test]
    fn test_unknown_section_is_malformed() {
        let err = parse_topic("r/NODE/n/BOGUS").unwrap_err();
        assert!(err.to_string().contains("BOGUS"));
    }

    #[test]
    fn test_prefix_with_empty_segments_round_trips() {
        let topic = tag_data_topic("", "n", "t");
        assert_eq!(prefix_from_topic(&topic).unwrap(), "");
        let topic = tag_data_topic("a//b", "n", "t");
        assert_eq!(prefix_from_topic(&topic).unwrap(), "a//b");
    }

    #[test]
    fn test_wildcard_segment_in_path_is_rejected() {
        assert!(check_path("*").is_err());
        assert!(check_path("axis/*/pos").is_err());
        assert!(check_path("axis/pos*").is_ok());
        assert!(check_path("a//b").is_ok());
    }

    #[test]
    fn test_names_must_be_single_non_marker_segments() {
        assert!(check_name("press").is_ok());
        assert!(check_name("a/b").is_err());
        assert!(check_name("*").is_err());
        assert!(check_name("NODE").is_err());
        assert!(check_name("SUBNODES").is_err());
    }

    #[test]
    fn test_prefix_with_node_marker_does_not_round_trip_and_is_rejected() {
        // Arrange
        let address = NodeAddress::new("site/NODE/x", "press");

        // Act
        let parsed = parse_topic(&address.meta()).map(|p| p.address);

        // Assert
        assert_ne!(parsed, Ok(address.clone()));
        assert!(address.validate().is_err());
    }

    #[test]
    fn test_valid_address_round_trips_through_parse() {
        let address = NodeAddress::new("site/line", "press").subnode("ram");
        assert!(address.validate().is_ok());
        assert_eq!(parse_topic(&address.state()).unwrap().address, address);
    }

    #[test]
    fn test_subnode_names_are_validated() {
        let address = NodeAddress::new("site", "press").subnode("a/b");
        assert!(address.validate().is_err());
    }
}
