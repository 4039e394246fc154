//! Integration tests for the key space: every builder parses back to its
//! inputs, and the overlap predicate agrees with the routing examples the
//! transport relies on.

use tagbus_core::keyspace::{
    meta_topic, method_path_from_call_topic, method_path_from_response_topic, method_response_topic, method_topic,
    name_from_topic, node_topic, overlap, parse_topic, prefix_from_topic, state_topic, tag_data_topic,
    tag_path_from_topic, tag_write_topic, KeyError, NodeAddress, TopicKind,
};

const PREFIXES: [&str; 3] = ["plant", "site/a/b", "x y"];
const NAMES: [&str; 3] = ["press1", "robot-7", "n"];
const PATHS: [&str; 3] = ["temp", "axis/1/pos", "a b/c"];

#[test]
fn test_address_round_trip_for_all_builders() {
    for prefix in PREFIXES {
        for name in NAMES {
            assert_eq!(name_from_topic(&node_topic(prefix, name)).unwrap(), name);
            assert_eq!(prefix_from_topic(&meta_topic(prefix, name)).unwrap(), prefix);
            assert_eq!(parse_topic(&state_topic(prefix, name)).unwrap().kind, TopicKind::State);
            for path in PATHS {
                assert_eq!(tag_path_from_topic(&tag_data_topic(prefix, name, path)).unwrap(), path);
                assert_eq!(tag_path_from_topic(&tag_write_topic(prefix, name, path)).unwrap(), path);
                assert_eq!(
                    method_path_from_call_topic(&method_topic(prefix, name, path, "c", "1")).unwrap(),
                    path
                );
                assert_eq!(
                    method_path_from_response_topic(&method_response_topic(prefix, name, path, "c", "1")).unwrap(),
                    path
                );
            }
        }
    }
}

#[test]
fn test_subnode_addresses_round_trip() {
    // Arrange
    let address = NodeAddress::new("plant", "press1").subnode("axis").subnode("x");

    // Act
    let parsed = parse_topic(&address.tag_write("pos")).unwrap();

    // Assert
    assert_eq!(parsed.address, address);
    assert_eq!(parsed.kind, TopicKind::TagWrite { path: "pos".into() });
    assert_eq!(address.liveliness_token(), node_topic("plant", "press1"));
}

#[test]
fn test_overlap_reference_cases() {
    assert!(overlap("*/NODE/name", "*/NODE/name"));
    assert!(!overlap("a/*/c", "a/*/d"));
    assert!(!overlap("1/2/3", "1/2"));
    assert!(overlap("a/*/c", "a/b/*"));
    assert!(overlap("*", "anything"));
    assert!(!overlap("*", "two/segments"));
}

#[test]
fn test_method_call_pattern_matches_calls_but_not_responses() {
    let address = NodeAddress::new("plant", "press1");
    let pattern = address.method_call_pattern("home");
    assert!(overlap(&pattern, &address.method_call("home", "caller", "3")));
    assert!(!overlap(&pattern, &address.method_response("home", "caller", "3")));
    assert!(!overlap(&pattern, &address.method_call("home/all", "caller", "3")));
}

#[test]
fn test_missing_markers_are_malformed() {
    for topic in ["plant/press1/META", "plant/NODE/press1/TAGS/READ/x", "plant/NODE/press1/METHODS/x"] {
        assert!(
            matches!(parse_topic(topic), Err(KeyError::MalformedAddress { .. })),
            "{topic} should be malformed"
        );
    }
    assert!(tag_path_from_topic(&meta_topic("p", "n")).is_err());
}
