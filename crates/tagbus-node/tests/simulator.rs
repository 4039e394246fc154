//! Integration tests for the in-memory transport: delivery order, fan-out,
//! queries and liveliness, including node discovery on top of it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tagbus_core::ModelResolver;
use tagbus_node::infrastructure::transport::{Query, QueryCallback, Sample, SampleCallback, SampleKind};
use tagbus_node::{NodeBuilder, NodeEvent, Remote, RemoteConfig, SimNetwork, Transport, TransportError};
use tokio_test::assert_ok;

fn recorder() -> (SampleCallback, Arc<Mutex<Vec<Sample>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback: SampleCallback = Arc::new(move |s: Sample| sink.lock().unwrap().push(s));
    (callback, seen)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

fn remote(network: &SimNetwork) -> Remote {
    Remote::new(
        Arc::new(network.session()),
        Arc::new(ModelResolver::new()),
        RemoteConfig::default(),
    )
}

#[tokio::test]
async fn test_samples_reach_each_subscriber_in_publication_order() {
    // Arrange
    let network = SimNetwork::new();
    let publisher = network.session();
    let subscriber = network.session();
    let (callback, seen) = recorder();
    assert_ok!(subscriber.subscribe("plant/NODE/*/TAGS/DATA/t", callback).await);

    // Act
    for i in 0..200u32 {
        assert_ok!(publisher.publish("plant/NODE/n/TAGS/DATA/t", i.to_be_bytes().to_vec()).await);
    }
    settle().await;

    // Assert
    let payloads: Vec<Vec<u8>> = seen.lock().unwrap().iter().map(|s| s.payload.clone()).collect();
    let expected: Vec<Vec<u8>> = (0..200u32).map(|i| i.to_be_bytes().to_vec()).collect();
    assert_eq!(payloads, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_subscriber_does_not_hold_up_others() {
    // Arrange
    let network = SimNetwork::new();
    let session = network.session();
    let slow: SampleCallback = Arc::new(|_: Sample| std::thread::sleep(Duration::from_millis(300)));
    let (fast, seen) = recorder();
    assert_ok!(session.subscribe("a/*", slow).await);
    assert_ok!(session.subscribe("a/b", fast).await);

    // Act
    assert_ok!(session.publish("a/b", vec![1]).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Assert
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_every_matching_queryable_answers() {
    // Arrange
    let network = SimNetwork::new();
    let server = network.session();
    let client = network.session();
    for answer in [1u8, 2] {
        let callback: QueryCallback = Arc::new(move |q: Query| {
            let _ = q.reply(q.topic().to_string(), vec![answer]);
        });
        assert_ok!(server.declare_queryable("x/*", callback).await);
    }

    // Act
    let mut replies = assert_ok!(client.query("x/y", Vec::new()).await);
    let mut payloads = Vec::new();
    while let Some(reply) = replies.recv().await {
        payloads.push(reply.payload[0]);
    }

    // Assert
    payloads.sort();
    assert_eq!(payloads, vec![1, 2]);
}

#[tokio::test]
async fn test_query_without_queryable_ends_immediately() {
    let network = SimNetwork::new();
    let session = network.session();

    let mut replies = assert_ok!(session.query("nobody/home", Vec::new()).await);

    assert_eq!(assert_ok!(replies.recv_timeout(Duration::from_secs(1)).await), None);
}

#[tokio::test]
async fn test_liveliness_tokens_come_and_go() {
    // Arrange
    let network = SimNetwork::new();
    let owner = network.session();
    let watcher = network.session();
    let (callback, seen) = recorder();
    assert_ok!(watcher.subscribe_liveliness("plant/NODE/*", callback).await);

    // Act
    let token = assert_ok!(owner.declare_token("plant/NODE/press").await);
    settle().await;
    let alive = assert_ok!(watcher.query_liveliness("plant/NODE/*").await);
    assert_ok!(owner.undeclare(token).await);
    settle().await;

    // Assert
    assert_eq!(alive, vec!["plant/NODE/press".to_string()]);
    let kinds: Vec<SampleKind> = seen.lock().unwrap().iter().map(|s| s.kind).collect();
    assert_eq!(kinds, vec![SampleKind::Put, SampleKind::Delete]);
    assert!(assert_ok!(watcher.query_liveliness("plant/NODE/*").await).is_empty());
}

#[tokio::test]
async fn test_closing_a_session_drops_its_tokens() {
    let network = SimNetwork::new();
    let owner = network.session();
    let watcher = network.session();
    let (callback, seen) = recorder();
    assert_ok!(watcher.subscribe_liveliness("plant/NODE/*", callback).await);
    assert_ok!(owner.declare_token("plant/NODE/press").await);

    assert_ok!(owner.close().await);
    settle().await;

    assert_eq!(owner.declare_token("plant/NODE/press").await, Err(TransportError::Closed));
    let kinds: Vec<SampleKind> = seen.lock().unwrap().iter().map(|s| s.kind).collect();
    assert_eq!(kinds, vec![SampleKind::Put, SampleKind::Delete]);
}

#[tokio::test]
async fn test_nodes_are_listed_and_watched() {
    // Arrange
    let network = SimNetwork::new();
    let remote = remote(&network);
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let mut watch = assert_ok!(
        remote
            .watch_nodes("plant", move |event| sink.lock().unwrap().push(event))
            .await
    );

    // Act
    let mut sessions = Vec::new();
    for name in ["saw", "drill"] {
        let node = NodeBuilder::new("plant", name).build(&ModelResolver::new()).unwrap();
        sessions.push(assert_ok!(node.start(Arc::new(network.session())).await));
    }
    let listed = assert_ok!(remote.list_nodes("plant").await);
    assert_ok!(sessions[0].stop().await);
    settle().await;
    assert_ok!(watch.stop().await);

    // Assert
    assert_eq!(listed, vec!["drill".to_string(), "saw".to_string()]);
    assert_eq!(assert_ok!(remote.list_nodes("plant").await), vec!["drill".to_string()]);
    let events = events.lock().unwrap();
    assert_eq!(events.len(), 3);
    assert!(events.contains(&NodeEvent::Offline(tagbus_core::NodeAddress::new("plant", "saw"))));
    assert!(assert_ok!(remote.list_nodes("elsewhere").await).is_empty());
}
