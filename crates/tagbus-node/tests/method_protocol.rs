//! Integration tests for the method protocol: a node served on a simulated
//! network, called through a `Remote` on another session.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tagbus_core::{codes, DataType, Fields, MethodMeta, ModelResolver, ProtocolError, ResponseSpec, ResponseTable, Value};
use tagbus_node::{method_fn, NodeBuilder, NodeSession, Remote, RemoteConfig, RemoteError, SimNetwork};
use tokio_test::assert_ok;

// ── Helpers ───────────────────────────────────────────────────────────────────

fn responses() -> ResponseTable {
    ResponseTable::new()
        .with(ResponseSpec::info(202).with_field("step", DataType::INT))
        .with(ResponseSpec::ok(200).with_field("result", DataType::INT))
        .with(ResponseSpec::err(500))
}

fn method(path: &str) -> MethodMeta {
    MethodMeta::new(path)
        .with_parameter("n", DataType::INT)
        .with_responses(responses())
}

fn n(value: i32) -> Fields {
    Fields::from([("n".to_string(), Value::Int(value))])
}

async fn serve(network: &SimNetwork, builder: NodeBuilder) -> NodeSession {
    let node = builder.build(&ModelResolver::new()).expect("node must build");
    node.start(Arc::new(network.session())).await.expect("node must start")
}

fn remote(network: &SimNetwork, call_timeout: Duration) -> Remote {
    let config = RemoteConfig {
        call_timeout,
        ..RemoteConfig::default()
    };
    Remote::new(Arc::new(network.session()), Arc::new(ModelResolver::new()), config)
}

/// `progress` emits `INFO(202, step=1)` then `OK(200, result=n*2)`.
fn progress_node() -> NodeBuilder {
    NodeBuilder::new("plant", "press").method(
        method("progress"),
        method_fn(|call, ctx| async move {
            let Some(Value::Int(n)) = call.parameters.get("n").cloned() else {
                anyhow::bail!("missing n");
            };
            ctx.info(202, Fields::from([("step".to_string(), Value::Int(1))])).await?;
            ctx.ok(200, Fields::from([("result".to_string(), Value::Int(n * 2))]))
                .await?;
            Ok::<_, anyhow::Error>(())
        }),
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_info_then_ok_arrive_in_order_and_iteration_stops() {
    // Arrange
    let network = SimNetwork::new();
    let _session = serve(&network, progress_node()).await;
    let node = assert_ok!(remote(&network, Duration::from_secs(2)).node("plant", "press").await);

    // Act
    let replies = assert_ok!(assert_ok!(node.call_method("progress", n(21)).await).collect().await);

    // Assert
    let codes: Vec<i32> = replies.iter().map(|r| r.code).collect();
    assert_eq!(codes, vec![202, 200]);
    assert_eq!(replies[0].body.get("step"), Some(&Value::Int(1)));
    assert_eq!(replies[1].body.get("result"), Some(&Value::Int(42)));
}

#[tokio::test]
async fn test_failing_handler_yields_one_callback_err_with_the_message() {
    // Arrange
    let network = SimNetwork::new();
    let builder = NodeBuilder::new("plant", "press").method(
        method("fail"),
        method_fn(|_, ctx| async move {
            ctx.info(202, Fields::new()).await?;
            Err::<(), _>(anyhow::anyhow!("hydraulic pressure lost"))
        }),
    );
    let _session = serve(&network, builder).await;
    let node = assert_ok!(remote(&network, Duration::from_secs(2)).node("plant", "press").await);

    // Act
    let replies = assert_ok!(assert_ok!(node.call_method("fail", n(1)).await).collect().await);

    // Assert
    assert_eq!(replies.len(), 2, "the INFO reply is kept before the terminal one");
    assert_eq!(replies[1].code, codes::CALLBACK_ERR);
    assert!(replies[1].reason().unwrap().contains("hydraulic pressure lost"));
}

#[tokio::test]
async fn test_panicking_handler_yields_callback_err() {
    let network = SimNetwork::new();
    let builder = NodeBuilder::new("plant", "press").method(
        method("panic"),
        method_fn(|_, _| async move {
            if true {
                panic!("valve stuck");
            }
            Ok::<_, anyhow::Error>(())
        }),
    );
    let _session = serve(&network, builder).await;
    let node = assert_ok!(remote(&network, Duration::from_secs(2)).node("plant", "press").await);

    let replies = assert_ok!(assert_ok!(node.call_method("panic", n(1)).await).collect().await);

    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].code, codes::CALLBACK_ERR);
    assert!(replies[0].reason().unwrap().contains("valve stuck"));
}

#[tokio::test]
async fn test_silent_handler_yields_one_err() {
    let network = SimNetwork::new();
    let builder = NodeBuilder::new("plant", "press").method(
        method("silent"),
        method_fn(|_, _| async move { Ok::<_, anyhow::Error>(()) }),
    );
    let _session = serve(&network, builder).await;
    let node = assert_ok!(remote(&network, Duration::from_secs(2)).node("plant", "press").await);

    let replies = assert_ok!(assert_ok!(node.call_method("silent", n(1)).await).collect().await);

    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].code, codes::ERR);
    assert!(replies[0].is_terminal());
}

#[tokio::test]
async fn test_handler_that_never_replies_times_out() {
    // Arrange
    let network = SimNetwork::new();
    let builder = NodeBuilder::new("plant", "press").method(
        method("hang"),
        method_fn(|_, _| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, anyhow::Error>(())
        }),
    );
    let _session = serve(&network, builder).await;
    let node = assert_ok!(remote(&network, Duration::from_millis(100)).node("plant", "press").await);
    let mut call = assert_ok!(node.call_method("hang", n(1)).await);

    // Act
    let started = Instant::now();
    let result = call.next_reply().await;

    // Assert
    assert!(matches!(result, Err(RemoteError::CallTimeout { .. })));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(call.is_finished());
    assert!(assert_ok!(call.next_reply().await).is_none());
}

#[tokio::test]
async fn test_missing_or_extra_parameters_are_rejected_before_sending() {
    let network = SimNetwork::new();
    let _session = serve(&network, progress_node()).await;
    let node = assert_ok!(remote(&network, Duration::from_secs(2)).node("plant", "press").await);

    let missing = node.call_method("progress", Fields::new()).await;
    let mut extra = n(1);
    extra.insert("speed".to_string(), Value::Float(1.0));
    let extra = node.call_method("progress", extra).await;

    assert!(matches!(
        missing,
        Err(RemoteError::Protocol(ProtocolError::ParameterMismatch { .. }))
    ));
    assert!(matches!(
        extra,
        Err(RemoteError::Protocol(ProtocolError::ParameterMismatch { .. }))
    ));
}

#[tokio::test]
async fn test_unknown_method_is_rejected() {
    let network = SimNetwork::new();
    let _session = serve(&network, progress_node()).await;
    let node = assert_ok!(remote(&network, Duration::from_secs(2)).node("plant", "press").await);

    let result = node.call_method("nope", Fields::new()).await;

    assert!(matches!(result, Err(RemoteError::UnknownMethod(path)) if path == "nope"));
}

#[tokio::test]
async fn test_concurrent_calls_do_not_interleave() {
    // Arrange
    let network = SimNetwork::new();
    let builder = NodeBuilder::new("plant", "press").method(
        method("count"),
        method_fn(|call, ctx| async move {
            let Some(Value::Int(n)) = call.parameters.get("n").cloned() else {
                anyhow::bail!("missing n");
            };
            for step in 0..3 {
                ctx.info(202, Fields::from([("step".to_string(), Value::Int(n + step))]))
                    .await?;
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            ctx.ok(200, Fields::from([("result".to_string(), Value::Int(n))]))
                .await?;
            Ok::<_, anyhow::Error>(())
        }),
    );
    let _session = serve(&network, builder).await;
    let node = assert_ok!(remote(&network, Duration::from_secs(2)).node("plant", "press").await);

    // Act
    let first = assert_ok!(node.call_method("count", n(100)).await);
    let second = assert_ok!(node.call_method("count", n(200)).await);
    assert_ne!(first.call_id(), second.call_id());
    let (first, second) = tokio::join!(first.collect(), second.collect());

    // Assert
    let steps = |replies: &[tagbus_core::ReplyFrame]| -> Vec<Value> {
        replies.iter().filter_map(|r| r.body.values().next().cloned()).collect()
    };
    let first = assert_ok!(first);
    let second = assert_ok!(second);
    assert_eq!(
        steps(&first),
        vec![Value::Int(100), Value::Int(101), Value::Int(102), Value::Int(100)]
    );
    assert_eq!(
        steps(&second),
        vec![Value::Int(200), Value::Int(201), Value::Int(202), Value::Int(200)]
    );
}

#[tokio::test]
async fn test_replies_are_buffered_while_the_caller_is_not_reading() {
    // Arrange
    let network = SimNetwork::new();
    let _session = serve(&network, progress_node()).await;
    let node = assert_ok!(remote(&network, Duration::from_secs(2)).node("plant", "press").await);
    let mut call = assert_ok!(node.call_method("progress", n(1)).await);

    // Act
    let first = assert_ok!(call.next_reply().await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let rest: Vec<_> = call.into_stream().collect().await;

    // Assert
    assert_eq!(first.map(|r| r.code), Some(202));
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].as_ref().map(|r| r.code).ok(), Some(200));
}

#[tokio::test]
async fn test_abandoned_call_yields_nothing_more() {
    let network = SimNetwork::new();
    let _session = serve(&network, progress_node()).await;
    let node = assert_ok!(remote(&network, Duration::from_secs(2)).node("plant", "press").await);
    let mut call = assert_ok!(node.call_method("progress", n(1)).await);

    call.abandon().await;

    assert!(call.is_finished());
    assert!(assert_ok!(call.next_reply().await).is_none());
}

#[tokio::test]
async fn test_native_parameters_are_converted_against_the_method_schema() {
    let network = SimNetwork::new();
    let _session = serve(&network, progress_node()).await;
    let node = assert_ok!(remote(&network, Duration::from_secs(2)).node("plant", "press").await);
    let native = serde_json::json!({ "n": 5 });

    let call = assert_ok!(node.call_method_native("progress", native.as_object().unwrap()).await);
    let replies = assert_ok!(call.collect().await);

    assert_eq!(replies.last().and_then(|r| r.body.get("result")), Some(&Value::Int(10)));
}
