//! Stand-in handlers for serving a node description without application code.
//!
//! - A writable tag accepts any value of its type, answers with its first
//!   OK-kind code and republishes the value.
//! - A method sends each of its INFO codes once, then its first OK-kind code
//!   (or the built-in `OK`).

use std::sync::Arc;

use tagbus_core::{codes, Fields, MethodMeta, ResponseKind, TagMeta};
use tagbus_node::{method_fn, tag_write_fn, ComponentBuilder, MethodHandler, TagWriteHandler};
use tracing::debug;

/// Installs demo handlers on every writable tag and method of `component`
/// and its subnodes.  Handlers already set are replaced.
pub fn install(component: &mut ComponentBuilder) {
    let tags: Vec<TagMeta> = component.tags().iter().filter(|t| t.writable).cloned().collect();
    for tag in tags {
        let path = tag.path.clone();
        component.set_write_handler(path, echo_write(&tag));
    }

    let methods: Vec<MethodMeta> = component.methods().to_vec();
    for method in methods {
        let path = method.path.clone();
        component.set_method_handler(path, scripted_method(&method));
    }

    let names: Vec<String> = component.subnode_names().map(str::to_string).collect();
    for name in names {
        if let Some(sub) = component.subnode_mut(&name) {
            install(sub);
        }
    }
}

/// Accepts the write and republishes the value.
pub fn echo_write(tag: &TagMeta) -> Arc<dyn TagWriteHandler> {
    let code = tag
        .responses
        .first_of_kind(ResponseKind::Ok)
        .or_else(|| tag.responses.iter().next())
        .map(|spec| spec.code)
        .unwrap_or(codes::CALLBACK_ERR);
    tag_write_fn(move |request, responder| async move {
        responder.reply_code(code)?;
        if code != codes::CALLBACK_ERR {
            request.publisher.publish(&request.path, &request.value).await?;
        }
        debug!(tag = %request.path, code, "demo write handled");
        Ok::<_, anyhow::Error>(())
    })
}

/// Walks through every INFO code, then finishes with an OK code.
pub fn scripted_method(method: &MethodMeta) -> Arc<dyn MethodHandler> {
    let infos: Arc<[i32]> = method
        .responses
        .iter()
        .filter(|spec| spec.kind == ResponseKind::Info)
        .map(|spec| spec.code)
        .collect();
    let ok = method
        .responses
        .first_of_kind(ResponseKind::Ok)
        .map(|spec| spec.code)
        .unwrap_or(codes::OK);
    method_fn(move |call, ctx| {
        let infos = Arc::clone(&infos);
        async move {
            for &code in infos.iter() {
                ctx.info(code, Fields::new()).await?;
            }
            ctx.ok(ok, Fields::new()).await?;
            debug!(method = %call.path, call_id = %call.call_id, "demo call handled");
            Ok::<_, anyhow::Error>(())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagbus_core::{DataType, ModelResolver, ResponseSpec, ResponseTable, Value};
    use tagbus_node::{NodeBuilder, Remote, RemoteConfig, SimNetwork};
    use tokio_test::assert_ok;

    fn builder() -> NodeBuilder {
        let table = ResponseTable::new().with(ResponseSpec::err(400)).with(ResponseSpec::ok(201));
        let method = MethodMeta::new("home").with_responses(
            ResponseTable::new()
                .with(ResponseSpec::info(301))
                .with(ResponseSpec::info(302)),
        );
        let mut builder = NodeBuilder::new("demo", "mill")
            .tag(TagMeta::new("speed", DataType::INT).writable(table.clone()))
            .subnode(
                "spindle",
                ComponentBuilder::new().tag(TagMeta::new("rpm", DataType::INT).writable(table)),
            )
            .method(method.clone(), scripted_method(&method));
        install(builder.root_mut());
        builder
    }

    #[tokio::test]
    async fn test_installed_handlers_serve_every_writable_tag_and_method() {
        // Arrange
        let network = SimNetwork::new();
        let node = builder().build(&ModelResolver::new()).unwrap();
        let _session = node.start(Arc::new(network.session())).await.unwrap();
        let remote = Remote::new(
            Arc::new(network.session()),
            Arc::new(ModelResolver::new()),
            RemoteConfig::default(),
        );
        let mill = assert_ok!(remote.node("demo", "mill").await);

        // Act
        let root = assert_ok!(mill.write_tag("speed", Value::Int(3)).await);
        let sub = assert_ok!(assert_ok!(mill.subnode("spindle")).write_tag("rpm", Value::Int(900)).await);
        let call = assert_ok!(mill.call_method("home", Fields::new()).await);
        let replies = assert_ok!(call.collect().await);

        // Assert
        assert_eq!(root.code, 201);
        assert_eq!(sub.code, 201);
        let seen: Vec<i32> = replies.iter().map(|r| r.code).collect();
        assert_eq!(seen, vec![301, 302, codes::OK]);
    }

    #[test]
    fn test_sample_description_builds_with_demo_handlers() {
        // Arrange
        let config = tagbus_node::NodeFileConfig::from_toml_str(include_str!("../demos/press.toml")).unwrap();
        let mut builder = NodeBuilder::from_config(&config);

        // Act
        install(builder.root_mut());
        let node = builder.build(&ModelResolver::new());

        // Assert
        let node = node.unwrap();
        assert_eq!(node.address().prefix(), "plant/hall-1");
        assert_eq!(node.meta().component.subnodes[0].name, "spindle");
    }

    #[test]
    fn test_install_reaches_nested_subnodes() {
        let mut builder = builder();
        install(builder.root_mut());
        assert!(builder.build(&ModelResolver::new()).is_ok());
    }
}
