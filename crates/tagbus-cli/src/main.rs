//! `tagbus-sim`: serves a node description on an in-memory network and
//! drives it through a remote client, one command per run.
//!
//! # What happens on every run
//!
//! ```text
//! main()
//!  ├─ load_config(--config)          node description + timeouts + log level
//!  ├─ NodeBuilder::from_config       demo handlers installed on every
//!  │                                 writable tag and method
//!  ├─ Node::start(SimNetwork)        META, STATE, writes, methods, token
//!  ├─ Remote::node(prefix, name)     fetch and resolve META
//!  ├─ <command>                      meta | list | read | write | call | infer
//!  └─ NodeSession::stop()
//! ```
//!
//! Results go to stdout as JSON; logs go to stderr.

mod demo;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{json, Value as Native};
use tagbus_core::protocol::fields_to_native;
use tagbus_core::{to_native, type_of, ModelResolver, ReplyFrame};
use tagbus_node::{load_config, NodeBuilder, NodeHandle, Remote, RemoteConfig, SimNetwork};
use tracing::info;
use tracing_subscriber::EnvFilter;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Serve a tagbus node description on a simulated network and talk to it.
#[derive(Debug, Parser)]
#[command(name = "tagbus-sim", version)]
struct Cli {
    /// Node description file (TOML).
    #[arg(long, env = "TAGBUS_CONFIG")]
    config: PathBuf,

    /// Directory holding `<path>/<version>.toml` model files.  Overrides
    /// `[models] dir` of the configuration.
    #[arg(long, env = "TAGBUS_MODELS")]
    models: Option<PathBuf>,

    /// Subnode to address, outermost first.  Repeat for nested subnodes.
    #[arg(long = "subnode", global = true)]
    subnodes: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the node's META document.
    Meta,
    /// List the nodes alive under the node's prefix.
    List,
    /// Wait for the next value of a tag.
    Read {
        tag: String,
        /// How long to wait for a value.
        #[arg(long, default_value_t = 1000)]
        wait_ms: u64,
    },
    /// Write a JSON value to a tag, or a JSON object to a tag group.
    Write { tag: String, value: String },
    /// Call a method with a JSON object of parameters.
    Call {
        method: String,
        #[arg(default_value = "{}")]
        parameters: String,
    },
    /// Print the data type inferred for a JSON value.
    Infer { value: String },
}

fn parse_json(text: &str) -> anyhow::Result<Native> {
    serde_json::from_str(text).with_context(|| format!("invalid JSON: {text}"))
}

fn reply_json(frame: &ReplyFrame) -> Native {
    json!({
        "code": frame.code,
        "kind": frame.kind,
        "body": fields_to_native(&frame.body),
    })
}

fn print(value: &Native) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn infer(value: &str) -> anyhow::Result<()> {
    let data_type = type_of(&parse_json(value)?)?;
    println!("{data_type}");
    Ok(())
}

// ── Commands ──────────────────────────────────────────────────────────────────

async fn run(command: Command, remote: &Remote, node: &NodeHandle) -> anyhow::Result<()> {
    match command {
        Command::Meta => print(&serde_json::to_value(node.meta())?),
        Command::List => {
            let names = remote.list_nodes(node.address().prefix()).await?;
            print(&json!(names))
        }
        Command::Read { tag, wait_ms } => {
            let mut bind = node.bind_tag(&tag).await?;
            let value = tokio::time::timeout(Duration::from_millis(wait_ms), bind.changed()).await;
            bind.close().await?;
            match value {
                Ok(value) => print(&to_native(&value?)),
                Err(_) => anyhow::bail!("no value published on {tag} within {wait_ms} ms"),
            }
        }
        Command::Write { tag, value } => {
            let native = parse_json(&value)?;
            if node.groups().iter().any(|g| g.path == tag) {
                let object = native
                    .as_object()
                    .with_context(|| format!("group write to {tag} needs a JSON object"))?;
                let replies = node.write_group_native(&tag, object).await?;
                let replies: serde_json::Map<String, Native> = replies
                    .iter()
                    .map(|(member, frame)| (member.clone(), reply_json(frame)))
                    .collect();
                print(&Native::Object(replies))
            } else {
                let reply = node.write_tag_native(&tag, &native).await?;
                print(&reply_json(&reply))
            }
        }
        Command::Call { method, parameters } => {
            let native = parse_json(&parameters)?;
            let object = native
                .as_object()
                .with_context(|| format!("parameters of {method} must be a JSON object"))?;
            let mut call = node.call_method_native(&method, object).await?;
            while let Some(frame) = call.next_reply().await? {
                print(&reply_json(&frame))?;
            }
            Ok(())
        }
        Command::Infer { value } => infer(&value),
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Type inference needs no node.
    if let Command::Infer { value } = &cli.command {
        return infer(value);
    }

    let config = load_config(&cli.config).with_context(|| format!("loading {}", cli.config.display()))?;

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.session.log_level)),
        )
        .init();

    let mut resolver = ModelResolver::new();
    if let Some(dir) = cli.models.clone().or_else(|| config.models.dir.clone()) {
        resolver = resolver.with_dir(dir);
    }
    let resolver = Arc::new(resolver);

    let mut builder = NodeBuilder::from_config(&config);
    demo::install(builder.root_mut());
    let node = builder.build(&resolver)?;

    let network = SimNetwork::new();
    let session = node.start(Arc::new(network.session())).await?;
    info!(node = %session.address(), "node serving on simulated network");

    let remote = Remote::new(Arc::new(network.session()), resolver, RemoteConfig::from(&config));
    let result: anyhow::Result<()> = async {
        let mut handle = remote.node(&config.session.prefix, &config.session.name).await?;
        for name in &cli.subnodes {
            handle = handle.subnode(name)?;
        }
        run(cli.command, &remote, &handle).await
    }
    .await;

    session.stop().await?;
    info!("node stopped");
    result
}

// ── Tests ─────────────────────────────────────────────────────────────────────
