//! TOML description of a node: session identity, remote-client timeouts,
//! model lookup and the tags, methods, groups and subnodes it exposes.
//!
//! # File layout (for beginners)
//!
//! ```toml
//! [session]
//! prefix = "plant"
//! name = "press1"
//!
//! [remote]
//! call_timeout_ms = 2000
//!
//! [models]
//! dir = "models"
//! policy = "strict"
//!
//! [[tags]]
//! path = "temperature"
//! type = "float"
//!
//! [[tags]]
//! path = "setpoint"
//! type = "int"
//! writable = true
//! responses = [
//!     { code = 200, kind = "ok" },
//!     { code = 400, kind = "err" },
//! ]
//!
//! [[methods]]
//! path = "home"
//! parameters = { speed = "float" }
//! responses = [{ code = 200, kind = "ok" }]
//! ```
//!
//! Only `session.name` is required.  Every other field falls back to the
//! value of its `default_*` helper via `#[serde(default = "...")]`, so a
//! minimal file works and older files keep loading when fields are added.
//!
//! The `[[tags]]`, `[[methods]]`, `[[groups]]` and `[[subnodes]]` entries use
//! exactly the schema of the `META` document a running node serves.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tagbus_core::protocol::{ComponentMeta, MethodMeta, SubnodeMeta, TagGroupMeta, TagMeta};
use tagbus_core::{KeyError, PartialPolicy, ProtocolError, ValueError};
use thiserror::Error;

/// Errors raised while loading a node description or validating the node
/// built from it.  All of them surface before any network activity.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// Two tags, methods, groups or subnodes share a path in one component.
    #[error("duplicate {kind} {path:?}")]
    DuplicatePath { kind: &'static str, path: String },

    /// A writable tag or a method has no handler.
    #[error("{kind} {path:?} has no handler")]
    MissingHandler { kind: &'static str, path: String },

    /// A writable tag or a method has an empty response table.
    #[error("{kind} {path:?} has no response table")]
    MissingResponses { kind: &'static str, path: String },

    /// A handler was registered for a path that is not a writable tag or a
    /// method of the component.
    #[error("handler registered for unknown {kind} {path:?}")]
    UnknownHandlerTarget { kind: &'static str, path: String },

    /// A group member is not a writable tag of the same component.
    #[error("group {group:?} member {member:?} is not a writable tag")]
    InvalidGroupMember { group: String, member: String },

    /// A response table is inconsistent (reserved code, duplicate, INFO on
    /// a tag).
    #[error("invalid response table of {path:?}: {source}")]
    InvalidResponses {
        path: String,
        #[source]
        source: ProtocolError,
    },

    /// A referenced model could not be resolved.
    #[error("model resolution failed: {0}")]
    Model(#[from] ValueError),

    /// A prefix, name or declared path would not parse back from the topics
    /// built from it.
    #[error("invalid {kind} {value:?}: {source}")]
    InvalidKey {
        kind: &'static str,
        value: String,
        #[source]
        source: KeyError,
    },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level node description stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeFileConfig {
    pub session: SessionConfig,
    #[serde(default)]
    pub remote: RemoteSection,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub tags: Vec<TagMeta>,
    #[serde(default)]
    pub methods: Vec<MethodMeta>,
    #[serde(default)]
    pub groups: Vec<TagGroupMeta>,
    #[serde(default)]
    pub subnodes: Vec<SubnodeMeta>,
}

/// Identity of the node on the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// Realm prefix shared by cooperating nodes; may contain `/`.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    pub name: String,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Timeouts used when this process acts as a remote client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteSection {
    /// Longest wait for the next reply of a method call.
    #[serde(default = "default_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Longest wait for the reply to a tag write.
    #[serde(default = "default_timeout_ms")]
    pub write_timeout_ms: u64,
}

/// Where model definitions come from and how native values map onto them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ModelsConfig {
    /// Directory holding `<path>/<version>.toml` model files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub policy: PartialPolicy,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_prefix() -> String {
    "tagbus".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_timeout_ms() -> u64 {
    5000
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            call_timeout_ms: default_timeout_ms(),
            write_timeout_ms: default_timeout_ms(),
        }
    }
}

impl RemoteSection {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl NodeFileConfig {
    /// A description with defaults everywhere and nothing exposed.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            session: SessionConfig {
                prefix: default_prefix(),
                name: name.into(),
                log_level: default_log_level(),
            },
            remote: RemoteSection::default(),
            models: ModelsConfig::default(),
            tags: Vec::new(),
            methods: Vec::new(),
            groups: Vec::new(),
            subnodes: Vec::new(),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// The exposed part of the description as node metadata.
    pub fn component(&self) -> ComponentMeta {
        ComponentMeta {
            tags: self.tags.clone(),
            methods: self.methods.clone(),
            groups: self.groups.clone(),
            subnodes: self.subnodes.clone(),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Loads a node description from `path`.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read (a missing file is
/// an error: a node has no sensible default name) and [`ConfigError::Parse`]
/// if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<NodeFileConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    NodeFileConfig::from_toml_str(&content)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tagbus_core::{DataType, ResponseKind};

    const SAMPLE: &str = r#"
[session]
prefix = "plant/a"
name = "press1"

[models]
policy = "strict"

[[tags]]
path = "temperature"
type = "float"
properties = { unit = "C" }

[[tags]]
path = "setpoint"
type = "int"
writable = true
responses = [
    { code = 200, kind = "ok" },
    { code = 400, kind = "err", body = { limit = "int" } },
]

[[methods]]
path = "home"
description = "drive every axis to zero"
parameters = { speed = "float" }
responses = [
    { code = 202, kind = "info" },
    { code = 200, kind = "ok" },
]

[[groups]]
path = "all"
members = ["setpoint"]

[[subnodes]]
name = "axis"

[[subnodes.tags]]
path = "position"
type = "long"
"#;

    // ── Defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn test_minimal_file_gets_defaults() {
        // Arrange / Act
        let cfg = NodeFileConfig::from_toml_str("[session]\nname = \"n\"\n").unwrap();

        // Assert
        assert_eq!(cfg, NodeFileConfig::new("n"));
        assert_eq!(cfg.session.prefix, "tagbus");
        assert_eq!(cfg.session.log_level, "info");
        assert_eq!(cfg.remote.call_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.models.policy, PartialPolicy::Partial);
    }

    #[test]
    fn test_missing_session_name_is_a_parse_error() {
        let result = NodeFileConfig::from_toml_str("[session]\nprefix = \"p\"\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    // ── Full description ──────────────────────────────────────────────────────

    #[test]
    fn test_sample_file_parses_every_section() {
        // Arrange / Act
        let cfg = NodeFileConfig::from_toml_str(SAMPLE).unwrap();
        let component = cfg.component();

        // Assert
        assert_eq!(cfg.session.prefix, "plant/a");
        assert_eq!(cfg.models.policy, PartialPolicy::Strict);
        assert_eq!(component.tag("temperature").unwrap().data_type, DataType::FLOAT);
        let setpoint = component.tag("setpoint").unwrap();
        assert!(setpoint.writable);
        assert_eq!(setpoint.responses.lookup(400).unwrap().body["limit"], DataType::INT);
        let home = component.method("home").unwrap();
        assert_eq!(home.parameters["speed"], DataType::FLOAT);
        assert_eq!(home.responses.lookup(202).unwrap().kind, ResponseKind::Info);
        assert_eq!(component.group("all").unwrap().members, vec!["setpoint"]);
        let axis = component.descend(["axis"]).unwrap();
        assert_eq!(axis.tag("position").unwrap().data_type, DataType::LONG);
    }

    #[test]
    fn test_invalid_type_string_is_a_parse_error() {
        let content = "[session]\nname = \"n\"\n[[tags]]\npath = \"t\"\ntype = \"complex\"\n";
        assert!(matches!(NodeFileConfig::from_toml_str(content), Err(ConfigError::Parse(_))));
    }

    // ── Files ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_load_reads_description_from_disk() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("tagbus-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("node.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        // Act
        let loaded = load_config(&path).unwrap();

        // Assert
        assert_eq!(loaded, NodeFileConfig::from_toml_str(SAMPLE).unwrap());
        assert_eq!(loaded.session.name, "press1");
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        let path = Path::new("/nonexistent/tagbus/node.toml");
        assert!(matches!(load_config(path), Err(ConfigError::Io { .. })));
    }
}
