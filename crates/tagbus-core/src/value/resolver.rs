//! Model resolution: turning `path@version` references into embedded
//! definitions.
//!
//! # Where do models come from? (for beginners)
//!
//! A tag typed `model:geometry/pose@1.0` only carries a pointer.  Before a
//! value of that type can be decoded, the full definition must be known.
//! [`ModelResolver`] looks for it, in order:
//!
//! 1. definitions registered with [`ModelResolver::insert`] (and everything
//!    it has already loaded),
//! 2. the model directory, at `<dir>/<path>/<version>.toml`,
//! 3. a [`ModelStore`] collaborator, typically a remote model registry.
//!
//! The resolver is an explicit object: create one per application and pass
//! it to whatever needs it.  There is no process-wide model cache.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use super::data_type::{DataType, ModelSpec};
use super::error::ValueError;
use super::model::{ModelConfig, ModelItem, ModelRef};

/// Maximum model nesting depth.  Deeper chains are almost always cycles.
pub const MAX_MODEL_DEPTH: usize = 32;

/// Source of model definitions the resolver falls back to.
#[cfg_attr(test, mockall::automock)]
pub trait ModelStore: Send + Sync {
    /// Loads the definition of `path@version`.
    ///
    /// Return [`ValueError::ModelNotFound`] when the store has no such model.
    fn load_model(&self, path: &str, version: &str) -> Result<ModelConfig, ValueError>;
}

/// In-memory [`ModelStore`], handy for tests and for serving models that
/// were received from elsewhere.
#[derive(Debug, Default)]
pub struct MemoryModelStore {
    models: Mutex<HashMap<ModelRef, ModelConfig>>,
}

impl MemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, config: ModelConfig) {
        let mut models = self.models.lock().unwrap_or_else(PoisonError::into_inner);
        models.insert(config.model_ref(), config);
    }
}

impl ModelStore for MemoryModelStore {
    fn load_model(&self, path: &str, version: &str) -> Result<ModelConfig, ValueError> {
        let reference = ModelRef::new(path, version);
        let models = self.models.lock().unwrap_or_else(PoisonError::into_inner);
        models.get(&reference).cloned().ok_or_else(|| ValueError::ModelNotFound {
            reference: reference.to_string(),
            reason: "not in store".to_string(),
        })
    }
}

/// Resolves model references against a cache, a directory and a store.
#[derive(Default)]
pub struct ModelResolver {
    /// Definitions as registered or loaded; may still contain references.
    raw: Mutex<HashMap<ModelRef, ModelConfig>>,
    /// Fully embedded definitions.
    resolved: Mutex<HashMap<ModelRef, Arc<ModelConfig>>>,
    dir: Option<PathBuf>,
    store: Option<Arc<dyn ModelStore>>,
}

impl ModelResolver {
    /// A resolver that only knows models registered with [`insert`](Self::insert).
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a model directory.
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Adds a fallback store.
    pub fn with_store(mut self, store: Arc<dyn ModelStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Registers a definition.  A later registration of the same
    /// `path@version` replaces the earlier one and invalidates the resolved
    /// cache.
    pub fn insert(&self, config: ModelConfig) {
        let mut raw = self.raw.lock().unwrap_or_else(PoisonError::into_inner);
        raw.insert(config.model_ref(), config);
        self.resolved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Returns the definition of `reference` with every nested reference
    /// embedded.
    ///
    /// # Errors
    ///
    /// - [`ValueError::ModelNotFound`] if neither the cache, the directory nor
    ///   the store knows the model.
    /// - [`ValueError::ModelTooDeep`] for nesting beyond [`MAX_MODEL_DEPTH`].
    /// - [`ValueError::InvalidModel`] for malformed model files.
    pub fn resolve(&self, reference: &ModelRef) -> Result<Arc<ModelConfig>, ValueError> {
        self.resolve_at(reference, 0)
    }

    /// Replaces every model reference inside `data_type` by its embedded
    /// definition.  Base and list types are returned unchanged.
    pub fn resolve_type(&self, data_type: &DataType) -> Result<DataType, ValueError> {
        self.resolve_type_at(data_type, 0)
    }

    fn resolve_type_at(&self, data_type: &DataType, depth: usize) -> Result<DataType, ValueError> {
        match data_type {
            DataType::Base(_) | DataType::List(_) => Ok(data_type.clone()),
            DataType::Model(ModelSpec::Reference(r)) => {
                Ok(DataType::Model(ModelSpec::Embedded(self.resolve_at(r, depth + 1)?)))
            }
            DataType::Model(ModelSpec::Embedded(config)) if config.is_resolved() => Ok(data_type.clone()),
            DataType::Model(ModelSpec::Embedded(config)) => Ok(DataType::Model(ModelSpec::Embedded(
                Arc::new(self.embed(config, depth + 1)?),
            ))),
        }
    }

    fn resolve_at(&self, reference: &ModelRef, depth: usize) -> Result<Arc<ModelConfig>, ValueError> {
        if depth > MAX_MODEL_DEPTH {
            return Err(ValueError::ModelTooDeep {
                reference: reference.to_string(),
                limit: MAX_MODEL_DEPTH,
            });
        }
        if let Some(hit) = self
            .resolved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(reference)
        {
            return Ok(Arc::clone(hit));
        }

        let raw = self.load(reference)?;
        let resolved = Arc::new(self.embed(&raw, depth)?);
        self.resolved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(reference.clone(), Arc::clone(&resolved));
        Ok(resolved)
    }

    fn embed(&self, config: &ModelConfig, depth: usize) -> Result<ModelConfig, ValueError> {
        let items = config
            .items
            .iter()
            .map(|item| {
                Ok(ModelItem {
                    name: item.name.clone(),
                    data_type: self.resolve_type_at(&item.data_type, depth)?,
                    properties: item.properties.clone(),
                })
            })
            .collect::<Result<Vec<_>, ValueError>>()?;
        Ok(ModelConfig {
            path: config.path.clone(),
            version: config.version.clone(),
            items,
            properties: config.properties.clone(),
        })
    }

    /// Finds the raw definition of `reference`, caching directory and store
    /// hits.
    fn load(&self, reference: &ModelRef) -> Result<ModelConfig, ValueError> {
        if let Some(config) = self
            .raw
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(reference)
        {
            return Ok(config.clone());
        }

        let config = match self.load_from_dir(reference)? {
            Some(config) => config,
            None => self.load_from_store(reference)?,
        };
        if config.model_ref() != *reference {
            return Err(ValueError::InvalidModel {
                path: reference.to_string(),
                reason: format!("definition declares {}", config.model_ref()),
            });
        }
        config.validate()?;

        self.raw
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(reference.clone(), config.clone());
        Ok(config)
    }

    fn load_from_dir(&self, reference: &ModelRef) -> Result<Option<ModelConfig>, ValueError> {
        let Some(dir) = &self.dir else {
            return Ok(None);
        };
        let file = dir.join(&reference.path).join(format!("{}.toml", reference.version));
        let content = match std::fs::read_to_string(&file) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ValueError::ModelNotFound {
                    reference: reference.to_string(),
                    reason: format!("{}: {e}", file.display()),
                })
            }
        };
        debug!(model = %reference, file = %file.display(), "loaded model from directory");
        ModelConfig::from_toml_str(&content)
            .map(Some)
            .map_err(|e| ValueError::InvalidModel {
                path: file.display().to_string(),
                reason: e.to_string(),
            })
    }

    fn load_from_store(&self, reference: &ModelRef) -> Result<ModelConfig, ValueError> {
        let Some(store) = &self.store else {
            return Err(ValueError::ModelNotFound {
                reference: reference.to_string(),
                reason: "no model directory entry and no model store".to_string(),
            });
        };
        let config = store.load_model(&reference.path, &reference.version)?;
        debug!(model = %reference, "loaded model from store");
        Ok(config)
    }
}

impl std::fmt::Debug for ModelResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelResolver")
            .field("dir", &self.dir)
            .field("store", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    fn point() -> ModelConfig {
        ModelConfig::new("geo/point", "1")
            .with_item("x", DataType::FLOAT)
            .with_item("y", DataType::FLOAT)
    }

    fn pose() -> ModelConfig {
        ModelConfig::new("geo/pose", "1")
            .with_item("position", DataType::model_ref("geo/point", "1"))
            .with_item("heading", DataType::FLOAT)
    }

    #[test]
    fn test_inserted_references_are_embedded() {
        // Arrange
        let resolver = ModelResolver::new();
        resolver.insert(point());
        resolver.insert(pose());

        // Act
        let resolved = resolver.resolve(&ModelRef::new("geo/pose", "1")).unwrap();

        // Assert
        assert!(resolved.is_resolved());
        let (_, position) = resolved.item("position").unwrap();
        let inner = match &position.data_type {
            DataType::Model(spec) => spec.config().unwrap(),
            other => panic!("unexpected type {other}"),
        };
        assert_eq!(inner.items.len(), 2);
    }

    #[test]
    fn test_store_is_consulted_once_then_cached() {
        // Arrange
        let mut store = MockModelStore::new();
        store
            .expect_load_model()
            .with(eq("geo/point"), eq("1"))
            .times(1)
            .returning(|_, _| Ok(point()));
        let resolver = ModelResolver::new().with_store(Arc::new(store));
        let reference = ModelRef::new("geo/point", "1");

        // Act
        let first = resolver.resolve(&reference).unwrap();
        let second = resolver.resolve(&reference).unwrap();

        // Assert
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_missing_model_is_not_found() {
        let mut store = MockModelStore::new();
        store.expect_load_model().returning(|path, version| {
            Err(ValueError::ModelNotFound {
                reference: format!("{path}@{version}"),
                reason: "404".into(),
            })
        });
        let resolver = ModelResolver::new().with_store(Arc::new(store));

        let err = resolver.resolve(&ModelRef::new("nope", "1")).unwrap_err();
        assert!(matches!(err, ValueError::ModelNotFound { .. }));
    }

    #[test]
    fn test_no_sources_is_not_found() {
        let err = ModelResolver::new()
            .resolve(&ModelRef::new("geo/point", "1"))
            .unwrap_err();
        assert!(matches!(err, ValueError::ModelNotFound { .. }));
    }

    #[test]
    fn test_store_returning_other_version_is_invalid() {
        let mut store = MockModelStore::new();
        store
            .expect_load_model()
            .returning(|_, _| Ok(ModelConfig::new("geo/point", "2")));
        let resolver = ModelResolver::new().with_store(Arc::new(store));

        let err = resolver.resolve(&ModelRef::new("geo/point", "1")).unwrap_err();
        assert!(matches!(err, ValueError::InvalidModel { .. }));
    }

    #[test]
    fn test_self_referencing_model_is_too_deep() {
        let resolver = ModelResolver::new();
        resolver.insert(ModelConfig::new("list/node", "1").with_item("next", DataType::model_ref("list/node", "1")));

        let err = resolver.resolve(&ModelRef::new("list/node", "1")).unwrap_err();
        assert!(matches!(err, ValueError::ModelTooDeep { limit: MAX_MODEL_DEPTH, .. }));
    }

    #[test]
    fn test_models_load_from_directory() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("tagbus-models-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(dir.join("geo/point")).unwrap();
        std::fs::write(dir.join("geo/point/1.toml"), point().to_toml_string().unwrap()).unwrap();
        let resolver = ModelResolver::new().with_dir(&dir);
        resolver.insert(pose());

        // Act
        let ty = resolver.resolve_type(&DataType::model_ref("geo/pose", "1"));

        // Assert
        let ty = ty.unwrap();
        assert!(ty.is_resolved());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_memory_store_serves_added_models() {
        let store = MemoryModelStore::new();
        store.add(point());
        assert_eq!(store.load_model("geo/point", "1").unwrap(), point());
        assert!(store.load_model("geo/point", "2").is_err());
    }

    #[test]
    fn test_base_types_resolve_to_themselves() {
        let resolver = ModelResolver::new();
        assert_eq!(resolver.resolve_type(&DataType::INT_LIST).unwrap(), DataType::INT_LIST);
    }
}
