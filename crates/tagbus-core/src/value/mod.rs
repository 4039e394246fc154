//! Typed value model: data types, values, the binary codec, model
//! resolution and conversion from/to untyped native values.
//!
//! One [`DataType`] enum and one [`encode`]/[`decode`] pair serve every
//! payload in the system: tag values, method parameters and reply bodies.

pub mod codec;
pub mod data_type;
pub mod error;
pub mod model;
pub mod native;
pub mod resolver;
pub mod values;

pub use codec::{decode, encode, VALUE_FORMAT_VERSION};
pub use data_type::{BaseType, DataType, ModelSpec};
pub use error::ValueError;
pub use model::{ModelConfig, ModelItem, ModelRef};
pub use native::{from_native, to_native, type_of, PartialPolicy};
pub use resolver::{MemoryModelStore, ModelResolver, ModelStore, MAX_MODEL_DEPTH};
pub use values::{ModelField, ModelValue, Value};
