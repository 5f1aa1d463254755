//! Runtime configuration loaded from TOML.
//!
//! Every field has a default, so an empty document is a valid configuration.

use crate::{
    convert::{
        ConverterRegistry, ConverterRegistryError, PassthroughConverter, RotationConverter,
        UintTextConverter,
    },
    error::{ErrorClass, ErrorDetail, ErrorOrigin, InternalError},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error as ThisError;

///
/// ConfigError
///

#[derive(Debug, ThisError)]
pub enum ConfigError {
    #[error("converter '{name}': {source}")]
    Converter {
        name: String,
        source: ConverterRegistryError,
    },

    #[error("cannot read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

impl From<ConfigError> for InternalError {
    fn from(err: ConfigError) -> Self {
        let class = match err {
            ConfigError::Converter { .. } => ErrorClass::Conflict,
            ConfigError::Io { .. } => ErrorClass::NotFound,
            ConfigError::Parse(_) => ErrorClass::Unsupported,
        };

        Self::with_detail(class, ErrorOrigin::Config, ErrorDetail::Config(Box::new(err)))
    }
}

///
/// ConverterSpec
///
/// One named converter instance beyond the builtins.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ConverterSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: ConverterKind,
}

///
/// ConverterKind
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConverterKind {
    Passthrough,
    Rotation { places: u8 },
    UintText,
}

///
/// SessionConfig
///

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Schedule new instances reachable from flushed instances instead of
    /// failing the flush with an unpersisted-reference error.
    pub cascade_persist: bool,
    /// Load every reference eagerly, ignoring declared lazy fetch modes.
    pub force_eager: bool,
}

///
/// KeelConfig
///
/// ```toml
/// [[converters]]
/// name = "rot5"
/// kind = "rotation"
/// places = 5
///
/// [session]
/// cascade_persist = true
/// ```
///

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct KeelConfig {
    pub converters: Vec<ConverterSpec>,
    pub session: SessionConfig,
}

impl KeelConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_toml_str(&source)
    }

    /// Builtin converters plus every configured one. Names must be unique.
    pub fn converter_registry(&self) -> Result<ConverterRegistry, ConfigError> {
        let mut registry = ConverterRegistry::with_builtins();

        for spec in &self.converters {
            let name = spec.name.clone();
            let registered = match spec.kind {
                ConverterKind::Passthrough => registry.register_as(&name, PassthroughConverter),
                ConverterKind::Rotation { places } => {
                    registry.register(RotationConverter::new(&name, places))
                }
                ConverterKind::UintText => registry.register_as(&name, UintTextConverter),
            };

            registered.map_err(|source| ConfigError::Converter { name, source })?;
        }

        Ok(registry)
    }

    /// Default configuration file content with comments.
    #[must_use]
    pub const fn default_toml() -> &'static str {
        r#"# Keel configuration
#
# Extra converters, referenced by name from entity descriptors.
# Builtins: "passthrough", "rot13", "uint_text".
# [[converters]]
# name = "rot5"
# kind = "rotation"     # "rotation" | "passthrough" | "uint_text"
# places = 5            # rotation only

[session]
# Schedule new instances reachable from flushed ones (default: false).
cascade_persist = false
# Load every reference eagerly (default: false).
force_eager = false
"#
    }
}
