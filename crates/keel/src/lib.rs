//! ## Crate layout
//! - `core`: converters, metadata, identifier codecs, identity map, and the
//!   session with its unit of work.
//! - `error`: the public error taxonomy.
//!
//! `start` builds metadata from a TOML configuration plus entity descriptors
//! and installs it for the process; `Keel::session` opens sessions over it.

pub use keel_core as core;

pub mod error;

pub use error::{Error, ErrorKind, ErrorOrigin};

use keel_core::{
    config::{KeelConfig, SessionConfig},
    db::{Session, StorageExecutor},
    error::InternalError,
    metadata::Metadata,
    model::EntityDescriptor,
};
use std::sync::Arc;

//
// Consts
//

/// Workspace version re-export for downstream tooling/tests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

///
/// Keel
///
/// Validated metadata plus the session defaults every new session starts with.
///

#[derive(Clone, Debug)]
pub struct Keel {
    metadata: Arc<Metadata>,
    session: SessionConfig,
}

impl Keel {
    /// Build without installing process-wide metadata.
    pub fn new(
        config: &KeelConfig,
        descriptors: impl IntoIterator<Item = EntityDescriptor>,
    ) -> Result<Self, Error> {
        let metadata = build_metadata(config, descriptors)?;

        Ok(Self {
            metadata: Arc::new(metadata),
            session: config.session.clone(),
        })
    }

    /// Parse a TOML configuration, then build as [`Keel::new`].
    pub fn from_toml(
        source: &str,
        descriptors: impl IntoIterator<Item = EntityDescriptor>,
    ) -> Result<Self, Error> {
        let config = KeelConfig::from_toml_str(source).map_err(InternalError::from)?;

        Self::new(&config, descriptors)
    }

    #[must_use]
    pub fn metadata(&self) -> Arc<Metadata> {
        Arc::clone(&self.metadata)
    }

    #[must_use]
    pub const fn session_config(&self) -> &SessionConfig {
        &self.session
    }

    /// Open a session over `storage` with the configured defaults.
    #[must_use]
    pub fn session<S: StorageExecutor + 'static>(&self, storage: S) -> Session<S> {
        Session::new(self.metadata(), storage, self.session.clone())
    }
}

/// Build metadata from `config_toml` and `descriptors`, and install it as the
/// process-wide instance. A second call fails with a conflict.
pub fn start(
    config_toml: &str,
    descriptors: impl IntoIterator<Item = EntityDescriptor>,
) -> Result<Keel, Error> {
    let config = KeelConfig::from_toml_str(config_toml).map_err(InternalError::from)?;
    let metadata = build_metadata(&config, descriptors)?.install()?;

    Ok(Keel {
        metadata,
        session: config.session,
    })
}

fn build_metadata(
    config: &KeelConfig,
    descriptors: impl IntoIterator<Item = EntityDescriptor>,
) -> Result<Metadata, Error> {
    let registry = config
        .converter_registry()
        .map_err(InternalError::from)?;

    Ok(Metadata::builder(registry).entities(descriptors).build()?)
}

///
/// Prelude
///

pub mod prelude {
    pub use crate::{Error, Keel};
    pub use keel_core::prelude::*;
}
