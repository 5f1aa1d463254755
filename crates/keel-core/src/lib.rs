//! Core runtime for Keel: converters, entity metadata, composite identifier
//! codecs, the identity map, and the unit of work behind `Session`.
#![warn(unreachable_pub)]

// public exports are one module level down
pub mod config;
pub mod convert;
pub mod db;
pub mod error;
pub mod metadata;
pub mod model;
pub mod obs;
pub mod value;

// test
#[cfg(test)]
pub(crate) mod test_fixtures;

///
/// Prelude
///
/// Prelude contains only domain vocabulary plus the session entry points.
///

pub mod prelude {
    pub use crate::{
        config::{KeelConfig, SessionConfig},
        convert::{ConverterRegistry, ValueConverter},
        db::{
            EntityHandle, EntityName, IdValue, Identifier, Lazy, Lifecycle, MemoryStorage,
            Session, StorageExecutor,
        },
        metadata::Metadata,
        model::{EntityDescriptor, FetchMode},
        value::Value,
    };
}
