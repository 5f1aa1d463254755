//! Session-side runtime: instances, identifiers, identity tracking, write
//! ordering, and the storage seam.

pub mod entity;
pub mod identifier;
pub mod identity;
pub mod identity_map;
pub mod session;
pub mod storage;
pub mod unit_of_work;

// re-exports
pub use entity::{EntityHandle, Lazy, Lifecycle};
pub use identifier::{IdValue, Identifier, IdentifierCodec, IdentifierInput, StorageIdentifier};
pub use identity::EntityName;
pub use session::Session;
pub use storage::{MemoryStorage, Statement, StorageExecutor};
