#![allow(dead_code)]

use keel_core::{
    config::SessionConfig,
    convert::ConverterRegistry,
    db::{EntityName, MemoryStorage, Session},
    metadata::Metadata,
    model::{EntityDescriptor, FetchMode},
};
use std::sync::Arc;

pub const AUXILIARY: &str = "auxiliary";
pub const INVERSED: &str = "inversed";
pub const OWNING: &str = "owning";

pub const AUXILIARY_TABLE: &str = "vct_auxiliary";
pub const INVERSED_TABLE: &str = "vct_inversed_onetoone_compositeid_foreignkey";
pub const OWNING_TABLE: &str = "vct_owning_onetoone_compositeid_foreignkey";

pub fn name(entity: &str) -> EntityName {
    EntityName::try_from_str(entity).unwrap()
}

/// Rot13 identifiers throughout; the inversed identifier embeds the auxiliary
/// identifier, and the owning side joins on both inversed columns.
pub fn descriptors() -> Vec<EntityDescriptor> {
    vec![
        EntityDescriptor::builder(AUXILIARY, AUXILIARY_TABLE)
            .scalar_id("id4", "id4", "rot13")
            .build()
            .unwrap(),
        EntityDescriptor::builder(INVERSED, INVERSED_TABLE)
            .scalar_id("id1", "id1", "rot13")
            .foreign_id_with_columns("foreignEntity", AUXILIARY, &["foreign_id"], FetchMode::Lazy)
            .scalar("someProperty", "some_property", None)
            .inverse_to_one("associatedEntity", OWNING, "associatedEntity")
            .build()
            .unwrap(),
        EntityDescriptor::builder(OWNING, OWNING_TABLE)
            .scalar_id("id2", "id2", "rot13")
            .to_one(
                "associatedEntity",
                INVERSED,
                &["associated_id", "associated_foreign_id"],
                FetchMode::Lazy,
            )
            .build()
            .unwrap(),
    ]
}

pub fn metadata() -> Arc<Metadata> {
    Arc::new(
        Metadata::builder(ConverterRegistry::with_builtins())
            .entities(descriptors())
            .build()
            .unwrap(),
    )
}

pub fn session() -> Session<MemoryStorage> {
    let mut storage = MemoryStorage::new();
    for table in [AUXILIARY_TABLE, INVERSED_TABLE, OWNING_TABLE] {
        storage.create_table(table);
    }

    Session::new(metadata(), storage, SessionConfig::default())
}
