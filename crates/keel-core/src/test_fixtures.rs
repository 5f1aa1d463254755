//! Shared descriptors for unit tests: the rot13 one-to-one scenario plus a
//! three-level identifier chain.

use crate::{
    convert::ConverterRegistry,
    db::identity::EntityName,
    metadata::Metadata,
    model::{EntityDescriptor, FetchMode},
};
use std::sync::Arc;

pub(crate) const AUXILIARY: &str = "auxiliary";
pub(crate) const INVERSED: &str = "inversed";
pub(crate) const OWNING: &str = "owning";

pub(crate) const AUXILIARY_TABLE: &str = "vct_auxiliary";
pub(crate) const INVERSED_TABLE: &str = "vct_inversed_onetoone_compositeid_foreignkey";
pub(crate) const OWNING_TABLE: &str = "vct_owning_onetoone_compositeid_foreignkey";

pub(crate) fn name(entity: &str) -> EntityName {
    EntityName::try_from_str(entity).expect("fixture entity name")
}

pub(crate) fn scenario_descriptors() -> Vec<EntityDescriptor> {
    vec![
        EntityDescriptor::builder(AUXILIARY, AUXILIARY_TABLE)
            .scalar_id("id4", "id4", "rot13")
            .build()
            .expect("auxiliary descriptor"),
        EntityDescriptor::builder(INVERSED, INVERSED_TABLE)
            .scalar_id("id1", "id1", "rot13")
            .foreign_id_with_columns("foreignEntity", AUXILIARY, &["foreign_id"], FetchMode::Lazy)
            .scalar("someProperty", "some_property", None)
            .inverse_to_one("associatedEntity", OWNING, "associatedEntity")
            .build()
            .expect("inversed descriptor"),
        EntityDescriptor::builder(OWNING, OWNING_TABLE)
            .scalar_id("id2", "id2", "rot13")
            .to_one(
                "associatedEntity",
                INVERSED,
                &["associated_id", "associated_foreign_id"],
                FetchMode::Lazy,
            )
            .build()
            .expect("owning descriptor"),
    ]
}

pub(crate) fn scenario_metadata() -> Arc<Metadata> {
    Arc::new(
        Metadata::builder(ConverterRegistry::with_builtins())
            .entities(scenario_descriptors())
            .build()
            .expect("scenario metadata"),
    )
}

/// `a` embeds `b`, which embeds `c`, all through identifier components.
pub(crate) fn chain_descriptors() -> Vec<EntityDescriptor> {
    vec![
        EntityDescriptor::builder("a", "chain_a")
            .scalar_id("code", "code", "passthrough")
            .foreign_id("b", "b", FetchMode::Lazy)
            .build()
            .expect("a descriptor"),
        EntityDescriptor::builder("b", "chain_b")
            .foreign_id("c", "c", FetchMode::Eager)
            .scalar_id("code", "code", "passthrough")
            .build()
            .expect("b descriptor"),
        EntityDescriptor::builder("c", "chain_c")
            .scalar_id("code", "code", "passthrough")
            .scalar("label", "label", None)
            .build()
            .expect("c descriptor"),
    ]
}

pub(crate) fn chain_metadata() -> Arc<Metadata> {
    Arc::new(
        Metadata::builder(ConverterRegistry::with_builtins())
            .entities(chain_descriptors())
            .build()
            .expect("chain metadata"),
    )
}
