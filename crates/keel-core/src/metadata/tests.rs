use super::*;
use crate::{
    model::FetchMode,
    test_fixtures::{
        AUXILIARY, INVERSED, OWNING, OWNING_TABLE, chain_metadata, name, scenario_descriptors,
        scenario_metadata,
    },
};

fn build(descriptors: Vec<EntityDescriptor>) -> Result<Metadata, InternalError> {
    Metadata::builder(ConverterRegistry::with_builtins())
        .entities(descriptors)
        .build()
}

fn metadata_error(err: &InternalError) -> &MetadataError {
    match &err.detail {
        Some(ErrorDetail::Metadata(err)) => err.as_ref(),
        other => panic!("expected metadata detail, got {other:?}"),
    }
}

#[test]
fn scenario_layouts_flatten_identifier_columns_in_declaration_order() {
    let metadata = scenario_metadata();

    let inversed = metadata.entity(name(INVERSED)).unwrap();
    assert_eq!(inversed.identifier_columns(), ["id1", "foreign_id"]);
    assert_eq!(
        inversed.select_columns(),
        ["id1", "foreign_id", "some_property"]
    );

    let owning = metadata.entity(name(OWNING)).unwrap();
    assert_eq!(owning.table(), OWNING_TABLE);
    assert_eq!(owning.identifier_arity(), 1);
    assert_eq!(
        owning.select_columns(),
        ["id2", "associated_id", "associated_foreign_id"]
    );
}

#[test]
fn field_layouts_skip_inverse_sides() {
    let metadata = scenario_metadata();
    let inversed = metadata.entity(name(INVERSED)).unwrap();

    let layouts: Vec<_> = inversed
        .field_layouts()
        .map(|(field, range)| (field.name.as_str(), range))
        .collect();

    assert_eq!(layouts, vec![("someProperty", 2..3), ("associatedEntity", 3..3)]);
}

#[test]
fn empty_join_columns_derive_from_field_and_target_columns() {
    let metadata = chain_metadata();

    let b = metadata.entity(name("b")).unwrap();
    assert_eq!(b.identifier_columns(), ["c_code", "code"]);

    let a = metadata.entity(name("a")).unwrap();
    assert_eq!(a.identifier_columns(), ["code", "b_c_code", "b_code"]);
}

#[test]
fn duplicate_entity_is_rejected() {
    let mut descriptors = scenario_descriptors();
    descriptors.push(descriptors[0].clone());

    let err = build(descriptors).unwrap_err();
    assert!(matches!(
        metadata_error(&err),
        MetadataError::DuplicateEntity(entity) if entity.as_str() == AUXILIARY
    ));
}

#[test]
fn empty_identifier_is_rejected() {
    let descriptor = EntityDescriptor::builder("bare", "bare")
        .scalar("label", "label", None)
        .build()
        .unwrap();

    let err = build(vec![descriptor]).unwrap_err();
    assert!(matches!(metadata_error(&err), MetadataError::EmptyIdentifier(_)));
}

#[test]
fn duplicate_field_name_across_identifier_and_fields_is_rejected() {
    let descriptor = EntityDescriptor::builder("dup", "dup")
        .scalar_id("id", "id", "rot13")
        .scalar("id", "other", None)
        .build()
        .unwrap();

    let err = build(vec![descriptor]).unwrap_err();
    assert!(matches!(
        metadata_error(&err),
        MetadataError::DuplicateField { field, .. } if field == "id"
    ));
}

#[test]
fn duplicate_column_is_rejected() {
    let descriptor = EntityDescriptor::builder("dup", "dup")
        .scalar_id("id", "id", "rot13")
        .scalar("label", "id", None)
        .build()
        .unwrap();

    let err = build(vec![descriptor]).unwrap_err();
    assert!(matches!(
        metadata_error(&err),
        MetadataError::DuplicateColumn { column, .. } if column == "id"
    ));
}

#[test]
fn unknown_converter_is_rejected() {
    let descriptor = EntityDescriptor::builder("coded", "coded")
        .scalar_id("id", "id", "rot47")
        .build()
        .unwrap();

    let err = build(vec![descriptor]).unwrap_err();
    assert!(matches!(
        metadata_error(&err),
        MetadataError::UnknownConverter { converter, .. } if converter == "rot47"
    ));
}

#[test]
fn unknown_target_is_rejected() {
    let descriptor = EntityDescriptor::builder("orphan", "orphan")
        .foreign_id("parent", "missing", FetchMode::Lazy)
        .build()
        .unwrap();

    let err = build(vec![descriptor]).unwrap_err();
    assert!(matches!(
        metadata_error(&err),
        MetadataError::UnknownTarget { target, .. } if target.as_str() == "missing"
    ));
}

#[test]
fn join_column_arity_must_match_target_identifier() {
    let mut descriptors = scenario_descriptors();
    descriptors[2] = EntityDescriptor::builder(OWNING, OWNING_TABLE)
        .scalar_id("id2", "id2", "rot13")
        .to_one("associatedEntity", INVERSED, &["associated_id"], FetchMode::Lazy)
        .build()
        .unwrap();

    let err = build(descriptors).unwrap_err();
    assert!(matches!(
        metadata_error(&err),
        MetadataError::JoinColumnArity {
            expected: 2,
            found: 1,
            ..
        }
    ));
}

#[test]
fn recursive_identifier_embedding_is_rejected() {
    let left = EntityDescriptor::builder("left", "left")
        .foreign_id("right", "right", FetchMode::Lazy)
        .build()
        .unwrap();
    let right = EntityDescriptor::builder("right", "right")
        .foreign_id("left", "left", FetchMode::Lazy)
        .build()
        .unwrap();

    let err = build(vec![left, right]).unwrap_err();
    match metadata_error(&err) {
        MetadataError::RecursiveIdentifier { path } => {
            assert_eq!(path, "left -> right -> left");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn mapped_by_must_point_back_at_the_inverse_entity() {
    let mut descriptors = scenario_descriptors();
    descriptors[1] = EntityDescriptor::builder(INVERSED, "inv")
        .scalar_id("id1", "id1", "rot13")
        .foreign_id_with_columns("foreignEntity", AUXILIARY, &["foreign_id"], FetchMode::Lazy)
        .inverse_to_one("associatedEntity", OWNING, "id2")
        .build()
        .unwrap();

    let err = build(descriptors).unwrap_err();
    assert!(matches!(
        metadata_error(&err),
        MetadataError::InvalidMappedBy { mapped_by, .. } if mapped_by == "id2"
    ));
}

#[test]
fn invalid_target_name_surfaces_at_descriptor_build() {
    let err = EntityDescriptor::builder("ok", "ok")
        .foreign_id("bad", "has#hash", FetchMode::Lazy)
        .build()
        .unwrap_err();

    assert!(matches!(err, MetadataError::InvalidTargetName { target, .. } if target == "has#hash"));
}

#[test]
fn unknown_entity_lookup_is_not_found() {
    let metadata = scenario_metadata();

    let err = metadata.entity_by_name("missing").unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.origin, ErrorOrigin::Metadata);
}
