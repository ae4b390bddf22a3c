use attrium_model::{
    AttributeDefinition, CoercionError, DefinitionSpec, ModelError, RawValue, StoredValue,
    TypeHandler, TypeRegistry, TypedValue,
};
use attrium_types::AttributeId;
use pretty_assertions::assert_eq;

fn definition(spec: DefinitionSpec) -> AttributeDefinition {
    let slug = spec.resolved_slug();
    AttributeDefinition::from_spec(AttributeId::new(), slug, &spec)
}

fn scalar(type_name: &str) -> AttributeDefinition {
    definition(DefinitionSpec::new("Field", type_name).with_entity("product"))
}

// ── resolve ──────────────────────────────────────────────────────

#[test]
fn builtin_registers_every_type() {
    let registry = TypeRegistry::builtin();
    let names: Vec<&str> = registry.type_names().collect();
    assert_eq!(
        names,
        vec!["boolean", "date", "datetime", "decimal", "integer", "select", "text", "varchar"]
    );
}

#[test]
fn resolve_unknown_type_fails() {
    let registry = TypeRegistry::builtin();
    match registry.resolve("colour") {
        Err(ModelError::UnknownType(name)) => assert_eq!(name, "colour"),
        other => panic!("expected UnknownType, got {:?}", other.map(|h| h.name().to_string())),
    }
}

#[test]
fn empty_registry_knows_nothing() {
    let registry = TypeRegistry::empty();
    assert!(!registry.contains("text"));
    assert!(registry.resolve("text").is_err());
}

// ── Custom handlers ──────────────────────────────────────────────

struct UppercaseHandler;

impl TypeHandler for UppercaseHandler {
    fn name(&self) -> &str {
        "shout"
    }

    fn coerce(&self, raw: &str) -> Result<TypedValue, CoercionError> {
        if raw.chars().any(|c| c.is_ascii_lowercase()) {
            return Err(CoercionError::new("shout", raw, "must be uppercase"));
        }
        Ok(TypedValue::Text(raw.to_string()))
    }
}

#[test]
fn custom_handler_participates_in_prepare() {
    let registry = TypeRegistry::empty().with_handler(UppercaseHandler);
    let def = scalar("shout");

    assert_eq!(
        registry.prepare(&def, &RawValue::from("HEY")).unwrap(),
        Some(StoredValue::Scalar(TypedValue::Text("HEY".into())))
    );
    assert!(matches!(
        registry.prepare(&def, &RawValue::from("hey")),
        Err(ModelError::Coercion(_))
    ));
}

// ── Coercion ─────────────────────────────────────────────────────

#[test]
fn coercion_failures_name_the_type() {
    let registry = TypeRegistry::builtin();
    for (type_name, raw) in [
        ("integer", "twelve"),
        ("decimal", "NaN"),
        ("boolean", "maybe"),
        ("date", "12/01/2024"),
        ("datetime", "yesterday"),
    ] {
        match registry.coerce(&scalar(type_name), &RawValue::from(raw)) {
            Err(ModelError::Coercion(e)) => {
                assert_eq!(e.type_name, type_name);
                assert_eq!(e.raw, raw);
            }
            other => panic!("{type_name}: expected coercion error, got {other:?}"),
        }
    }
}

#[test]
fn varchar_limits_length() {
    let registry = TypeRegistry::builtin();
    let def = scalar("varchar");
    assert!(registry.coerce(&def, &RawValue::from("a".repeat(255))).is_ok());
    assert!(registry.coerce(&def, &RawValue::from("a".repeat(256))).is_err());
}

#[test]
fn datetime_accepts_space_separated_form() {
    let registry = TypeRegistry::builtin();
    let value = registry
        .coerce(&scalar("datetime"), &RawValue::from("2024-03-01 12:30:00"))
        .unwrap()
        .unwrap();
    assert_eq!(value.to_raw(), RawValue::from("2024-03-01T12:30:00Z"));
}

#[test]
fn blank_input_coerces_to_none() {
    let registry = TypeRegistry::builtin();
    assert_eq!(registry.coerce(&scalar("integer"), &RawValue::from("  ")).unwrap(), None);
}

#[test]
fn scalar_rejects_multiple_values() {
    let registry = TypeRegistry::builtin();
    let err = registry
        .coerce(&scalar("integer"), &RawValue::from(vec!["1", "2"]))
        .unwrap_err();
    match err {
        ModelError::Validation(errors) => {
            assert_eq!(errors.fields()["field"], vec!["expects a single value, got 2"]);
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn collection_keeps_insertion_order() {
    let registry = TypeRegistry::builtin();
    let def = definition(
        DefinitionSpec::new("Sizes", "integer")
            .with_entity("product")
            .collection(),
    );
    let value = registry
        .prepare(&def, &RawValue::from(vec!["42", "7", "19"]))
        .unwrap()
        .unwrap();
    assert_eq!(
        value,
        StoredValue::List(vec![
            TypedValue::Integer(42),
            TypedValue::Integer(7),
            TypedValue::Integer(19),
        ])
    );
}

// ── Validation ───────────────────────────────────────────────────

#[test]
fn required_empty_fails_for_every_type() {
    let registry = TypeRegistry::builtin();
    for type_name in registry.type_names() {
        let def = definition(
            DefinitionSpec::new("Field", type_name)
                .with_entity("product")
                .with_options(["a"])
                .required(),
        );
        for raw in [RawValue::from(""), RawValue::from("   "), RawValue::Many(vec![])] {
            let result = registry.prepare(&def, &raw);
            assert!(
                matches!(result, Err(ModelError::Validation(_))),
                "{type_name} accepted empty input {raw:?}"
            );
        }
        assert!(registry.validate(&def, None).is_err());
    }
}

#[test]
fn optional_empty_is_accepted() {
    let registry = TypeRegistry::builtin();
    assert_eq!(registry.prepare(&scalar("date"), &RawValue::from("")).unwrap(), None);
}

#[test]
fn required_empty_text_value_fails_validate() {
    let registry = TypeRegistry::builtin();
    let def = definition(DefinitionSpec::new("Title", "text").with_entity("p").required());
    let value = StoredValue::Scalar(TypedValue::Text(" ".into()));
    assert!(registry.validate(&def, Some(&value)).is_err());
}

#[test]
fn select_checks_option_membership() {
    let registry = TypeRegistry::builtin();
    let def = definition(
        DefinitionSpec::new("Colour", "select")
            .with_entity("product")
            .with_options(["red", "green"]),
    );

    assert_eq!(
        registry.prepare(&def, &RawValue::from(" red ")).unwrap(),
        Some(StoredValue::Scalar(TypedValue::Choice("red".into())))
    );

    let err = registry.prepare(&def, &RawValue::from("blue")).unwrap_err();
    match err {
        ModelError::Validation(errors) => {
            assert!(errors.fields()["colour"][0].contains("\"blue\" is not one of [red, green]"));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn validation_errors_display_lists_fields() {
    let registry = TypeRegistry::builtin();
    let def = definition(
        DefinitionSpec::new("Colour", "select")
            .with_entity("p")
            .with_options(["x"])
            .required(),
    );
    let err = registry.prepare(&def, &RawValue::from("")).unwrap_err();
    assert_eq!(err.to_string(), "validation failed: colour is required");
}

// ── check_definition ─────────────────────────────────────────────

#[test]
fn select_without_options_is_rejected() {
    let registry = TypeRegistry::builtin();
    let def = scalar("select");
    assert!(matches!(
        registry.check_definition(&def, None),
        Err(ModelError::Validation(_))
    ));
}

#[test]
fn check_definition_coerces_default() {
    let registry = TypeRegistry::builtin();
    let def = scalar("integer");
    assert_eq!(
        registry.check_definition(&def, Some(&RawValue::from("5"))).unwrap(),
        Some(StoredValue::Scalar(TypedValue::Integer(5)))
    );
    assert!(registry.check_definition(&def, Some(&RawValue::from("five"))).is_err());
}

#[test]
fn check_definition_rejects_default_outside_options() {
    let registry = TypeRegistry::builtin();
    let def = definition(
        DefinitionSpec::new("Colour", "select")
            .with_entity("p")
            .with_options(["red"]),
    );
    let err = registry
        .check_definition(&def, Some(&RawValue::from("blue")))
        .unwrap_err();
    match err {
        ModelError::Validation(errors) => assert!(errors.fields().contains_key("default")),
        other => panic!("expected validation error, got {other:?}"),
    }
}
