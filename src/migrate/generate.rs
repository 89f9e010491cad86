//! Migration generation from a schema diff.

use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use super::unit::{MigrationUnit, Operation, sanitize_name};
use crate::schema::{DefaultValue, EntityDiff, FieldDescriptor, SchemaDiff};

/// Value written for a field that documents are missing.
///
/// The declared default when it is a literal, the execution-time clock for
/// clock defaults, otherwise the zero value of the field type. The second
/// element explains a default that could not be used.
pub fn fill_value(field: &FieldDescriptor) -> (Value, Option<String>) {
    match &field.default {
        Some(DefaultValue::Literal(value)) => (value.clone(), None),
        Some(default) if default.is_clock() => (clock_token(&field.field_type), None),
        Some(DefaultValue::Expression { expr }) => (
            zero_value(&field.field_type),
            Some(format!("default expression `{}` cannot be evaluated; zero value used", expr)),
        ),
        None => (zero_value(&field.field_type), None),
    }
}

fn now_token() -> Value {
    json!({ "$expr": "now" })
}

/// Clock token matching the field type: epoch milliseconds for numeric
/// fields, a timestamp otherwise.
fn clock_token(field_type: &str) -> Value {
    match field_type {
        "number" | "decimal" => json!({ "$expr": "now", "as": "number" }),
        _ => now_token(),
    }
}

pub fn zero_value(field_type: &str) -> Value {
    match field_type {
        "string" => json!(""),
        "number" | "decimal" => json!(0),
        "boolean" => json!(false),
        "date" => now_token(),
        "array" => json!([]),
        "object" | "map" | "mixed" => json!({}),
        _ => Value::Null,
    }
}

/// Up operations paired with their inverses.
#[derive(Default)]
struct Plan {
    up: Vec<Operation>,
    down: Vec<Operation>,
}

impl Plan {
    fn step(&mut self, up: Operation, down: Option<Operation>) {
        self.up.push(up);
        if let Some(down) = down {
            self.down.push(down);
        }
    }
}

/// Build a unit applying `diff`, or `None` when there is nothing to do.
pub fn generate(
    diff: &SchemaDiff,
    version: &str,
    name: Option<&str>,
    created_at: DateTime<Utc>,
) -> Option<MigrationUnit> {
    if diff.is_empty() {
        return None;
    }

    let mut plan = Plan::default();

    for (entity, schema) in &diff.removed {
        let collection = schema.collection_name();
        plan.step(
            Operation::DropCollection {
                collection: collection.clone(),
            },
            Some(Operation::manual(format!(
                "collection {} of removed entity {} was dropped; restore it from a backup",
                collection, entity
            ))),
        );
    }

    for (entity, schema) in &diff.added {
        plan.step(
            Operation::note(format!(
                "entity {} added; collection {} is created on first write",
                entity,
                schema.collection_name()
            )),
            None,
        );
    }

    for (entity, delta) in &diff.modified {
        plan_entity(&mut plan, entity, delta);
    }

    let destructive = plan.up.iter().any(Operation::is_destructive);
    plan.down.reverse();

    let name = match name {
        Some(name) => sanitize_name(name),
        None => derive_name(diff),
    };
    let description = diff
        .describe()
        .lines()
        .collect::<Vec<_>>()
        .join("; ");

    Some(MigrationUnit {
        version: version.to_string(),
        name,
        description,
        created_at,
        destructive,
        up: plan.up,
        down: Some(plan.down),
    })
}

fn plan_entity(plan: &mut Plan, entity: &str, delta: &EntityDiff) {
    let collection = &delta.collection;

    for index in &delta.removed_indexes {
        plan.step(
            Operation::DropIndex {
                collection: collection.clone(),
                index: index.clone(),
            },
            Some(Operation::CreateIndex {
                collection: collection.clone(),
                index: index.clone(),
            }),
        );
    }

    for (field, descriptor) in &delta.removed_fields {
        // data is gone; the inverse only restores the field's shape
        let (value, _) = fill_value(descriptor);
        plan.step(
            Operation::UnsetField {
                collection: collection.clone(),
                field: field.clone(),
            },
            Some(Operation::SetMissing {
                collection: collection.clone(),
                field: field.clone(),
                value,
            }),
        );
    }

    for (field, change) in &delta.modified_fields {
        plan.step(
            Operation::note(format!(
                "{}.{} changed from `{}` to `{}`; existing documents are not converted",
                entity, field, change.from, change.to
            )),
            Some(Operation::note(format!(
                "{}.{} reverted from `{}` to `{}`",
                entity, field, change.to, change.from
            ))),
        );
    }

    for (field, descriptor) in &delta.added_fields {
        let (value, warning) = fill_value(descriptor);
        if let Some(warning) = warning {
            plan.step(Operation::note(format!("{}.{}: {}", entity, field, warning)), None);
        }
        plan.step(
            Operation::SetMissing {
                collection: collection.clone(),
                field: field.clone(),
                value,
            },
            Some(Operation::UnsetField {
                collection: collection.clone(),
                field: field.clone(),
            }),
        );
    }

    for index in &delta.added_indexes {
        plan.step(
            Operation::CreateIndex {
                collection: collection.clone(),
                index: index.clone(),
            },
            Some(Operation::DropIndex {
                collection: collection.clone(),
                index: index.clone(),
            }),
        );
    }
}

/// Name describing the diff when it holds a single kind of change.
fn derive_name(diff: &SchemaDiff) -> String {
    let lower = |s: &str| s.to_lowercase();

    if diff.modified.is_empty() && diff.removed.is_empty() {
        let added: Vec<&String> = diff.added.keys().collect();
        return match added.as_slice() {
            [one] => format!("create_{}", lower(one)),
            _ => "initial_schema".to_string(),
        };
    }
    if diff.modified.is_empty() && diff.added.is_empty() && diff.removed.len() == 1 {
        if let Some(entity) = diff.removed.keys().next() {
            return format!("drop_{}", lower(entity));
        }
    }
    if diff.added.is_empty() && diff.removed.is_empty() && diff.modified.len() == 1 {
        if let Some((entity, delta)) = diff.modified.iter().next() {
            let entity = lower(entity);
            let fields_only = delta.modified_fields.is_empty()
                && delta.added_indexes.is_empty()
                && delta.removed_indexes.is_empty();
            if fields_only && delta.removed_fields.is_empty() && delta.added_fields.len() == 1 {
                if let Some(field) = delta.added_fields.keys().next() {
                    return sanitize_name(&format!("add_{}_to_{}", field, entity));
                }
            }
            if fields_only && delta.added_fields.is_empty() && delta.removed_fields.len() == 1 {
                if let Some(field) = delta.removed_fields.keys().next() {
                    return sanitize_name(&format!("remove_{}_from_{}", field, entity));
                }
            }
            return format!("update_{}", entity);
        }
    }
    "schema_update".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{IndexDescriptor, SchemaDescriptor, Snapshot, diff_snapshots};
    use pretty_assertions::assert_eq;

    fn at() -> DateTime<Utc> {
        Utc::now()
    }

    fn widget() -> SchemaDescriptor {
        SchemaDescriptor::new("Widget").field("name", FieldDescriptor::new("string").required())
    }

    fn snap(schemas: Vec<SchemaDescriptor>) -> Snapshot {
        schemas.into_iter().collect()
    }

    #[test]
    fn test_empty_diff_generates_nothing() {
        assert!(generate(&SchemaDiff::default(), "001", None, at()).is_none());
    }

    #[test]
    fn test_added_field_sets_zero_value() {
        let before = snap(vec![widget()]);
        let after = snap(vec![widget().field("price", FieldDescriptor::new("number"))]);
        let unit = generate(&diff_snapshots(&after, Some(&before)), "002", None, at()).unwrap();

        assert_eq!(unit.version, "002");
        assert_eq!(unit.name, "add_price_to_widget");
        assert!(!unit.destructive);
        assert_eq!(
            unit.up,
            vec![Operation::SetMissing {
                collection: "widgets".into(),
                field: "price".into(),
                value: json!(0),
            }]
        );
        assert_eq!(
            unit.down,
            Some(vec![Operation::UnsetField {
                collection: "widgets".into(),
                field: "price".into(),
            }])
        );
    }

    #[test]
    fn test_fill_values() {
        assert_eq!(fill_value(&FieldDescriptor::new("string")).0, json!(""));
        assert_eq!(fill_value(&FieldDescriptor::new("boolean")).0, json!(false));
        assert_eq!(fill_value(&FieldDescriptor::new("array")).0, json!([]));
        assert_eq!(fill_value(&FieldDescriptor::new("object")).0, json!({}));
        assert_eq!(fill_value(&FieldDescriptor::new("date")).0, json!({"$expr": "now"}));
        assert_eq!(fill_value(&FieldDescriptor::new("reference")).0, Value::Null);

        let declared = FieldDescriptor::new("string").default_value(DefaultValue::Literal(json!("draft")));
        assert_eq!(fill_value(&declared), (json!("draft"), None));

        let clock = FieldDescriptor::new("date").default_value(DefaultValue::expression("Date.now"));
        assert_eq!(fill_value(&clock), (json!({"$expr": "now"}), None));

        let millis = FieldDescriptor::new("number").default_value(DefaultValue::expression("Date.now"));
        assert_eq!(fill_value(&millis), (json!({"$expr": "now", "as": "number"}), None));

        let opaque = FieldDescriptor::new("number").default_value(DefaultValue::expression("() => 5"));
        let (value, warning) = fill_value(&opaque);
        assert_eq!(value, json!(0));
        assert!(warning.is_some());
    }

    #[test]
    fn test_nested_expression_default_falls_back_to_zero_value() {
        let meta = FieldDescriptor::new("object").default_value(DefaultValue::expression("{ at: Date.now }"));
        let before = snap(vec![widget()]);
        let after = snap(vec![widget().field("meta", meta)]);
        let unit = generate(&diff_snapshots(&after, Some(&before)), "002", None, at()).unwrap();

        assert!(matches!(&unit.up[0], Operation::Note { message, .. } if message.contains("{ at: Date.now }")));
        assert_eq!(
            unit.up[1],
            Operation::SetMissing {
                collection: "widgets".into(),
                field: "meta".into(),
                value: json!({}),
            }
        );
    }

    #[test]
    fn test_removed_entity_is_destructive_with_manual_down() {
        let before = snap(vec![widget(), SchemaDescriptor::new("Legacy")]);
        let after = snap(vec![widget()]);
        let unit = generate(&diff_snapshots(&after, Some(&before)), "003", None, at()).unwrap();

        assert_eq!(unit.name, "drop_legacy");
        assert!(unit.destructive);
        assert_eq!(
            unit.up,
            vec![Operation::DropCollection {
                collection: "legacies".into()
            }]
        );
        let down = unit.down.unwrap();
        assert!(matches!(down.as_slice(), [Operation::Note { manual: true, .. }]));
    }

    #[test]
    fn test_operation_order_and_inverse() {
        let before = snap(vec![
            widget()
                .field("sku", FieldDescriptor::new("string"))
                .index(IndexDescriptor::ascending(["sku"])),
        ]);
        let after = snap(vec![
            widget()
                .field("price", FieldDescriptor::new("number"))
                .index(IndexDescriptor::ascending(["price"])),
        ]);
        let unit = generate(&diff_snapshots(&after, Some(&before)), "004", Some("Reprice"), at()).unwrap();

        assert_eq!(unit.name, "reprice");
        assert!(unit.destructive);
        let kinds: Vec<String> = unit.up.iter().map(|op| op.to_string()).collect();
        assert_eq!(
            kinds,
            vec![
                "drop index { sku: 1 } on widgets",
                "unset widgets.sku",
                "set widgets.price = 0 where missing",
                "create index { price: 1 } on widgets",
            ]
        );
        let inverse: Vec<String> = unit.down.unwrap().iter().map(|op| op.to_string()).collect();
        assert_eq!(
            inverse,
            vec![
                "drop index { price: 1 } on widgets",
                "unset widgets.price",
                "set widgets.sku = \"\" where missing",
                "create index { sku: 1 } on widgets",
            ]
        );
    }

    #[test]
    fn test_bootstrap_names() {
        let one = generate(&diff_snapshots(&snap(vec![widget()]), None), "001", None, at()).unwrap();
        assert_eq!(one.name, "create_widget");
        assert!(matches!(one.up.as_slice(), [Operation::Note { manual: false, .. }]));

        let two = snap(vec![widget(), SchemaDescriptor::new("Order")]);
        let unit = generate(&diff_snapshots(&two, None), "001", None, at()).unwrap();
        assert_eq!(unit.name, "initial_schema");
    }

    #[test]
    fn test_modified_field_emits_notes() {
        let before = snap(vec![widget()]);
        let after = snap(vec![
            SchemaDescriptor::new("Widget").field("name", FieldDescriptor::new("string")),
        ]);
        let unit = generate(&diff_snapshots(&after, Some(&before)), "002", None, at()).unwrap();
        assert_eq!(unit.name, "update_widget");
        assert!(matches!(unit.up.as_slice(), [Operation::Note { .. }]));
        assert!(!unit.destructive);
    }
}
