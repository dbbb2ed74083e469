//! JSON-schema companion generation for editor autocomplete.
//!
//! The dump writes a draft-07 schema next to the base snapshot so editors
//! can complete table keys, column names, and marker shapes. The guarantee
//! is narrow: whatever the dump itself writes validates against the schema
//! it generated.

use serde_json::{json, Map, Value};

use crate::dataset::camel_case;
use crate::file::Layout;
use crate::schema::{Column, Schema, Table};
use crate::tree::OwnershipTree;

const PARTIAL_DEF: &str = "__partialMarker";
const REF_DEF: &str = "__refMarker";

/// Generate the companion schema for one layout.
pub fn generate(schema: &Schema, tree: &OwnershipTree, layout: Layout) -> Value {
    let mut properties = Map::new();
    properties.insert("$schema".to_string(), json!({"type": "string"}));
    properties.insert("$base".to_string(), json!({"type": "string"}));

    for table in schema.tables() {
        if !table.has_pk() {
            continue;
        }
        let key = match layout {
            Layout::Flat => table.name.clone(),
            Layout::Nested => camel_case(&table.name),
        };
        properties.insert(key, json!({"type": "array", "items": item_schema(&table.name, layout)}));
    }

    let mut definitions = Map::new();
    for table in schema.tables() {
        if !table.has_pk() {
            continue;
        }
        definitions.insert(table.name.clone(), row_definition(table, tree, layout));
    }
    definitions.insert(
        PARTIAL_DEF.to_string(),
        json!({
            "type": "object",
            "required": ["$partial", "skipped"],
            "properties": {
                "$partial": {"const": true},
                "skipped": {"type": "integer", "minimum": 0}
            }
        }),
    );
    if layout == Layout::Nested {
        definitions.insert(
            REF_DEF.to_string(),
            json!({
                "type": "object",
                "required": ["$ref"],
                "properties": {"$ref": {"const": true}}
            }),
        );
    }

    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "properties": Value::Object(properties),
        "additionalProperties": false,
        "definitions": Value::Object(definitions),
    })
}

/// The alternatives allowed inside a sequence: a row, a truncation marker,
/// and (nested only) a collapsed reference.
fn item_schema(table: &str, layout: Layout) -> Value {
    let mut any_of = vec![json!({"$ref": format!("#/definitions/{}", table)})];
    if layout == Layout::Nested {
        any_of.push(json!({"$ref": format!("#/definitions/{}", REF_DEF)}));
    }
    any_of.push(json!({"$ref": format!("#/definitions/{}", PARTIAL_DEF)}));
    json!({"anyOf": any_of})
}

fn row_definition(table: &Table, tree: &OwnershipTree, layout: Layout) -> Value {
    let mut properties = Map::new();
    for column in &table.columns {
        properties.insert(column.name.clone(), column_schema(column));
    }
    if layout == Layout::Nested {
        for edge in tree.children_of(&table.name) {
            properties.insert(
                camel_case(&edge.child_table),
                json!({"type": "array", "items": item_schema(&edge.child_table, layout)}),
            );
        }
    }
    json!({
        "type": "object",
        "properties": Value::Object(properties),
        "additionalProperties": false,
    })
}

/// Map a native column type to a JSON value schema. Bytes, uuids, dates and
/// numerics all travel as strings; json/jsonb cells are unconstrained.
fn column_schema(column: &Column) -> Value {
    let base = match column.data_type.to_lowercase().as_str() {
        "bool" | "boolean" => Some("boolean"),
        "int2" | "int4" | "int8" | "smallint" | "integer" | "bigint" => Some("integer"),
        "float4" | "float8" | "real" | "double precision" => Some("number"),
        "json" | "jsonb" => None,
        _ => Some("string"),
    };
    match (base, column.is_nullable) {
        (Some(t), false) => json!({"type": t}),
        (Some(t), true) => json!({"type": [t, "null"]}),
        (None, _) => json!({}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::test_fixtures::org_project_task;
    use crate::tree::OwnershipTree;

    #[test]
    fn test_nested_schema_uses_camel_keys_and_child_properties() {
        let schema = org_project_task();
        let tree = OwnershipTree::build(&schema).unwrap();
        let doc = generate(&schema, &tree, Layout::Nested);

        assert!(doc["properties"]["organization"].is_object());
        // Non-roots still get a top-level key: unparented rows surface there.
        assert!(doc["properties"]["project"].is_object());

        let org_def = &doc["definitions"]["Organization"];
        assert!(org_def["properties"]["project"].is_object());
        assert!(org_def["properties"]["name"]["type"] == serde_json::json!("string"));
    }

    #[test]
    fn test_flat_schema_uses_table_names_without_children() {
        let schema = org_project_task();
        let tree = OwnershipTree::build(&schema).unwrap();
        let doc = generate(&schema, &tree, Layout::Flat);

        assert!(doc["properties"]["Organization"].is_object());
        assert!(doc["properties"]["organization"].is_null());
        let org_def = &doc["definitions"]["Organization"];
        assert!(org_def["properties"]["project"].is_null());
        // Flat documents never contain $ref markers.
        assert!(doc["definitions"]["__refMarker"].is_null());
        assert!(doc["definitions"]["__partialMarker"].is_object());
    }

    #[test]
    fn test_nullable_columns_allow_null() {
        use crate::schema::test_fixtures::{nullable, table};
        use crate::schema::Schema;
        let schema = Schema::new(
            vec![table("t", vec![crate::schema::test_fixtures::col("id", "int4"), nullable("note", "text")], &["id"])],
            vec![],
        );
        let tree = OwnershipTree::build(&schema).unwrap();
        let doc = generate(&schema, &tree, Layout::Flat);
        assert_eq!(
            doc["definitions"]["t"]["properties"]["note"]["type"],
            serde_json::json!(["string", "null"])
        );
        assert_eq!(
            doc["definitions"]["t"]["properties"]["id"]["type"],
            serde_json::json!("integer")
        );
    }
}
