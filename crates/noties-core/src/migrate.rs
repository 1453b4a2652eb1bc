//! Normalizes note records of any vintage into the block-based shape.
//!
//! Older notes stored a flat `content` string and a `checklist` array. They
//! are rewritten into at most one text block followed by at most one
//! checklist block. Records that already carry a `blocks` array pass through
//! untouched, so running the migration twice is a no-op.

use serde_json::{json, Map, Value};

use crate::ids;

/// Migrate a raw note record. Pure; never fails.
pub fn migrate_note(record: Value) -> Value {
    let Value::Object(mut fields) = record else {
        return record;
    };
    if needs_migration(&fields) {
        let blocks = legacy_blocks(&fields);
        fields.insert("blocks".into(), Value::Array(blocks));
        if !matches!(fields.get("content"), Some(Value::String(_))) {
            fields.insert("content".into(), Value::String(String::new()));
        }
        if !matches!(fields.get("checklist"), Some(Value::Array(_))) {
            fields.insert("checklist".into(), Value::Array(Vec::new()));
        }
    }
    Value::Object(fields)
}

/// True unless the record already has a `blocks` sequence.
pub fn needs_migration(fields: &Map<String, Value>) -> bool {
    !matches!(fields.get("blocks"), Some(Value::Array(_)))
}

fn legacy_blocks(fields: &Map<String, Value>) -> Vec<Value> {
    let mut blocks = Vec::new();

    if let Some(content) = fields.get("content").and_then(Value::as_str) {
        if !content.trim().is_empty() {
            blocks.push(json!({
                "id": ids::generate_id("text"),
                "type": "text",
                "content": content,
            }));
        }
    }

    if let Some(Value::Array(items)) = fields.get("checklist") {
        if !items.is_empty() {
            let items: Vec<Value> = items.iter().map(legacy_item).collect();
            blocks.push(json!({
                "id": ids::generate_id("checklist"),
                "type": "checklist",
                "items": items,
            }));
        }
    }

    blocks
}

fn legacy_item(item: &Value) -> Value {
    // Some very old checklists stored bare strings.
    if let Some(text) = item.as_str() {
        return json!({
            "id": ids::item_id(),
            "text": text,
            "checked": false,
            "priority": "none",
        });
    }

    let non_empty = |key: &str| {
        item.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    json!({
        "id": non_empty("id").unwrap_or_else(ids::item_id),
        "text": item.get("text").and_then(Value::as_str).unwrap_or_default(),
        "checked": item.get("checked").and_then(Value::as_bool).unwrap_or(false),
        "priority": non_empty("priority").unwrap_or_else(|| "none".to_string()),
    })
}
