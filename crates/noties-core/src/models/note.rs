use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashSet;

use super::timestamp;
use crate::error::SchemaError;
use crate::ids;
use crate::migrate::{migrate_note, needs_migration};

fn default_priority() -> String {
    "none".to_string()
}

/// A single entry of a checklist block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub id: String,

    #[serde(default)]
    pub text: String,

    #[serde(default)]
    pub checked: bool,

    /// Free-form priority label, `"none"` when unset
    #[serde(default = "default_priority")]
    pub priority: String,
}

impl ChecklistItem {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: ids::item_id(),
            text: text.into(),
            checked: false,
            priority: default_priority(),
        }
    }
}

/// A typed unit of note content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Block {
    Text {
        id: String,
        #[serde(default)]
        content: String,
    },
    Checklist {
        id: String,
        #[serde(default)]
        items: Vec<ChecklistItem>,
    },
}

impl Block {
    pub fn text(content: impl Into<String>) -> Self {
        Block::Text {
            id: ids::block_id(),
            content: content.into(),
        }
    }

    pub fn checklist(items: Vec<ChecklistItem>) -> Self {
        Block::Checklist {
            id: ids::block_id(),
            items,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Block::Text { id, .. } | Block::Checklist { id, .. } => id,
        }
    }
}

/// A note in the current block-based shape.
///
/// `content` and `checklist` are the pre-block fields. They are kept next to
/// `blocks` after migration so older readers still see the note body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub blocks: Vec<Block>,

    #[serde(default, with = "timestamp", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, with = "timestamp", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checklist: Option<Vec<Value>>,
}

impl Note {
    pub fn new(id: impl Into<String>, title: impl Into<String>, blocks: Vec<Block>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            blocks,
            created_at: None,
            updated_at: None,
            content: None,
            checklist: None,
        }
    }

    /// Build a note from a stored document body, migrating legacy shapes first.
    ///
    /// The document id wins over any `id` field inside the body.
    pub fn from_document(id: &str, data: Map<String, Value>) -> Result<Self, SchemaError> {
        if needs_migration(&data) {
            tracing::debug!(id, "migrating legacy note shape");
        }
        let migrated = migrate_note(Value::Object(data));
        let mut note: Note = serde_json::from_value(migrated)?;
        note.id = id.to_string();
        Ok(note)
    }

    /// Fields written to the remote store on create.
    ///
    /// Timestamps are left to the store, which stamps them on write.
    pub fn create_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("title".into(), Value::String(self.title.clone()));
        fields.insert(
            "blocks".into(),
            serde_json::to_value(&self.blocks).unwrap_or(Value::Array(Vec::new())),
        );
        fields
    }

    /// Block ids must be unique within a note.
    pub fn validate(&self) -> Result<(), SchemaError> {
        check_block_ids(&self.blocks)
    }

    pub fn apply_patch(&mut self, patch: &NotePatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(blocks) = &patch.blocks {
            self.blocks = blocks.clone();
        }
    }

    pub fn block(&self, block_id: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id() == block_id)
    }
}

fn check_block_ids(blocks: &[Block]) -> Result<(), SchemaError> {
    let mut seen = HashSet::new();
    for block in blocks {
        if !seen.insert(block.id()) {
            return Err(SchemaError::DuplicateBlockId(block.id().to_string()));
        }
    }
    Ok(())
}

/// Partial update of a note; only present fields are written
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocks: Option<Vec<Block>>,
}

impl NotePatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            blocks: None,
        }
    }

    pub fn blocks(blocks: Vec<Block>) -> Self {
        Self {
            title: None,
            blocks: Some(blocks),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.blocks.is_none()
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        match &self.blocks {
            Some(blocks) => check_block_ids(blocks),
            None => Ok(()),
        }
    }

    /// Shallow JSON object holding only the fields this patch sets.
    pub fn to_fields(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(fields)) => fields,
            _ => Map::new(),
        }
    }
}

/// Newest first; equal timestamps fall back to ascending id so the order
/// does not depend on how the snapshot happened to arrive.
pub fn compare_notes(a: &Note, b: &Note) -> Ordering {
    let a_time = timestamp::sort_millis(a.updated_at.as_ref());
    let b_time = timestamp::sort_millis(b.updated_at.as_ref());
    b_time.cmp(&a_time).then_with(|| a.id.cmp(&b.id))
}

pub fn sort_notes(notes: &mut [Note]) {
    notes.sort_by(compare_notes);
}

pub fn sorted_notes(notes: &[Note]) -> Vec<Note> {
    let mut sorted = notes.to_vec();
    sort_notes(&mut sorted);
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn note_at(id: &str, millis: Option<i64>) -> Note {
        let mut note = Note::new(id, id, vec![]);
        note.updated_at = millis.map(|ms| Utc.timestamp_millis_opt(ms).unwrap());
        note
    }

    #[test]
    fn test_sorted_newest_first() {
        let notes = vec![note_at("a", Some(10)), note_at("b", Some(30)), note_at("c", None)];
        let ids: Vec<String> = sorted_notes(&notes).into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_equal_timestamps_order_by_id_not_insertion() {
        let forward = vec![
            note_at("zeta", Some(5)),
            note_at("alpha", Some(5)),
            note_at("mid", Some(5)),
        ];
        let mut backward = forward.clone();
        backward.reverse();

        let ids = |notes: &[Note]| -> Vec<String> {
            sorted_notes(notes).into_iter().map(|n| n.id).collect()
        };
        assert_eq!(ids(&forward), vec!["alpha", "mid", "zeta"]);
        assert_eq!(ids(&forward), ids(&backward));
    }

    #[test]
    fn test_from_document_uses_document_id() {
        let data = json!({
            "id": "stale",
            "title": "Groceries",
            "blocks": [{"type": "text", "id": "b1", "content": "milk"}],
            "updatedAt": {"seconds": 100, "nanoseconds": 0}
        });
        let Value::Object(map) = data else { unreachable!() };
        let note = Note::from_document("n1", map).unwrap();
        assert_eq!(note.id, "n1");
        assert_eq!(note.title, "Groceries");
        assert_eq!(note.updated_at.unwrap().timestamp(), 100);
        assert!(matches!(&note.blocks[0], Block::Text { content, .. } if content == "milk"));
    }

    #[test]
    fn test_checklist_item_defaults() {
        let block: Block = serde_json::from_value(json!({
            "type": "checklist",
            "id": "c1",
            "items": [{"id": "i1", "text": "eggs"}]
        }))
        .unwrap();
        let Block::Checklist { items, .. } = block else { panic!("expected checklist") };
        assert!(!items[0].checked);
        assert_eq!(items[0].priority, "none");
    }

    #[test]
    fn test_duplicate_block_ids_rejected() {
        let note = Note::new(
            "n",
            "t",
            vec![
                Block::Text { id: "same".into(), content: "a".into() },
                Block::Checklist { id: "same".into(), items: vec![] },
            ],
        );
        assert_eq!(
            note.validate(),
            Err(SchemaError::DuplicateBlockId("same".into()))
        );
        assert!(NotePatch::blocks(note.blocks.clone()).validate().is_err());
    }

    #[test]
    fn test_patch_fields_are_shallow_and_sparse() {
        let fields = NotePatch::title("New").to_fields();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields["title"], json!("New"));

        let mut note = note_at("n", None);
        note.apply_patch(&NotePatch::blocks(vec![Block::text("x")]));
        assert_eq!(note.title, "n");
        assert_eq!(note.blocks.len(), 1);
    }
}
