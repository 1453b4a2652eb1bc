use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::timestamp;
use crate::error::SchemaError;

/// The planner entries for a single date.
///
/// `slots` is sparse: a time key without an entry is absent, never `""`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayPlan {
    #[serde(default)]
    pub id: String,

    #[serde(default, deserialize_with = "deserialize_slots")]
    pub slots: BTreeMap<String, String>,

    #[serde(default, with = "timestamp", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl DayPlan {
    /// An empty plan for a date that has no stored document yet.
    pub fn empty(date_id: &str) -> Self {
        Self {
            id: date_id.to_string(),
            slots: BTreeMap::new(),
            updated_at: Some(Utc::now()),
        }
    }

    pub fn from_document(id: &str, data: Map<String, Value>) -> Result<Self, SchemaError> {
        let mut plan: DayPlan = serde_json::from_value(Value::Object(data))?;
        plan.id = id.to_string();
        Ok(plan)
    }

    /// Date key used as the document id (`YYYY-MM-DD`).
    pub fn date_key(date: NaiveDate) -> String {
        date.format("%Y-%m-%d").to_string()
    }

    pub fn slot(&self, time: &str) -> Option<&str> {
        self.slots.get(time).map(String::as_str)
    }

    /// Set or clear one time key. `None` and empty values remove the entry.
    pub fn set_slot(&mut self, time: &str, value: Option<&str>) {
        apply_slot(&mut self.slots, time, value);
    }

    /// Body written with a merge-update; the store stamps `updatedAt`.
    pub fn slots_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert(
            "slots".into(),
            serde_json::to_value(&self.slots).unwrap_or(Value::Object(Map::new())),
        );
        fields
    }
}

/// Read a stored `slots` value.
///
/// Null and blank entries mean "no entry" and are dropped. Any other
/// non-string entry is an error: the map cannot be rewritten without losing it.
pub fn parse_slots(value: Option<&Value>) -> Result<BTreeMap<String, String>, SchemaError> {
    let map = match value {
        None | Some(Value::Null) => return Ok(BTreeMap::new()),
        Some(Value::Object(map)) => map,
        Some(_) => return Err(SchemaError::Malformed("slots is not an object".into())),
    };
    let mut slots = BTreeMap::new();
    for (time, entry) in map {
        match entry {
            Value::Null => {}
            Value::String(s) if s.is_empty() => {}
            Value::String(s) => {
                slots.insert(time.clone(), s.clone());
            }
            other => {
                return Err(SchemaError::Malformed(format!(
                    "slot {time} holds {other}, expected a string"
                )))
            }
        }
    }
    Ok(slots)
}

fn deserialize_slots<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    parse_slots(raw.as_ref()).map_err(serde::de::Error::custom)
}

pub fn apply_slot(slots: &mut BTreeMap<String, String>, time: &str, value: Option<&str>) {
    match value.filter(|v| !v.is_empty()) {
        Some(value) => {
            slots.insert(time.to_string(), value.to_string());
        }
        None => {
            slots.remove(time);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_value_removes_slot() {
        let mut plan = DayPlan::empty("2024-05-01");
        plan.set_slot("09:00", Some("gym"));
        plan.set_slot("10:00", Some("call"));
        plan.set_slot("09:00", Some(""));
        plan.set_slot("10:00", None);
        assert!(plan.slots.is_empty());
        assert_eq!(plan.slot("09:00"), None);
    }

    #[test]
    fn test_from_document_drops_blank_slots() {
        let Value::Object(data) = json!({
            "slots": {"09:00": "gym", "10:00": ""},
            "updatedAt": 1714550400000i64
        }) else {
            unreachable!()
        };
        let plan = DayPlan::from_document("2024-05-01", data).unwrap();
        assert_eq!(plan.id, "2024-05-01");
        assert_eq!(plan.slot("09:00"), Some("gym"));
        assert!(!plan.slots.contains_key("10:00"));
    }

    #[test]
    fn test_from_document_drops_null_slots() {
        let Value::Object(data) = json!({"slots": {"9am": "gym", "10am": null}}) else {
            unreachable!()
        };
        let plan = DayPlan::from_document("2024-05-01", data).unwrap();
        assert_eq!(plan.slots.len(), 1);
        assert_eq!(plan.slot("9am"), Some("gym"));
    }

    #[test]
    fn test_from_document_rejects_non_string_slot() {
        let Value::Object(data) = json!({"slots": {"9am": "gym", "10am": 7}}) else {
            unreachable!()
        };
        assert!(matches!(
            DayPlan::from_document("2024-05-01", data),
            Err(SchemaError::Malformed(_))
        ));
        assert!(parse_slots(Some(&json!(["gym"]))).is_err());
        assert!(parse_slots(Some(&Value::Null)).unwrap().is_empty());
    }

    #[test]
    fn test_date_key_format() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert_eq!(DayPlan::date_key(date), "2024-05-01");
    }

    #[test]
    fn test_slots_fields() {
        let mut plan = DayPlan::empty("d");
        plan.set_slot("09:00", Some("gym"));
        assert_eq!(plan.slots_fields()["slots"], json!({"09:00": "gym"}));
    }
}
