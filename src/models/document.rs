//! Domain view of stored records and the write payloads that produce them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::collection::Collection;

/// Keys owned by the record envelope; never stored inside `fields`.
pub const RESERVED_KEYS: [&str; 3] = ["id", "status", "createdAt"];

/// Status of a record: a workflow label for patients and deals, an outcome code for logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordStatus {
    Code(u16),
    Label(String),
}

impl RecordStatus {
    pub fn label(label: impl Into<String>) -> Self {
        RecordStatus::Label(label.into())
    }

    /// Text stored in the `status` column.
    pub fn to_column(&self) -> String {
        match self {
            RecordStatus::Code(code) => code.to_string(),
            RecordStatus::Label(label) => label.clone(),
        }
    }

    pub fn from_column(collection: Collection, raw: &str) -> Self {
        if collection == Collection::WebhookLogs {
            if let Ok(code) = raw.parse::<u16>() {
                return RecordStatus::Code(code);
            }
        }
        RecordStatus::Label(raw.to_string())
    }

    pub fn as_label(&self) -> Option<&str> {
        match self {
            RecordStatus::Label(label) => Some(label),
            RecordStatus::Code(_) => None,
        }
    }

    pub fn as_code(&self) -> Option<u16> {
        match self {
            RecordStatus::Code(code) => Some(*code),
            RecordStatus::Label(_) => None,
        }
    }
}

/// A document inside one tenant collection.
///
/// Serializes as `{"id", "status", "createdAt", ...fields}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: String,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
    /// Insertion sequence assigned by the store; breaks `created_at` ties.
    #[serde(skip)]
    pub seq: i64,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Shallow merge of a patch. `null` removes a field; the envelope never changes
    /// apart from the status.
    pub fn apply_patch(&mut self, patch: &RecordPatch) {
        if let Some(status) = &patch.status {
            self.status = RecordStatus::Label(status.clone());
        }
        for (key, value) in &patch.fields {
            if RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }
            if value.is_null() {
                self.fields.remove(key);
            } else {
                self.fields.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Body of a create request: an optional status plus arbitrary domain fields.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NewRecord {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Body of an update request. Same shape as [`NewRecord`], merged instead of inserted.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RecordPatch {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// What the store persists for a new record; id and seq are assigned on insert.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordDraft {
    pub status: RecordStatus,
    pub fields: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

pub fn strip_reserved(fields: &mut Map<String, Value>) {
    for key in RESERVED_KEYS {
        fields.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patient() -> Record {
        let fields = json!({"name": "Jane Doe", "email": "jane@example.com", "phone": "555"});
        Record {
            id: "rec-1".to_string(),
            status: RecordStatus::label("Lead"),
            created_at: Utc::now(),
            seq: 7,
            fields: fields.as_object().cloned().unwrap(),
        }
    }

    #[test]
    fn serializes_with_flattened_fields() {
        let record = patient();
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["id"], "rec-1");
        assert_eq!(value["status"], "Lead");
        assert_eq!(value["name"], "Jane Doe");
        assert!(value.get("createdAt").is_some());
        assert!(value.get("seq").is_none());
        assert!(value.get("fields").is_none());
    }

    #[test]
    fn status_column_round_trips_per_collection() {
        assert_eq!(
            RecordStatus::from_column(Collection::WebhookLogs, "400"),
            RecordStatus::Code(400)
        );
        assert_eq!(
            RecordStatus::from_column(Collection::Patients, "Lead"),
            RecordStatus::label("Lead")
        );
        assert_eq!(RecordStatus::Code(200).to_column(), "200");
    }

    #[test]
    fn patch_merges_and_removes_but_keeps_envelope() {
        let mut record = patient();
        let original = record.clone();
        let patch: RecordPatch = serde_json::from_value(json!({
            "status": "Agendado",
            "phone": null,
            "cpf": "123.456.789-00",
            "id": "hijack",
            "createdAt": "1970-01-01T00:00:00Z"
        }))
        .unwrap();

        record.apply_patch(&patch);

        assert_eq!(record.id, original.id);
        assert_eq!(record.created_at, original.created_at);
        assert_eq!(record.seq, original.seq);
        assert_eq!(record.status, RecordStatus::label("Agendado"));
        assert!(record.field("phone").is_none());
        assert_eq!(record.str_field("cpf"), Some("123.456.789-00"));
        assert_eq!(record.str_field("name"), Some("Jane Doe"));
        assert!(record.field("id").is_none());
    }

    #[test]
    fn new_record_splits_status_from_fields() {
        let mut draft: NewRecord = serde_json::from_value(json!({
            "status": "Lead",
            "name": "Jane",
            "createdAt": "x"
        }))
        .unwrap();
        assert_eq!(draft.status.as_deref(), Some("Lead"));
        strip_reserved(&mut draft.fields);
        assert_eq!(draft.fields.len(), 1);
        assert_eq!(draft.fields["name"], "Jane");
    }
}
