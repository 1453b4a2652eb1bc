use noties_core::SchemaError;

/// Result of a domain mutation.
///
/// Transport failures never show up here: they turn into `Queued`.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// The remote store accepted the write
    Applied { id: String },
    /// The write failed and was kept for replay; the local cache already
    /// reflects it. `change_id` is `None` when the queue itself could not be
    /// written.
    Queued {
        id: String,
        change_id: Option<i64>,
    },
    /// No session scope is set; nothing happened
    NoScope,
    /// The record failed validation; nothing was written or queued
    Rejected(SchemaError),
}

impl WriteOutcome {
    /// Id of the affected record, if the mutation went anywhere.
    pub fn id(&self) -> Option<&str> {
        match self {
            WriteOutcome::Applied { id } | WriteOutcome::Queued { id, .. } => Some(id),
            WriteOutcome::NoScope | WriteOutcome::Rejected(_) => None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, WriteOutcome::Applied { .. } | WriteOutcome::Queued { .. })
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, WriteOutcome::Queued { .. })
    }
}
