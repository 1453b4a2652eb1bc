use crate::error::PathError;
use std::fmt;
use std::str::FromStr;

const ROOT: &str = "pins";

/// Collections supported by the sync layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Notes,
    DayPlans,
}

impl Collection {
    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Notes => "notes",
            Collection::DayPlans => "dayplans",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "notes" => Some(Collection::Notes),
            "dayplans" => Some(Collection::DayPlans),
            _ => None,
        }
    }
}

/// Typed form of a remote store path: `pins/{scope}/{collection}[/{doc_id}]`.
///
/// Without a document id the path addresses the whole collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorePath {
    scope: String,
    collection: Collection,
    doc_id: Option<String>,
}

impl StorePath {
    pub fn collection(scope: &str, collection: Collection) -> Self {
        Self {
            scope: scope.to_string(),
            collection,
            doc_id: None,
        }
    }

    pub fn notes(scope: &str) -> Self {
        Self::collection(scope, Collection::Notes)
    }

    pub fn note(scope: &str, note_id: &str) -> Self {
        Self::notes(scope).with_doc(note_id)
    }

    pub fn dayplans(scope: &str) -> Self {
        Self::collection(scope, Collection::DayPlans)
    }

    pub fn dayplan(scope: &str, date_id: &str) -> Self {
        Self::dayplans(scope).with_doc(date_id)
    }

    /// Same collection, addressing one document.
    pub fn with_doc(&self, doc_id: &str) -> Self {
        Self {
            scope: self.scope.clone(),
            collection: self.collection,
            doc_id: Some(doc_id.to_string()),
        }
    }

    /// The collection this path lives in (drops the document id).
    pub fn parent(&self) -> Self {
        Self {
            scope: self.scope.clone(),
            collection: self.collection,
            doc_id: None,
        }
    }

    /// Whether `value` can stand as a scope, collection member or document id.
    pub fn is_segment(value: &str) -> bool {
        !value.trim().is_empty() && !value.contains('/')
    }

    pub fn check_segment(value: &str) -> Result<(), PathError> {
        if Self::is_segment(value) {
            Ok(())
        } else {
            Err(PathError::InvalidSegment(value.to_string()))
        }
    }

    /// Fails when a segment would not survive the string form.
    pub fn validate(&self) -> Result<(), PathError> {
        Self::check_segment(&self.scope)?;
        match &self.doc_id {
            Some(id) => Self::check_segment(id),
            None => Ok(()),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn kind(&self) -> Collection {
        self.collection
    }

    pub fn doc_id(&self) -> Option<&str> {
        self.doc_id.as_deref()
    }

    pub fn is_document(&self) -> bool {
        self.doc_id.is_some()
    }

    /// Whether `other` is this path or a document inside this collection.
    pub fn contains(&self, other: &StorePath) -> bool {
        if self.scope != other.scope || self.collection != other.collection {
            return false;
        }
        match &self.doc_id {
            None => true,
            Some(id) => other.doc_id.as_deref() == Some(id.as_str()),
        }
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{ROOT}/{}/{}", self.scope, self.collection.as_str())?;
        if let Some(id) = &self.doc_id {
            write!(f, "/{id}")?;
        }
        Ok(())
    }
}

impl FromStr for StorePath {
    type Err = PathError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim_matches('/');
        let mut parts = trimmed.split('/');

        if parts.next() != Some(ROOT) {
            return Err(PathError::MissingRoot(raw.to_string()));
        }
        let scope = parts.next().unwrap_or_default();
        let collection = parts.next().unwrap_or_default();
        let doc_id = parts.next();

        if parts.next().is_some() {
            return Err(PathError::TooLong(raw.to_string()));
        }
        if scope.is_empty() || collection.is_empty() || doc_id.is_some_and(str::is_empty) {
            return Err(PathError::EmptySegment(raw.to_string()));
        }
        let collection = Collection::parse(collection)
            .ok_or_else(|| PathError::UnknownCollection(collection.to_string()))?;

        Ok(Self {
            scope: scope.to_string(),
            collection,
            doc_id: doc_id.map(str::to_string),
        })
    }
}

impl serde::Serialize for StorePath {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for StorePath {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
