//! Port onto the production-tracking service.
//!
//! The remote service is an external collaborator: this module only defines
//! the find/create/upload/delete surface the submission workflow consumes,
//! keyed by entity type name and a filter list. Concrete transports (and
//! the in-memory fake the tests use) implement [`TrackingService`].

pub mod credentials;
pub mod session;

pub use credentials::{CredentialStore, Credentials};
pub use session::{submit_review_media, QueryOpts, Session, SubmitError};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("tracking request failed: {0}")]
    Request(String),

    #[error("upload failed: {0}")]
    Upload(String),
}

/// Lightweight link to an entity, as the service embeds it in records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: i64,
}

impl EntityRef {
    pub fn new(kind: impl Into<String>, id: i64) -> Self {
        Self {
            kind: kind.into(),
            id,
        }
    }
}

/// One `[field, op, value]` condition of a query filter list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Filter {
    pub field: String,
    pub op: String,
    pub value: Value,
}

impl Filter {
    pub fn new(field: impl Into<String>, op: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            op: op.into(),
            value,
        }
    }

    pub fn is(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, "is", value)
    }

    pub fn starts_with(field: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self::new(field, "starts_with", Value::String(prefix.into()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sort {
    pub field: String,
    pub direction: SortDirection,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }
}

/// An entity record: the fields the service returned (or is being asked to
/// store), plus typed accessors for the handful of fields the workflow
/// reads back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record(pub Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> &mut Self {
        self.0.insert(field.into(), value);
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn id(&self) -> Option<i64> {
        self.0.get("id").and_then(Value::as_i64)
    }

    pub fn kind(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }

    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    /// Entity link stored under `field`, e.g. a task's `entity` or `project`.
    pub fn entity_field(&self, field: &str) -> Option<EntityRef> {
        serde_json::from_value(self.0.get(field)?.clone()).ok()
    }

    /// `name` of the entity linked under `field`, when the service expanded
    /// the link with a display name.
    pub fn linked_name(&self, field: &str) -> Option<&str> {
        self.0.get(field)?.get("name")?.as_str()
    }

    /// This record's own type/id as a link.
    pub fn entity_ref(&self) -> Option<EntityRef> {
        Some(EntityRef::new(self.kind()?, self.id()?))
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The remote data service: find/create/upload/delete keyed by entity type
/// and filter list.
pub trait TrackingService {
    fn find(
        &self,
        entity_type: &str,
        filters: &[Filter],
        fields: &[&str],
        order: &[Sort],
    ) -> Result<Vec<Record>, TrackingError>;

    fn create(&self, entity_type: &str, data: &Record) -> Result<Record, TrackingError>;

    fn upload(
        &self,
        entity_type: &str,
        id: i64,
        file: &Path,
        field: &str,
        display_name: &str,
    ) -> Result<(), TrackingError>;

    fn delete(&self, entity_type: &str, id: i64) -> Result<(), TrackingError>;
}
