//! Core identifier types for Bahi.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier for a synchronized record.
///
/// Record ids are assigned by the client at create time, so the id of a new
/// record is known before the remote store confirms the insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub Uuid);

impl RecordId {
    /// Creates a record id from an existing uuid.
    #[must_use]
    pub const fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Generates a new collision-resistant record id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the raw uuid value.
    #[must_use]
    pub const fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rec:{}", self.0)
    }
}

/// Identifier of the acting user that scopes every read and write.
///
/// Every record belongs to exactly one owner; the engine refuses to operate
/// without one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub String);

impl OwnerId {
    /// Creates an owner id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the raw identifier string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner:{}", self.0)
    }
}

/// Unique identifier for one mutation attempt, generated locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutationId(pub Uuid);

impl MutationId {
    /// Generates a new mutation id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mut:{}", self.0)
    }
}

/// Correlation id shared by every entry of a batch create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchId(pub Uuid);

impl BatchId {
    /// Generates a new batch correlation id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch:{}", self.0)
    }
}

/// A synchronized table name.
///
/// Tables are a fixed, statically known set per deployment, so the name is a
/// `'static` string and the type is `Copy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Table(&'static str);

impl Table {
    /// Creates a table handle from a static name.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// Returns the table name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_record_ids_are_unique() {
        let a = RecordId::generate();
        let b = RecordId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn record_id_display() {
        let id = RecordId::new(Uuid::nil());
        assert_eq!(format!("{id}"), "rec:00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn owner_id_roundtrip() {
        let owner = OwnerId::new("user-7");
        assert_eq!(owner.as_str(), "user-7");
        assert_eq!(format!("{owner}"), "owner:user-7");
    }

    #[test]
    fn table_equality_is_by_name() {
        const CUSTOMERS: Table = Table::new("customers");
        assert_eq!(CUSTOMERS, Table::new("customers"));
        assert_ne!(CUSTOMERS, Table::new("suppliers"));
        assert_eq!(CUSTOMERS.name(), "customers");
    }
}
