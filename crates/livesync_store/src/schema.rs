//! Collection schemas.

use crate::record::is_standard_field;
use serde::{Deserialize, Serialize};

/// Type of a schema field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "options")]
pub enum FieldKind {
    /// Free text.
    Data,
    /// Integer.
    Int,
    /// Floating point.
    Float,
    /// Boolean check (0/1).
    Check,
    /// Timestamp.
    Datetime,
    /// One of a fixed set of options.
    Select,
    /// Child table backed by the named child collection.
    Table(String),
}

/// A declared field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name.
    pub name: String,
    /// Field type.
    pub kind: FieldKind,
    /// Whether the validated write path rejects records without a value.
    #[serde(default)]
    pub required: bool,
}

impl FieldDef {
    /// Creates an optional field.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
        }
    }

    /// Marks the field required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Field list of a collection.
///
/// Standard fields (`name`, `owner`, `modified`, ...) are implicit and
/// always reported as present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Collection name.
    pub collection: String,
    /// Declared fields.
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

impl Schema {
    /// Creates an empty schema.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            fields: Vec::new(),
        }
    }

    /// Adds a field.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldDef::new(name, kind));
        self
    }

    /// Adds a required field.
    #[must_use]
    pub fn required_field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldDef::new(name, kind).required());
        self
    }

    /// Adds a child table backed by `child_collection`.
    #[must_use]
    pub fn table(mut self, name: impl Into<String>, child_collection: impl Into<String>) -> Self {
        self.fields
            .push(FieldDef::new(name, FieldKind::Table(child_collection.into())));
        self
    }

    /// Looks up a declared field.
    pub fn get(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns true if the field is declared or is a standard field.
    pub fn has_field(&self, name: &str) -> bool {
        is_standard_field(name) || self.get(name).is_some()
    }

    /// Resolves a table field to its child collection.
    pub fn child_collection(&self, table: &str) -> Option<&str> {
        match self.get(table).map(|f| &f.kind) {
            Some(FieldKind::Table(child)) => Some(child),
            _ => None,
        }
    }

    /// Returns true if `name` is a child table field.
    pub fn is_table(&self, name: &str) -> bool {
        self.child_collection(name).is_some()
    }

    /// Iterates over required non-table fields.
    pub fn required_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields
            .iter()
            .filter(|f| f.required && !matches!(f.kind, FieldKind::Table(_)))
    }
}
