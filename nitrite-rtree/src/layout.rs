//! Record layout describing the typed fields carried per index entry.
//!
//! Entries normally carry a raw data identifier; a [`DataDefinition`] lets a
//! caller describe, validate and encode a serialized record payload for each
//! identifier. The layout is stored with the tree configuration so a
//! persisted index reopens with the layout it was created with.

use serde::{Deserialize, Serialize};

use crate::rtree::{SpatialError, SpatialResult};

/// Type of a single field in a record layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Integer,
    Float,
    Text,
    Boolean,
    Binary,
}

/// A named, typed attribute of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    name: String,
    field_type: FieldType,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }
}

/// A value of one record field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
    Binary(Vec<u8>),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Integer(_) => FieldType::Integer,
            FieldValue::Float(_) => FieldType::Float,
            FieldValue::Text(_) => FieldType::Text,
            FieldValue::Boolean(_) => FieldType::Boolean,
            FieldValue::Binary(_) => FieldType::Binary,
        }
    }
}

/// Ordered set of fields stored per index entry.
///
/// A definition always holds at least one field and field names are unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataDefinition {
    fields: Vec<FieldDescriptor>,
}

impl DataDefinition {
    /// Creates a layout from its fields.
    ///
    /// # Errors
    ///
    /// Returns `InvalidLayout` for an empty field list or duplicate names.
    pub fn new(fields: Vec<FieldDescriptor>) -> SpatialResult<Self> {
        let definition = Self { fields };
        definition.validate()?;
        Ok(definition)
    }

    /// The layout used when entries carry a raw identifier: a single
    /// integer field named `id`.
    pub fn identifier() -> Self {
        Self {
            fields: vec![FieldDescriptor::new("id", FieldType::Integer)],
        }
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Position of the named field within a record.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Re-checks the layout invariants. Layouts obtained through
    /// deserialization bypass [`DataDefinition::new`], so stores call this
    /// when they load a persisted configuration.
    pub fn validate(&self) -> SpatialResult<()> {
        if self.fields.is_empty() {
            return Err(SpatialError::InvalidLayout(
                "data definition must contain at least one field".into(),
            ));
        }
        for (i, field) in self.fields.iter().enumerate() {
            if field.name.is_empty() {
                return Err(SpatialError::InvalidLayout(format!(
                    "field {} has an empty name",
                    i
                )));
            }
            if self.fields[..i].iter().any(|f| f.name == field.name) {
                return Err(SpatialError::InvalidLayout(format!(
                    "duplicate field name '{}'",
                    field.name
                )));
            }
        }
        Ok(())
    }

    /// Checks that a record matches this layout in arity and field types.
    pub fn check_record(&self, values: &[FieldValue]) -> SpatialResult<()> {
        if values.len() != self.fields.len() {
            return Err(SpatialError::InvalidLayout(format!(
                "record has {} values, layout expects {}",
                values.len(),
                self.fields.len()
            )));
        }
        for (field, value) in self.fields.iter().zip(values) {
            if field.field_type != value.field_type() {
                return Err(SpatialError::InvalidLayout(format!(
                    "field '{}' expects {:?}, got {:?}",
                    field.name,
                    field.field_type,
                    value.field_type()
                )));
            }
        }
        Ok(())
    }

    /// Serializes a record after checking it against the layout.
    pub fn encode_record(&self, values: &[FieldValue]) -> SpatialResult<Vec<u8>> {
        self.check_record(values)?;
        bincode::serde::encode_to_vec(values, bincode::config::legacy())
            .map_err(|e| SpatialError::Serialization(e.to_string()))
    }

    /// Deserializes a record and checks it against the layout.
    pub fn decode_record(&self, bytes: &[u8]) -> SpatialResult<Vec<FieldValue>> {
        let values: Vec<FieldValue> =
            bincode::serde::decode_from_slice(bytes, bincode::config::legacy())
                .map(|(values, _)| values)
                .map_err(|e| SpatialError::Serialization(e.to_string()))?;
        self.check_record(&values)?;
        Ok(values)
    }
}

impl Default for DataDefinition {
    fn default() -> Self {
        Self::identifier()
    }
}
