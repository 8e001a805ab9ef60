// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Record values.
//!
//! A record is a mapping from canonical storage key to field value, plus two
//! reserved attributes: its id and its typename. Absence of a storage key is
//! meaningful (the data was never fetched) and distinct from an explicit
//! JSON `null`.
//!
//! Invariants
//! - A storage key maps to at most one value (the map enforces this).
//! - `__id` never changes.
//! - `__typename` may be refined from absent to concrete by a merge, but an
//!   established concrete typename is never rewritten.

use std::collections::BTreeMap;

use prism_ir::DataId;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::PayloadError;

/// Reserved record attribute: the record's id.
pub const ID_KEY: &str = "__id";
/// Reserved record attribute: the record's typename.
pub const TYPENAME_KEY: &str = "__typename";
/// Interchange key for a singular linked reference.
pub const REF_KEY: &str = "__ref";
/// Interchange key for a plural linked reference list.
pub const REFS_KEY: &str = "__refs";

/// One field value inside a record.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    /// Scalar JSON (string, number, boolean, null, or a complex scalar).
    Scalar(JsonValue),
    /// Singular link to another record.
    Ref(DataId),
    /// Ordered plural link; `None` elements are explicit null holes.
    RefList(Vec<Option<DataId>>),
}

impl FieldValue {
    /// Returns `true` for an explicit scalar `null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Scalar(JsonValue::Null))
    }

    /// Interchange form per the record serialization contract.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Scalar(v) => v.clone(),
            Self::Ref(id) => {
                let mut map = JsonMap::new();
                map.insert(REF_KEY.to_owned(), JsonValue::String(id.to_string()));
                JsonValue::Object(map)
            }
            Self::RefList(ids) => {
                let refs: Vec<JsonValue> = ids
                    .iter()
                    .map(|id| match id {
                        Some(id) => JsonValue::String(id.to_string()),
                        None => JsonValue::Null,
                    })
                    .collect();
                let mut map = JsonMap::new();
                map.insert(REFS_KEY.to_owned(), JsonValue::Array(refs));
                JsonValue::Object(map)
            }
        }
    }

    /// Decodes the interchange form. Objects carrying exactly a `__ref` /
    /// `__refs` key decode as links; everything else is a scalar.
    #[must_use]
    pub fn from_json(value: &JsonValue) -> Self {
        if let JsonValue::Object(map) = value {
            if map.len() == 1 {
                if let Some(JsonValue::String(id)) = map.get(REF_KEY) {
                    return Self::Ref(DataId::from(id.as_str()));
                }
                if let Some(JsonValue::Array(ids)) = map.get(REFS_KEY) {
                    let refs = ids
                        .iter()
                        .map(|v| match v {
                            JsonValue::String(id) => Some(DataId::from(id.as_str())),
                            _ => None,
                        })
                        .collect();
                    return Self::RefList(refs);
                }
            }
        }
        Self::Scalar(value.clone())
    }
}

/// A normalized record.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    data_id: DataId,
    typename: Option<String>,
    fields: BTreeMap<String, FieldValue>,
}

impl Record {
    /// Creates an empty record.
    #[must_use]
    pub fn new(data_id: DataId, typename: Option<String>) -> Self {
        Self {
            data_id,
            typename,
            fields: BTreeMap::new(),
        }
    }

    /// The record's id.
    #[must_use]
    pub fn data_id(&self) -> &DataId {
        &self.data_id
    }

    /// The record's typename, when established.
    #[must_use]
    pub fn typename(&self) -> Option<&str> {
        self.typename.as_deref()
    }

    /// Refines an absent typename to a concrete one. An established concrete
    /// typename wins over any later candidate; conflicts are logged by the
    /// merge path, not here.
    pub fn refine_typename(&mut self, typename: &str) {
        if self.typename.is_none() {
            self.typename = Some(typename.to_owned());
        }
    }

    /// Reads a field value by storage key. `None` means the key was never
    /// written, which is distinct from an explicit null.
    #[must_use]
    pub fn get(&self, storage_key: &str) -> Option<&FieldValue> {
        self.fields.get(storage_key)
    }

    /// Writes a field value.
    pub fn set(&mut self, storage_key: impl Into<String>, value: FieldValue) {
        self.fields.insert(storage_key.into(), value);
    }

    /// Returns `true` if the record has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterates fields in storage-key order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Copies every field of `other` into `self`, overwriting collisions.
    pub fn copy_fields_from(&mut self, other: &Record) {
        for (key, value) in &other.fields {
            self.fields.insert(key.clone(), value.clone());
        }
        if let Some(t) = other.typename() {
            self.refine_typename(t);
        }
    }

    /// Field-wise merge producing the post-publish record: `next`'s fields
    /// win, `previous`'s unmentioned fields survive. Typename follows the
    /// refinement rule; a conflicting rewrite attempt keeps the established
    /// typename and is reported at debug level by the caller.
    #[must_use]
    pub fn merge(previous: &Record, next: &Record) -> Record {
        let mut merged = previous.clone();
        merged.copy_fields_from(next);
        merged
    }

    /// Interchange form: `{__id, __typename?, storageKey: value, …}`.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        let mut map = JsonMap::new();
        map.insert(ID_KEY.to_owned(), JsonValue::String(self.data_id.to_string()));
        if let Some(t) = &self.typename {
            map.insert(TYPENAME_KEY.to_owned(), JsonValue::String(t.clone()));
        }
        for (key, value) in &self.fields {
            map.insert(key.clone(), value.to_json());
        }
        JsonValue::Object(map)
    }

    /// Decodes the interchange form.
    ///
    /// # Errors
    ///
    /// Rejects non-object values and entries whose `__id` disagrees with the
    /// id the entry is filed under.
    pub fn from_json(data_id: DataId, value: &JsonValue) -> Result<Self, PayloadError> {
        let JsonValue::Object(map) = value else {
            return Err(PayloadError::InvalidRecord {
                data_id,
                reason: "record must be a JSON object".to_owned(),
            });
        };
        if let Some(JsonValue::String(id)) = map.get(ID_KEY) {
            if id != data_id.as_str() {
                return Err(PayloadError::InvalidRecord {
                    data_id,
                    reason: format!("__id {id:?} disagrees with entry key"),
                });
            }
        }
        let typename = match map.get(TYPENAME_KEY) {
            Some(JsonValue::String(t)) => Some(t.clone()),
            _ => None,
        };
        let mut record = Record::new(data_id, typename);
        for (key, field) in map {
            if key == ID_KEY || key == TYPENAME_KEY {
                continue;
            }
            record.set(key.clone(), FieldValue::from_json(field));
        }
        Ok(record)
    }
}
