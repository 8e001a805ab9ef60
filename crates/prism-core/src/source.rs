// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Record sources: keyed mappings from id to record state.
//!
//! A source distinguishes three states per id: a live record, an explicit
//! tombstone ("this record was deleted"; reads yield null), and absence
//! ("nothing is known"). Sinks staged for publication may additionally carry
//! the [`RecordEntry::Unpublish`] sentinel, which instructs the canonical
//! store to forget an id entirely; it reads as absent everywhere else and
//! never survives a publish.
//!
//! The canonical store takes ownership of records placed into it: `set`
//! consumes the record and only shared references escape afterwards, so the
//! "callers must not mutate published records" rule is enforced by the type
//! system rather than a development-mode freeze.

use std::collections::BTreeMap;

use prism_ir::DataId;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::PayloadError;
use crate::record::Record;

/// State of one id within a source.
#[derive(Clone, Debug, PartialEq)]
pub enum RecordEntry {
    /// A live record.
    Record(Record),
    /// Explicit deletion marker; reads of this id yield null.
    Tombstone,
    /// Publish-only sentinel: forget the id entirely. Treated as absent by
    /// every read path.
    Unpublish,
}

impl RecordEntry {
    /// The live record, if this entry holds one.
    #[must_use]
    pub fn record(&self) -> Option<&Record> {
        match self {
            Self::Record(r) => Some(r),
            _ => None,
        }
    }
}

/// Read-only interface over a source.
///
/// The mutable store and the copy-on-write overlay both implement this; read
/// paths (reader, marker, checker) accept `&dyn RecordSource` so they cannot
/// observe (or cause) mutation.
pub trait RecordSource {
    /// Returns the entry for `data_id`. `None` means the id is unknown;
    /// [`RecordEntry::Unpublish`] entries are reported as `None`.
    fn get(&self, data_id: &DataId) -> Option<&RecordEntry>;

    /// Ids present in this source, in deterministic (ascending) order.
    fn record_ids(&self) -> Vec<DataId>;

    /// Number of ids present.
    fn size(&self) -> usize;

    /// Returns `true` if the id maps to a record or tombstone.
    fn has(&self, data_id: &DataId) -> bool {
        self.get(data_id).is_some()
    }

    /// The live record for `data_id`, if any.
    fn get_record(&self, data_id: &DataId) -> Option<&Record> {
        self.get(data_id).and_then(RecordEntry::record)
    }
}

/// An owned, mutable source. Canonical store state, normalization sinks, and
/// backup accumulators are all instances of this type.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MutableRecordSource {
    records: BTreeMap<DataId, RecordEntry>,
}

impl MutableRecordSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the live record for `data_id`.
    pub fn set(&mut self, data_id: DataId, record: Record) {
        self.records.insert(data_id, RecordEntry::Record(record));
    }

    /// Writes a tombstone for `data_id`.
    pub fn delete(&mut self, data_id: DataId) {
        self.records.insert(data_id, RecordEntry::Tombstone);
    }

    /// Writes the unpublish sentinel for `data_id` (sinks only).
    pub fn unpublish(&mut self, data_id: DataId) {
        self.records.insert(data_id, RecordEntry::Unpublish);
    }

    /// Forgets `data_id` entirely.
    pub fn remove(&mut self, data_id: &DataId) {
        self.records.remove(data_id);
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Returns `true` if no entries are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Raw entry access, including unpublish sentinels. Publish and undo are
    /// the only callers that need to see sentinels.
    #[must_use]
    pub fn entry(&self, data_id: &DataId) -> Option<&RecordEntry> {
        self.records.get(data_id)
    }

    /// Mutable access to a live record already present in this source.
    #[must_use]
    pub fn get_record_mut(&mut self, data_id: &DataId) -> Option<&mut Record> {
        match self.records.get_mut(data_id) {
            Some(RecordEntry::Record(r)) => Some(r),
            _ => None,
        }
    }

    /// Consumes the source, yielding entries in ascending id order.
    pub fn into_entries(self) -> impl Iterator<Item = (DataId, RecordEntry)> {
        self.records.into_iter()
    }

    /// Iterates entries (including sentinels) in ascending id order.
    pub fn entries(&self) -> impl Iterator<Item = (&DataId, &RecordEntry)> {
        self.records.iter()
    }

    /// Encodes the source into its JSON interchange form: a mapping from id
    /// to record object, with tombstones encoded as `null`. Unpublish
    /// sentinels are transient and not representable; they are skipped.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        let mut map = JsonMap::new();
        for (id, entry) in &self.records {
            match entry {
                RecordEntry::Record(r) => {
                    map.insert(id.to_string(), r.to_json());
                }
                RecordEntry::Tombstone => {
                    map.insert(id.to_string(), JsonValue::Null);
                }
                RecordEntry::Unpublish => {}
            }
        }
        JsonValue::Object(map)
    }

    /// Decodes the JSON interchange form.
    ///
    /// # Errors
    ///
    /// Rejects non-object input and any entry [`Record::from_json`] rejects.
    pub fn from_json(value: &JsonValue) -> Result<Self, PayloadError> {
        let JsonValue::Object(map) = value else {
            return Err(PayloadError::InvalidRecord {
                data_id: DataId::from("<root>"),
                reason: "record source must be a JSON object".to_owned(),
            });
        };
        let mut source = Self::new();
        for (id, entry) in map {
            let data_id = DataId::from(id.as_str());
            match entry {
                JsonValue::Null => source.delete(data_id),
                other => {
                    let record = Record::from_json(data_id.clone(), other)?;
                    source.set(data_id, record);
                }
            }
        }
        Ok(source)
    }
}

impl RecordSource for MutableRecordSource {
    fn get(&self, data_id: &DataId) -> Option<&RecordEntry> {
        match self.records.get(data_id) {
            Some(RecordEntry::Unpublish) | None => None,
            some => some,
        }
    }

    fn record_ids(&self) -> Vec<DataId> {
        self.records.keys().cloned().collect()
    }

    fn size(&self) -> usize {
        self.records.len()
    }
}
