// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Copy-on-write overlay for staging writes.
//!
//! A mutator layers a mutable *sink* over a read-only *base*. Reads fall
//! through sink → base per record; writes land in the sink only. The first
//! write to a record that exists only in the base shallow-copies it into the
//! sink, and (when a *backup* is attached) saves the record's pre-write
//! state there. Publishing the backup onto the store is then an exact undo
//! of every write staged through this mutator (and any other mutator that
//! shared the same backup).
//!
//! Invariants
//! - The base is never written.
//! - The backup records each id at most once: the state before the *first*
//!   touch wins, so undo is exact across an arbitrary number of overlapping
//!   transactions.

use prism_ir::DataId;

use crate::error::MutationError;
use crate::record::{FieldValue, Record};
use crate::source::{MutableRecordSource, RecordEntry, RecordSource};

/// Copy-on-write overlay of a sink over a base, with optional undo capture.
pub struct RecordSourceMutator<'a> {
    base: &'a dyn RecordSource,
    sink: &'a mut MutableRecordSource,
    backup: Option<&'a mut MutableRecordSource>,
}

impl<'a> RecordSourceMutator<'a> {
    /// Creates a mutator with no undo capture.
    pub fn new(base: &'a dyn RecordSource, sink: &'a mut MutableRecordSource) -> Self {
        Self {
            base,
            sink,
            backup: None,
        }
    }

    /// Creates a mutator that saves pre-write record states into `backup`.
    pub fn with_backup(
        base: &'a dyn RecordSource,
        sink: &'a mut MutableRecordSource,
        backup: &'a mut MutableRecordSource,
    ) -> Self {
        Self {
            base,
            sink,
            backup: Some(backup),
        }
    }

    /// Overlay read: sink first (its unpublish sentinels read as absent),
    /// then base.
    #[must_use]
    pub fn get(&self, data_id: &DataId) -> Option<&RecordEntry> {
        match self.sink.entry(data_id) {
            Some(RecordEntry::Unpublish) => None,
            Some(entry) => Some(entry),
            None => self.base.get(data_id),
        }
    }

    /// Overlay read of a live record.
    #[must_use]
    pub fn get_record(&self, data_id: &DataId) -> Option<&Record> {
        self.get(data_id).and_then(RecordEntry::record)
    }

    /// Overlay read of one field.
    #[must_use]
    pub fn get_value(&self, data_id: &DataId, storage_key: &str) -> Option<&FieldValue> {
        self.get_record(data_id).and_then(|r| r.get(storage_key))
    }

    /// Creates a record in the sink.
    ///
    /// Recreating over a tombstone is allowed (the deletion is superseded);
    /// creating over a live record is a programmer error.
    ///
    /// # Errors
    ///
    /// [`MutationError::AlreadyExists`] when the overlay already holds a live
    /// record for `data_id`.
    pub fn create(
        &mut self,
        data_id: DataId,
        typename: Option<String>,
    ) -> Result<(), MutationError> {
        if self.get_record(&data_id).is_some() {
            return Err(MutationError::AlreadyExists(data_id));
        }
        self.save_backup(&data_id);
        self.sink
            .set(data_id.clone(), Record::new(data_id, typename));
        Ok(())
    }

    /// Writes a tombstone for `data_id` into the sink.
    pub fn delete(&mut self, data_id: DataId) {
        self.save_backup(&data_id);
        self.sink.delete(data_id);
    }

    /// Writes one field on `data_id`, copying the base record into the sink
    /// first if this is the record's first staged write.
    ///
    /// # Errors
    ///
    /// [`MutationError::MissingRecord`] when neither overlay nor base holds a
    /// live record for `data_id`.
    pub fn set_value(
        &mut self,
        data_id: &DataId,
        storage_key: impl Into<String>,
        value: FieldValue,
    ) -> Result<(), MutationError> {
        self.record_for_write(data_id)?.set(storage_key, value);
        Ok(())
    }

    /// Copies every field of the overlay record at `source_id` onto the
    /// record at `target_id`.
    ///
    /// # Errors
    ///
    /// [`MutationError::MissingRecord`] when either id has no live record.
    pub fn copy_fields(
        &mut self,
        source_id: &DataId,
        target_id: &DataId,
    ) -> Result<(), MutationError> {
        let source = self
            .get_record(source_id)
            .cloned()
            .ok_or_else(|| MutationError::MissingRecord(source_id.clone()))?;
        self.record_for_write(target_id)?.copy_fields_from(&source);
        Ok(())
    }

    /// Sink record for mutation, performing the copy-on-write and backup
    /// capture on first touch. A tombstone staged in the sink blocks the
    /// write: the record is deleted in this transaction, whatever the base
    /// still holds.
    fn record_for_write(&mut self, data_id: &DataId) -> Result<&mut Record, MutationError> {
        match self.sink.entry(data_id) {
            Some(RecordEntry::Record(_)) => {}
            Some(RecordEntry::Tombstone | RecordEntry::Unpublish) => {
                return Err(MutationError::MissingRecord(data_id.clone()));
            }
            None => {
                let copied = match self.base.get(data_id) {
                    Some(RecordEntry::Record(r)) => r.clone(),
                    _ => return Err(MutationError::MissingRecord(data_id.clone())),
                };
                self.save_backup(data_id);
                self.sink.set(data_id.clone(), copied);
            }
        }
        // The match above guarantees the sink now holds a live record.
        self.sink
            .get_record_mut(data_id)
            .ok_or_else(|| MutationError::MissingRecord(data_id.clone()))
    }

    /// Saves the pre-write state of `data_id` into the backup, once.
    fn save_backup(&mut self, data_id: &DataId) {
        let Some(backup) = self.backup.as_deref_mut() else {
            return;
        };
        if backup.entry(data_id).is_some() {
            return;
        }
        match self.base.get(data_id) {
            Some(RecordEntry::Record(r)) => backup.set(data_id.clone(), r.clone()),
            Some(RecordEntry::Tombstone) => backup.delete(data_id.clone()),
            Some(RecordEntry::Unpublish) | None => backup.unpublish(data_id.clone()),
        }
    }

    /// A read-only view over the combined overlay, for reads that need a
    /// [`RecordSource`] (e.g. materializing selector data mid-transaction).
    #[must_use]
    pub fn as_source(&self) -> OverlaySource<'_, 'a> {
        OverlaySource { mutator: self }
    }
}

/// Read-only [`RecordSource`] facade over a mutator's combined overlay.
pub struct OverlaySource<'m, 'a> {
    mutator: &'m RecordSourceMutator<'a>,
}

impl RecordSource for OverlaySource<'_, '_> {
    fn get(&self, data_id: &DataId) -> Option<&RecordEntry> {
        self.mutator.get(data_id)
    }

    fn record_ids(&self) -> Vec<DataId> {
        let mut ids = self.mutator.base.record_ids();
        for (id, entry) in self.mutator.sink.entries() {
            match entry {
                RecordEntry::Unpublish => ids.retain(|existing| existing != id),
                _ => {
                    if !ids.contains(id) {
                        ids.push(id.clone());
                    }
                }
            }
        }
        ids.sort();
        ids
    }

    fn size(&self) -> usize {
        self.record_ids().len()
    }
}
