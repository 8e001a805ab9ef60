// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Snapshot materialization.
//!
//! The reader walks a reader-form selection tree against a record source and
//! produces a fresh data tree, a missing-data flag, and the set of record
//! ids it touched. The seen set is deliberately generous: every record the
//! walk *visited* is included, even when the visit found nothing, because it
//! is the invalidation index: a later write to any seen id must re-read
//! this selector.
//!
//! Missing-root policy: a tombstoned root reads as `Null`; an absent root
//! reads as `Missing` with the missing flag set.

use std::collections::BTreeMap;
use std::rc::Rc;

use prism_ir::{
    evaluate_arguments, handle_storage_key, storage_key, DataId, OperationDescriptor,
    ReaderLinkedField, ReaderMatchField, ReaderScalarField, ReaderSelection, ReaderSelector,
    Variables,
};
use rustc_hash::FxHashSet;
use serde_json::Value as JsonValue;

use crate::data::{DataObject, DataValue, FragmentRef};
use crate::record::{FieldValue, Record, TYPENAME_KEY};
use crate::source::{RecordEntry, RecordSource};

/// Record key prefix for the component chosen by a `@match` field, suffixed
/// with the match's document name.
pub const MODULE_COMPONENT_PREFIX: &str = "__module_component_";
/// Record key prefix for the normalization operation chosen by a `@match`
/// field, suffixed with the match's document name.
pub const MODULE_OPERATION_PREFIX: &str = "__module_operation_";

/// A materialized read result.
#[derive(Clone, Debug)]
pub struct Snapshot {
    /// The selector that produced this snapshot.
    pub selector: ReaderSelector,
    /// The data tree. `Missing` when the root record is absent.
    pub data: DataValue,
    /// `true` when any required selection had no data.
    pub is_missing_data: bool,
    /// Every record id the read visited.
    pub seen_records: FxHashSet<DataId>,
    /// Operation the read was performed on behalf of; propagated into
    /// fragment pointers.
    pub owner: Option<Rc<OperationDescriptor>>,
}

/// Reads `selector` from `source` on behalf of `owner`.
pub fn read(
    source: &dyn RecordSource,
    selector: &ReaderSelector,
    owner: Option<Rc<OperationDescriptor>>,
) -> Snapshot {
    let mut reader = Reader {
        source,
        variables: &selector.variables,
        owner: owner.clone(),
        seen: FxHashSet::default(),
        missing: false,
    };
    let data = reader.read_record(&selector.data_id, &selector.node.selections);
    Snapshot {
        selector: selector.clone(),
        data,
        is_missing_data: reader.missing,
        seen_records: reader.seen,
        owner,
    }
}

struct Reader<'s> {
    source: &'s dyn RecordSource,
    variables: &'s Variables,
    owner: Option<Rc<OperationDescriptor>>,
    seen: FxHashSet<DataId>,
    missing: bool,
}

impl<'s> Reader<'s> {
    fn read_record(&mut self, data_id: &DataId, selections: &[ReaderSelection]) -> DataValue {
        self.seen.insert(data_id.clone());
        match self.source.get(data_id) {
            None => {
                self.missing = true;
                DataValue::Missing
            }
            Some(RecordEntry::Unpublish) => {
                // Unpublish sentinels are filtered by sources; kept for
                // exhaustiveness.
                self.missing = true;
                DataValue::Missing
            }
            Some(RecordEntry::Tombstone) => DataValue::Null,
            Some(RecordEntry::Record(record)) => {
                let mut object = DataObject {
                    id: Some(data_id.clone()),
                    ..DataObject::default()
                };
                self.read_selections(record, selections, &mut object);
                DataValue::Object(Rc::new(object))
            }
        }
    }

    fn read_selections(
        &mut self,
        record: &Record,
        selections: &[ReaderSelection],
        object: &mut DataObject,
    ) {
        for selection in selections {
            match selection {
                ReaderSelection::Scalar(field) => self.read_scalar(record, field, object),
                ReaderSelection::Linked(field) => self.read_linked(record, field, object),
                ReaderSelection::InlineFragment(inline) => {
                    let matches = match &inline.type_condition {
                        Some(cond) => record.typename() == Some(cond.as_str()),
                        None => true,
                    };
                    if matches {
                        self.read_selections(record, &inline.selections, object);
                    }
                }
                ReaderSelection::FragmentSpread(spread) => {
                    let args = evaluate_arguments(&spread.arguments, self.variables);
                    object
                        .fragments
                        .insert(spread.fragment_name.clone(), FragmentRef::Pointer(args));
                    object.fragment_owner.clone_from(&self.owner);
                }
                ReaderSelection::InlineData(fragment) => {
                    let mut inline_object = DataObject {
                        id: Some(record.data_id().clone()),
                        ..DataObject::default()
                    };
                    self.read_selections(record, &fragment.selections, &mut inline_object);
                    object.fragments.insert(
                        fragment.fragment_name.clone(),
                        FragmentRef::Inline(DataValue::Object(Rc::new(inline_object))),
                    );
                }
                ReaderSelection::Condition(condition) => {
                    if self.condition_passes(&condition.condition, condition.passing_value) {
                        self.read_selections(record, &condition.selections, object);
                    }
                }
                ReaderSelection::Match(field) => self.read_match(record, field, object),
            }
        }
    }

    fn condition_passes(&self, variable: &str, passing_value: bool) -> bool {
        matches!(self.variables.get(variable), Some(JsonValue::Bool(b)) if *b == passing_value)
    }

    /// Resolves the storage key a field reads from, honoring handles: the
    /// derived handle key shadows the raw key, and its absence counts as
    /// missing data only when the raw field is absent too (the handler
    /// simply has not run yet otherwise).
    fn resolve_field_value<'r>(
        &mut self,
        record: &'r Record,
        name: &str,
        arguments: &[prism_ir::Argument],
        handle: Option<&prism_ir::FieldHandle>,
    ) -> Option<&'r FieldValue> {
        let raw_key = storage_key(name, arguments, self.variables);
        match handle {
            None => {
                let value = record.get(&raw_key);
                if value.is_none() {
                    self.missing = true;
                }
                value
            }
            Some(h) => {
                let derived_key = handle_storage_key(h, name, arguments, self.variables);
                let value = record.get(&derived_key);
                if value.is_none() && record.get(&raw_key).is_none() {
                    self.missing = true;
                }
                value
            }
        }
    }

    fn read_scalar(&mut self, record: &Record, field: &ReaderScalarField, object: &mut DataObject) {
        // The typename lives on the record itself, not in its field map.
        if field.name == TYPENAME_KEY && field.arguments.is_empty() {
            match record.typename() {
                Some(typename) => {
                    object.fields.insert(
                        field.response_key().to_owned(),
                        DataValue::Scalar(JsonValue::String(typename.to_owned())),
                    );
                }
                None => self.missing = true,
            }
            return;
        }
        let value = self.resolve_field_value(
            record,
            &field.name,
            &field.arguments,
            field.handle.as_ref(),
        );
        let Some(value) = value else { return };
        let data = match value {
            FieldValue::Scalar(JsonValue::Null) => DataValue::Null,
            FieldValue::Scalar(v) => DataValue::Scalar(v.clone()),
            // A link where a scalar was selected: compiler/runtime skew.
            // Nothing sensible to materialize.
            FieldValue::Ref(_) | FieldValue::RefList(_) => return,
        };
        object.fields.insert(field.response_key().to_owned(), data);
    }

    fn read_linked(&mut self, record: &Record, field: &ReaderLinkedField, object: &mut DataObject) {
        let value = self.resolve_field_value(
            record,
            &field.name,
            &field.arguments,
            field.handle.as_ref(),
        );
        let Some(value) = value else { return };
        let data = match (field.plural, value) {
            (_, FieldValue::Scalar(JsonValue::Null)) => DataValue::Null,
            (false, FieldValue::Ref(child_id)) => {
                match self.read_record(child_id, &field.selections) {
                    DataValue::Missing => return,
                    child => child,
                }
            }
            (true, FieldValue::RefList(refs)) => {
                let items = refs
                    .iter()
                    .map(|child| match child {
                        None => DataValue::Null,
                        Some(child_id) => self.read_record(child_id, &field.selections),
                    })
                    .collect();
                DataValue::List(Rc::new(items))
            }
            // Cardinality skew between descriptor and record.
            _ => return,
        };
        object.fields.insert(field.response_key().to_owned(), data);
    }

    fn read_match(&mut self, record: &Record, field: &ReaderMatchField, object: &mut DataObject) {
        let key = storage_key(&field.name, &field.arguments, self.variables);
        let Some(value) = record.get(&key) else {
            self.missing = true;
            return;
        };
        let data = match value {
            FieldValue::Scalar(JsonValue::Null) => DataValue::Null,
            FieldValue::Ref(child_id) => {
                let child_id = child_id.clone();
                self.seen.insert(child_id.clone());
                let Some(child) = self.source.get_record(&child_id) else {
                    self.missing = true;
                    return;
                };
                match child.typename().and_then(|t| field.branch_for(t)) {
                    Some(branch) => {
                        let component_key =
                            format!("{MODULE_COMPONENT_PREFIX}{}", field.document_name);
                        let module_component = match child.get(&component_key) {
                            Some(FieldValue::Scalar(v)) => Some(v.clone()),
                            _ => None,
                        };
                        DataValue::Object(Rc::new(DataObject {
                            id: Some(child_id),
                            fields: BTreeMap::new(),
                            fragments: BTreeMap::from([(
                                branch.fragment_name.clone(),
                                FragmentRef::Pointer(prism_ir::ConcreteArguments::new()),
                            )]),
                            fragment_owner: self.owner.clone(),
                            fragment_prop_name: Some(field.fragment_prop_name.clone()),
                            module_component,
                        }))
                    }
                    // Matched field, no branch for this type: empty object,
                    // not missing data.
                    None => DataValue::Object(Rc::new(DataObject::empty())),
                }
            }
            FieldValue::Scalar(_) | FieldValue::RefList(_) => return,
        };
        object.fields.insert(field.response_key().to_owned(), data);
    }
}
