// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Reference marking: the GC's reachability walk.
//!
//! Traverses a normalization selector over a source and adds every visited
//! id to an out-parameter set. The walk reads nothing but links, typenames,
//! and `@match` operation references; field data is never materialized.

use prism_ir::{
    storage_key, DataId, NormalizationLinkedField, NormalizationSelection, NormalizationSelector,
    Variables,
};
use rustc_hash::FxHashSet;
use serde_json::Value as JsonValue;

use crate::loader::OperationLoader;
use crate::reader::MODULE_OPERATION_PREFIX;
use crate::record::{FieldValue, Record};
use crate::source::RecordSource;

/// Marks every id reachable from `selector` into `references`.
///
/// Unresolved `@match` branches request their operation via `loader` and
/// contribute no further reachability; branches whose operation is known are
/// traversed.
pub fn mark(
    source: &dyn RecordSource,
    selector: &NormalizationSelector,
    references: &mut FxHashSet<DataId>,
    loader: Option<&dyn OperationLoader>,
) {
    let marker = Marker {
        source,
        variables: &selector.variables,
        loader,
    };
    marker.visit(&selector.data_id, &selector.node.selections, references);
}

struct Marker<'s> {
    source: &'s dyn RecordSource,
    variables: &'s Variables,
    loader: Option<&'s dyn OperationLoader>,
}

impl Marker<'_> {
    fn visit(
        &self,
        data_id: &DataId,
        selections: &[NormalizationSelection],
        references: &mut FxHashSet<DataId>,
    ) {
        references.insert(data_id.clone());
        let Some(record) = self.source.get_record(data_id) else {
            return;
        };
        self.visit_record(record, selections, references);
    }

    fn visit_record(
        &self,
        record: &Record,
        selections: &[NormalizationSelection],
        references: &mut FxHashSet<DataId>,
    ) {
        for selection in selections {
            match selection {
                NormalizationSelection::Scalar(_) => {}
                NormalizationSelection::Linked(field) => {
                    self.visit_linked(record, field, references);
                }
                NormalizationSelection::InlineFragment(inline) => {
                    let matches = match &inline.type_condition {
                        Some(cond) => record.typename() == Some(cond.as_str()),
                        None => true,
                    };
                    if matches {
                        self.visit_record(record, &inline.selections, references);
                    }
                }
                NormalizationSelection::Condition(condition) => {
                    let passes = matches!(
                        self.variables.get(&condition.condition),
                        Some(JsonValue::Bool(b)) if *b == condition.passing_value
                    );
                    if passes {
                        self.visit_record(record, &condition.selections, references);
                    }
                }
                NormalizationSelection::Handle(handle) => {
                    // Handle outputs may link records; mark whatever the
                    // derived key holds without caring about selections.
                    let key = prism_ir::handle_storage_key(
                        &handle.handle,
                        &handle.name,
                        &handle.arguments,
                        self.variables,
                    );
                    self.mark_refs_at(record, &key, references);
                }
                NormalizationSelection::ModuleImport(import) => {
                    let operation_key =
                        format!("{MODULE_OPERATION_PREFIX}{}", import.document_name);
                    let Some(FieldValue::Scalar(JsonValue::String(reference))) =
                        record.get(&operation_key)
                    else {
                        continue;
                    };
                    let Some(loader) = self.loader else { continue };
                    match loader.get(reference) {
                        Some(node) => self.visit_record(record, &node.selections, references),
                        None => loader.load(reference),
                    }
                }
                NormalizationSelection::Defer(defer) => {
                    self.visit_record(record, &defer.node.selections, references);
                }
                NormalizationSelection::Stream(stream) => {
                    self.visit_linked(record, &stream.field, references);
                }
            }
        }
    }

    fn visit_linked(
        &self,
        record: &Record,
        field: &NormalizationLinkedField,
        references: &mut FxHashSet<DataId>,
    ) {
        let key = storage_key(&field.name, &field.arguments, self.variables);
        match record.get(&key) {
            Some(FieldValue::Ref(child)) => self.visit(child, &field.selections, references),
            Some(FieldValue::RefList(children)) => {
                for child in children.iter().flatten() {
                    self.visit(child, &field.selections, references);
                }
            }
            _ => {}
        }
    }

    /// Marks any references stored at `key` without descending selections.
    fn mark_refs_at(&self, record: &Record, key: &str, references: &mut FxHashSet<DataId>) {
        match record.get(key) {
            Some(FieldValue::Ref(child)) => {
                references.insert(child.clone());
            }
            Some(FieldValue::RefList(children)) => {
                for child in children.iter().flatten() {
                    references.insert(child.clone());
                }
            }
            _ => {}
        }
    }
}
