// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Residency checking: "is this operation fully present in the source?"
//!
//! Same traversal skeleton as reference marking, but the answer is a single
//! boolean: `false` as soon as any required selection has no data. Used to
//! decide whether an operation can be served from the cache without a fetch.

use prism_ir::{
    handle_storage_key, storage_key, DataId, NormalizationLinkedField, NormalizationSelection,
    NormalizationSelector, Variables,
};
use serde_json::Value as JsonValue;

use crate::loader::OperationLoader;
use crate::reader::MODULE_OPERATION_PREFIX;
use crate::record::{FieldValue, Record, TYPENAME_KEY};
use crate::source::{RecordEntry, RecordSource};

/// Returns `true` when every selection reachable from `selector` is
/// resident in `source`.
pub fn check(
    source: &dyn RecordSource,
    selector: &NormalizationSelector,
    loader: Option<&dyn OperationLoader>,
) -> bool {
    let checker = Checker {
        source,
        variables: &selector.variables,
        loader,
    };
    checker.check_record(&selector.data_id, &selector.node.selections)
}

struct Checker<'s> {
    source: &'s dyn RecordSource,
    variables: &'s Variables,
    loader: Option<&'s dyn OperationLoader>,
}

impl Checker<'_> {
    fn check_record(&self, data_id: &DataId, selections: &[NormalizationSelection]) -> bool {
        match self.source.get(data_id) {
            None | Some(RecordEntry::Unpublish) => false,
            // A deleted record is fully known: its data is null.
            Some(RecordEntry::Tombstone) => true,
            Some(RecordEntry::Record(record)) => self.check_selections(record, selections),
        }
    }

    fn check_selections(&self, record: &Record, selections: &[NormalizationSelection]) -> bool {
        selections.iter().all(|selection| match selection {
            NormalizationSelection::Scalar(field) => {
                if field.name == TYPENAME_KEY && field.arguments.is_empty() {
                    return record.typename().is_some();
                }
                let key = storage_key(&field.name, &field.arguments, self.variables);
                record.get(&key).is_some()
            }
            NormalizationSelection::Linked(field) => self.check_linked(record, field),
            NormalizationSelection::InlineFragment(inline) => match &inline.type_condition {
                Some(cond) if record.typename() != Some(cond.as_str()) => true,
                _ => self.check_selections(record, &inline.selections),
            },
            NormalizationSelection::Condition(condition) => {
                let passes = matches!(
                    self.variables.get(&condition.condition),
                    Some(JsonValue::Bool(b)) if *b == condition.passing_value
                );
                !passes || self.check_selections(record, &condition.selections)
            }
            NormalizationSelection::Handle(handle) => {
                let derived = handle_storage_key(
                    &handle.handle,
                    &handle.name,
                    &handle.arguments,
                    self.variables,
                );
                let raw = storage_key(&handle.name, &handle.arguments, self.variables);
                record.get(&derived).is_some() || record.get(&raw).is_some()
            }
            NormalizationSelection::ModuleImport(import) => {
                let operation_key = format!("{MODULE_OPERATION_PREFIX}{}", import.document_name);
                let Some(FieldValue::Scalar(JsonValue::String(reference))) =
                    record.get(&operation_key)
                else {
                    return false;
                };
                let Some(loader) = self.loader else {
                    return false;
                };
                match loader.get(reference) {
                    Some(node) => self.check_selections(record, &node.selections),
                    None => {
                        loader.load(reference);
                        false
                    }
                }
            }
            NormalizationSelection::Defer(defer) => {
                self.check_selections(record, &defer.node.selections)
            }
            NormalizationSelection::Stream(stream) => self.check_linked(record, &stream.field),
        })
    }

    fn check_linked(&self, record: &Record, field: &NormalizationLinkedField) -> bool {
        let key = storage_key(&field.name, &field.arguments, self.variables);
        match record.get(&key) {
            None => false,
            Some(FieldValue::Scalar(JsonValue::Null)) => true,
            Some(FieldValue::Ref(child)) => self.check_record(child, &field.selections),
            Some(FieldValue::RefList(children)) => children
                .iter()
                .flatten()
                .all(|child| self.check_record(child, &field.selections)),
            Some(FieldValue::Scalar(_)) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::record::Record;
    use crate::source::MutableRecordSource;
    use prism_ir::{NormalizationNode, NormalizationScalarField};
    use serde_json::json;
    use std::rc::Rc;

    fn scalar(name: &str) -> NormalizationSelection {
        NormalizationSelection::Scalar(NormalizationScalarField {
            name: name.into(),
            alias: None,
            arguments: vec![],
        })
    }

    fn selector(selections: Vec<NormalizationSelection>, id: &str) -> NormalizationSelector {
        NormalizationSelector::new(
            Rc::new(NormalizationNode {
                name: "Q".into(),
                selections,
            }),
            id,
            Variables::new(),
        )
    }

    #[test]
    fn complete_records_check_true() {
        let mut source = MutableRecordSource::new();
        let mut user = Record::new(DataId::from("1"), Some("User".into()));
        user.set("id", FieldValue::Scalar(json!("1")));
        user.set("name", FieldValue::Scalar(json!("Alice")));
        source.set(DataId::from("1"), user);

        assert!(check(&source, &selector(vec![scalar("id"), scalar("name")], "1"), None));
        assert!(!check(
            &source,
            &selector(vec![scalar("id"), scalar("username")], "1"),
            None
        ));
    }

    #[test]
    fn absent_root_is_not_resident_but_tombstone_is() {
        let mut source = MutableRecordSource::new();
        assert!(!check(&source, &selector(vec![scalar("id")], "1"), None));
        source.delete(DataId::from("1"));
        assert!(check(&source, &selector(vec![scalar("id")], "1"), None));
    }

    #[test]
    fn null_links_are_resident_and_dangling_links_are_not() {
        let mut source = MutableRecordSource::new();
        let mut root = Record::new(DataId::root(), Some(prism_ir::ROOT_TYPE.into()));
        root.set("me", FieldValue::Scalar(JsonValue::Null));
        source.set(DataId::root(), root);

        let me_field = NormalizationSelection::Linked(NormalizationLinkedField {
            name: "me".into(),
            alias: None,
            arguments: vec![],
            plural: false,
            concrete_type: None,
            selections: vec![scalar("id")],
        });
        assert!(check(
            &source,
            &selector(vec![me_field.clone()], prism_ir::ROOT_ID),
            None
        ));

        let mut root = Record::new(DataId::root(), Some(prism_ir::ROOT_TYPE.into()));
        root.set("me", FieldValue::Ref(DataId::from("gone")));
        source.set(DataId::root(), root);
        assert!(!check(&source, &selector(vec![me_field], prism_ir::ROOT_ID), None));
    }
}
