// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! User-facing proxies over a copy-on-write mutator.
//!
//! Updaters never touch sources or mutators directly: they receive a
//! [`RecordSourceProxy`] (or the selector-aware [`RecordSourceSelectorProxy`])
//! whose capability set is exactly {create, get, delete, read field, write
//! field, traverse link}. Everything staged through a proxy lands in the
//! mutator's sink; the canonical source is reachable only as the read-only
//! base underneath.
//!
//! The proxy uses `RefCell` internally so that record handles stay
//! lightweight (`id` + back-pointer) and can coexist. All dispatch is
//! single-threaded; the cell is never observed borrowed re-entrantly because
//! proxy methods never call user code while holding a borrow.

use std::cell::RefCell;

use prism_ir::{
    storage_key, storage_key_concrete, ConcreteArguments, DataId, NormalizationSelection,
    NormalizationSelector, OperationDescriptor, ROOT_TYPE,
};
use serde_json::Value as JsonValue;

use crate::error::{MutationError, QueueError};
use crate::handles::{HandleFieldPayload, HandlerRegistry};
use crate::mutator::RecordSourceMutator;
use crate::normalizer::{normalize, NormalizerOptions, ResponsePayload};
use crate::record::{FieldValue, Record};
use crate::source::{MutableRecordSource, RecordEntry};

/// Staging proxy over a mutator, optionally wired to a handler registry so
/// it can process handle field payloads during source publication.
pub struct RecordSourceProxy<'m, 'a> {
    mutator: RefCell<&'m mut RecordSourceMutator<'a>>,
    handlers: Option<&'m HandlerRegistry>,
}

impl<'m, 'a> RecordSourceProxy<'m, 'a> {
    /// Creates a proxy with no handle processing capability.
    pub fn new(mutator: &'m mut RecordSourceMutator<'a>) -> Self {
        Self {
            mutator: RefCell::new(mutator),
            handlers: None,
        }
    }

    /// Creates a proxy that can run handle payloads through `handlers`.
    pub fn with_handlers(
        mutator: &'m mut RecordSourceMutator<'a>,
        handlers: &'m HandlerRegistry,
    ) -> Self {
        Self {
            mutator: RefCell::new(mutator),
            handlers: Some(handlers),
        }
    }

    /// Handle to the record at `data_id`, when a live record is visible.
    #[must_use]
    pub fn get(&self, data_id: &DataId) -> Option<RecordProxy<'_, 'm, 'a>> {
        if self.mutator.borrow().get_record(data_id).is_some() {
            Some(RecordProxy {
                source: self,
                data_id: data_id.clone(),
            })
        } else {
            None
        }
    }

    /// Creates a record and returns its handle.
    ///
    /// # Errors
    ///
    /// [`MutationError::AlreadyExists`] when a live record already occupies
    /// `data_id`.
    pub fn create(
        &self,
        data_id: DataId,
        typename: impl Into<String>,
    ) -> Result<RecordProxy<'_, 'm, 'a>, MutationError> {
        self.mutator
            .borrow_mut()
            .create(data_id.clone(), Some(typename.into()))?;
        Ok(RecordProxy {
            source: self,
            data_id,
        })
    }

    /// Tombstones the record at `data_id`.
    pub fn delete(&self, data_id: &DataId) {
        self.mutator.borrow_mut().delete(data_id.clone());
    }

    /// Handle to the root record, creating it if absent.
    #[must_use]
    pub fn root(&self) -> RecordProxy<'_, 'm, 'a> {
        let root_id = DataId::root();
        {
            let mut mutator = self.mutator.borrow_mut();
            if mutator.get_record(&root_id).is_none() {
                // Recreating over a tombstone is legal; AlreadyExists cannot
                // occur after the check above.
                let _ = mutator.create(root_id.clone(), Some(ROOT_TYPE.to_owned()));
            }
        }
        RecordProxy {
            source: self,
            data_id: root_id,
        }
    }

    /// Stages every entry of `source` through the mutator, then runs the
    /// given handle payloads against the staged state.
    ///
    /// # Errors
    ///
    /// [`QueueError::Handle`] when a payload names an uninstalled handler
    /// (or the proxy has no registry at all).
    pub fn publish_source(
        &self,
        source: &MutableRecordSource,
        field_payloads: &[HandleFieldPayload],
    ) -> Result<(), QueueError> {
        for (data_id, entry) in source.entries() {
            match entry {
                RecordEntry::Tombstone => self.delete(data_id),
                RecordEntry::Record(record) => self.stage_record(data_id, record)?,
                // Unpublish sentinels only mean something to the canonical
                // store; staged sources never carry them.
                RecordEntry::Unpublish => {}
            }
        }
        for payload in field_payloads {
            let handler = match self.handlers {
                Some(registry) => registry.resolve(payload)?,
                None => {
                    return Err(crate::error::HandleError::UnknownHandle(
                        payload.handle.clone(),
                    )
                    .into())
                }
            };
            handler.update(self, payload);
        }
        Ok(())
    }

    /// Normalizes `response` for `operation` into a fresh sink, stages it
    /// through this proxy, and returns the normalization result (the staged
    /// sink included, for selector-data reads).
    ///
    /// # Errors
    ///
    /// Normalization and handle errors propagate; nothing is staged on a
    /// normalization error.
    pub fn commit_payload(
        &self,
        operation: &OperationDescriptor,
        response: &JsonValue,
        options: &NormalizerOptions<'_>,
    ) -> Result<ResponsePayload, QueueError> {
        let payload = normalize(&operation.normalization_selector(), response, options)?;
        self.publish_source(&payload.source, &payload.field_payloads)?;
        Ok(payload)
    }

    fn stage_record(&self, data_id: &DataId, record: &Record) -> Result<(), QueueError> {
        let mut mutator = self.mutator.borrow_mut();
        if mutator.get_record(data_id).is_none() {
            mutator.create(data_id.clone(), record.typename().map(ToOwned::to_owned))?;
        }
        for (key, value) in record.fields() {
            mutator.set_value(data_id, key, value.clone())?;
        }
        Ok(())
    }

    pub(crate) fn read_value(&self, data_id: &DataId, storage_key: &str) -> Option<FieldValue> {
        self.mutator.borrow().get_value(data_id, storage_key).cloned()
    }

    pub(crate) fn write_value(
        &self,
        data_id: &DataId,
        storage_key: String,
        value: FieldValue,
    ) -> Result<(), MutationError> {
        self.mutator.borrow_mut().set_value(data_id, storage_key, value)
    }

    pub(crate) fn typename_of(&self, data_id: &DataId) -> Option<String> {
        self.mutator
            .borrow()
            .get_record(data_id)
            .and_then(|r| r.typename().map(ToOwned::to_owned))
    }

    pub(crate) fn copy_fields(
        &self,
        source_id: &DataId,
        target_id: &DataId,
    ) -> Result<(), MutationError> {
        self.mutator.borrow_mut().copy_fields(source_id, target_id)
    }
}

/// Handle to one record staged through a [`RecordSourceProxy`].
pub struct RecordProxy<'p, 'm, 'a> {
    source: &'p RecordSourceProxy<'m, 'a>,
    data_id: DataId,
}

impl<'p, 'm, 'a> RecordProxy<'p, 'm, 'a> {
    /// The record's id.
    #[must_use]
    pub fn data_id(&self) -> &DataId {
        &self.data_id
    }

    /// The record's typename, when established.
    #[must_use]
    pub fn typename(&self) -> Option<String> {
        self.source.typename_of(&self.data_id)
    }

    /// Reads a scalar field. `None` for absent or non-scalar values.
    #[must_use]
    pub fn get_value(&self, name: &str, args: &ConcreteArguments) -> Option<JsonValue> {
        match self.source.read_value(&self.data_id, &storage_key_concrete(name, args)) {
            Some(FieldValue::Scalar(v)) => Some(v),
            _ => None,
        }
    }

    /// Writes a scalar field.
    ///
    /// # Errors
    ///
    /// [`MutationError::MissingRecord`] when the record was deleted after
    /// this handle was obtained.
    pub fn set_value(
        &self,
        name: &str,
        args: &ConcreteArguments,
        value: JsonValue,
    ) -> Result<&Self, MutationError> {
        self.source.write_value(
            &self.data_id,
            storage_key_concrete(name, args),
            FieldValue::Scalar(value),
        )?;
        Ok(self)
    }

    /// Follows a singular link.
    #[must_use]
    pub fn get_linked_record(
        &self,
        name: &str,
        args: &ConcreteArguments,
    ) -> Option<RecordProxy<'p, 'm, 'a>> {
        match self.source.read_value(&self.data_id, &storage_key_concrete(name, args)) {
            Some(FieldValue::Ref(child)) => self.source.get(&child),
            _ => None,
        }
    }

    /// Writes a singular link.
    ///
    /// # Errors
    ///
    /// [`MutationError::MissingRecord`] when the record was deleted after
    /// this handle was obtained.
    pub fn set_linked_record(
        &self,
        name: &str,
        args: &ConcreteArguments,
        record: &RecordProxy<'_, '_, '_>,
    ) -> Result<&Self, MutationError> {
        self.source.write_value(
            &self.data_id,
            storage_key_concrete(name, args),
            FieldValue::Ref(record.data_id.clone()),
        )?;
        Ok(self)
    }

    /// Follows a plural link. Holes are preserved as `None`.
    #[must_use]
    pub fn get_linked_records(
        &self,
        name: &str,
        args: &ConcreteArguments,
    ) -> Option<Vec<Option<RecordProxy<'p, 'm, 'a>>>> {
        match self.source.read_value(&self.data_id, &storage_key_concrete(name, args)) {
            Some(FieldValue::RefList(children)) => Some(
                children
                    .iter()
                    .map(|child| child.as_ref().and_then(|id| self.source.get(id)))
                    .collect(),
            ),
            _ => None,
        }
    }

    /// Writes a plural link.
    ///
    /// # Errors
    ///
    /// [`MutationError::MissingRecord`] when the record was deleted after
    /// this handle was obtained.
    pub fn set_linked_records(
        &self,
        name: &str,
        args: &ConcreteArguments,
        records: &[Option<&RecordProxy<'_, '_, '_>>],
    ) -> Result<&Self, MutationError> {
        let refs = records
            .iter()
            .map(|r| r.map(|proxy| proxy.data_id.clone()))
            .collect();
        self.source.write_value(
            &self.data_id,
            storage_key_concrete(name, args),
            FieldValue::RefList(refs),
        )?;
        Ok(self)
    }

    /// Copies every field of `other` onto this record.
    ///
    /// # Errors
    ///
    /// [`MutationError::MissingRecord`] when either record was deleted after
    /// its handle was obtained.
    pub fn copy_fields_from(&self, other: &RecordProxy<'_, '_, '_>) -> Result<&Self, MutationError> {
        self.source.copy_fields(&other.data_id, &self.data_id)?;
        Ok(self)
    }

    /// Tombstones this record.
    pub fn delete(self) {
        self.source.delete(&self.data_id);
    }
}

/// Selector-aware proxy: everything [`RecordSourceProxy`] offers, plus typed
/// root-field helpers bound to a normalization selector.
pub struct RecordSourceSelectorProxy<'p, 'm, 'a> {
    proxy: &'p RecordSourceProxy<'m, 'a>,
    selector: NormalizationSelector,
}

impl<'p, 'm, 'a> RecordSourceSelectorProxy<'p, 'm, 'a> {
    /// Binds `proxy` to `selector`.
    pub fn new(proxy: &'p RecordSourceProxy<'m, 'a>, selector: NormalizationSelector) -> Self {
        Self { proxy, selector }
    }

    /// Follows the root field named `field_name` in the bound selector,
    /// resolving its storage arguments against the selector variables.
    #[must_use]
    pub fn get_root_field(&self, field_name: &str) -> Option<RecordProxy<'p, 'm, 'a>> {
        let key = self.root_field_key(field_name)?;
        match self.proxy.read_value(&self.selector.data_id, &key) {
            Some(FieldValue::Ref(child)) => self.proxy.get(&child),
            _ => None,
        }
    }

    /// Plural form of [`get_root_field`](Self::get_root_field).
    #[must_use]
    pub fn get_plural_root_field(
        &self,
        field_name: &str,
    ) -> Option<Vec<Option<RecordProxy<'p, 'm, 'a>>>> {
        let key = self.root_field_key(field_name)?;
        match self.proxy.read_value(&self.selector.data_id, &key) {
            Some(FieldValue::RefList(children)) => Some(
                children
                    .iter()
                    .map(|child| child.as_ref().and_then(|id| self.proxy.get(id)))
                    .collect(),
            ),
            _ => None,
        }
    }

    fn root_field_key(&self, field_name: &str) -> Option<String> {
        find_field_key(
            &self.selector.node.selections,
            field_name,
            &self.selector.variables,
        )
    }
}

impl<'m, 'a> std::ops::Deref for RecordSourceSelectorProxy<'_, 'm, 'a> {
    type Target = RecordSourceProxy<'m, 'a>;

    fn deref(&self) -> &Self::Target {
        self.proxy
    }
}

/// Locates a root field by name across conditions and unconditional inline
/// fragments, yielding its storage key under `variables`.
fn find_field_key(
    selections: &[NormalizationSelection],
    field_name: &str,
    variables: &prism_ir::Variables,
) -> Option<String> {
    for selection in selections {
        match selection {
            NormalizationSelection::Linked(field) if field.name == field_name => {
                return Some(storage_key(&field.name, &field.arguments, variables));
            }
            NormalizationSelection::Scalar(field) if field.name == field_name => {
                return Some(storage_key(&field.name, &field.arguments, variables));
            }
            NormalizationSelection::Condition(condition) => {
                if let Some(key) = find_field_key(&condition.selections, field_name, variables) {
                    return Some(key);
                }
            }
            NormalizationSelection::InlineFragment(inline) if inline.type_condition.is_none() => {
                if let Some(key) = find_field_key(&inline.selections, field_name, variables) {
                    return Some(key);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::source::RecordSource;
    use serde_json::json;

    fn args() -> ConcreteArguments {
        ConcreteArguments::new()
    }

    #[test]
    fn proxy_stages_writes_in_the_sink_only() {
        let base = MutableRecordSource::new();
        let mut sink = MutableRecordSource::new();
        let mut mutator = RecordSourceMutator::new(&base, &mut sink);
        let proxy = RecordSourceProxy::new(&mut mutator);

        let user = proxy.create(DataId::from("1"), "User").unwrap();
        user.set_value("name", &args(), json!("Alice")).unwrap();
        let root = proxy.root();
        root.set_linked_record("me", &args(), &user).unwrap();
        drop(proxy);
        drop(mutator);

        assert!(base.get(&DataId::from("1")).is_none());
        let staged = sink.get_record(&DataId::from("1")).unwrap();
        assert_eq!(staged.get("name"), Some(&FieldValue::Scalar(json!("Alice"))));
        let staged_root = sink.get_record(&DataId::root()).unwrap();
        assert_eq!(staged_root.get("me"), Some(&FieldValue::Ref(DataId::from("1"))));
    }

    #[test]
    fn linked_traversal_falls_through_to_base() {
        let mut base = MutableRecordSource::new();
        let mut me = Record::new(DataId::from("1"), Some("User".into()));
        me.set("bestFriend", FieldValue::Ref(DataId::from("2")));
        base.set(DataId::from("1"), me);
        let mut friend = Record::new(DataId::from("2"), Some("User".into()));
        friend.set("name", FieldValue::Scalar(json!("Bob")));
        base.set(DataId::from("2"), friend);

        let mut sink = MutableRecordSource::new();
        let mut mutator = RecordSourceMutator::new(&base, &mut sink);
        let proxy = RecordSourceProxy::new(&mut mutator);

        let me = proxy.get(&DataId::from("1")).unwrap();
        let friend = me.get_linked_record("bestFriend", &args()).unwrap();
        assert_eq!(friend.get_value("name", &args()), Some(json!("Bob")));
        friend.set_value("name", &args(), json!("Bobby")).unwrap();
        drop(proxy);
        drop(mutator);

        // Base untouched, sink got the copy-on-write record.
        assert_eq!(
            base.get_record(&DataId::from("2")).unwrap().get("name"),
            Some(&FieldValue::Scalar(json!("Bob")))
        );
        assert_eq!(
            sink.get_record(&DataId::from("2")).unwrap().get("name"),
            Some(&FieldValue::Scalar(json!("Bobby")))
        );
    }

    #[test]
    fn deleted_records_read_as_absent_through_the_proxy() {
        let mut base = MutableRecordSource::new();
        base.set(DataId::from("1"), Record::new(DataId::from("1"), None));
        let mut sink = MutableRecordSource::new();
        let mut mutator = RecordSourceMutator::new(&base, &mut sink);
        let proxy = RecordSourceProxy::new(&mut mutator);

        proxy.get(&DataId::from("1")).unwrap().delete();
        assert!(proxy.get(&DataId::from("1")).is_none());
    }

    #[test]
    fn selector_proxy_resolves_root_fields_with_arguments() {
        use prism_ir::{Argument, NormalizationLinkedField, NormalizationNode};
        use std::rc::Rc;

        let mut base = MutableRecordSource::new();
        let mut root = Record::new(DataId::root(), Some(ROOT_TYPE.into()));
        root.set(r#"node(id:"1")"#, FieldValue::Ref(DataId::from("1")));
        base.set(DataId::root(), root);
        let mut user = Record::new(DataId::from("1"), Some("User".into()));
        user.set("name", FieldValue::Scalar(json!("Alice")));
        base.set(DataId::from("1"), user);

        let mut sink = MutableRecordSource::new();
        let mut mutator = RecordSourceMutator::new(&base, &mut sink);
        let proxy = RecordSourceProxy::new(&mut mutator);

        let node = Rc::new(NormalizationNode {
            name: "Q".into(),
            selections: vec![NormalizationSelection::Linked(NormalizationLinkedField {
                name: "node".into(),
                alias: None,
                arguments: vec![Argument::variable("id", "id")],
                plural: false,
                concrete_type: None,
                selections: vec![],
            })],
        });
        let mut variables = prism_ir::Variables::new();
        variables.insert("id".into(), json!("1"));
        let selector = NormalizationSelector::new(node, prism_ir::ROOT_ID, variables);
        let selector_proxy = RecordSourceSelectorProxy::new(&proxy, selector);

        let user = selector_proxy.get_root_field("node").unwrap();
        assert_eq!(user.get_value("name", &args()), Some(json!("Alice")));
        assert!(selector_proxy.get_root_field("viewer").is_none());
    }
}
