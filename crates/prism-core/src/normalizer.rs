// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Response normalization.
//!
//! Walks a normalization selector in lockstep with a response JSON object
//! and writes normalized records into a fresh sink. The sink is staged, not
//! canonical: the caller publishes it (directly or through a copy-on-write
//! overlay) once handle payloads have been processed.
//!
//! Missing-data policy: a key the server omitted is *absent*; nothing is
//! written. Null must be explicit in the payload to reach the record.
//!
//! Malformed payloads (shape mismatch, missing `__typename` where a type
//! branch requires it) reject the whole payload with an error; no partial
//! state escapes because the sink is discarded with the error.

use std::rc::Rc;

use prism_ir::{
    evaluate_arguments, handle_storage_key, make_client_id, storage_key, DataId,
    NormalizationHandleField, NormalizationLinkedField, NormalizationModuleImport,
    NormalizationNode, NormalizationSelection, NormalizationSelector, Variables, ROOT_ID,
    ROOT_TYPE,
};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::PayloadError;
use crate::handles::HandleFieldPayload;
use crate::reader::{MODULE_COMPONENT_PREFIX, MODULE_OPERATION_PREFIX};
use crate::record::{FieldValue, Record, TYPENAME_KEY};
use crate::source::MutableRecordSource;

/// Record key the matched module's prop name is recorded under.
pub const FRAGMENT_PROP_NAME_KEY: &str = "__fragmentPropName";

/// Resolves the id for a payload object. Returning `None` falls back to the
/// positional client id.
pub type GetDataId = dyn Fn(&JsonMap<String, JsonValue>, Option<&str>) -> Option<DataId>;

/// Normalization options.
#[derive(Default)]
pub struct NormalizerOptions<'a> {
    /// Custom id resolution; the default uses the payload's `id` field.
    pub get_data_id: Option<&'a GetDataId>,
}

/// Kind of incremental-delivery branch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IncrementalKind {
    /// `@defer` branch: whole subselection arrives later.
    Defer,
    /// `@stream` field: further list items arrive later.
    Stream,
}

/// Outstanding-branch marker recorded while normalizing the initial payload
/// of a `@defer`/`@stream` operation. The follow-up payload re-enters as an
/// ordinary commit against `selector`.
#[derive(Clone, Debug)]
pub struct IncrementalPlaceholder {
    /// Branch kind.
    pub kind: IncrementalKind,
    /// Label correlating follow-up payloads.
    pub label: String,
    /// Response path of the branch in the initial payload.
    pub path: Vec<String>,
    /// Where and how the follow-up normalizes.
    pub selector: NormalizationSelector,
}

/// Module import captured for a matched `@match` branch. The operation
/// loader resolves `operation_reference` asynchronously; the captured branch
/// payload is then normalized with the resolved fragment at `data_id`.
#[derive(Clone, Debug)]
pub struct ModuleImportPayload {
    /// Record the matched branch normalized into.
    pub data_id: DataId,
    /// Concrete typename of the matched object.
    pub type_name: String,
    /// Fragment the branch belongs to.
    pub fragment_name: String,
    /// Prop name the module renders under.
    pub fragment_prop_name: String,
    /// Chosen component module.
    pub module_component: JsonValue,
    /// Normalization fragment to load.
    pub operation_reference: String,
    /// The branch payload, captured for re-normalization.
    pub data: JsonValue,
    /// Variables in effect at capture time.
    pub variables: Variables,
    /// Response path of the branch.
    pub path: Vec<String>,
}

/// Everything a normalization pass produced.
pub struct ResponsePayload {
    /// Normalized records, staged for publication.
    pub source: MutableRecordSource,
    /// Handle work orders, processed against the staged sink.
    pub field_payloads: Vec<HandleFieldPayload>,
    /// Captured `@match` branches awaiting their operation fragment.
    pub module_payloads: Vec<ModuleImportPayload>,
    /// Outstanding `@defer`/`@stream` branches.
    pub incremental_placeholders: Vec<IncrementalPlaceholder>,
}

/// Normalizes `data` (the `data` member of a GraphQL response) under
/// `selector` into a fresh sink.
///
/// # Errors
///
/// [`PayloadError`] when the payload shape contradicts the selections or a
/// type branch lacks `__typename`. Nothing is staged on error.
pub fn normalize(
    selector: &NormalizationSelector,
    data: &JsonValue,
    options: &NormalizerOptions<'_>,
) -> Result<ResponsePayload, PayloadError> {
    let JsonValue::Object(root_obj) = data else {
        return Err(PayloadError::Malformed {
            path: String::new(),
            expected: "object",
        });
    };
    let mut normalizer = Normalizer {
        variables: &selector.variables,
        options,
        sink: MutableRecordSource::new(),
        field_payloads: Vec::new(),
        module_payloads: Vec::new(),
        placeholders: Vec::new(),
        path: Vec::new(),
    };

    let root_typename = if selector.data_id.as_str() == ROOT_ID {
        Some(ROOT_TYPE.to_owned())
    } else {
        payload_typename(root_obj).map(ToOwned::to_owned)
    };
    normalizer.sink.set(
        selector.data_id.clone(),
        Record::new(selector.data_id.clone(), root_typename),
    );
    normalizer.visit(&selector.data_id, &selector.node.selections, root_obj)?;

    Ok(ResponsePayload {
        source: normalizer.sink,
        field_payloads: normalizer.field_payloads,
        module_payloads: normalizer.module_payloads,
        incremental_placeholders: normalizer.placeholders,
    })
}

fn payload_typename(obj: &JsonMap<String, JsonValue>) -> Option<&str> {
    match obj.get(TYPENAME_KEY) {
        Some(JsonValue::String(t)) => Some(t),
        _ => None,
    }
}

struct Normalizer<'a> {
    variables: &'a Variables,
    options: &'a NormalizerOptions<'a>,
    sink: MutableRecordSource,
    field_payloads: Vec<HandleFieldPayload>,
    module_payloads: Vec<ModuleImportPayload>,
    placeholders: Vec<IncrementalPlaceholder>,
    path: Vec<String>,
}

impl Normalizer<'_> {
    fn visit(
        &mut self,
        data_id: &DataId,
        selections: &[NormalizationSelection],
        obj: &JsonMap<String, JsonValue>,
    ) -> Result<(), PayloadError> {
        for selection in selections {
            match selection {
                NormalizationSelection::Scalar(field) => {
                    let Some(value) = obj.get(field.response_key()) else {
                        continue;
                    };
                    let key = storage_key(&field.name, &field.arguments, self.variables);
                    if key == TYPENAME_KEY {
                        if let JsonValue::String(t) = value {
                            if let Some(record) = self.sink.get_record_mut(data_id) {
                                record.refine_typename(t);
                            }
                        }
                        continue;
                    }
                    self.set_field(data_id, key, FieldValue::Scalar(value.clone()));
                }
                NormalizationSelection::Linked(field) => {
                    self.visit_linked(data_id, field, obj)?;
                }
                NormalizationSelection::InlineFragment(inline) => {
                    match &inline.type_condition {
                        Some(cond) => {
                            let Some(typename) = payload_typename(obj) else {
                                return Err(PayloadError::MissingTypename {
                                    path: self.path.join("."),
                                });
                            };
                            if typename == cond {
                                self.visit(data_id, &inline.selections, obj)?;
                            }
                        }
                        None => self.visit(data_id, &inline.selections, obj)?,
                    }
                }
                NormalizationSelection::Condition(condition) => {
                    let passes = matches!(
                        self.variables.get(&condition.condition),
                        Some(JsonValue::Bool(b)) if *b == condition.passing_value
                    );
                    if passes {
                        self.visit(data_id, &condition.selections, obj)?;
                    }
                }
                NormalizationSelection::Handle(handle) => {
                    self.emit_handle_payload(data_id, handle);
                }
                NormalizationSelection::ModuleImport(import) => {
                    self.visit_module_import(data_id, import, obj);
                }
                NormalizationSelection::Defer(defer) => {
                    self.placeholders.push(IncrementalPlaceholder {
                        kind: IncrementalKind::Defer,
                        label: defer.label.clone(),
                        path: self.path.clone(),
                        selector: NormalizationSelector::new(
                            Rc::clone(&defer.node),
                            data_id.clone(),
                            self.variables.clone(),
                        ),
                    });
                }
                NormalizationSelection::Stream(stream) => {
                    self.visit_linked(data_id, &stream.field, obj)?;
                    let mut path = self.path.clone();
                    path.push(stream.field.response_key().to_owned());
                    self.placeholders.push(IncrementalPlaceholder {
                        kind: IncrementalKind::Stream,
                        label: stream.label.clone(),
                        path,
                        selector: NormalizationSelector::new(
                            Rc::new(NormalizationNode {
                                name: stream.label.clone(),
                                selections: vec![NormalizationSelection::Linked(
                                    stream.field.clone(),
                                )],
                            }),
                            data_id.clone(),
                            self.variables.clone(),
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    fn visit_linked(
        &mut self,
        data_id: &DataId,
        field: &NormalizationLinkedField,
        obj: &JsonMap<String, JsonValue>,
    ) -> Result<(), PayloadError> {
        let Some(value) = obj.get(field.response_key()) else {
            return Ok(());
        };
        let key = storage_key(&field.name, &field.arguments, self.variables);
        self.path.push(field.response_key().to_owned());
        let result = self.visit_linked_value(data_id, field, key, value);
        self.path.pop();
        result
    }

    fn visit_linked_value(
        &mut self,
        data_id: &DataId,
        field: &NormalizationLinkedField,
        key: String,
        value: &JsonValue,
    ) -> Result<(), PayloadError> {
        match (field.plural, value) {
            (_, JsonValue::Null) => {
                self.set_field(data_id, key, FieldValue::Scalar(JsonValue::Null));
                Ok(())
            }
            (false, JsonValue::Object(child_obj)) => {
                let child_id = self.child_id(data_id, &key, child_obj, None);
                self.set_field(data_id, key, FieldValue::Ref(child_id.clone()));
                self.visit_child(&child_id, field, child_obj)
            }
            (true, JsonValue::Array(items)) => {
                let mut refs = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    match item {
                        JsonValue::Null => refs.push(None),
                        JsonValue::Object(child_obj) => {
                            let child_id = self.child_id(data_id, &key, child_obj, Some(i));
                            self.path.push(i.to_string());
                            let visited = self.visit_child(&child_id, field, child_obj);
                            self.path.pop();
                            visited?;
                            refs.push(Some(child_id));
                        }
                        _ => {
                            return Err(PayloadError::Malformed {
                                path: format!("{}.{i}", self.path.join(".")),
                                expected: "object or null",
                            })
                        }
                    }
                }
                self.set_field(data_id, key, FieldValue::RefList(refs));
                Ok(())
            }
            (false, _) => Err(PayloadError::Malformed {
                path: self.path.join("."),
                expected: "object or null",
            }),
            (true, _) => Err(PayloadError::Malformed {
                path: self.path.join("."),
                expected: "array or null",
            }),
        }
    }

    fn visit_child(
        &mut self,
        child_id: &DataId,
        field: &NormalizationLinkedField,
        child_obj: &JsonMap<String, JsonValue>,
    ) -> Result<(), PayloadError> {
        let typename = payload_typename(child_obj)
            .map(ToOwned::to_owned)
            .or_else(|| field.concrete_type.clone());
        match self.sink.get_record_mut(child_id) {
            Some(record) => {
                if let Some(t) = &typename {
                    record.refine_typename(t);
                }
            }
            None => {
                self.sink
                    .set(child_id.clone(), Record::new(child_id.clone(), typename));
            }
        }
        self.visit(child_id, &field.selections, child_obj)
    }

    /// Resolves a child's id: custom resolver, then the payload's `id`, then
    /// a positional client id.
    fn child_id(
        &self,
        parent: &DataId,
        storage_key: &str,
        child_obj: &JsonMap<String, JsonValue>,
        index: Option<usize>,
    ) -> DataId {
        if let Some(get_data_id) = self.options.get_data_id {
            if let Some(id) = get_data_id(child_obj, payload_typename(child_obj)) {
                return id;
            }
        }
        if let Some(JsonValue::String(id)) = child_obj.get("id") {
            return DataId::from(id.as_str());
        }
        make_client_id(parent, storage_key, index)
    }

    fn emit_handle_payload(&mut self, data_id: &DataId, handle: &NormalizationHandleField) {
        let field_key = storage_key(&handle.name, &handle.arguments, self.variables);
        let handle_key =
            handle_storage_key(&handle.handle, &handle.name, &handle.arguments, self.variables);
        self.field_payloads.push(HandleFieldPayload {
            data_id: data_id.clone(),
            field_key,
            handle_key,
            handle: handle.handle.handle.clone(),
            args: evaluate_arguments(&handle.arguments, self.variables),
            filters: handle.handle.filters.clone(),
        });
    }

    /// Captures a `@match` branch: records which component/operation the
    /// server chose and queues the branch payload for re-normalization once
    /// the operation fragment resolves.
    fn visit_module_import(
        &mut self,
        data_id: &DataId,
        import: &NormalizationModuleImport,
        obj: &JsonMap<String, JsonValue>,
    ) {
        let component_key = format!("{MODULE_COMPONENT_PREFIX}{}", import.document_name);
        let operation_key = format!("{MODULE_OPERATION_PREFIX}{}", import.document_name);
        let (Some(component), Some(JsonValue::String(operation))) =
            (obj.get(&component_key), obj.get(&operation_key))
        else {
            return;
        };

        self.set_field(
            data_id,
            component_key,
            FieldValue::Scalar(component.clone()),
        );
        self.set_field(
            data_id,
            operation_key,
            FieldValue::Scalar(JsonValue::String(operation.clone())),
        );
        self.set_field(
            data_id,
            FRAGMENT_PROP_NAME_KEY.to_owned(),
            FieldValue::Scalar(JsonValue::String(import.fragment_prop_name.clone())),
        );

        self.module_payloads.push(ModuleImportPayload {
            data_id: data_id.clone(),
            type_name: payload_typename(obj).unwrap_or_default().to_owned(),
            fragment_name: import.fragment_name.clone(),
            fragment_prop_name: import.fragment_prop_name.clone(),
            module_component: component.clone(),
            operation_reference: operation.clone(),
            data: JsonValue::Object(obj.clone()),
            variables: self.variables.clone(),
            path: self.path.clone(),
        });
    }

    fn set_field(&mut self, data_id: &DataId, key: String, value: FieldValue) {
        if let Some(record) = self.sink.get_record_mut(data_id) {
            record.set(key, value);
        }
    }
}
