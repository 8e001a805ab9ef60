// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Normalization-form selection descriptors.
//!
//! The normalization form describes how a server payload (or the source
//! itself, for marking and residency checks) is walked. Fragment spreads are
//! inlined by the compiler, so the only runtime indirection left is
//! `@match`/`@module` (async fragment resolution) and `@defer`/`@stream`
//! (incremental delivery).

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::argument::{Argument, FieldHandle};

/// A compiled normalization node: an operation root, a split normalization
/// fragment (for `@match`), or a deferred branch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizationNode {
    /// Node name (operation or fragment name).
    pub name: String,
    /// Ordered selections.
    pub selections: Vec<NormalizationSelection>,
}

/// One selection inside a normalization node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum NormalizationSelection {
    /// Leaf field written verbatim to the record.
    Scalar(NormalizationScalarField),
    /// Singular or plural link; children get their own records.
    Linked(NormalizationLinkedField),
    /// Type-narrowed subselection.
    InlineFragment(NormalizationInlineFragment),
    /// `@include`/`@skip` conditional subselection.
    Condition(NormalizationCondition),
    /// `@__clientField` handle: emits a handle field payload, writes nothing.
    Handle(NormalizationHandleField),
    /// `@match`/`@module` import marker inside a type branch.
    ModuleImport(NormalizationModuleImport),
    /// `@defer` branch: filled in by a follow-up payload.
    Defer(NormalizationDefer),
    /// `@stream` field: items may continue arriving in follow-up payloads.
    Stream(NormalizationStream),
}

/// A scalar field in normalization form.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizationScalarField {
    /// Field name.
    pub name: String,
    /// Response key override.
    pub alias: Option<String>,
    /// Compiled arguments.
    pub arguments: Vec<Argument>,
}

impl NormalizationScalarField {
    /// Key the value arrives under in the response.
    #[must_use]
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// A linked field in normalization form.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizationLinkedField {
    /// Field name.
    pub name: String,
    /// Response key override.
    pub alias: Option<String>,
    /// Compiled arguments.
    pub arguments: Vec<Argument>,
    /// `true` for lists of child objects.
    pub plural: bool,
    /// Concrete child typename when statically known; used to seed records
    /// whose payloads omit `__typename`.
    pub concrete_type: Option<String>,
    /// Child selections.
    pub selections: Vec<NormalizationSelection>,
}

impl NormalizationLinkedField {
    /// Key the value arrives under in the response.
    #[must_use]
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// Inline fragment: selections apply only when the payload object's
/// `__typename` equals the condition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizationInlineFragment {
    /// Concrete typename to match; `None` flattens unconditionally.
    pub type_condition: Option<String>,
    /// Selections applied on match.
    pub selections: Vec<NormalizationSelection>,
}

/// `@include(if:)` / `@skip(if:)` conditional.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizationCondition {
    /// Variable name the condition reads.
    pub condition: String,
    /// Selections apply when the variable equals this value.
    pub passing_value: bool,
    /// Guarded selections.
    pub selections: Vec<NormalizationSelection>,
}

/// `@__clientField(handle, key, filters)` on a field.
///
/// Normalization of the underlying field happens through its own selection;
/// this marker only emits the handle field payload processed after the sink
/// is staged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizationHandleField {
    /// Underlying field name.
    pub name: String,
    /// Response key override of the underlying field.
    pub alias: Option<String>,
    /// Compiled arguments of the underlying field.
    pub arguments: Vec<Argument>,
    /// Handle annotation.
    pub handle: FieldHandle,
}

impl NormalizationHandleField {
    /// Key the underlying value arrives under in the response.
    #[must_use]
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// `@match`/`@module` import marker.
///
/// Placed by the compiler inside the inline fragment for each `@module`
/// branch. The payload carries the chosen component and operation under
/// `__module_component_<document>` / `__module_operation_<document>`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizationModuleImport {
    /// Document name scoping the payload/record keys.
    pub document_name: String,
    /// Fragment the branch belongs to.
    pub fragment_name: String,
    /// Prop name the matched module renders under.
    pub fragment_prop_name: String,
}

/// `@defer` branch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizationDefer {
    /// Incremental-delivery label correlating follow-up payloads.
    pub label: String,
    /// Deferred selections, normalized when the follow-up arrives.
    pub node: Rc<NormalizationNode>,
}

/// `@stream` field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizationStream {
    /// Incremental-delivery label correlating follow-up payloads.
    pub label: String,
    /// The streamed field; items present in the initial payload are
    /// normalized immediately.
    pub field: NormalizationLinkedField,
}

/// Shared handle to a normalization node.
pub type NormalizationNodeRef = Rc<NormalizationNode>;
