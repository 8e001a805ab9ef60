// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Reader-form selection descriptors.
//!
//! The reader form describes the tree a consumer observes. Fragment spreads
//! are *not* inlined here (unlike the normalization form): they materialize
//! as fragment pointers so ownership and variables propagate to a later read.

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::argument::{Argument, FieldHandle};

/// A compiled fragment in reader form.
///
/// Also used for the root selection set of an operation's reader artifact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReaderFragment {
    /// Fragment name (unique per compiler output).
    pub name: String,
    /// Ordered selections.
    pub selections: Vec<ReaderSelection>,
}

/// One selection inside a reader fragment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ReaderSelection {
    /// Leaf field.
    Scalar(ReaderScalarField),
    /// Singular or plural link to child records.
    Linked(ReaderLinkedField),
    /// Type-narrowed (or unconditionally flattened) subselection.
    InlineFragment(ReaderInlineFragment),
    /// Fragment spread: emits a pointer, no inline data.
    FragmentSpread(ReaderFragmentSpread),
    /// `@inline` fragment: data is read eagerly under the fragment key.
    InlineData(ReaderInlineDataFragment),
    /// `@include`/`@skip` conditional subselection.
    Condition(ReaderCondition),
    /// `@match` field: emits an enriched pointer for the matched branch.
    Match(ReaderMatchField),
}

/// A scalar field selection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReaderScalarField {
    /// Field name.
    pub name: String,
    /// Response key override; the reader emits under `alias` when present.
    pub alias: Option<String>,
    /// Compiled arguments.
    pub arguments: Vec<Argument>,
    /// When present, the value is read from the handle's derived key instead
    /// of the raw storage key.
    pub handle: Option<FieldHandle>,
}

impl ReaderScalarField {
    /// Key the value is emitted under in read data.
    #[must_use]
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// A linked field selection (singular or plural).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReaderLinkedField {
    /// Field name.
    pub name: String,
    /// Response key override.
    pub alias: Option<String>,
    /// Compiled arguments.
    pub arguments: Vec<Argument>,
    /// `true` for `{__refs}` lists, `false` for a singular `{__ref}`.
    pub plural: bool,
    /// Child selections.
    pub selections: Vec<ReaderSelection>,
    /// When present, refs are read from the handle's derived key.
    pub handle: Option<FieldHandle>,
}

impl ReaderLinkedField {
    /// Key the value is emitted under in read data.
    #[must_use]
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// Inline fragment: narrows by concrete `__typename` when a type condition is
/// present, otherwise flattens its selections into the parent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReaderInlineFragment {
    /// Concrete typename to match; `None` flattens unconditionally.
    pub type_condition: Option<String>,
    /// Selections applied on match.
    pub selections: Vec<ReaderSelection>,
}

/// Fragment spread: the reader emits `{__id, __fragments, __fragmentOwner}`
/// on the parent object and does not descend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReaderFragmentSpread {
    /// Referenced fragment name.
    pub fragment_name: String,
    /// Fragment arguments, evaluated into the pointer's variable map.
    pub arguments: Vec<Argument>,
}

/// `@inline` fragment: subselection data is read eagerly and stored under the
/// fragment key instead of a pointer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReaderInlineDataFragment {
    /// Referenced fragment name.
    pub fragment_name: String,
    /// Selections read inline.
    pub selections: Vec<ReaderSelection>,
}

/// `@include(if:)` / `@skip(if:)` conditional.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReaderCondition {
    /// Variable name the condition reads.
    pub condition: String,
    /// Selections apply when the variable equals this value
    /// (`true` for `@include`, `false` for `@skip`).
    pub passing_value: bool,
    /// Guarded selections.
    pub selections: Vec<ReaderSelection>,
}

/// One `@module` branch of a `@match` field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchBranch {
    /// Concrete typename this branch serves.
    pub type_name: String,
    /// Fragment the emitted pointer references.
    pub fragment_name: String,
}

/// `@match` field: a linked field whose child is read as an enriched fragment
/// pointer when the child's `__typename` has a matching `@module` branch, and
/// as an empty object otherwise.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReaderMatchField {
    /// Field name.
    pub name: String,
    /// Response key override.
    pub alias: Option<String>,
    /// Compiled arguments.
    pub arguments: Vec<Argument>,
    /// Document name scoping the `__module_component_<doc>` record keys.
    pub document_name: String,
    /// Prop name the matched module renders under.
    pub fragment_prop_name: String,
    /// Branches by concrete typename.
    pub branches: Vec<MatchBranch>,
}

impl ReaderMatchField {
    /// Key the value is emitted under in read data.
    #[must_use]
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Returns the branch serving `type_name`, if any.
    #[must_use]
    pub fn branch_for(&self, type_name: &str) -> Option<&MatchBranch> {
        self.branches.iter().find(|b| b.type_name == type_name)
    }
}

/// Shared handle to a reader fragment.
pub type ReaderFragmentRef = Rc<ReaderFragment>;
