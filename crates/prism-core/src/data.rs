// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Materialized read data.
//!
//! Snapshot data is a freshly allocated tree whose interior nodes are
//! `Rc`-shared. Sharing is what makes identity recycling observable:
//! after a re-read, a subtree that recycled to its previous value is the
//! *same allocation* ([`DataValue::same_identity`] / `Rc::ptr_eq`), giving
//! consumers a reliable "nothing changed here" signal without a deep
//! comparison.

use std::collections::BTreeMap;
use std::rc::Rc;

use prism_ir::{ConcreteArguments, DataId, OperationDescriptor};
use serde_json::Value as JsonValue;

/// A value in materialized read data.
///
/// `Missing` (data that was never fetched) is distinct from `Null` (data the
/// server explicitly nulled). At the root, a missing record materializes as
/// `Missing`; a tombstoned record materializes as `Null`. Inside objects,
/// missing fields are *omitted* from the field map; `Missing` appears only
/// as a list hole, where position must be preserved.
#[derive(Clone, Debug, PartialEq)]
pub enum DataValue {
    /// Data absent from the store (never fetched or evicted).
    Missing,
    /// Explicit null.
    Null,
    /// Scalar JSON value.
    Scalar(JsonValue),
    /// Plural value; holes preserved.
    List(Rc<Vec<DataValue>>),
    /// Object value.
    Object(Rc<DataObject>),
}

impl DataValue {
    /// Returns `true` when `self` and `other` are the same materialization:
    /// pointer-equal for interior nodes, value-equal for leaves.
    #[must_use]
    pub fn same_identity(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b),
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b),
            (a, b) => a == b,
        }
    }

    /// The object, if this value is one.
    #[must_use]
    pub fn as_object(&self) -> Option<&DataObject> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    /// The list, if this value is one.
    #[must_use]
    pub fn as_list(&self) -> Option<&[DataValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// The scalar, if this value is one.
    #[must_use]
    pub fn as_scalar(&self) -> Option<&JsonValue> {
        match self {
            Self::Scalar(v) => Some(v),
            _ => None,
        }
    }
}

/// How a fragment appears on an enclosing object.
#[derive(Clone, Debug, PartialEq)]
pub enum FragmentRef {
    /// A pointer: the fragment's data is read later, against the owner's
    /// variables. Carries the fragment's evaluated arguments.
    Pointer(ConcreteArguments),
    /// An `@inline` fragment: the data was read eagerly.
    Inline(DataValue),
}

/// An object node in read data.
///
/// Reserved attributes of the read contract (`__id`, `__fragments`,
/// `__fragmentOwner`, `__fragmentPropName`, `__module_component`) are typed
/// fields here rather than entries in `fields`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DataObject {
    /// Backing record id, when the object corresponds to a record.
    pub id: Option<DataId>,
    /// Selected fields by response key. Missing fields are omitted.
    pub fields: BTreeMap<String, DataValue>,
    /// Fragments spread on this object.
    pub fragments: BTreeMap<String, FragmentRef>,
    /// Operation whose variables resolve the spread fragments.
    pub fragment_owner: Option<Rc<OperationDescriptor>>,
    /// `@match` enrichment: prop name the matched module renders under.
    pub fragment_prop_name: Option<String>,
    /// `@match` enrichment: the chosen component module.
    pub module_component: Option<JsonValue>,
}

impl DataObject {
    /// An empty object (what an unmatched `@match` field reads as).
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Reads a field by response key. `None` means the field is missing.
    #[must_use]
    pub fn field(&self, response_key: &str) -> Option<&DataValue> {
        self.fields.get(response_key)
    }

    /// Returns `true` when nothing was materialized onto this object.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
            && self.fragments.is_empty()
            && self.fragment_prop_name.is_none()
            && self.module_component.is_none()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use serde_json::json;

    #[test]
    fn identity_is_pointer_based_for_interior_nodes() {
        let object = Rc::new(DataObject {
            fields: BTreeMap::from([("a".to_owned(), DataValue::Scalar(json!(1)))]),
            ..DataObject::default()
        });
        let a = DataValue::Object(Rc::clone(&object));
        let b = DataValue::Object(object);
        let structural_copy = DataValue::Object(Rc::new(DataObject {
            fields: BTreeMap::from([("a".to_owned(), DataValue::Scalar(json!(1)))]),
            ..DataObject::default()
        }));

        assert!(a.same_identity(&b));
        assert!(!a.same_identity(&structural_copy));
        assert_eq!(a, structural_copy);
    }

    #[test]
    fn leaves_compare_by_value() {
        assert!(DataValue::Scalar(json!("x")).same_identity(&DataValue::Scalar(json!("x"))));
        assert!(DataValue::Null.same_identity(&DataValue::Null));
        assert!(!DataValue::Null.same_identity(&DataValue::Missing));
    }
}
