// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Identity recycling.
//!
//! After a publish, affected subscriptions are re-read from scratch. Before
//! the new snapshot is delivered, its data is diffed against the previous
//! snapshot's: wherever a subtree is value-equal, the *previous* allocation
//! is spliced into the new tree. Consumers can then use identity
//! ([`DataValue::same_identity`]) as a cheap "unchanged" test, and a
//! subscription whose whole tree recycles does not fire at all.

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::data::{DataObject, DataValue, FragmentRef};

/// Recycles `new` against `old`, returning a tree equal to `new` that shares
/// every value-equal subtree with `old`.
///
/// If the trees are wholly equal the result *is* `old` (same allocation).
#[must_use]
pub fn recycle(old: &DataValue, new: &DataValue) -> DataValue {
    match (old, new) {
        (DataValue::Object(old_obj), DataValue::Object(new_obj)) => {
            if Rc::ptr_eq(old_obj, new_obj) {
                return new.clone();
            }
            recycle_object(old_obj, new_obj)
        }
        (DataValue::List(old_items), DataValue::List(new_items)) => {
            if Rc::ptr_eq(old_items, new_items) {
                return new.clone();
            }
            recycle_list(old_items, new_items)
        }
        _ => {
            if old == new {
                old.clone()
            } else {
                new.clone()
            }
        }
    }
}

fn recycle_object(old: &Rc<DataObject>, new: &Rc<DataObject>) -> DataValue {
    let metadata_equal = old.id == new.id
        && old.fragment_owner == new.fragment_owner
        && old.fragment_prop_name == new.fragment_prop_name
        && old.module_component == new.module_component;

    let mut fields = BTreeMap::new();
    let mut all_recycled = metadata_equal && old.fields.len() == new.fields.len();
    for (key, new_value) in &new.fields {
        let recycled = match old.fields.get(key) {
            Some(old_value) => {
                let r = recycle(old_value, new_value);
                if !r.same_identity(old_value) {
                    all_recycled = false;
                }
                r
            }
            None => {
                all_recycled = false;
                new_value.clone()
            }
        };
        fields.insert(key.clone(), recycled);
    }

    let mut fragments = BTreeMap::new();
    all_recycled = all_recycled && old.fragments.len() == new.fragments.len();
    for (name, new_ref) in &new.fragments {
        let recycled = match (old.fragments.get(name), new_ref) {
            (Some(FragmentRef::Inline(old_value)), FragmentRef::Inline(new_value)) => {
                let r = recycle(old_value, new_value);
                if !r.same_identity(old_value) {
                    all_recycled = false;
                }
                FragmentRef::Inline(r)
            }
            (Some(old_ref), new_ref) if old_ref == new_ref => old_ref.clone(),
            _ => {
                all_recycled = false;
                new_ref.clone()
            }
        };
        fragments.insert(name.clone(), recycled);
    }

    if all_recycled {
        return DataValue::Object(Rc::clone(old));
    }
    DataValue::Object(Rc::new(DataObject {
        id: new.id.clone(),
        fields,
        fragments,
        fragment_owner: new.fragment_owner.clone(),
        fragment_prop_name: new.fragment_prop_name.clone(),
        module_component: new.module_component.clone(),
    }))
}

fn recycle_list(old: &Rc<Vec<DataValue>>, new: &Rc<Vec<DataValue>>) -> DataValue {
    let mut items = Vec::with_capacity(new.len());
    let mut all_recycled = old.len() == new.len();
    for (i, new_item) in new.iter().enumerate() {
        let recycled = match old.get(i) {
            Some(old_item) => {
                let r = recycle(old_item, new_item);
                if !r.same_identity(old_item) {
                    all_recycled = false;
                }
                r
            }
            None => {
                all_recycled = false;
                new_item.clone()
            }
        };
        items.push(recycled);
    }
    if all_recycled {
        return DataValue::List(Rc::clone(old));
    }
    DataValue::List(Rc::new(items))
}
