// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::r_scalar;
use prism_core::ir::{DataId, ReaderFragment, ReaderSelector, Variables};
use prism_core::{
    DataValue, FieldValue, MutableRecordSource, Record, Snapshot, Store,
};
use serde_json::json;

fn user(id: &str, name: &str) -> Record {
    let mut r = Record::new(DataId::from(id), Some("User".to_owned()));
    r.set("id", FieldValue::Scalar(json!(id)));
    r.set("name", FieldValue::Scalar(json!(name)));
    r
}

/// Store with records 1 and 2 linked from 1 (`bestFriend`), so a read of
/// `1 { name, bestFriend { name } }` sees exactly {"1", "2"}.
fn seeded_store() -> Store {
    let mut source = MutableRecordSource::new();
    let mut one = user("1", "Alice");
    one.set("bestFriend", FieldValue::Ref(DataId::from("2")));
    source.set(DataId::from("1"), one);
    source.set(DataId::from("2"), user("2", "Bob"));
    source.set(DataId::from("3"), user("3", "Carol"));

    let mut store = Store::new();
    store.publish(source);
    store.notify();
    store
}

fn friend_fragment() -> Rc<ReaderFragment> {
    Rc::new(ReaderFragment {
        name: "UserWithFriend".into(),
        selections: vec![
            r_scalar("name"),
            common::r_linked("bestFriend", vec![], false, vec![r_scalar("name")]),
        ],
    })
}

fn subscribe_counting(store: &mut Store) -> (Rc<RefCell<Vec<Snapshot>>>, Snapshot) {
    let selector = ReaderSelector::new(friend_fragment(), "1", Variables::new());
    let snapshot = store.lookup(&selector, None);
    assert_eq!(
        snapshot.seen_records.len(),
        2,
        "read touches exactly records 1 and 2"
    );
    let delivered = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&delivered);
    let initial = snapshot.clone();
    let _ = store.subscribe(
        snapshot,
        Box::new(move |next| {
            sink.borrow_mut().push(next.clone());
        }),
    );
    (delivered, initial)
}

#[test]
fn subscription_fires_only_on_seen_set_overlap() {
    let mut store = seeded_store();
    let (delivered, _) = subscribe_counting(&mut store);

    // Touch "3": no overlap with {"1","2"}, so no callback.
    let mut disjoint = MutableRecordSource::new();
    disjoint.set(DataId::from("3"), user("3", "Caroline"));
    store.publish(disjoint);
    let owners = store.notify();
    assert!(owners.is_empty());
    assert!(delivered.borrow().is_empty());

    // Touch "1": overlap, so the callback fires with the fresh snapshot.
    let mut overlapping = MutableRecordSource::new();
    overlapping.set(DataId::from("1"), user("1", "Alicia"));
    store.publish(overlapping);
    store.notify();
    let delivered = delivered.borrow();
    assert_eq!(delivered.len(), 1);
    let name = delivered[0]
        .data
        .as_object()
        .and_then(|o| o.field("name"))
        .and_then(DataValue::as_scalar)
        .cloned();
    assert_eq!(name, Some(json!("Alicia")));
}

#[test]
fn value_equal_republication_does_not_fire() {
    let mut store = seeded_store();
    let (delivered, _) = subscribe_counting(&mut store);

    // Touches "1" but writes the same value: the re-read recycles to the
    // old allocation, so nothing fires.
    let mut same = MutableRecordSource::new();
    same.set(DataId::from("1"), {
        let mut one = user("1", "Alice");
        one.set("bestFriend", FieldValue::Ref(DataId::from("2")));
        one
    });
    store.publish(same);
    store.notify();
    assert!(delivered.borrow().is_empty());
}

#[test]
fn unchanged_subtrees_keep_their_identity_across_notifications() {
    let mut store = seeded_store();
    let (delivered, initial) = subscribe_counting(&mut store);

    // Change "1"'s own field; "2" (the bestFriend subtree) is untouched.
    let mut overlapping = MutableRecordSource::new();
    overlapping.set(DataId::from("1"), user("1", "Alicia"));
    store.publish(overlapping);
    store.notify();

    let delivered = delivered.borrow();
    let old_friend = initial
        .data
        .as_object()
        .and_then(|o| o.field("bestFriend"))
        .expect("old friend subtree")
        .clone();
    let new_friend = delivered[0]
        .data
        .as_object()
        .and_then(|o| o.field("bestFriend"))
        .expect("new friend subtree")
        .clone();
    assert!(
        new_friend.same_identity(&old_friend),
        "value-equal subtree is pointer-reused"
    );
    assert!(!delivered[0].data.same_identity(&initial.data));
}

#[test]
fn unsubscribe_stops_future_callbacks() {
    let mut store = seeded_store();
    let selector = ReaderSelector::new(friend_fragment(), "1", Variables::new());
    let snapshot = store.lookup(&selector, None);
    let fired = Rc::new(RefCell::new(0u32));
    let sink = Rc::clone(&fired);
    let token = store.subscribe(
        snapshot,
        Box::new(move |_| {
            *sink.borrow_mut() += 1;
        }),
    );
    store.unsubscribe(token);

    let mut overlapping = MutableRecordSource::new();
    overlapping.set(DataId::from("1"), user("1", "Alicia"));
    store.publish(overlapping);
    store.notify();
    assert_eq!(*fired.borrow(), 0);
}

#[test]
fn notify_returns_owners_of_fired_subscriptions() {
    let mut store = seeded_store();
    let op = common::operation(&common::user_request(), common::vars(&[("id", json!("1"))]));
    let selector = ReaderSelector::new(friend_fragment(), "1", Variables::new());
    let snapshot = store.lookup(&selector, Some(Rc::clone(&op)));
    let _ = store.subscribe(snapshot, Box::new(|_| {}));

    let mut overlapping = MutableRecordSource::new();
    overlapping.set(DataId::from("1"), user("1", "Alicia"));
    store.publish(overlapping);
    let owners = store.notify();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].request.name, "UserQuery");
}
