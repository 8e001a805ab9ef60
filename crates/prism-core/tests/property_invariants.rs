// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]

mod common;

use common::{no_args, updater_err};
use prism_core::ir::{ConcreteArguments, DataId};
use prism_core::{
    FieldValue, HandlerRegistry, MutableRecordSource, OptimisticUpdate, PublishQueue, Record,
    RecordSource, Store,
};
use proptest::prelude::*;
use serde_json::json;

/// One staged write inside a generated optimistic update.
#[derive(Debug, Clone)]
enum OptiOp {
    Set { target: u8, key: u8, value: i64 },
    Create { target: u8 },
    Delete { target: u8 },
}

fn target_id(target: u8) -> DataId {
    DataId::from(format!("u{}", target % 6))
}

fn key_name(key: u8) -> String {
    format!("k{}", key % 4)
}

fn opti_op() -> impl Strategy<Value = OptiOp> {
    prop_oneof![
        (any::<u8>(), any::<u8>(), any::<i64>())
            .prop_map(|(target, key, value)| OptiOp::Set { target, key, value }),
        any::<u8>().prop_map(|target| OptiOp::Create { target }),
        any::<u8>().prop_map(|target| OptiOp::Delete { target }),
    ]
}

/// Base store: u0..u2 exist with a couple of fields; u3..u5 do not.
fn base_store() -> Store {
    let mut source = MutableRecordSource::new();
    for i in 0..3u8 {
        let id = target_id(i);
        let mut record = Record::new(id.clone(), Some("User".to_owned()));
        record.set("k0", FieldValue::Scalar(json!(i)));
        record.set("name", FieldValue::Scalar(json!(format!("user-{i}"))));
        source.set(id, record);
    }
    let mut store = Store::new();
    store.publish(source);
    store.notify();
    store
}

fn updater_for(batch: Vec<OptiOp>) -> OptimisticUpdate {
    OptimisticUpdate::StoreUpdater(Box::new(move |proxy| {
        for op in &batch {
            match op {
                OptiOp::Set { target, key, value } => {
                    if let Some(record) = proxy.get(&target_id(*target)) {
                        record
                            .set_value(&key_name(*key), &ConcreteArguments::new(), json!(value))
                            .map_err(updater_err)?;
                    }
                }
                OptiOp::Create { target } => {
                    let id = target_id(*target);
                    if proxy.get(&id).is_none() {
                        proxy.create(id, "User").map_err(updater_err)?;
                    }
                }
                OptiOp::Delete { target } => {
                    proxy.delete(&target_id(*target));
                }
            }
        }
        Ok(())
    }))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Any sequence of optimistic updates, across any number of runs,
    /// reverts to exactly the pre-optimistic source, field for field,
    /// presence for presence.
    #[test]
    fn optimistic_undo_is_exact(
        batches in prop::collection::vec(prop::collection::vec(opti_op(), 1..6), 1..5)
    ) {
        let mut store = base_store();
        let before = store.source().clone();
        let mut queue = PublishQueue::new(HandlerRegistry::new(), None);

        for batch in batches {
            queue.apply_update(updater_for(batch));
            queue.run(&mut store).expect("run succeeds");
        }

        queue.revert_all();
        queue.run(&mut store).expect("run succeeds");
        prop_assert_eq!(store.source(), &before);
    }

    /// Reverting updates one at a time in reverse order is just as exact as
    /// reverting everything at once.
    #[test]
    fn stepwise_revert_is_exact(
        batches in prop::collection::vec(prop::collection::vec(opti_op(), 1..5), 1..4)
    ) {
        let mut store = base_store();
        let before = store.source().clone();
        let mut queue = PublishQueue::new(HandlerRegistry::new(), None);

        let mut ids = Vec::new();
        for batch in batches {
            ids.push(queue.apply_update(updater_for(batch)));
            queue.run(&mut store).expect("run succeeds");
        }

        for id in ids.into_iter().rev() {
            queue.revert_update(id).expect("update known");
            queue.run(&mut store).expect("run succeeds");
        }
        prop_assert_eq!(store.source(), &before);
    }

    /// Publishing any source twice leaves the canonical source unchanged on
    /// the second pass and produces no change notifications.
    #[test]
    fn publish_is_idempotent(
        records in prop::collection::vec(
            (any::<u8>(), prop::collection::vec((any::<u8>(), any::<i64>()), 0..4)),
            1..6,
        )
    ) {
        let mut source = MutableRecordSource::new();
        for (target, fields) in records {
            let id = target_id(target);
            let mut record = Record::new(id.clone(), Some("User".to_owned()));
            for (key, value) in fields {
                record.set(key_name(key), FieldValue::Scalar(json!(value)));
            }
            source.set(id, record);
        }

        let mut store = Store::new();
        store.publish(source.clone());
        store.notify();
        let first = store.source().clone();

        // Subscribe to one record the source definitely contains, to catch
        // spurious notifications on the republication.
        let some_id = store.source().record_ids().remove(0);
        let fragment = std::rc::Rc::new(prism_core::ir::ReaderFragment {
            name: "F".into(),
            selections: vec![common::r_scalar("k0")],
        });
        let selector = prism_core::ir::ReaderSelector::new(
            fragment,
            some_id,
            prism_core::ir::Variables::new(),
        );
        let snapshot = store.lookup(&selector, None);
        let fired = std::rc::Rc::new(std::cell::Cell::new(0u32));
        let sink = std::rc::Rc::clone(&fired);
        let _ = store.subscribe(snapshot, Box::new(move |_| sink.set(sink.get() + 1)));

        store.publish(source);
        store.notify();

        prop_assert_eq!(store.source(), &first);
        prop_assert_eq!(fired.get(), 0);
    }
}

// Drop-guard: `set_value` on a record deleted earlier in the same batch must
// error, not corrupt state. Exercised deterministically so a regression has
// a readable failure.
#[test]
fn set_after_delete_in_one_batch_reports_missing_record() {
    let mut store = base_store();
    let before = store.source().clone();
    let mut queue = PublishQueue::new(HandlerRegistry::new(), None);

    queue.apply_update(OptimisticUpdate::StoreUpdater(Box::new(|proxy| {
        let id = target_id(0);
        let record = proxy.get(&id).ok_or_else(|| updater_err("missing"))?;
        record
            .set_value("name", &no_args(), json!("doomed"))
            .map_err(updater_err)?;
        proxy.delete(&id);
        // The handle is stale now; writing through it must fail cleanly.
        let result = record.set_value("name", &no_args(), json!("zombie"));
        assert!(result.is_err());
        Ok(())
    })));
    queue.run(&mut store).expect("run succeeds");

    queue.revert_all();
    queue.run(&mut store).expect("run succeeds");
    assert_eq!(store.source(), &before);
}
