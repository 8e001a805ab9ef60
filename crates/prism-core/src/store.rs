// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The canonical store.
//!
//! Owns the canonical record source and everything that depends on its
//! evolution: the set of ids changed since the last notification, the live
//! subscriptions, the retained GC roots, and the garbage collector itself.
//! The source is mutated only through [`Store::publish`], and only the
//! publish queue drives that during a run; external code sees snapshots and
//! staging proxies.
//!
//! # GC scheduling
//!
//! Collection triggers (retain disposal, hold release) are coalesced through
//! a pending flag. [`GcScheduler::Immediate`] collects inline at the trigger
//! point when no hold is active; [`GcScheduler::Manual`] leaves the flag set
//! until the embedder drains it with [`Store::run_pending_gc`], the
//! synchronous mode tests and deterministic hosts want. Holds are
//! ref-counted; a pending collection fires when the last hold releases.

use std::collections::BTreeMap;
use std::mem;
use std::rc::Rc;

use prism_ir::{DataId, NormalizationSelector, OperationDescriptor, ReaderSelector};
use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use crate::checker;
use crate::loader::OperationLoader;
use crate::marker;
use crate::reader::{self, Snapshot};
use crate::record::Record;
use crate::recycle::recycle;
use crate::source::{MutableRecordSource, RecordEntry, RecordSource};

/// When garbage collection actually runs relative to its triggers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GcScheduler {
    /// Collect inline as soon as a trigger fires with no hold active.
    #[default]
    Immediate,
    /// Coalesce triggers; the embedder drains them via
    /// [`Store::run_pending_gc`].
    Manual,
}

/// Callback invoked with the fresh snapshot when a subscription fires.
pub type SubscriptionCallback = Box<dyn FnMut(&Snapshot)>;

/// Entitlement to a subscription; redeem with [`Store::unsubscribe`].
#[derive(Debug)]
#[must_use = "dropping the token leaks the subscription"]
pub struct SubscriptionToken(u64);

/// Entitlement to a retained root; redeem with [`Store::release_retain`].
#[derive(Debug)]
#[must_use = "dropping the token leaks the retained root"]
pub struct RetainToken(u64);

/// One unit of GC suppression; redeem with [`Store::release_gc_hold`].
#[derive(Debug)]
#[must_use = "dropping the token suppresses GC forever"]
pub struct GcHoldToken(());

struct Subscription {
    snapshot: Snapshot,
    callback: SubscriptionCallback,
}

/// Canonical record store.
pub struct Store {
    source: MutableRecordSource,
    updated_record_ids: FxHashSet<DataId>,
    subscriptions: BTreeMap<u64, Subscription>,
    next_subscription: u64,
    roots: BTreeMap<u64, NormalizationSelector>,
    next_root: u64,
    gc_scheduler: GcScheduler,
    gc_hold_count: u32,
    gc_pending: bool,
    operation_loader: Option<Rc<dyn OperationLoader>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// Creates an empty store with the default (immediate) GC scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts configuring a store.
    #[must_use]
    pub fn builder() -> StoreBuilder {
        StoreBuilder::default()
    }

    /// Read-only view of the canonical source.
    #[must_use]
    pub fn source(&self) -> &MutableRecordSource {
        &self.source
    }

    /// Materializes a snapshot of `selector` on behalf of `owner`.
    ///
    /// The returned tree is immutable by construction; callers share it,
    /// they never write through it.
    #[must_use]
    pub fn lookup(
        &self,
        selector: &ReaderSelector,
        owner: Option<Rc<OperationDescriptor>>,
    ) -> Snapshot {
        reader::read(&self.source, selector, owner)
    }

    /// Delegates to the data checker: is `selector` fully resident?
    #[must_use]
    pub fn check(&self, selector: &NormalizationSelector) -> bool {
        checker::check(&self.source, selector, self.operation_loader.as_deref())
    }

    /// Merges `source` into the canonical source, recording every id whose
    /// visible state changed.
    ///
    /// Per-id rules: an unpublish sentinel forgets the id; a tombstone
    /// deletes it (no-op if already deleted); a record is set outright where
    /// nothing lived before, and field-wise merged over an existing record
    /// (a merge that changes nothing marks nothing).
    pub fn publish(&mut self, source: MutableRecordSource) {
        self.ingest(source, true);
    }

    /// Publishes `source` with replacement semantics: record entries replace
    /// the canonical record outright instead of merging.
    ///
    /// This is the undo path. A backup captures whole pre-write records, and
    /// restoring one must also erase any fields the undone writes
    /// introduced; a merge would resurrect them.
    pub fn restore(&mut self, source: MutableRecordSource) {
        self.ingest(source, false);
    }

    fn ingest(&mut self, source: MutableRecordSource, merge: bool) {
        let mut changed = 0usize;
        for (data_id, entry) in source.into_entries() {
            match entry {
                RecordEntry::Unpublish => {
                    self.source.remove(&data_id);
                    self.updated_record_ids.insert(data_id);
                    changed += 1;
                }
                RecordEntry::Tombstone => {
                    if self.source.entry(&data_id) != Some(&RecordEntry::Tombstone) {
                        self.updated_record_ids.insert(data_id.clone());
                        changed += 1;
                    }
                    self.source.delete(data_id);
                }
                RecordEntry::Record(next) => match self.source.get_record(&data_id) {
                    Some(previous) => {
                        if let (Some(prev_t), Some(next_t)) = (previous.typename(), next.typename())
                        {
                            if prev_t != next_t {
                                debug!(
                                    data_id = %data_id,
                                    established = prev_t,
                                    rejected = next_t,
                                    "conflicting typename in published record"
                                );
                            }
                        }
                        let next = if merge {
                            Record::merge(previous, &next)
                        } else {
                            next
                        };
                        if next != *previous {
                            self.source.set(data_id.clone(), next);
                            self.updated_record_ids.insert(data_id);
                            changed += 1;
                        }
                    }
                    None => {
                        self.source.set(data_id.clone(), next);
                        self.updated_record_ids.insert(data_id);
                        changed += 1;
                    }
                },
            }
        }
        trace!(changed, merge, total = self.source.size(), "ingested source");
    }

    /// Re-reads every subscription whose seen set intersects the updated
    /// set, recycles identities against the previous snapshot, fires the
    /// callbacks whose data actually changed, and returns the owners of the
    /// fired subscriptions. Clears the updated set.
    pub fn notify(&mut self) -> Vec<Rc<OperationDescriptor>> {
        let updated = mem::take(&mut self.updated_record_ids);
        if updated.is_empty() {
            return Vec::new();
        }
        let mut owners = Vec::new();
        let mut fired = 0usize;
        for subscription in self.subscriptions.values_mut() {
            if !has_overlapping_ids(&subscription.snapshot.seen_records, &updated) {
                continue;
            }
            let next = reader::read(
                &self.source,
                &subscription.snapshot.selector,
                subscription.snapshot.owner.clone(),
            );
            let recycled = recycle(&subscription.snapshot.data, &next.data);
            if recycled.same_identity(&subscription.snapshot.data) {
                continue;
            }
            subscription.snapshot = Snapshot {
                data: recycled,
                ..next
            };
            (subscription.callback)(&subscription.snapshot);
            fired += 1;
            if let Some(owner) = &subscription.snapshot.owner {
                owners.push(Rc::clone(owner));
            }
        }
        trace!(
            updated = updated.len(),
            fired,
            subscriptions = self.subscriptions.len(),
            "notified subscribers"
        );
        owners
    }

    /// Registers a subscription holding its previous snapshot.
    pub fn subscribe(
        &mut self,
        snapshot: Snapshot,
        callback: SubscriptionCallback,
    ) -> SubscriptionToken {
        let token = self.next_subscription;
        self.next_subscription += 1;
        self.subscriptions
            .insert(token, Subscription { snapshot, callback });
        SubscriptionToken(token)
    }

    /// Removes a subscription. No further callbacks fire; prior ones are
    /// not rolled back.
    pub fn unsubscribe(&mut self, token: SubscriptionToken) {
        self.subscriptions.remove(&token.0);
    }

    /// Declares `selector`'s root alive for GC purposes.
    pub fn retain(&mut self, selector: NormalizationSelector) -> RetainToken {
        let token = self.next_root;
        self.next_root += 1;
        self.roots.insert(token, selector);
        RetainToken(token)
    }

    /// Releases a retained root and schedules a collection.
    pub fn release_retain(&mut self, token: RetainToken) {
        self.roots.remove(&token.0);
        self.schedule_gc();
    }

    /// Suppresses GC until the returned token is released. Holds nest.
    pub fn hold_gc(&mut self) -> GcHoldToken {
        self.gc_hold_count += 1;
        GcHoldToken(())
    }

    /// Releases one GC hold; a pending collection fires (per the scheduler)
    /// when the last hold goes away.
    pub fn release_gc_hold(&mut self, token: GcHoldToken) {
        let GcHoldToken(()) = token;
        self.gc_hold_count = self.gc_hold_count.saturating_sub(1);
        if self.gc_hold_count == 0 && self.gc_pending {
            self.schedule_gc();
        }
    }

    /// Runs a pending collection now, if one is due and no hold is active.
    /// Returns `true` when a collection ran. This is the drain point for
    /// [`GcScheduler::Manual`].
    pub fn run_pending_gc(&mut self) -> bool {
        if !self.gc_pending || self.gc_hold_count > 0 {
            return false;
        }
        self.gc_pending = false;
        self.collect();
        true
    }

    fn schedule_gc(&mut self) {
        if self.gc_hold_count > 0 {
            self.gc_pending = true;
            return;
        }
        match self.gc_scheduler {
            GcScheduler::Immediate => {
                self.gc_pending = false;
                self.collect();
            }
            GcScheduler::Manual => self.gc_pending = true,
        }
    }

    /// Mark-sweep over the canonical source: mark from every retained root,
    /// hard-forget everything unmarked. With no roots (or nothing marked)
    /// the entire source is cleared.
    fn collect(&mut self) {
        let mut marked: FxHashSet<DataId> = FxHashSet::default();
        for selector in self.roots.values() {
            marker::mark(
                &self.source,
                selector,
                &mut marked,
                self.operation_loader.as_deref(),
            );
        }
        if self.roots.is_empty() || marked.is_empty() {
            debug!(evicted = self.source.size(), "gc: no live roots, clearing source");
            self.source.clear();
            return;
        }
        let mut evicted = 0usize;
        for data_id in self.source.record_ids() {
            if !marked.contains(&data_id) {
                self.source.remove(&data_id);
                evicted += 1;
            }
        }
        debug!(evicted, live = marked.len(), "gc: swept unreachable records");
    }
}

/// Intersection test between a snapshot's seen set and the updated set.
fn has_overlapping_ids(seen: &FxHashSet<DataId>, updated: &FxHashSet<DataId>) -> bool {
    let (smaller, larger) = if seen.len() <= updated.len() {
        (seen, updated)
    } else {
        (updated, seen)
    };
    smaller.iter().any(|id| larger.contains(id))
}

/// Store configuration.
#[derive(Default)]
pub struct StoreBuilder {
    gc_scheduler: GcScheduler,
    operation_loader: Option<Rc<dyn OperationLoader>>,
}

impl StoreBuilder {
    /// Sets the GC scheduling mode.
    #[must_use]
    pub fn gc_scheduler(mut self, scheduler: GcScheduler) -> Self {
        self.gc_scheduler = scheduler;
        self
    }

    /// Wires the operation loader used by marking and residency checks.
    #[must_use]
    pub fn operation_loader(mut self, loader: Rc<dyn OperationLoader>) -> Self {
        self.operation_loader = Some(loader);
        self
    }

    /// Builds the store.
    #[must_use]
    pub fn build(self) -> Store {
        Store {
            source: MutableRecordSource::new(),
            updated_record_ids: FxHashSet::default(),
            subscriptions: BTreeMap::new(),
            next_subscription: 0,
            roots: BTreeMap::new(),
            next_root: 0,
            gc_scheduler: self.gc_scheduler,
            gc_hold_count: 0,
            gc_pending: false,
            operation_loader: self.operation_loader,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::record::FieldValue;
    use prism_ir::{NormalizationNode, Variables};
    use serde_json::json;
    use std::rc::Rc;

    fn record_with(id: &str, key: &str, value: serde_json::Value) -> Record {
        let mut r = Record::new(DataId::from(id), Some("User".to_owned()));
        r.set(key, FieldValue::Scalar(value));
        r
    }

    fn source_with(id: &str, key: &str, value: serde_json::Value) -> MutableRecordSource {
        let mut s = MutableRecordSource::new();
        s.set(DataId::from(id), record_with(id, key, value));
        s
    }

    #[test]
    fn publish_merges_field_wise_and_tracks_updated_ids() {
        let mut store = Store::new();
        store.publish(source_with("1", "name", json!("Alice")));
        assert_eq!(store.updated_record_ids.len(), 1);
        store.notify();

        // Merging an identical record marks nothing.
        store.publish(source_with("1", "name", json!("Alice")));
        assert!(store.updated_record_ids.is_empty());

        // A disjoint field merges in without losing the old one.
        store.publish(source_with("1", "age", json!(30)));
        let merged = store.source().get_record(&DataId::from("1")).unwrap();
        assert_eq!(merged.get("name"), Some(&FieldValue::Scalar(json!("Alice"))));
        assert_eq!(merged.get("age"), Some(&FieldValue::Scalar(json!(30))));
    }

    #[test]
    fn publish_tombstone_deletes_and_marks_once() {
        let mut store = Store::new();
        store.publish(source_with("1", "name", json!("Alice")));
        store.notify();

        let mut deletion = MutableRecordSource::new();
        deletion.delete(DataId::from("1"));
        store.publish(deletion);
        assert!(store.updated_record_ids.contains(&DataId::from("1")));
        assert_eq!(
            store.source().entry(&DataId::from("1")),
            Some(&RecordEntry::Tombstone)
        );
        store.notify();

        // Re-deleting an already-deleted id changes nothing visible.
        let mut deletion = MutableRecordSource::new();
        deletion.delete(DataId::from("1"));
        store.publish(deletion);
        assert!(store.updated_record_ids.is_empty());
    }

    #[test]
    fn publish_unpublish_forgets_entirely() {
        let mut store = Store::new();
        store.publish(source_with("1", "name", json!("Alice")));
        store.notify();

        let mut sink = MutableRecordSource::new();
        sink.unpublish(DataId::from("1"));
        store.publish(sink);
        assert!(store.source().entry(&DataId::from("1")).is_none());
        assert!(store.updated_record_ids.contains(&DataId::from("1")));
    }

    #[test]
    fn gc_clears_everything_without_roots() {
        let mut store = Store::builder().gc_scheduler(GcScheduler::Manual).build();
        store.publish(source_with("1", "name", json!("Alice")));
        store.notify();

        let node = Rc::new(NormalizationNode {
            name: "Q".into(),
            selections: vec![],
        });
        let token = store.retain(NormalizationSelector::new(node, prism_ir::ROOT_ID, Variables::new()));
        store.release_retain(token);
        assert!(store.run_pending_gc());
        assert_eq!(store.source().size(), 0);
    }

    #[test]
    fn gc_holds_defer_collection_until_released() {
        let mut store = Store::new(); // immediate scheduler
        store.publish(source_with("1", "name", json!("Alice")));
        store.notify();

        let hold = store.hold_gc();
        let node = Rc::new(NormalizationNode {
            name: "Q".into(),
            selections: vec![],
        });
        let token = store.retain(NormalizationSelector::new(node, prism_ir::ROOT_ID, Variables::new()));
        store.release_retain(token);
        // Suppressed by the hold.
        assert_eq!(store.source().size(), 1);

        store.release_gc_hold(hold);
        // Last hold released: the pending collection fired inline.
        assert_eq!(store.source().size(), 0);
    }
}
