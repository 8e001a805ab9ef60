// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The publish queue: transactional coordination of authoritative and
//! optimistic updates.
//!
//! All public operations defer; [`PublishQueue::run`] is the single point
//! where queued work is materialized against the store. A run proceeds in
//! fixed phases:
//!
//! 1. **Undo**: if anything non-optimistic arrived (or an applied
//!    optimistic update was reverted), publish the backup source, undoing
//!    every applied optimistic write in one step.
//! 2. **Apply** queued authoritative payloads and raw sources.
//! 3. **Apply** queued client-only updaters into one shared sink.
//! 4. **Rebase**: replay still-applied optimistic updates, then apply the
//!    newly requested ones, all into one sink over the fresh store state;
//!    the accumulated backup becomes the next undo step.
//! 5. **Finalize**: reconcile the GC hold with whether optimistic state
//!    remains applied.
//! 6. **Notify** subscribers; their owners are the run's result.
//!
//! Updater errors are caught and logged (`warn!`); they never abort a run.
//! Unknown handle names and malformed payloads do abort, rejecting the
//! offending work before anything is published.
//!
//! Reentrancy: `run` borrows the store exclusively, so re-entering from a
//! notification callback is a compile error rather than a runtime check.

use std::mem;
use std::rc::Rc;

use prism_ir::OperationDescriptor;
use serde_json::Value as JsonValue;
use tracing::{trace, warn};

use crate::data::DataValue;
use crate::error::{QueueError, UpdaterError};
use crate::handles::{HandleFieldPayload, HandlerRegistry};
use crate::mutator::RecordSourceMutator;
use crate::normalizer::{GetDataId, NormalizerOptions, ResponsePayload};
use crate::proxy::{RecordSourceProxy, RecordSourceSelectorProxy};
use crate::reader;
use crate::source::{MutableRecordSource, RecordSource};
use crate::store::{GcHoldToken, Store};

/// Client-only updater: stages writes through the proxy capability set.
pub type StoreUpdater = Box<dyn FnMut(&RecordSourceProxy<'_, '_>) -> Result<(), UpdaterError>>;

/// Mutation updater: like [`StoreUpdater`], but selector-aware and handed
/// the freshly-read selector data of the payload it accompanies.
pub type SelectorStoreUpdater = Box<
    dyn FnMut(
        &RecordSourceSelectorProxy<'_, '_, '_>,
        Option<&DataValue>,
    ) -> Result<(), UpdaterError>,
>;

/// A speculative modification, revertable and rebase-safe.
pub enum OptimisticUpdate {
    /// Pre-staged records plus the handle payloads that accompany them.
    Source {
        /// Records to stage.
        source: MutableRecordSource,
        /// Handle work orders to run while staging.
        field_payloads: Vec<HandleFieldPayload>,
    },
    /// A user-supplied store mutator.
    StoreUpdater(StoreUpdater),
    /// A server response applied speculatively: normalized on (re)application
    /// so rebases see current store state underneath.
    Payload {
        /// Operation the response answers.
        operation: Rc<OperationDescriptor>,
        /// The response's `data` member.
        response: JsonValue,
        /// Optional selector-aware updater run after normalization.
        updater: Option<SelectorStoreUpdater>,
    },
}

impl std::fmt::Debug for OptimisticUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Source { source, field_payloads } => f
                .debug_struct("Source")
                .field("records", &source.size())
                .field("field_payloads", &field_payloads.len())
                .finish(),
            Self::StoreUpdater(_) => f.write_str("StoreUpdater"),
            Self::Payload { operation, .. } => f
                .debug_struct("Payload")
                .field("operation", &operation.request.name)
                .finish_non_exhaustive(),
        }
    }
}

/// Identity of an optimistic update within its queue; returned by
/// [`PublishQueue::apply_update`] and redeemed by
/// [`PublishQueue::revert_update`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UpdateId(u64);

enum PendingCommit {
    Payload {
        operation: Rc<OperationDescriptor>,
        payload: ResponsePayload,
        updater: Option<SelectorStoreUpdater>,
    },
    /// A normalized payload with no owning operation: module-import and
    /// incremental follow-ups land here.
    Normalized(ResponsePayload),
    Source(MutableRecordSource),
}

/// Transactional coordinator between producers of writes and the store.
pub struct PublishQueue {
    backup: MutableRecordSource,
    pending_backup_rebase: bool,
    pending_data: Vec<PendingCommit>,
    pending_updaters: Vec<StoreUpdater>,
    pending_optimistic: Vec<(u64, OptimisticUpdate)>,
    applied_optimistic: Vec<(u64, OptimisticUpdate)>,
    next_update_id: u64,
    gc_hold: Option<GcHoldToken>,
    handlers: HandlerRegistry,
    get_data_id: Option<Rc<GetDataId>>,
}

impl PublishQueue {
    /// Creates a queue dispatching handle payloads against `handlers` and
    /// resolving payload ids through `get_data_id` (default resolution when
    /// `None`).
    #[must_use]
    pub fn new(handlers: HandlerRegistry, get_data_id: Option<Rc<GetDataId>>) -> Self {
        Self {
            backup: MutableRecordSource::new(),
            pending_backup_rebase: false,
            pending_data: Vec::new(),
            pending_updaters: Vec::new(),
            pending_optimistic: Vec::new(),
            applied_optimistic: Vec::new(),
            next_update_id: 0,
            gc_hold: None,
            handlers,
            get_data_id,
        }
    }

    /// `true` while any optimistic updates are applied.
    #[must_use]
    pub fn has_applied_optimistic_updates(&self) -> bool {
        !self.applied_optimistic.is_empty()
    }

    /// Queues an optimistic update for application on the next run.
    pub fn apply_update(&mut self, update: OptimisticUpdate) -> UpdateId {
        let id = self.next_update_id;
        self.next_update_id += 1;
        self.pending_optimistic.push((id, update));
        UpdateId(id)
    }

    /// Reverts one optimistic update: a still-pending update is simply
    /// dropped; an applied one is removed and the backup is marked for
    /// replay.
    ///
    /// # Errors
    ///
    /// [`QueueError::UnknownUpdate`] when `id` names neither a pending nor
    /// an applied update (e.g. it was already reverted).
    pub fn revert_update(&mut self, id: UpdateId) -> Result<(), QueueError> {
        if let Some(pos) = self.pending_optimistic.iter().position(|(u, _)| *u == id.0) {
            self.pending_optimistic.remove(pos);
            return Ok(());
        }
        if let Some(pos) = self.applied_optimistic.iter().position(|(u, _)| *u == id.0) {
            self.applied_optimistic.remove(pos);
            self.pending_backup_rebase = true;
            return Ok(());
        }
        Err(QueueError::UnknownUpdate(id.0))
    }

    /// Reverts every optimistic update, pending and applied.
    pub fn revert_all(&mut self) {
        self.pending_optimistic.clear();
        self.applied_optimistic.clear();
        self.pending_backup_rebase = true;
    }

    /// Queues an authoritative (pre-normalized) payload.
    pub fn commit_payload(
        &mut self,
        operation: Rc<OperationDescriptor>,
        payload: ResponsePayload,
        updater: Option<SelectorStoreUpdater>,
    ) {
        self.pending_backup_rebase = true;
        self.pending_data.push(PendingCommit::Payload {
            operation,
            payload,
            updater,
        });
    }

    /// Queues a client-only updater.
    pub fn commit_update(&mut self, updater: StoreUpdater) {
        self.pending_backup_rebase = true;
        self.pending_updaters.push(updater);
    }

    /// Queues an already-normalized payload that has no owning operation:
    /// the follow-up shape for module imports and `@defer`/`@stream`.
    pub fn commit_normalized(&mut self, payload: ResponsePayload) {
        self.pending_backup_rebase = true;
        self.pending_data.push(PendingCommit::Normalized(payload));
    }

    /// Queues a raw source for direct publication.
    pub fn commit_source(&mut self, source: MutableRecordSource) {
        self.pending_backup_rebase = true;
        self.pending_data.push(PendingCommit::Source(source));
    }

    /// Materializes all queued work against `store` and returns the owners
    /// whose subscriptions fired.
    ///
    /// # Errors
    ///
    /// Unknown handle names and malformed optimistic payloads abort the run;
    /// the offending sink is dropped unpublished.
    pub fn run(&mut self, store: &mut Store) -> Result<Vec<Rc<OperationDescriptor>>, QueueError> {
        trace!(
            pending_data = self.pending_data.len(),
            pending_updaters = self.pending_updaters.len(),
            pending_optimistic = self.pending_optimistic.len(),
            applied_optimistic = self.applied_optimistic.len(),
            rebase = self.pending_backup_rebase,
            "queue run"
        );

        // 1. Undo applied optimistic writes when non-optimistic changes are
        // about to land (or a revert was requested). The backup holds whole
        // pre-write records, so it restores with replacement semantics.
        if self.pending_backup_rebase && !self.backup.is_empty() {
            let backup = mem::take(&mut self.backup);
            store.restore(backup);
        }

        // 2. Authoritative payloads and raw sources.
        let pending = mem::take(&mut self.pending_data);
        for commit in pending {
            match commit {
                PendingCommit::Payload {
                    operation,
                    payload,
                    updater,
                } => self.commit_payload_now(store, Some(&operation), payload, updater)?,
                PendingCommit::Normalized(payload) => {
                    self.commit_payload_now(store, None, payload, None)?;
                }
                PendingCommit::Source(source) => store.publish(source),
            }
        }

        // 3. Client-only updaters, collected into a single sink.
        let updaters = mem::take(&mut self.pending_updaters);
        if !updaters.is_empty() {
            let mut sink = MutableRecordSource::new();
            {
                let mut mutator = RecordSourceMutator::new(store.source(), &mut sink);
                let proxy = RecordSourceProxy::with_handlers(&mut mutator, &self.handlers);
                for mut updater in updaters {
                    if let Err(error) = updater(&proxy) {
                        warn!(%error, "commit updater failed");
                    }
                }
            }
            store.publish(sink);
        }

        // 4. Rebase still-applied optimistic updates (only after an undo)
        // and apply new ones. The queue's backup is shared with the mutator
        // so undo state accumulates across runs: the first touch of a record
        // wins, whichever update (or run) staged it.
        let needs_rebase = self.pending_backup_rebase && !self.applied_optimistic.is_empty();
        if needs_rebase || !self.pending_optimistic.is_empty() {
            let mut sink = MutableRecordSource::new();
            {
                let mut mutator =
                    RecordSourceMutator::with_backup(store.source(), &mut sink, &mut self.backup);
                let proxy = RecordSourceProxy::with_handlers(&mut mutator, &self.handlers);
                let options = NormalizerOptions {
                    get_data_id: self.get_data_id.as_deref(),
                };
                if needs_rebase {
                    for (_, update) in &mut self.applied_optimistic {
                        apply_optimistic(update, &proxy, &options)?;
                    }
                }
                let fresh = mem::take(&mut self.pending_optimistic);
                for (id, mut update) in fresh {
                    apply_optimistic(&mut update, &proxy, &options)?;
                    self.applied_optimistic.push((id, update));
                }
            }
            store.publish(sink);
        }

        // 5. Finalize: reset the rebase flag, reconcile the GC hold.
        self.pending_backup_rebase = false;
        if self.applied_optimistic.is_empty() {
            if let Some(hold) = self.gc_hold.take() {
                store.release_gc_hold(hold);
            }
        } else if self.gc_hold.is_none() {
            self.gc_hold = Some(store.hold_gc());
        }

        // 6. Notify.
        Ok(store.notify())
    }

    /// Applies one authoritative payload: handles first (against the
    /// payload's own sink, copy-on-write over the store), then the user
    /// updater with selector data read from that sink, then publication.
    fn commit_payload_now(
        &mut self,
        store: &mut Store,
        operation: Option<&Rc<OperationDescriptor>>,
        payload: ResponsePayload,
        updater: Option<SelectorStoreUpdater>,
    ) -> Result<(), QueueError> {
        let ResponsePayload {
            source: mut sink,
            field_payloads,
            ..
        } = payload;

        {
            let mut mutator = RecordSourceMutator::new(store.source(), &mut sink);
            let proxy = RecordSourceProxy::with_handlers(&mut mutator, &self.handlers);
            for field_payload in &field_payloads {
                let handler = self.handlers.resolve(field_payload)?;
                handler.update(&proxy, field_payload);
            }
        }

        if let (Some(operation), Some(mut updater)) = (operation, updater) {
            let snapshot = reader::read(
                &sink,
                &operation.reader_selector(),
                Some(Rc::clone(operation)),
            );
            let selector_data = match &snapshot.data {
                DataValue::Missing => None,
                data => Some(data),
            };
            let mut mutator = RecordSourceMutator::new(store.source(), &mut sink);
            let proxy = RecordSourceProxy::with_handlers(&mut mutator, &self.handlers);
            let selector_proxy =
                RecordSourceSelectorProxy::new(&proxy, operation.normalization_selector());
            if let Err(error) = updater(&selector_proxy, selector_data) {
                warn!(%error, operation = %operation.request.name, "payload updater failed");
            }
        }

        store.publish(sink);
        Ok(())
    }
}

impl std::fmt::Debug for PublishQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishQueue")
            .field("pending_data", &self.pending_data.len())
            .field("pending_updaters", &self.pending_updaters.len())
            .field("pending_optimistic", &self.pending_optimistic.len())
            .field("applied_optimistic", &self.applied_optimistic.len())
            .field("pending_backup_rebase", &self.pending_backup_rebase)
            .finish_non_exhaustive()
    }
}

/// Applies (or re-applies, during rebase) one optimistic update through the
/// shared staging proxy. Updater errors are logged and swallowed; structural
/// errors (unknown handler, malformed payload) propagate.
fn apply_optimistic(
    update: &mut OptimisticUpdate,
    proxy: &RecordSourceProxy<'_, '_>,
    options: &NormalizerOptions<'_>,
) -> Result<(), QueueError> {
    match update {
        OptimisticUpdate::Source {
            source,
            field_payloads,
        } => proxy.publish_source(source, field_payloads),
        OptimisticUpdate::StoreUpdater(updater) => {
            if let Err(error) = updater(proxy) {
                warn!(%error, "optimistic updater failed");
            }
            Ok(())
        }
        OptimisticUpdate::Payload {
            operation,
            response,
            updater,
        } => {
            let payload = proxy.commit_payload(operation, response, options)?;
            if let Some(updater) = updater {
                let snapshot = reader::read(
                    &payload.source,
                    &operation.reader_selector(),
                    Some(Rc::clone(operation)),
                );
                let selector_data = match &snapshot.data {
                    DataValue::Missing => None,
                    data => Some(data),
                };
                let selector_proxy =
                    RecordSourceSelectorProxy::new(proxy, operation.normalization_selector());
                if let Err(error) = updater(&selector_proxy, selector_data) {
                    warn!(%error, operation = %operation.request.name, "optimistic updater failed");
                }
            }
            Ok(())
        }
    }
}
