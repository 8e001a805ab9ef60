// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Environment facade.
//!
//! Wires one store, one publish queue, and one handler registry into the
//! surface external callers use. Transports stay outside: the environment
//! consumes already-received response data (the `data` member of a GraphQL
//! response) and hands back whatever needs asynchronous continuation:
//! module imports to load, incremental branches to await.
//!
//! There may be many environments side by side; nothing here is global.

use std::rc::Rc;

use prism_ir::{NormalizationSelector, OperationDescriptor, ReaderSelector};
use serde_json::Value as JsonValue;
use tracing::instrument;

use crate::error::QueueError;
use crate::handles::HandlerRegistry;
use crate::loader::OperationLoader;
use crate::normalizer::{
    normalize, GetDataId, IncrementalPlaceholder, ModuleImportPayload, NormalizerOptions,
};
use crate::queue::{OptimisticUpdate, PublishQueue, SelectorStoreUpdater, StoreUpdater, UpdateId};
use crate::reader::Snapshot;
use crate::source::MutableRecordSource;
use crate::store::{
    GcHoldToken, GcScheduler, RetainToken, Store, SubscriptionCallback, SubscriptionToken,
};

/// Result of committing a payload: who was notified, plus the work that
/// needs asynchronous continuation.
#[derive(Debug, Default)]
pub struct CommitResult {
    /// Owners whose subscriptions fired.
    pub owners: Vec<Rc<OperationDescriptor>>,
    /// `@match` branches whose operation fragment must be loaded; resume
    /// each via [`Environment::commit_module_payload`].
    pub module_imports: Vec<ModuleImportPayload>,
    /// Outstanding `@defer`/`@stream` branches; resume each via
    /// [`Environment::commit_incremental_payload`].
    pub incremental: Vec<IncrementalPlaceholder>,
}

/// A store, a publish queue, and the configuration they share.
pub struct Environment {
    store: Store,
    queue: PublishQueue,
    get_data_id: Option<Rc<GetDataId>>,
}

impl Environment {
    /// Starts configuring an environment.
    #[must_use]
    pub fn builder() -> EnvironmentBuilder {
        EnvironmentBuilder::default()
    }

    /// Read access to the store (snapshots, residency, source inspection).
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Materializes a snapshot of `selector` on behalf of `owner`.
    #[must_use]
    pub fn lookup(
        &self,
        selector: &ReaderSelector,
        owner: Option<Rc<OperationDescriptor>>,
    ) -> Snapshot {
        self.store.lookup(selector, owner)
    }

    /// Is `operation` fully resident in the store?
    #[must_use]
    pub fn check(&self, operation: &OperationDescriptor) -> bool {
        self.store.check(&operation.normalization_selector())
    }

    /// Subscribes `callback` to changes affecting `snapshot`.
    pub fn subscribe(
        &mut self,
        snapshot: Snapshot,
        callback: SubscriptionCallback,
    ) -> SubscriptionToken {
        self.store.subscribe(snapshot, callback)
    }

    /// Removes a subscription.
    pub fn unsubscribe(&mut self, token: SubscriptionToken) {
        self.store.unsubscribe(token);
    }

    /// Declares `operation`'s root alive for GC purposes.
    pub fn retain(&mut self, operation: &OperationDescriptor) -> RetainToken {
        self.store.retain(operation.normalization_selector())
    }

    /// Releases a retained root (scheduling a collection).
    pub fn release_retain(&mut self, token: RetainToken) {
        self.store.release_retain(token);
    }

    /// Suppresses GC until released.
    pub fn hold_gc(&mut self) -> GcHoldToken {
        self.store.hold_gc()
    }

    /// Releases one GC hold.
    pub fn release_gc_hold(&mut self, token: GcHoldToken) {
        self.store.release_gc_hold(token);
    }

    /// Drains a pending collection (manual GC scheduling).
    pub fn run_pending_gc(&mut self) -> bool {
        self.store.run_pending_gc()
    }

    /// Normalizes and commits an authoritative response for `operation`,
    /// then runs the queue.
    ///
    /// # Errors
    ///
    /// Normalization and handle errors reject the payload; nothing is
    /// published.
    #[instrument(skip_all, fields(operation = %operation.request.name))]
    pub fn commit_payload(
        &mut self,
        operation: Rc<OperationDescriptor>,
        data: &JsonValue,
        updater: Option<SelectorStoreUpdater>,
    ) -> Result<CommitResult, QueueError> {
        let mut payload = normalize(
            &operation.normalization_selector(),
            data,
            &self.normalizer_options(),
        )?;
        let module_imports = std::mem::take(&mut payload.module_payloads);
        let incremental = std::mem::take(&mut payload.incremental_placeholders);
        self.queue.commit_payload(operation, payload, updater);
        let owners = self.queue.run(&mut self.store)?;
        Ok(CommitResult {
            owners,
            module_imports,
            incremental,
        })
    }

    /// Resumes a `@match` branch once its operation fragment has loaded:
    /// normalizes the captured branch payload with `node` and commits it.
    ///
    /// # Errors
    ///
    /// Normalization and handle errors reject the payload.
    pub fn commit_module_payload(
        &mut self,
        import: &ModuleImportPayload,
        node: Rc<prism_ir::NormalizationNode>,
    ) -> Result<CommitResult, QueueError> {
        let selector =
            NormalizationSelector::new(node, import.data_id.clone(), import.variables.clone());
        self.commit_normalized(&selector, &import.data)
    }

    /// Resumes a `@defer`/`@stream` branch with its follow-up payload.
    ///
    /// # Errors
    ///
    /// Normalization and handle errors reject the payload.
    pub fn commit_incremental_payload(
        &mut self,
        placeholder: &IncrementalPlaceholder,
        data: &JsonValue,
    ) -> Result<CommitResult, QueueError> {
        self.commit_normalized(&placeholder.selector, data)
    }

    fn commit_normalized(
        &mut self,
        selector: &NormalizationSelector,
        data: &JsonValue,
    ) -> Result<CommitResult, QueueError> {
        let mut payload = normalize(selector, data, &self.normalizer_options())?;
        let module_imports = std::mem::take(&mut payload.module_payloads);
        let incremental = std::mem::take(&mut payload.incremental_placeholders);
        self.queue.commit_normalized(payload);
        let owners = self.queue.run(&mut self.store)?;
        Ok(CommitResult {
            owners,
            module_imports,
            incremental,
        })
    }

    /// Commits a client-only updater and runs the queue.
    ///
    /// # Errors
    ///
    /// Handle errors from staged sources abort the run.
    pub fn commit_update(
        &mut self,
        updater: StoreUpdater,
    ) -> Result<Vec<Rc<OperationDescriptor>>, QueueError> {
        self.queue.commit_update(updater);
        self.queue.run(&mut self.store)
    }

    /// Publishes a raw record source and runs the queue.
    ///
    /// # Errors
    ///
    /// Handle errors abort the run.
    pub fn commit_source(
        &mut self,
        source: MutableRecordSource,
    ) -> Result<Vec<Rc<OperationDescriptor>>, QueueError> {
        self.queue.commit_source(source);
        self.queue.run(&mut self.store)
    }

    /// Applies an optimistic update and runs the queue. Revert it later with
    /// [`Environment::revert_update`] (or [`Environment::revert_all`]).
    ///
    /// # Errors
    ///
    /// Handle errors and malformed optimistic payloads abort the run.
    pub fn apply_update(
        &mut self,
        update: OptimisticUpdate,
    ) -> Result<(UpdateId, Vec<Rc<OperationDescriptor>>), QueueError> {
        let id = self.queue.apply_update(update);
        let owners = self.queue.run(&mut self.store)?;
        Ok((id, owners))
    }

    /// Reverts one optimistic update and runs the queue.
    ///
    /// # Errors
    ///
    /// [`QueueError::UnknownUpdate`] when `id` is not pending or applied.
    pub fn revert_update(
        &mut self,
        id: UpdateId,
    ) -> Result<Vec<Rc<OperationDescriptor>>, QueueError> {
        self.queue.revert_update(id)?;
        self.queue.run(&mut self.store)
    }

    /// Reverts every optimistic update and runs the queue.
    ///
    /// # Errors
    ///
    /// Handle errors abort the run.
    pub fn revert_all(&mut self) -> Result<Vec<Rc<OperationDescriptor>>, QueueError> {
        self.queue.revert_all();
        self.queue.run(&mut self.store)
    }

    fn normalizer_options(&self) -> NormalizerOptions<'_> {
        NormalizerOptions {
            get_data_id: self.get_data_id.as_deref(),
        }
    }
}

/// Environment configuration.
#[derive(Default)]
pub struct EnvironmentBuilder {
    handlers: HandlerRegistry,
    get_data_id: Option<Rc<GetDataId>>,
    gc_scheduler: GcScheduler,
    operation_loader: Option<Rc<dyn OperationLoader>>,
}

impl EnvironmentBuilder {
    /// Installs the handler registry.
    #[must_use]
    pub fn handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    /// Installs a custom payload id resolver.
    #[must_use]
    pub fn get_data_id(mut self, get_data_id: Rc<GetDataId>) -> Self {
        self.get_data_id = Some(get_data_id);
        self
    }

    /// Sets the GC scheduling mode.
    #[must_use]
    pub fn gc_scheduler(mut self, scheduler: GcScheduler) -> Self {
        self.gc_scheduler = scheduler;
        self
    }

    /// Wires the operation loader.
    #[must_use]
    pub fn operation_loader(mut self, loader: Rc<dyn OperationLoader>) -> Self {
        self.operation_loader = Some(loader);
        self
    }

    /// Builds the environment.
    #[must_use]
    pub fn build(self) -> Environment {
        let mut store_builder = Store::builder().gc_scheduler(self.gc_scheduler);
        if let Some(loader) = self.operation_loader {
            store_builder = store_builder.operation_loader(loader);
        }
        Environment {
            store: store_builder.build(),
            queue: PublishQueue::new(self.handlers, self.get_data_id.clone()),
            get_data_id: self.get_data_id,
        }
    }
}
