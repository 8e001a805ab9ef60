// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! prism-core: a normalized in-memory graph cache.
//!
//! The engine maintains a single normalized record source built from query
//! responses, serves tree-shaped reads against it while tracking missing
//! data, publishes changes to subscribed readers with minimal recomputation,
//! and supports speculative (optimistic) modifications that revert exactly
//! and rebase over authoritative data.
//!
//! Data flow: response JSON → [`normalizer`] (fresh sink) → [`queue`] →
//! [`Store::publish`] (merge, record changed ids) → [`Store::notify`]
//! (overlap test, re-read, identity recycling, callbacks). Reads go
//! [`Store::lookup`] → [`reader`] → [`Snapshot`], with an optional
//! subscription for future changes.
//!
//! # Execution model
//!
//! Single-threaded cooperative. Every public operation runs to completion on
//! the calling thread; there are no locks and no internal parallelism. The
//! only asynchrony is external: the operation loader resolves `@match`
//! fragments at its leisure, and GC can be deferred to an embedder-driven
//! drain point. Records are owned by the store once published; only shared
//! references escape, so the "callers must not mutate published records"
//! rule is the borrow checker's problem, not a runtime freeze.
//!
//! [`Store::publish`]: store::Store::publish
//! [`Store::notify`]: store::Store::notify
//! [`Store::lookup`]: store::Store::lookup
//! [`Snapshot`]: reader::Snapshot
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::option_if_let_else,
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::use_self
)]

pub mod checker;
pub mod data;
pub mod environment;
pub mod error;
pub mod handles;
pub mod loader;
pub mod marker;
pub mod mutator;
pub mod normalizer;
pub mod proxy;
pub mod queue;
pub mod reader;
pub mod record;
pub mod recycle;
pub mod source;
pub mod store;

pub use data::{DataObject, DataValue, FragmentRef};
pub use environment::{CommitResult, Environment, EnvironmentBuilder};
pub use error::{HandleError, MutationError, PayloadError, QueueError, UpdaterError};
pub use handles::{HandleFieldPayload, Handler, HandlerRegistry};
pub use loader::{MapOperationLoader, OperationLoader};
pub use mutator::{OverlaySource, RecordSourceMutator};
pub use normalizer::{
    normalize, GetDataId, IncrementalKind, IncrementalPlaceholder, ModuleImportPayload,
    NormalizerOptions, ResponsePayload,
};
pub use proxy::{RecordProxy, RecordSourceProxy, RecordSourceSelectorProxy};
pub use queue::{
    OptimisticUpdate, PublishQueue, SelectorStoreUpdater, StoreUpdater, UpdateId,
};
pub use reader::{read, Snapshot};
pub use record::{FieldValue, Record};
pub use recycle::recycle;
pub use source::{MutableRecordSource, RecordEntry, RecordSource};
pub use store::{
    GcHoldToken, GcScheduler, RetainToken, Store, StoreBuilder, SubscriptionCallback,
    SubscriptionToken,
};

// The descriptor vocabulary is re-exported so embedders depend on one crate.
pub use prism_ir as ir;
