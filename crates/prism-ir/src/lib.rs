// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! prism-ir: compiled GraphQL selection descriptors.
//!
//! The prism engine never parses GraphQL text. An external compiler lowers
//! documents into the immutable descriptor trees defined here, in two forms:
//!
//! - **Reader form** ([`ReaderFragment`]): drives snapshot materialization,
//!   the shape a consumer observes, including fragment pointers.
//! - **Normalization form** ([`NormalizationNode`]): drives response
//!   normalization, reference marking, and residency checks, the shape a
//!   server payload is interpreted through.
//!
//! Descriptors are plain data. Nodes are shared via `Rc` so a single
//! compiled artifact can back many concurrent selectors, and traversal is
//! borrow-only.
//!
//! # Determinism
//!
//! Storage keys are the canonical textual identity of a field occurrence:
//! argument names are sorted ascending and argument values are rendered as
//! stable JSON (sorted object keys, no whitespace). Two selections that differ
//! only in argument order therefore collapse to the same storage key. See
//! [`argument::storage_key`].
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

pub mod argument;
pub mod ident;
pub mod normalization;
pub mod operation;
pub mod reader;

pub use argument::{
    evaluate_arguments, handle_key, handle_storage_key, storage_key, storage_key_concrete,
    Argument, ArgumentValue, ConcreteArguments, FieldHandle, Variables,
};
pub use ident::{make_client_id, DataId, ROOT_ID, ROOT_TYPE, VIEWER_ID};
pub use normalization::{
    NormalizationCondition, NormalizationDefer, NormalizationHandleField,
    NormalizationInlineFragment, NormalizationLinkedField, NormalizationModuleImport,
    NormalizationNode, NormalizationNodeRef, NormalizationScalarField, NormalizationSelection,
    NormalizationStream,
};
pub use operation::{ConcreteRequest, NormalizationSelector, OperationDescriptor, ReaderSelector};
pub use reader::{
    MatchBranch, ReaderCondition, ReaderFragment, ReaderFragmentRef, ReaderFragmentSpread,
    ReaderInlineDataFragment, ReaderInlineFragment, ReaderLinkedField, ReaderMatchField,
    ReaderScalarField, ReaderSelection,
};
