// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Error types.
//!
//! Missing data is never an error; it is reported through snapshot flags.
//! The types here cover programmer errors (malformed payloads, unknown
//! handlers, reentrant runs) that reject the offending input before any
//! partial state is published.

use prism_ir::DataId;
use thiserror::Error;

/// Errors raised while normalizing a response payload.
///
/// A payload error rejects the whole payload: nothing from it reaches the
/// canonical source.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// The payload shape did not match the selection tree.
    #[error("malformed payload at {path}: expected {expected}")]
    Malformed {
        /// Dotted response path of the offending value.
        path: String,
        /// What the selection required at that path.
        expected: &'static str,
    },
    /// An abstract-type branch requires `__typename` and the payload omitted
    /// it.
    #[error("missing __typename at {path}")]
    MissingTypename {
        /// Dotted response path of the offending object.
        path: String,
    },
    /// A record source could not be decoded from its JSON interchange form.
    #[error("invalid record source entry for {data_id}: {reason}")]
    InvalidRecord {
        /// Id of the offending entry.
        data_id: DataId,
        /// What was wrong with it.
        reason: String,
    },
}

/// Errors raised while dispatching handle field payloads.
#[derive(Debug, Error)]
pub enum HandleError {
    /// No handler is installed under the payload's handle name.
    #[error("no handler installed for handle {0:?}")]
    UnknownHandle(String),
}

/// Error reported by a user-supplied updater.
///
/// In the optimistic rebase path these are logged and skipped; in the commit
/// path they abort the run.
#[derive(Debug, Error)]
#[error("updater failed: {0}")]
pub struct UpdaterError(pub String);

/// Errors raised by store mutations staged through a proxy.
#[derive(Debug, Error)]
pub enum MutationError {
    /// `create` was asked to produce a record whose id is already live.
    #[error("record already exists: {0}")]
    AlreadyExists(DataId),
    /// A write targeted an id with no live record in the overlay or base.
    #[error("no record to write: {0}")]
    MissingRecord(DataId),
}

/// Errors raised by the publish queue.
///
/// Reentrant `run()` needs no variant here: the queue's `run` takes the
/// store exclusively, so driving the queue from inside a notification
/// callback is unrepresentable rather than a runtime error.
#[derive(Debug, Error)]
pub enum QueueError {
    /// An optimistic update handle did not name a pending or applied update.
    #[error("unknown optimistic update: {0}")]
    UnknownUpdate(u64),
    /// A handle field payload named an uninstalled handler.
    #[error(transparent)]
    Handle(#[from] HandleError),
    /// A committed payload failed to normalize.
    #[error(transparent)]
    Payload(#[from] PayloadError),
    /// A staged mutation was invalid.
    #[error(transparent)]
    Mutation(#[from] MutationError),
}
