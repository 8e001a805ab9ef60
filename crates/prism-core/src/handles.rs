// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Handle field processing.
//!
//! `@__clientField(handle:…)` fields are normalized twice: the normalizer
//! writes the raw server value and emits a [`HandleFieldPayload`]; after the
//! staged sink is assembled, the named handler runs against the same
//! record, reading the raw key and writing the derived key. Handlers are installed by
//! name in a [`HandlerRegistry`]; a payload naming an uninstalled handler is
//! a programmer error that fails the publish.

use std::collections::BTreeMap;
use std::rc::Rc;

use prism_ir::{ConcreteArguments, DataId};

use crate::error::HandleError;
use crate::proxy::RecordSourceProxy;

/// Work order produced by the normalizer for one handle occurrence.
#[derive(Clone, Debug, PartialEq)]
pub struct HandleFieldPayload {
    /// Record the handle operates on.
    pub data_id: DataId,
    /// Storage key of the raw field (full arguments).
    pub field_key: String,
    /// Storage key the handler writes (filtered arguments).
    pub handle_key: String,
    /// Handler name.
    pub handle: String,
    /// Evaluated arguments of the underlying field.
    pub args: ConcreteArguments,
    /// Argument names that participated in `handle_key`.
    pub filters: Option<Vec<String>>,
}

/// A handle implementation.
pub trait Handler {
    /// Applies the handle: typically read `payload.field_key`, derive a
    /// value, write `payload.handle_key` on the same record via `proxy`.
    fn update(&self, proxy: &RecordSourceProxy<'_, '_>, payload: &HandleFieldPayload);
}

/// Installed handlers by name.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Rc<dyn Handler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `handler` under `name`, replacing any previous handler.
    pub fn install(&mut self, name: impl Into<String>, handler: Rc<dyn Handler>) {
        self.handlers.insert(name.into(), handler);
    }

    /// Resolves the handler for `payload`.
    ///
    /// # Errors
    ///
    /// [`HandleError::UnknownHandle`] when nothing is installed under the
    /// payload's handle name.
    pub fn resolve(&self, payload: &HandleFieldPayload) -> Result<Rc<dyn Handler>, HandleError> {
        self.handlers
            .get(&payload.handle)
            .cloned()
            .ok_or_else(|| HandleError::UnknownHandle(payload.handle.clone()))
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handles", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
