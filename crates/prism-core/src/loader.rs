// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Async normalization-fragment resolution seam for `@match`/`@module`.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use prism_ir::NormalizationNode;

/// Produces split normalization fragments named by `@match` operation
/// references (e.g. `B$normalization.graphql`).
///
/// The engine only ever consults the loader synchronously: [`get`] answers
/// from whatever has already resolved, and [`load`] requests resolution.
/// When an async fragment lands, the integration re-enters the engine with
/// an ordinary follow-up payload commit.
///
/// [`get`]: OperationLoader::get
/// [`load`]: OperationLoader::load
pub trait OperationLoader {
    /// Returns the fragment if it has already resolved.
    fn get(&self, reference: &str) -> Option<Rc<NormalizationNode>>;

    /// Requests (or re-requests) resolution of `reference`.
    fn load(&self, reference: &str);
}

/// In-process loader backed by a map; the test double and the simplest
/// production shape (fragments bundled with the app).
#[derive(Default)]
pub struct MapOperationLoader {
    fragments: BTreeMap<String, Rc<NormalizationNode>>,
    requested: RefCell<Vec<String>>,
}

impl MapOperationLoader {
    /// Creates an empty loader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a resolved fragment under `reference`.
    pub fn insert(&mut self, reference: impl Into<String>, node: Rc<NormalizationNode>) {
        self.fragments.insert(reference.into(), node);
    }

    /// References [`OperationLoader::load`] has been asked for, in order.
    #[must_use]
    pub fn requested(&self) -> Vec<String> {
        self.requested.borrow().clone()
    }
}

impl OperationLoader for MapOperationLoader {
    fn get(&self, reference: &str) -> Option<Rc<NormalizationNode>> {
        self.fragments.get(reference).cloned()
    }

    fn load(&self, reference: &str) {
        self.requested.borrow_mut().push(reference.to_owned());
    }
}
