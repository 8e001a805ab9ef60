// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Requests, operation descriptors, and selectors.

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::argument::Variables;
use crate::ident::DataId;
use crate::normalization::NormalizationNode;
use crate::reader::ReaderFragment;

/// A compiled request: both artifact forms of one operation.
///
/// Requests are produced once per document by the external compiler and
/// shared via `Rc`. The `name` is the request's identity; the compiler
/// guarantees uniqueness per artifact set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConcreteRequest {
    /// Operation name (identity).
    pub name: String,
    /// Normalization-form root.
    pub operation: Rc<NormalizationNode>,
    /// Reader-form root.
    pub fragment: Rc<ReaderFragment>,
}

/// A reader selector: the shape to extract, anchored at a record, under a
/// set of variables.
#[derive(Clone, Debug, PartialEq)]
pub struct ReaderSelector {
    /// Selection tree (reader form).
    pub node: Rc<ReaderFragment>,
    /// Record the read starts at.
    pub data_id: DataId,
    /// Variables the selections are evaluated against.
    pub variables: Variables,
}

impl ReaderSelector {
    /// Creates a selector.
    pub fn new(node: Rc<ReaderFragment>, data_id: impl Into<DataId>, variables: Variables) -> Self {
        Self {
            node,
            data_id: data_id.into(),
            variables,
        }
    }
}

/// A normalization selector: how a payload or the source itself is walked,
/// anchored at a record, under a set of variables.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizationSelector {
    /// Selection tree (normalization form).
    pub node: Rc<NormalizationNode>,
    /// Record the walk starts at.
    pub data_id: DataId,
    /// Variables the selections are evaluated against.
    pub variables: Variables,
}

impl NormalizationSelector {
    /// Creates a selector.
    pub fn new(
        node: Rc<NormalizationNode>,
        data_id: impl Into<DataId>,
        variables: Variables,
    ) -> Self {
        Self {
            node,
            data_id: data_id.into(),
            variables,
        }
    }
}

/// An operation descriptor: a request bound to concrete variables.
///
/// Identity is structural over `(request name, variables)`: two descriptors
/// built from the same request and equal variables are the same operation for
/// caching, ownership, and notification purposes.
#[derive(Clone, Debug)]
pub struct OperationDescriptor {
    /// The compiled request.
    pub request: Rc<ConcreteRequest>,
    /// Concrete variables.
    pub variables: Variables,
}

impl OperationDescriptor {
    /// Binds `request` to `variables`, anchoring both selectors at the root
    /// record.
    pub fn new(request: Rc<ConcreteRequest>, variables: Variables) -> Self {
        Self { request, variables }
    }

    /// The root reader selector for this operation.
    #[must_use]
    pub fn reader_selector(&self) -> ReaderSelector {
        ReaderSelector::new(
            Rc::clone(&self.request.fragment),
            DataId::root(),
            self.variables.clone(),
        )
    }

    /// The root normalization selector for this operation.
    #[must_use]
    pub fn normalization_selector(&self) -> NormalizationSelector {
        NormalizationSelector::new(
            Rc::clone(&self.request.operation),
            DataId::root(),
            self.variables.clone(),
        )
    }
}

impl PartialEq for OperationDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.request.name == other.request.name && self.variables == other.variables
    }
}

impl Eq for OperationDescriptor {}
