// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(dead_code)]

use std::rc::Rc;

use prism_core::ir::{
    Argument, ConcreteArguments, ConcreteRequest, NormalizationLinkedField, NormalizationNode,
    NormalizationScalarField, NormalizationSelection, OperationDescriptor, ReaderFragment,
    ReaderLinkedField, ReaderScalarField, ReaderSelection, Variables,
};
use prism_core::{DataValue, UpdaterError};
use serde_json::{json, Map as JsonMap, Value as JsonValue};

/// Builds a variable map from literal pairs.
pub fn vars(pairs: &[(&str, JsonValue)]) -> Variables {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), v.clone()))
        .collect()
}

/// Empty concrete arguments, for proxy calls on argument-less fields.
pub fn no_args() -> ConcreteArguments {
    ConcreteArguments::new()
}

/// Converts proxy mutation errors into updater errors, the way user
/// updaters report failure.
pub fn updater_err(error: impl std::fmt::Display) -> UpdaterError {
    UpdaterError(error.to_string())
}

/// Reader scalar selection with no alias, arguments, or handle.
pub fn r_scalar(name: &str) -> ReaderSelection {
    ReaderSelection::Scalar(ReaderScalarField {
        name: name.into(),
        alias: None,
        arguments: vec![],
        handle: None,
    })
}

/// Reader linked selection.
pub fn r_linked(name: &str, args: Vec<Argument>, plural: bool, selections: Vec<ReaderSelection>) -> ReaderSelection {
    ReaderSelection::Linked(ReaderLinkedField {
        name: name.into(),
        alias: None,
        arguments: args,
        plural,
        selections,
        handle: None,
    })
}

/// Normalization scalar selection.
pub fn n_scalar(name: &str) -> NormalizationSelection {
    NormalizationSelection::Scalar(NormalizationScalarField {
        name: name.into(),
        alias: None,
        arguments: vec![],
    })
}

/// Normalization linked selection.
pub fn n_linked(
    name: &str,
    args: Vec<Argument>,
    plural: bool,
    selections: Vec<NormalizationSelection>,
) -> NormalizationSelection {
    NormalizationSelection::Linked(NormalizationLinkedField {
        name: name.into(),
        alias: None,
        arguments: args,
        plural,
        concrete_type: None,
        selections,
    })
}

/// `query UserQuery($id: ID!) { node(id: $id) { __typename id name } }` in
/// both artifact forms.
pub fn user_request() -> Rc<ConcreteRequest> {
    let node_args = || vec![Argument::variable("id", "id")];
    Rc::new(ConcreteRequest {
        name: "UserQuery".into(),
        operation: Rc::new(NormalizationNode {
            name: "UserQuery".into(),
            selections: vec![n_linked(
                "node",
                node_args(),
                false,
                vec![n_scalar("__typename"), n_scalar("id"), n_scalar("name")],
            )],
        }),
        fragment: Rc::new(ReaderFragment {
            name: "UserQuery".into(),
            selections: vec![r_linked(
                "node",
                node_args(),
                false,
                vec![r_scalar("__typename"), r_scalar("id"), r_scalar("name")],
            )],
        }),
    })
}

/// Binds a request to variables.
pub fn operation(request: &Rc<ConcreteRequest>, variables: Variables) -> Rc<OperationDescriptor> {
    Rc::new(OperationDescriptor::new(Rc::clone(request), variables))
}

/// Renders read data as plain JSON (fields only) for structural assertions.
/// Missing values render as the string `"<missing>"` so absence bugs show up
/// in diffs instead of collapsing into null.
pub fn data_to_json(data: &DataValue) -> JsonValue {
    match data {
        DataValue::Missing => json!("<missing>"),
        DataValue::Null => JsonValue::Null,
        DataValue::Scalar(v) => v.clone(),
        DataValue::List(items) => JsonValue::Array(items.iter().map(data_to_json).collect()),
        DataValue::Object(object) => {
            let mut map = JsonMap::new();
            for (key, value) in &object.fields {
                map.insert(key.clone(), data_to_json(value));
            }
            JsonValue::Object(map)
        }
    }
}
