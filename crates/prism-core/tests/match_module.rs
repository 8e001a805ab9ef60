// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]

mod common;

use std::rc::Rc;

use common::{n_linked, n_scalar, vars};
use prism_core::ir::{
    Argument, ConcreteRequest, DataId, MatchBranch, NormalizationInlineFragment,
    NormalizationModuleImport, NormalizationNode, NormalizationSelection, OperationDescriptor,
    ReaderFragment, ReaderMatchField, ReaderSelection,
};
use prism_core::{Environment, FieldValue, FragmentRef, RecordSource};
use serde_json::json;

/// `nameRenderer @match { ...A_name @module(name:"A.react") ...B_name
/// @module(name:"B.react") }` under document `UserQuery`.
fn match_request() -> Rc<ConcreteRequest> {
    let supported = || vec![Argument::literal("supported", json!(["A", "B"]))];
    let module_branch = |ty: &str, fragment: &str| {
        NormalizationSelection::InlineFragment(NormalizationInlineFragment {
            type_condition: Some(ty.into()),
            selections: vec![NormalizationSelection::ModuleImport(
                NormalizationModuleImport {
                    document_name: "UserQuery".into(),
                    fragment_name: fragment.into(),
                    fragment_prop_name: "name".into(),
                },
            )],
        })
    };
    Rc::new(ConcreteRequest {
        name: "UserQuery".into(),
        operation: Rc::new(NormalizationNode {
            name: "UserQuery".into(),
            selections: vec![n_linked(
                "node",
                vec![Argument::variable("id", "id")],
                false,
                vec![
                    n_scalar("__typename"),
                    n_scalar("id"),
                    n_linked(
                        "nameRenderer",
                        supported(),
                        false,
                        vec![
                            n_scalar("__typename"),
                            module_branch("A", "A_name"),
                            module_branch("B", "B_name"),
                        ],
                    ),
                ],
            )],
        }),
        fragment: Rc::new(ReaderFragment {
            name: "UserQuery".into(),
            selections: vec![common::r_linked(
                "node",
                vec![Argument::variable("id", "id")],
                false,
                vec![ReaderSelection::Match(ReaderMatchField {
                    name: "nameRenderer".into(),
                    alias: None,
                    arguments: supported(),
                    document_name: "UserQuery".into(),
                    fragment_prop_name: "name".into(),
                    branches: vec![
                        MatchBranch {
                            type_name: "A".into(),
                            fragment_name: "A_name".into(),
                        },
                        MatchBranch {
                            type_name: "B".into(),
                            fragment_name: "B_name".into(),
                        },
                    ],
                })],
            )],
        }),
    })
}

fn renderer_payload(typename: &str) -> serde_json::Value {
    json!({
        "node": {
            "__typename": "User",
            "id": "1",
            "nameRenderer": {
                "__typename": typename,
                "__module_component_UserQuery": format!("{typename}.react"),
                "__module_operation_UserQuery": format!("{typename}$normalization.graphql"),
                "markdown": "*Zuck*",
            },
        },
    })
}

#[test]
fn matched_branch_reads_as_an_enriched_pointer() {
    let mut env = Environment::builder().build();
    let op = Rc::new(OperationDescriptor::new(
        match_request(),
        vars(&[("id", json!("1"))]),
    ));

    let result = env
        .commit_payload(Rc::clone(&op), &renderer_payload("B"), None)
        .expect("payload commits");

    // The normalizer captured the module import for async resolution.
    assert_eq!(result.module_imports.len(), 1);
    let import = &result.module_imports[0];
    assert_eq!(import.operation_reference, "B$normalization.graphql");
    assert_eq!(import.fragment_name, "B_name");

    // The renderer record carries the suffixed module keys.
    let renderer_id = DataId::from(r#"client:1:nameRenderer(supported:["A","B"])"#);
    let renderer = env
        .store()
        .source()
        .get_record(&renderer_id)
        .expect("renderer record");
    assert_eq!(renderer.typename(), Some("B"));
    assert_eq!(
        renderer.get("__module_component_UserQuery"),
        Some(&FieldValue::Scalar(json!("B.react")))
    );

    // Reader emits the enriched pointer.
    let snapshot = env.lookup(&op.reader_selector(), Some(Rc::clone(&op)));
    assert!(!snapshot.is_missing_data);
    let node = snapshot
        .data
        .as_object()
        .and_then(|o| o.field("node"))
        .and_then(|v| v.as_object())
        .expect("node object");
    let pointer = node
        .field("nameRenderer")
        .and_then(|v| v.as_object())
        .expect("pointer object");
    assert_eq!(pointer.id, Some(renderer_id));
    assert_eq!(pointer.fragment_prop_name.as_deref(), Some("name"));
    assert_eq!(pointer.module_component, Some(json!("B.react")));
    assert!(matches!(
        pointer.fragments.get("B_name"),
        Some(FragmentRef::Pointer(_))
    ));
    assert!(
        pointer.fragment_owner.as_deref() == Some(op.as_ref()),
        "pointer owner is the reading operation"
    );
}

#[test]
fn unsupported_typename_reads_as_an_empty_object() {
    let mut env = Environment::builder().build();
    let op = Rc::new(OperationDescriptor::new(
        match_request(),
        vars(&[("id", json!("1"))]),
    ));

    // "C" has no @module branch: the server sends no module keys, and the
    // reader yields {} without flagging missing data.
    let payload = json!({
        "node": {
            "__typename": "User",
            "id": "1",
            "nameRenderer": {"__typename": "C"},
        },
    });
    let result = env
        .commit_payload(Rc::clone(&op), &payload, None)
        .expect("payload commits");
    assert!(result.module_imports.is_empty());

    let snapshot = env.lookup(&op.reader_selector(), Some(Rc::clone(&op)));
    assert!(!snapshot.is_missing_data);
    let node = snapshot
        .data
        .as_object()
        .and_then(|o| o.field("node"))
        .and_then(|v| v.as_object())
        .expect("node object");
    let empty = node
        .field("nameRenderer")
        .and_then(|v| v.as_object())
        .expect("empty object");
    assert!(empty.is_empty());
}

#[test]
fn resolved_module_fragment_fills_the_captured_branch() {
    let mut env = Environment::builder().build();
    let op = Rc::new(OperationDescriptor::new(
        match_request(),
        vars(&[("id", json!("1"))]),
    ));

    let result = env
        .commit_payload(Rc::clone(&op), &renderer_payload("B"), None)
        .expect("payload commits");
    let import = &result.module_imports[0];

    // The renderer record does not yet hold the branch's data fields.
    let renderer_id = import.data_id.clone();
    assert!(env
        .store()
        .source()
        .get_record(&renderer_id)
        .expect("renderer record")
        .get("markdown")
        .is_none());

    // The loader resolves B$normalization.graphql; the captured branch
    // payload is re-normalized with it.
    let fragment = Rc::new(NormalizationNode {
        name: "B$normalization".into(),
        selections: vec![n_scalar("markdown")],
    });
    env.commit_module_payload(import, fragment)
        .expect("follow-up commits");

    let renderer = env
        .store()
        .source()
        .get_record(&renderer_id)
        .expect("renderer record");
    assert_eq!(
        renderer.get("markdown"),
        Some(&FieldValue::Scalar(json!("*Zuck*")))
    );
}
