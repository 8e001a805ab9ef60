// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Field arguments and canonical storage keys.
//!
//! A *storage key* is the canonical textual identity of a field occurrence
//! within a record: the field name alone when the field takes no arguments,
//! otherwise `name(arg1:v1,arg2:v2,…)` with argument names sorted ascending
//! and values rendered as stable JSON (object keys sorted, no whitespace).
//! Every component that touches records (normalizer, reader, proxies,
//! checker) derives keys through this module so the forms can never drift.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Variables supplied alongside an operation.
///
/// `BTreeMap` keeps iteration (and therefore rendered equality) stable.
pub type Variables = BTreeMap<String, JsonValue>;

/// Fully evaluated argument values, keyed by argument name.
pub type ConcreteArguments = BTreeMap<String, JsonValue>;

/// A compiled argument value: either a literal constant or a reference to an
/// operation variable resolved at evaluation time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ArgumentValue {
    /// Constant value baked in by the compiler.
    Literal(JsonValue),
    /// Reference to a variable by name. An unbound variable evaluates to
    /// JSON `null`.
    Variable(String),
}

/// A named argument on a field or directive.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    /// Argument name as written in the document.
    pub name: String,
    /// Compiled value.
    pub value: ArgumentValue,
}

impl Argument {
    /// Convenience constructor for a literal argument.
    pub fn literal(name: impl Into<String>, value: JsonValue) -> Self {
        Self {
            name: name.into(),
            value: ArgumentValue::Literal(value),
        }
    }

    /// Convenience constructor for a variable argument.
    pub fn variable(name: impl Into<String>, variable: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: ArgumentValue::Variable(variable.into()),
        }
    }
}

/// A `@__clientField(handle, key, filters)` annotation on a field.
///
/// The handle names an installed handler; `key` disambiguates multiple
/// handles on the same field; `filters` selects which argument names
/// participate in the derived storage key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldHandle {
    /// Handler name, resolved against the handler registry at publish time.
    pub handle: String,
    /// Optional discriminator; empty means the default handle for the field.
    pub key: String,
    /// Argument names retained in the handle storage key. `None` drops all
    /// arguments from the derived key.
    pub filters: Option<Vec<String>>,
}

/// Evaluates compiled arguments against `variables` into concrete values.
///
/// Unbound variables evaluate to JSON `null`; the caller decides whether that
/// is meaningful (conditions treat it as false, storage keys render it).
pub fn evaluate_arguments(args: &[Argument], variables: &Variables) -> ConcreteArguments {
    args.iter()
        .map(|arg| {
            let value = match &arg.value {
                ArgumentValue::Literal(v) => v.clone(),
                ArgumentValue::Variable(name) => {
                    variables.get(name).cloned().unwrap_or(JsonValue::Null)
                }
            };
            (arg.name.clone(), value)
        })
        .collect()
}

/// Computes the canonical storage key for a field occurrence.
pub fn storage_key(name: &str, args: &[Argument], variables: &Variables) -> String {
    if args.is_empty() {
        return name.to_owned();
    }
    storage_key_concrete(name, &evaluate_arguments(args, variables))
}

/// Computes the canonical storage key from already-evaluated arguments.
///
/// `ConcreteArguments` is a sorted map, so rendering in iteration order
/// yields the canonical ascending argument order for free.
pub fn storage_key_concrete(name: &str, args: &ConcreteArguments) -> String {
    if args.is_empty() {
        return name.to_owned();
    }
    let mut out = String::with_capacity(name.len() + 16);
    out.push_str(name);
    out.push('(');
    for (i, (arg_name, value)) in args.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(arg_name);
        out.push(':');
        out.push_str(&stable_json(value));
    }
    out.push(')');
    out
}

/// Derives the record key a handle writes under: `__{key}_{handle}`, falling
/// back to the field name when `key` is empty.
pub fn handle_key(handle: &str, key: &str, field_name: &str) -> String {
    if key.is_empty() {
        format!("__{field_name}_{handle}")
    } else {
        format!("__{key}_{handle}")
    }
}

/// Computes the storage key a handle's output occupies.
///
/// The base name is [`handle_key`]; arguments are retained only when the
/// handle declares `filters`, and then only the named ones. A handle without
/// filters collapses every argument combination of the underlying field into
/// a single derived key.
pub fn handle_storage_key(
    handle: &FieldHandle,
    field_name: &str,
    args: &[Argument],
    variables: &Variables,
) -> String {
    let name = handle_key(&handle.handle, &handle.key, field_name);
    let Some(filters) = &handle.filters else {
        return name;
    };
    let filtered: ConcreteArguments = evaluate_arguments(args, variables)
        .into_iter()
        .filter(|(arg_name, _)| filters.iter().any(|f| f == arg_name))
        .collect();
    storage_key_concrete(&name, &filtered)
}

/// Renders a JSON value in stable form: object keys sorted ascending, no
/// whitespace. `serde_json`'s default map is BTree-backed, so nested objects
/// sort without extra work; this function re-sorts defensively in case the
/// value was built with a preserve-order map.
fn stable_json(value: &JsonValue) -> String {
    match value {
        JsonValue::Object(map) => {
            let mut sorted: Vec<(&String, &JsonValue)> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = String::from("{");
            for (i, (k, v)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&JsonValue::String(k.clone()).to_string());
                out.push(':');
                out.push_str(&stable_json(v));
            }
            out.push('}');
            out
        }
        JsonValue::Array(items) => {
            let mut out = String::from("[");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&stable_json(item));
            }
            out.push(']');
            out
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn storage_key_without_arguments_is_the_field_name() {
        let vars = Variables::new();
        assert_eq!(storage_key("name", &[], &vars), "name");
    }

    #[test]
    fn storage_key_sorts_argument_names() {
        let vars = Variables::new();
        let args = vec![
            Argument::literal("last", json!(10)),
            Argument::literal("after", json!("cursor")),
        ];
        assert_eq!(
            storage_key("friends", &args, &vars),
            r#"friends(after:"cursor",last:10)"#
        );
    }

    #[test]
    fn storage_key_resolves_variables_and_renders_stable_json() {
        let mut vars = Variables::new();
        vars.insert("ids".into(), json!(["A", "B"]));
        let args = vec![Argument::variable("supported", "ids")];
        assert_eq!(
            storage_key("nameRenderer", &args, &vars),
            r#"nameRenderer(supported:["A","B"])"#
        );
    }

    #[test]
    fn unbound_variable_renders_null() {
        let vars = Variables::new();
        let args = vec![Argument::variable("id", "missing")];
        assert_eq!(storage_key("node", &args, &vars), "node(id:null)");
    }

    #[test]
    fn object_arguments_sort_keys() {
        let vars = Variables::new();
        let args = vec![Argument::literal("where", json!({"b": 1, "a": 2}))];
        assert_eq!(
            storage_key("search", &args, &vars),
            r#"search(where:{"a":2,"b":1})"#
        );
    }

    #[test]
    fn handle_key_falls_back_to_field_name() {
        assert_eq!(handle_key("friendsName", "", "name"), "__name_friendsName");
        assert_eq!(handle_key("conn", "best", "friends"), "__best_conn");
    }

    #[test]
    fn handle_storage_key_applies_filters() {
        let vars = Variables::new();
        let args = vec![
            Argument::literal("first", json!(5)),
            Argument::literal("orderby", json!("name")),
        ];
        let no_filters = FieldHandle {
            handle: "connection".into(),
            key: String::new(),
            filters: None,
        };
        assert_eq!(
            handle_storage_key(&no_filters, "friends", &args, &vars),
            "__friends_connection"
        );

        let filtered = FieldHandle {
            handle: "connection".into(),
            key: String::new(),
            filters: Some(vec!["orderby".into()]),
        };
        assert_eq!(
            handle_storage_key(&filtered, "friends", &args, &vars),
            r#"__friends_connection(orderby:"name")"#
        );
    }
}
