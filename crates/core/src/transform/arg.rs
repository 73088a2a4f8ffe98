//! Argument values with future references replaced by placeholders.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{future::OutputKind, graph::VertexId};

/// Stands for the runtime output of a completed vertex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placeholder {
    pub vertex: VertexId,
    pub output: OutputKind,
    /// Event argument to read, for event parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// A fully lowered argument: literals plus placeholders, nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum ResolvedArg {
    Null,
    Bool(bool),
    Number(i64),
    String(String),
    Sequence(Vec<ResolvedArg>),
    Struct(BTreeMap<String, ResolvedArg>),
    Placeholder(Placeholder),
}

impl ResolvedArg {
    /// Every placeholder inside this argument, depth first.
    pub fn placeholders(&self) -> Vec<&Placeholder> {
        let mut found = Vec::new();
        self.collect_placeholders(&mut found);
        found
    }

    fn collect_placeholders<'a>(&'a self, found: &mut Vec<&'a Placeholder>) {
        match self {
            Self::Placeholder(p) => found.push(p),
            Self::Sequence(items) => items.iter().for_each(|i| i.collect_placeholders(found)),
            Self::Struct(fields) => fields.values().for_each(|f| f.collect_placeholders(found)),
            Self::Null | Self::Bool(_) | Self::Number(_) | Self::String(_) => {}
        }
    }

    /// Produce a JSON value, asking `lookup` for each placeholder.
    ///
    /// Returns `None` as soon as a placeholder cannot be resolved.
    pub fn substitute<F>(&self, lookup: &mut F) -> Option<Value>
    where
        F: FnMut(&Placeholder) -> Option<Value>,
    {
        Some(match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::from(*n),
            Self::String(s) => Value::String(s.clone()),
            Self::Sequence(items) => Value::Array(
                items
                    .iter()
                    .map(|i| i.substitute(lookup))
                    .collect::<Option<Vec<_>>>()?,
            ),
            Self::Struct(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| v.substitute(lookup).map(|v| (k.clone(), v)))
                    .collect::<Option<serde_json::Map<_, _>>>()?,
            ),
            Self::Placeholder(p) => lookup(p)?,
        })
    }
}

/// Whether a future of kind `output` may fill an ABI slot of type `ty`.
///
/// An empty type means the slot is not constrained. String outputs are
/// opaque (parameters, event arguments) and are checked when encoded.
pub(crate) fn accepts(ty: &str, output: OutputKind) -> bool {
    if ty.is_empty() || output == OutputKind::String {
        return true;
    }
    match ty {
        "address" => output == OutputKind::Contract,
        t if t.starts_with("uint") || t.starts_with("int") => output == OutputKind::Number,
        t if t.starts_with("bytes") => output == OutputKind::Tx,
        _ => false,
    }
}

/// The element type of an array type such as `address[]` or `uint8[3]`.
pub(crate) fn element_type(ty: &str) -> Option<&str> {
    if !ty.ends_with(']') {
        return None;
    }
    ty.rfind('[').map(|i| &ty[..i])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts() {
        assert!(accepts("address", OutputKind::Contract));
        assert!(accepts("address", OutputKind::String));
        assert!(!accepts("address", OutputKind::Tx));
        assert!(!accepts("address", OutputKind::Number));
        assert!(accepts("uint256", OutputKind::Number));
        assert!(accepts("int8", OutputKind::Number));
        assert!(accepts("bytes32", OutputKind::Tx));
        assert!(!accepts("string", OutputKind::Number));
        assert!(accepts("", OutputKind::Tx));
    }

    #[test]
    fn test_element_type() {
        assert_eq!(element_type("address[]"), Some("address"));
        assert_eq!(element_type("uint8[3]"), Some("uint8"));
        assert_eq!(element_type("uint8[3][]"), Some("uint8[3]"));
        assert_eq!(element_type("tuple"), None);
    }

    #[test]
    fn test_substitute() {
        let arg = ResolvedArg::Sequence(vec![
            ResolvedArg::Number(1),
            ResolvedArg::Placeholder(Placeholder {
                vertex: 0,
                output: OutputKind::Contract,
                field: None,
            }),
        ]);
        assert_eq!(arg.placeholders().len(), 1);

        let value = arg.substitute(&mut |p| Some(Value::from(format!("vertex-{}", p.vertex))));
        assert_eq!(value, Some(serde_json::json!([1, "vertex-0"])));
        assert_eq!(arg.substitute(&mut |_| None), None);
    }
}
