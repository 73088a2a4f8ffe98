//! Concrete values produced by executed futures and their serialized form.
//!
//! Module results are stored as `{"_kind": "<kind>", "value": ...}` objects.
//! Other tooling reads these files, so the tag names are fixed.

use std::collections::BTreeMap;

use alloy_core::{
    json_abi::JsonAbi,
    primitives::{Address, B256},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::future::OutputKind;

/// A deployed contract as seen by dependents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractHandle {
    pub name: String,
    pub address: Address,
    #[serde(default)]
    pub abi: JsonAbi,
}

/// A mined transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHandle {
    pub hash: B256,
}

/// The resolved value of a future.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "_kind", content = "value", rename_all = "lowercase")]
pub enum BindingOutput {
    String(String),
    Number(i64),
    Contract(ContractHandle),
    Tx(TxHandle),
}

/// Failure to read back a stored binding output.
#[derive(Debug, thiserror::Error)]
pub enum DeserializeError {
    #[error("value is null")]
    Null,
    #[error("value was not serialized by ignis: missing `_kind` tag")]
    MissingTag,
    #[error("unknown binding kind `{0}`")]
    UnknownKind(String),
    #[error("expected a `{expected}` binding output but found `{found}`")]
    KindMismatch {
        expected: OutputKind,
        found: OutputKind,
    },
    #[error("malformed `{kind}` binding output: {source}")]
    Malformed {
        kind: OutputKind,
        #[source]
        source: serde_json::Error,
    },
}

impl BindingOutput {
    pub fn kind(&self) -> OutputKind {
        match self {
            Self::String(_) => OutputKind::String,
            Self::Number(_) => OutputKind::Number,
            Self::Contract(_) => OutputKind::Contract,
            Self::Tx(_) => OutputKind::Tx,
        }
    }

    pub fn serialize_value(&self) -> Value {
        // A tagged enum of plain data always has a JSON representation.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Read a stored output, requiring a recognised `_kind` tag.
    pub fn deserialize_value(value: &Value) -> Result<Self, DeserializeError> {
        let object = match value {
            Value::Null => return Err(DeserializeError::Null),
            Value::Object(object) => object,
            _ => return Err(DeserializeError::MissingTag),
        };

        let kind = object
            .get("_kind")
            .and_then(Value::as_str)
            .ok_or(DeserializeError::MissingTag)?;
        let kind: OutputKind = kind
            .parse()
            .map_err(|_| DeserializeError::UnknownKind(kind.to_string()))?;

        serde_json::from_value(value.clone())
            .map_err(|source| DeserializeError::Malformed { kind, source })
    }

    /// Read a stored output whose kind is known at the use site.
    pub fn deserialize_expecting(
        value: &Value,
        expected: OutputKind,
    ) -> Result<Self, DeserializeError> {
        let output = Self::deserialize_value(value)?;
        if output.kind() != expected {
            return Err(DeserializeError::KindMismatch {
                expected,
                found: output.kind(),
            });
        }
        Ok(output)
    }
}

/// Outputs of one module, keyed by declared output name.
pub type ModuleResult = BTreeMap<String, BindingOutput>;

/// Outputs of every module of a deployment, keyed by module id.
pub type DeploymentResult = BTreeMap<String, ModuleResult>;

#[cfg(test)]
mod tests {
    use super::*;

    fn contract() -> BindingOutput {
        BindingOutput::Contract(ContractHandle {
            name: "Bar".to_string(),
            address: Address::repeat_byte(0x11),
            abi: JsonAbi::default(),
        })
    }

    #[test]
    fn test_round_trip_every_kind() {
        let outputs = vec![
            BindingOutput::String("hello".to_string()),
            BindingOutput::Number(42),
            contract(),
            BindingOutput::Tx(TxHandle {
                hash: B256::repeat_byte(0xab),
            }),
        ];

        for output in outputs {
            let value = output.serialize_value();
            let back = BindingOutput::deserialize_value(&value).unwrap();
            assert_eq!(back, output);
        }
    }

    #[test]
    fn test_kind_tag_names() {
        let value = BindingOutput::Number(1).serialize_value();
        assert_eq!(value, serde_json::json!({ "_kind": "number", "value": 1 }));

        let value = contract().serialize_value();
        assert_eq!(value["_kind"], "contract");
    }

    #[test]
    fn test_missing_tag_is_rejected() {
        let err = BindingOutput::deserialize_value(&serde_json::json!({ "value": 1 }))
            .unwrap_err();
        assert!(matches!(err, DeserializeError::MissingTag));

        let err = BindingOutput::deserialize_value(&Value::Null).unwrap_err();
        assert!(matches!(err, DeserializeError::Null));

        let err = BindingOutput::deserialize_value(&serde_json::json!("0x00")).unwrap_err();
        assert!(matches!(err, DeserializeError::MissingTag));
    }

    #[test]
    fn test_foreign_tag_is_rejected() {
        let err = BindingOutput::deserialize_value(&serde_json::json!({
            "_kind": "bigint",
            "value": "1"
        }))
        .unwrap_err();
        assert!(matches!(err, DeserializeError::UnknownKind(kind) if kind == "bigint"));
    }

    #[test]
    fn test_expected_kind_is_enforced() {
        let value = BindingOutput::String("0x00".to_string()).serialize_value();
        let err = BindingOutput::deserialize_expecting(&value, OutputKind::Contract).unwrap_err();
        assert!(matches!(
            err,
            DeserializeError::KindMismatch {
                expected: OutputKind::Contract,
                found: OutputKind::String
            }
        ));

        assert!(BindingOutput::deserialize_expecting(&value, OutputKind::String).is_ok());
    }
}
