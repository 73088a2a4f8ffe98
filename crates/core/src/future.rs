//! Future handles and the argument expression model.
//!
//! A module definition never manipulates concrete on-chain values. It produces
//! [`FutureRef`] handles that stand for values which only exist once the
//! deployment has run, and embeds them inside [`ArgValue`] trees wherever a
//! constructor or call argument needs them.

use std::{collections::BTreeMap, fmt, panic::Location};

use alloy_core::primitives::Address;
use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Stable identity of a future: the module that declared it plus a local id.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
#[display("{module_id}:{local_id}")]
pub struct FutureId {
    pub module_id: String,
    pub local_id: String,
}

impl FutureId {
    pub fn new(module_id: impl Into<String>, local_id: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            local_id: local_id.into(),
        }
    }
}

/// The kind of value a future resolves to once executed.
///
/// The string forms are part of the serialized result format and must not change.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OutputKind {
    String,
    Number,
    Contract,
    Tx,
}

/// The variant of a future.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum FutureKind {
    Contract,
    Library,
    Call,
    Event,
    EventParam,
    Proxy,
    Parameter,
    Virtual,
}

/// A handle on a future declared by a module.
///
/// Handles are cheap to clone and carry everything a consumer needs to type-check
/// a use site without looking at the declaring module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FutureRef {
    pub id: FutureId,
    pub kind: FutureKind,
    pub output: OutputKind,
}

impl FutureRef {
    /// Whether this future may be returned from a module.
    pub fn is_deployable(&self) -> bool {
        matches!(self.kind, FutureKind::Contract | FutureKind::Library)
    }
}

impl fmt::Display for FutureRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.kind)
    }
}

/// An argument expression.
///
/// This is a closed model: a literal scalar, an ordered sequence, a keyed
/// structure or a reference to another future. Keyed structures iterate in key
/// order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum ArgValue {
    Null,
    Bool(bool),
    Number(i64),
    String(String),
    Sequence(Vec<ArgValue>),
    Struct(BTreeMap<String, ArgValue>),
    Future(FutureRef),
}

impl ArgValue {
    /// Build a sequence from anything convertible into argument values.
    pub fn seq<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<ArgValue>,
    {
        Self::Sequence(items.into_iter().map(Into::into).collect())
    }

    /// Build a keyed structure.
    pub fn structure<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<ArgValue>,
    {
        Self::Struct(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_future(&self) -> Option<&FutureRef> {
        match self {
            Self::Future(f) => Some(f),
            _ => None,
        }
    }

    /// Short name of the variant, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Sequence(_) => "sequence",
            Self::Struct(_) => "struct",
            Self::Future(_) => "future",
        }
    }
}

impl From<bool> for ArgValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ArgValue {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Address> for ArgValue {
    fn from(value: Address) -> Self {
        Self::String(value.to_checksum(None))
    }
}

impl From<FutureRef> for ArgValue {
    fn from(value: FutureRef) -> Self {
        Self::Future(value)
    }
}

impl From<&FutureRef> for ArgValue {
    fn from(value: &FutureRef) -> Self {
        Self::Future(value.clone())
    }
}

impl From<Vec<ArgValue>> for ArgValue {
    fn from(value: Vec<ArgValue>) -> Self {
        Self::Sequence(value)
    }
}

impl From<BTreeMap<String, ArgValue>> for ArgValue {
    fn from(value: BTreeMap<String, ArgValue>) -> Self {
        Self::Struct(value)
    }
}

impl<T: Into<ArgValue>> From<Option<T>> for ArgValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

/// One location in the chain of declarations that produced a future.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Display)]
#[display("{module_id} at {location}")]
pub struct CallPoint {
    pub module_id: String,
    pub location: String,
}

impl CallPoint {
    pub fn new(module_id: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            location: location.into(),
        }
    }

    pub(crate) fn from_caller(module_id: &str, caller: &Location<'_>) -> Self {
        Self::new(
            module_id,
            format!("{}:{}:{}", caller.file(), caller.line(), caller.column()),
        )
    }
}

/// Render a call-site trace, outermost declaration first.
pub fn format_call_points(points: &[CallPoint]) -> String {
    points
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}
