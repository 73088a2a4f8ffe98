//! Lowering of a validated deployment graph into an execution graph.
//!
//! The execution graph keeps vertex ids and edges. Each vertex becomes a
//! concrete step whose arguments only contain literals and placeholders for the
//! outputs of earlier vertices.

mod arg;
mod lower;

use std::collections::BTreeMap;

use alloy_core::{json_abi::JsonAbi, primitives::Address};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use arg::{Placeholder, ResolvedArg};
pub use lower::transform_deployment_graph;

use crate::{
    future::{FutureId, OutputKind},
    graph::VertexId,
    services::Artifact,
};

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("{label} (vertex {vertex_id}): {position} of type `{expected}` cannot take the `{found}` output of {future}")]
    OutputKindMismatch {
        vertex_id: VertexId,
        label: String,
        position: String,
        expected: String,
        future: FutureId,
        found: OutputKind,
    },
    #[error("{label} (vertex {vertex_id}): module completion {future} cannot be used as a value")]
    VirtualValue {
        vertex_id: VertexId,
        label: String,
        future: FutureId,
    },
    #[error("{label} (vertex {vertex_id}): {message}")]
    Unresolved {
        vertex_id: VertexId,
        label: String,
        message: String,
    },
}

/// The kind of step a vertex executes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum StepKind {
    DeployContract,
    DeployLibrary,
    Call,
    StaticCall,
    AwaitEvent,
    UseExisting,
}

impl StepKind {
    /// Whether the step submits a transaction that must be confirmed.
    pub fn sends_transaction(self) -> bool {
        matches!(self, Self::DeployContract | Self::DeployLibrary | Self::Call)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ExecutionKind {
    DeployContract {
        contract_name: String,
        artifact: Box<Artifact>,
        args: Vec<ResolvedArg>,
        libraries: BTreeMap<String, ResolvedArg>,
        value: Option<ResolvedArg>,
        from: Address,
    },
    DeployLibrary {
        library_name: String,
        artifact: Box<Artifact>,
        args: Vec<ResolvedArg>,
        libraries: BTreeMap<String, ResolvedArg>,
        from: Address,
    },
    Call {
        contract: ResolvedArg,
        /// Full function signature, e.g. `setAddress(address)`.
        method: String,
        args: Vec<ResolvedArg>,
        value: Option<ResolvedArg>,
        from: Address,
    },
    StaticCall {
        contract: ResolvedArg,
        method: String,
        args: Vec<ResolvedArg>,
        from: Address,
    },
    AwaitEvent {
        emitter: ResolvedArg,
        event: String,
        args: Vec<ResolvedArg>,
    },
    UseExisting {
        contract_name: String,
        address: ResolvedArg,
        abi: JsonAbi,
    },
}

impl ExecutionKind {
    pub fn step(&self) -> StepKind {
        match self {
            Self::DeployContract { .. } => StepKind::DeployContract,
            Self::DeployLibrary { .. } => StepKind::DeployLibrary,
            Self::Call { .. } => StepKind::Call,
            Self::StaticCall { .. } => StepKind::StaticCall,
            Self::AwaitEvent { .. } => StepKind::AwaitEvent,
            Self::UseExisting { .. } => StepKind::UseExisting,
        }
    }

    /// Every placeholder the step reads.
    pub fn placeholders(&self) -> Vec<&Placeholder> {
        let mut args: Vec<&ResolvedArg> = Vec::new();
        match self {
            Self::DeployContract {
                args: a,
                libraries,
                value,
                ..
            } => {
                args.extend(a);
                args.extend(libraries.values());
                args.extend(value);
            }
            Self::DeployLibrary {
                args: a, libraries, ..
            } => {
                args.extend(a);
                args.extend(libraries.values());
            }
            Self::Call {
                contract,
                args: a,
                value,
                ..
            } => {
                args.push(contract);
                args.extend(a);
                args.extend(value);
            }
            Self::StaticCall {
                contract, args: a, ..
            } => {
                args.push(contract);
                args.extend(a);
            }
            Self::AwaitEvent {
                emitter, args: a, ..
            } => {
                args.push(emitter);
                args.extend(a);
            }
            Self::UseExisting { address, .. } => args.push(address),
        }
        args.into_iter().flat_map(ResolvedArg::placeholders).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionVertex {
    pub id: VertexId,
    pub label: String,
    pub future: FutureId,
    pub dependencies: Vec<VertexId>,
    pub kind: ExecutionKind,
}

impl ExecutionVertex {
    pub fn step(&self) -> StepKind {
        self.kind.step()
    }
}

/// The lowered, ready-to-run form of a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionGraph {
    pub module_id: String,
    pub vertices: BTreeMap<VertexId, ExecutionVertex>,
    pub outputs: BTreeMap<String, VertexId>,
}

impl ExecutionGraph {
    pub fn vertex(&self, id: VertexId) -> Option<&ExecutionVertex> {
        self.vertices.get(&id)
    }

    /// Compute a SHA-256 hash of the serialized graph.
    ///
    /// Maps are ordered, so the same graph always hashes the same.
    pub fn compute_hash(&self) -> Result<String> {
        let json = serde_json::to_string(self).context("Failed to serialize execution graph")?;

        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }
}
