//! The deployment graph: one vertex per executable binding.

mod builder;

use std::collections::BTreeMap;

use alloy_core::json_abi::JsonAbi;
use serde::{Deserialize, Serialize};

pub use builder::build_deployment_graph;

use crate::{
    future::{ArgValue, CallPoint, FutureId, FutureKind, FutureRef, OutputKind, format_call_points},
    module::{CallBinding, ContractDeployment, EventBinding, ExistingContract, LibraryDeployment},
    services::{Artifact, ArtifactSource},
};

/// Graph-local vertex identifier. Ids are assigned in dependency order.
pub type VertexId = usize;

/// Caller-supplied parameter values: module id -> parameter name -> value.
pub type ModuleParams = BTreeMap<String, BTreeMap<String, ArgValue>>;

/// Structural problems found while assembling the graph.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Cyclic dependency detected: {}", format_cycle(.cycle))]
    CyclicGraph {
        cycle: Vec<FutureId>,
        call_points: Vec<CallPoint>,
    },
    #[error("Cannot return future `{future}` of type `{kind}` from module `{module_id}` (output `{output}`)")]
    InvalidModuleOutput {
        module_id: String,
        output: String,
        future: FutureId,
        kind: FutureKind,
    },
    #[error("Missing required parameter `{name}` for module `{module_id}` ({})", format_call_points(.call_points))]
    MissingParameter {
        module_id: String,
        name: String,
        call_points: Vec<CallPoint>,
    },
    #[error("Parameter `{name}` of module `{module_id}` expects a {expected} but was given a {found}")]
    ParameterKind {
        module_id: String,
        name: String,
        expected: OutputKind,
        found: &'static str,
    },
    #[error("Future `{0}` is referenced but was never declared")]
    UnknownFuture(FutureId),
    #[error("Future `{0}` is declared more than once")]
    DuplicateFuture(FutureId),
}

fn format_cycle(cycle: &[FutureId]) -> String {
    cycle
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// The variant-specific payload of a vertex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, strum::IntoStaticStr)]
pub enum VertexKind {
    HardhatContract(ContractDeployment),
    ArtifactContract {
        artifact: Box<Artifact>,
        deployment: ContractDeployment,
    },
    DeployedContract(ExistingContract),
    HardhatLibrary(LibraryDeployment),
    ArtifactLibrary {
        artifact: Box<Artifact>,
        deployment: LibraryDeployment,
    },
    Call(CallBinding),
    Event(EventBinding),
    Proxy { proxied: FutureRef },
}

impl VertexKind {
    pub fn type_name(&self) -> &'static str {
        self.into()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentVertex {
    pub id: VertexId,
    pub future: FutureId,
    pub label: String,
    /// Vertices this one depends on, in first-seen order.
    pub dependencies: Vec<VertexId>,
    pub call_points: Vec<CallPoint>,
    pub kind: VertexKind,
}

/// What a future turned into once the graph was assembled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FutureResolution {
    /// The future is executed by this vertex.
    Vertex(VertexId),
    /// A named argument of the event awaited by this vertex.
    EventParam { vertex: VertexId, param: String },
    /// A parameter, already replaced by its value.
    Literal(ArgValue),
    /// A virtual standing for a group of vertices.
    Group(Vec<VertexId>),
}

impl FutureResolution {
    /// The vertices a dependent has to wait for.
    pub fn vertices(&self) -> Vec<VertexId> {
        match self {
            Self::Vertex(id) | Self::EventParam { vertex: id, .. } => vec![*id],
            Self::Literal(_) => Vec::new(),
            Self::Group(ids) => ids.clone(),
        }
    }
}

/// All bindings of a module, keyed by vertex id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentGraph {
    pub module_id: String,
    pub vertices: BTreeMap<VertexId, DeploymentVertex>,
    /// Declared module outputs.
    pub outputs: BTreeMap<String, VertexId>,
    resolutions: BTreeMap<FutureId, FutureResolution>,
}

impl DeploymentGraph {
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn vertex(&self, id: VertexId) -> Option<&DeploymentVertex> {
        self.vertices.get(&id)
    }

    pub fn resolution(&self, future: &FutureId) -> Option<&FutureResolution> {
        self.resolutions.get(future)
    }

    /// The vertex executing `future`, if it is executed by one.
    pub fn vertex_of(&self, future: &FutureId) -> Option<&DeploymentVertex> {
        match self.resolutions.get(future)? {
            FutureResolution::Vertex(id) => self.vertices.get(id),
            _ => None,
        }
    }

    /// The vertex created for a future, by label.
    pub fn find(&self, label: &str) -> Option<&DeploymentVertex> {
        self.vertices.values().find(|v| v.label == label)
    }

    /// Names of the event parameters other futures read from `vertex`.
    pub fn event_params(&self, vertex: VertexId) -> Vec<&str> {
        self.resolutions
            .values()
            .filter_map(|resolution| match resolution {
                FutureResolution::EventParam { vertex: v, param } if *v == vertex => {
                    Some(param.as_str())
                }
                _ => None,
            })
            .collect()
    }

    /// The ABI of the contract behind `future`, following proxies.
    ///
    /// Returns `None` when the future is not a contract or its artifact is unknown.
    pub fn contract_abi(&self, future: &FutureId, artifacts: &dyn ArtifactSource) -> Option<JsonAbi> {
        let vertex = self.vertex_of(future)?;
        match &vertex.kind {
            VertexKind::HardhatContract(d) => {
                artifacts.get_artifact(&d.contract_name).ok().map(|a| a.abi)
            }
            VertexKind::HardhatLibrary(d) => {
                artifacts.get_artifact(&d.library_name).ok().map(|a| a.abi)
            }
            VertexKind::ArtifactContract { artifact, .. }
            | VertexKind::ArtifactLibrary { artifact, .. } => Some(artifact.abi.clone()),
            VertexKind::DeployedContract(existing) => Some(existing.abi.clone()),
            VertexKind::Proxy { proxied } => self.contract_abi(&proxied.id, artifacts),
            VertexKind::Call(_) | VertexKind::Event(_) => None,
        }
    }

    /// Whether `future` names something a call can target.
    pub fn is_callable(&self, future: &FutureId) -> bool {
        match self.vertex_of(future).map(|v| &v.kind) {
            Some(VertexKind::Proxy { proxied }) => self.is_callable(&proxied.id),
            Some(VertexKind::Call(_) | VertexKind::Event(_)) | None => false,
            Some(_) => true,
        }
    }
}
