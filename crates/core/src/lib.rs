//! ignis-core - Declarative smart-contract deployments.
//!
//! A module declares futures through a [`ModuleBuilder`]. The futures are
//! assembled into a [`DeploymentGraph`], validated against artifacts and chain
//! accounts, lowered into an [`ExecutionGraph`] and finally driven to completion
//! by the [`DeployState`] reducer.

pub mod abi;
pub mod bindings;
pub mod dependencies;
pub mod deployment;
pub mod future;
pub mod graph;
pub mod manifest;
pub mod module;
pub mod plan;
pub mod services;
pub mod transform;
pub mod validation;

pub use bindings::{
    BindingOutput, ContractHandle, DeploymentResult, DeserializeError, ModuleResult, TxHandle,
};
pub use dependencies::extract_dependencies;
pub use deployment::{
    CommandSender, DeployCoordinator, DeployJournal, DeploySnapshot, DeployState,
    DeployStateCommand, GraphHeader, Rejection, RunPhase, VertexStatus, deploy_state_reducer,
};
pub use future::{ArgValue, CallPoint, FutureId, FutureKind, FutureRef, OutputKind};
pub use graph::{
    DeploymentGraph, DeploymentVertex, GraphError, ModuleParams, VertexId, VertexKind,
    build_deployment_graph,
};
pub use manifest::{ModuleManifest, parameter_values};
pub use module::{
    CallOptions, ContractAtOptions, ContractOptions, EventOptions, LibraryOptions, Module, ModuleBuilder,
    SubmoduleOutputs,
};
pub use plan::{Plan, PlanError, plan_module};
pub use services::{
    Artifact, ArtifactDirectory, ArtifactSource, ChainAccounts, Services, StaticAccounts,
};
pub use transform::{
    ExecutionGraph, ExecutionKind, ExecutionVertex, Placeholder, ResolvedArg, StepKind,
    TransformError, transform_deployment_graph,
};
pub use validation::{
    ValidationErrors, ValidationFailure, ValidationReport, ValidationResult,
    validate_deployment_graph,
};
