//! The full pipeline from module to execution graph.

use crate::{
    graph::{DeploymentGraph, GraphError, ModuleParams, build_deployment_graph},
    module::Module,
    services::Services,
    transform::{ExecutionGraph, TransformError, transform_deployment_graph},
    validation::{ValidationErrors, ValidationReport, validate_deployment_graph},
};

/// The first stage that rejected a module.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Validation(#[from] ValidationErrors),
    #[error(transparent)]
    Transform(#[from] TransformError),
}

/// Every intermediate product of planning a module.
#[derive(Debug, Clone)]
pub struct Plan {
    pub graph: DeploymentGraph,
    pub validation: ValidationReport,
    pub execution: ExecutionGraph,
}

/// Build, validate and lower `module`.
///
/// Validation failures are all reported together; transformation only runs on
/// a fully valid graph.
pub fn plan_module(
    module: &Module,
    params: &ModuleParams,
    services: Services<'_>,
) -> Result<Plan, PlanError> {
    let graph = build_deployment_graph(module, params)?;

    let validation = validate_deployment_graph(&graph, services);
    validation.clone().into_result()?;

    let execution = transform_deployment_graph(&graph, services)?;

    tracing::info!(
        module_id = %module.id,
        vertices = execution.vertices.len(),
        outputs = execution.outputs.len(),
        "Planned deployment"
    );

    Ok(Plan {
        graph,
        validation,
        execution,
    })
}
