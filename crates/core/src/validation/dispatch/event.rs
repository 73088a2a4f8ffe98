use crate::{abi, graph::{DeploymentGraph, VertexId}, module::EventBinding, services::Services};

use super::Check;

pub(super) fn validate(
    vertex: VertexId,
    event: &EventBinding,
    graph: &DeploymentGraph,
    services: Services<'_>,
) -> Check {
    let emitter_abi = graph
        .contract_abi(&event.emitter.id, services.artifacts)
        .ok_or_else(|| format!("Event emitter {} is not a contract", event.emitter))?;

    let definition = abi::find_event(&emitter_abi, &event.event).ok_or_else(|| {
        format!(
            "Contract '{}' doesn't have an event {}",
            event.emitter.id.local_id, event.event
        )
    })?;

    if event.args.len() > definition.inputs.len() {
        return Err(format!(
            "Event {} has {} arguments but {} filters were given",
            event.event,
            definition.inputs.len(),
            event.args.len()
        ));
    }

    for param in graph.event_params(vertex) {
        if !definition.inputs.iter().any(|input| input.name == param) {
            return Err(format!(
                "Event {} doesn't have a parameter named {}",
                event.event, param
            ));
        }
    }

    Ok(())
}
