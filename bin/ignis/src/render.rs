//! Terminal tables for plans and runs.

use comfy_table::{Table, presets::UTF8_FULL};
use ignis_core::{
    BindingOutput, DeployState, ExecutionGraph, ExecutionKind, ValidationFailure, VertexStatus,
};

fn table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(header);
    table
}

fn join_ids(ids: &[usize]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn target(kind: &ExecutionKind) -> String {
    match kind {
        ExecutionKind::DeployContract { contract_name, .. } => contract_name.clone(),
        ExecutionKind::DeployLibrary { library_name, .. } => library_name.clone(),
        ExecutionKind::Call { method, .. } | ExecutionKind::StaticCall { method, .. } => {
            method.clone()
        }
        ExecutionKind::AwaitEvent { event, .. } => event.clone(),
        ExecutionKind::UseExisting { contract_name, .. } => contract_name.clone(),
    }
}

pub fn plan_table(graph: &ExecutionGraph) -> Table {
    let mut table = table(vec!["Id", "Label", "Step", "Target", "Dependencies"]);
    for vertex in graph.vertices.values() {
        table.add_row(vec![
            vertex.id.to_string(),
            vertex.label.clone(),
            vertex.step().to_string(),
            target(&vertex.kind),
            join_ids(&vertex.dependencies),
        ]);
    }
    table
}

fn describe_output(output: &BindingOutput) -> String {
    match output {
        BindingOutput::String(s) => s.clone(),
        BindingOutput::Number(n) => n.to_string(),
        BindingOutput::Contract(contract) => format!("{} at {}", contract.name, contract.address),
        BindingOutput::Tx(tx) => tx.hash.to_string(),
    }
}

fn describe_status(status: &VertexStatus) -> String {
    match status {
        VertexStatus::Unstarted | VertexStatus::Started => String::new(),
        VertexStatus::AwaitingConfirmation { tx } => format!("tx {}", tx.hash),
        VertexStatus::Completed { output, .. } => describe_output(output),
        VertexStatus::Failed { reason } => reason.clone(),
        VertexStatus::Blocked { dependency } => format!("dependency {} did not complete", dependency),
    }
}

pub fn status_table(state: &DeployState) -> Table {
    let mut table = table(vec!["Id", "Label", "Step", "Status", "Detail"]);
    for (id, status) in state.statuses() {
        table.add_row(vec![
            id.to_string(),
            state.label(*id).unwrap_or_default().to_string(),
            state.step(*id).map(|s| s.to_string()).unwrap_or_default(),
            status.name().to_string(),
            describe_status(status),
        ]);
    }
    table
}

pub fn print_failures<'a>(failures: impl IntoIterator<Item = &'a ValidationFailure>) {
    for failure in failures {
        eprintln!("  - {}", failure.describe());
    }
}
