//! One validator per vertex variant.

mod call;
mod contract;
mod deployed;
mod event;
mod library;
mod proxy;

use std::collections::BTreeMap;

use crate::{
    future::{ArgValue, FutureKind, FutureRef},
    graph::{DeploymentGraph, DeploymentVertex, VertexKind},
    services::{Artifact, ChainAccounts, Services, parse_address},
};

/// Outcome of a single check; the message becomes the failure text.
type Check = Result<(), String>;

pub(super) fn validate_vertex(
    vertex: &DeploymentVertex,
    graph: &DeploymentGraph,
    services: Services<'_>,
) -> Check {
    match &vertex.kind {
        VertexKind::HardhatContract(deployment) => {
            contract::validate_hardhat(deployment, services)
        }
        VertexKind::ArtifactContract {
            artifact,
            deployment,
        } => contract::validate_artifact(artifact, deployment, services),
        VertexKind::DeployedContract(existing) => deployed::validate(existing, services),
        VertexKind::HardhatLibrary(deployment) => library::validate_hardhat(deployment, services),
        VertexKind::ArtifactLibrary {
            artifact,
            deployment,
        } => library::validate_artifact(artifact, deployment, services),
        VertexKind::Call(call) => call::validate(call, graph, services),
        VertexKind::Event(event) => event::validate(vertex.id, event, graph, services),
        VertexKind::Proxy { proxied } => proxy::validate(proxied, graph),
    }
}

/// An explicit sender must be a well-formed address of an available account.
fn check_sender(from: Option<&str>, chain: &dyn ChainAccounts) -> Check {
    let Some(from) = from else {
        return Ok(());
    };
    if !chain.is_valid_address(from) {
        return Err(format!("Invalid address for `from`: {}", from));
    }
    match parse_address(from) {
        Some(address) if chain.has_signer(&address) => Ok(()),
        _ => Err(format!("Account {} for `from` is not available on the chain", from)),
    }
}

fn check_arg_count(name: &str, expected: usize, given: usize) -> Check {
    if expected != given {
        return Err(format!(
            "The constructor of {} expects {} arguments but {} were given",
            name, expected, given
        ));
    }
    Ok(())
}

/// Supplied libraries must match the artifact's link references exactly.
fn check_libraries(artifact: &Artifact, supplied: &BTreeMap<String, FutureRef>) -> Check {
    let required = artifact.required_libraries();

    if let Some(missing) = required.iter().find(|name| !supplied.contains_key(**name)) {
        return Err(format!(
            "Missing library {} required by {}",
            missing, artifact.contract_name
        ));
    }

    if let Some(extra) = supplied.keys().find(|name| !required.contains(&name.as_str())) {
        return Err(format!(
            "Library {} is not linked by {}",
            extra, artifact.contract_name
        ));
    }

    if let Some((name, future)) = supplied
        .iter()
        .find(|(_, future)| !matches!(future.kind, FutureKind::Contract | FutureKind::Library | FutureKind::Proxy))
    {
        return Err(format!(
            "Library {} must be a contract or library future, got {}",
            name, future
        ));
    }

    Ok(())
}

/// Whether a literal value is known to be non-zero.
fn is_nonzero(value: Option<&ArgValue>) -> bool {
    match value {
        Some(ArgValue::Number(n)) => *n != 0,
        Some(ArgValue::String(s)) => {
            let s = s.trim();
            !s.is_empty() && s.trim_start_matches("0x").chars().any(|c| c != '0')
        }
        _ => false,
    }
}
