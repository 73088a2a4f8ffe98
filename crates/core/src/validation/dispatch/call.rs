use crate::{abi, graph::DeploymentGraph, module::CallBinding, services::Services};

use super::{Check, check_sender, is_nonzero};

pub(super) fn validate(call: &CallBinding, graph: &DeploymentGraph, services: Services<'_>) -> Check {
    check_sender(call.from.as_deref(), services.chain)?;

    if !graph.is_callable(&call.contract.id) {
        return Err(format!(
            "Cannot call {} on {}: not a contract",
            call.method, call.contract
        ));
    }

    let contract_abi = graph
        .contract_abi(&call.contract.id, services.artifacts)
        .ok_or_else(|| format!("Artifact for {} is invalid or missing", call.contract.id))?;

    let overloads = abi::functions_named(&contract_abi, &call.method);
    if overloads.is_empty() {
        return Err(format!(
            "Contract '{}' doesn't have a function {}",
            call.contract.id.local_id, call.method
        ));
    }

    let function = abi::find_function(&contract_abi, &call.method, call.args.len()).map_err(|err| match err {
        abi::OverloadError::Arity => {
            let expected: Vec<String> = overloads.iter().map(|f| f.inputs.len().to_string()).collect();
            format!(
                "Function {} in contract {} expects {} arguments but {} were given",
                call.method,
                call.contract.id.local_id,
                expected.join(" or "),
                call.args.len()
            )
        }
        abi::OverloadError::Ambiguous(signatures) => format!(
            "Function {} in contract {} is overloaded; use the full signature, one of {}",
            call.method,
            call.contract.id.local_id,
            signatures.join(", ")
        ),
    })?;

    if is_nonzero(call.value.as_ref()) && function.state_mutability != alloy_core::json_abi::StateMutability::Payable {
        return Err(format!(
            "Function {} in contract {} is not payable but a value was sent",
            call.method, call.contract.id.local_id
        ));
    }

    Ok(())
}
