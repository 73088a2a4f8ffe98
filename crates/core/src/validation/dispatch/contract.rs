use crate::{
    abi,
    module::ContractDeployment,
    services::{Artifact, Services},
};

use super::{Check, check_arg_count, check_libraries, check_sender, is_nonzero};

pub(super) fn validate_hardhat(
    deployment: &ContractDeployment,
    services: Services<'_>,
) -> Check {
    if !services.artifacts.has_artifact(&deployment.contract_name) {
        return Err(format!(
            "Artifact for contract '{}' is invalid or missing",
            deployment.contract_name
        ));
    }
    let artifact = services
        .artifacts
        .get_artifact(&deployment.contract_name)
        .map_err(|e| format!("{:#}", e))?;

    validate_artifact(&artifact, deployment, services)
}

pub(super) fn validate_artifact(
    artifact: &Artifact,
    deployment: &ContractDeployment,
    services: Services<'_>,
) -> Check {
    check_sender(deployment.from.as_deref(), services.chain)?;

    if !artifact.has_bytecode() {
        return Err(format!(
            "Artifact for contract '{}' has no bytecode",
            deployment.contract_name
        ));
    }

    check_arg_count(
        &deployment.contract_name,
        abi::constructor_inputs(&artifact.abi).len(),
        deployment.args.len(),
    )?;

    check_libraries(artifact, &deployment.libraries)?;

    if is_nonzero(deployment.value.as_ref()) && !abi::constructor_is_payable(&artifact.abi) {
        return Err(format!(
            "Value sent to the non-payable constructor of {}",
            deployment.contract_name
        ));
    }

    Ok(())
}
