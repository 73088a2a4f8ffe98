use crate::{
    abi,
    module::LibraryDeployment,
    services::{Artifact, Services},
};

use super::{Check, check_arg_count, check_libraries, check_sender};

pub(super) fn validate_hardhat(deployment: &LibraryDeployment, services: Services<'_>) -> Check {
    check_sender(deployment.from.as_deref(), services.chain)?;

    if !services.artifacts.has_artifact(&deployment.library_name) {
        return Err(format!(
            "Artifact for library '{}' is invalid or missing",
            deployment.library_name
        ));
    }
    let artifact = services
        .artifacts
        .get_artifact(&deployment.library_name)
        .map_err(|e| format!("{:#}", e))?;

    validate_artifact(&artifact, deployment, services)
}

pub(super) fn validate_artifact(
    artifact: &Artifact,
    deployment: &LibraryDeployment,
    services: Services<'_>,
) -> Check {
    check_sender(deployment.from.as_deref(), services.chain)?;

    check_arg_count(
        &deployment.library_name,
        abi::constructor_inputs(&artifact.abi).len(),
        deployment.args.len(),
    )?;

    check_libraries(artifact, &deployment.libraries)
}
