use crate::{future::FutureRef, graph::DeploymentGraph};

use super::Check;

pub(super) fn validate(proxied: &FutureRef, graph: &DeploymentGraph) -> Check {
    if !graph.is_callable(&proxied.id) {
        return Err(format!("Proxied future {} is not a contract", proxied));
    }
    Ok(())
}
