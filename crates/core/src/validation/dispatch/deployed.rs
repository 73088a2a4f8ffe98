use crate::{
    future::{ArgValue, OutputKind},
    module::ExistingContract,
    services::Services,
};

use super::Check;

pub(super) fn validate(existing: &ExistingContract, services: Services<'_>) -> Check {
    match &existing.address {
        ArgValue::String(address) if services.chain.is_valid_address(address) => Ok(()),
        ArgValue::String(address) => Err(format!(
            "Invalid address for contract {}: {}",
            existing.contract_name, address
        )),
        // Only known once the producing future has run.
        ArgValue::Future(future) if matches!(future.output, OutputKind::String | OutputKind::Contract) => {
            Ok(())
        }
        other => Err(format!(
            "Address of contract {} must be a string, got {}",
            existing.contract_name,
            other.type_name()
        )),
    }
}
