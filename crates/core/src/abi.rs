//! ABI lookups shared by validation and lowering.

use alloy_core::json_abi::{Event, Function, JsonAbi, Param, StateMutability};

/// Constructor inputs; a contract without a constructor takes no arguments.
pub fn constructor_inputs(abi: &JsonAbi) -> &[Param] {
    abi.constructor
        .as_ref()
        .map(|c| c.inputs.as_slice())
        .unwrap_or(&[])
}

pub fn constructor_is_payable(abi: &JsonAbi) -> bool {
    abi.constructor
        .as_ref()
        .is_some_and(|c| c.state_mutability == StateMutability::Payable)
}

/// Every overload matching `method`, which is either a bare name or a full
/// signature such as `setAddress(address)`.
pub fn functions_named<'a>(abi: &'a JsonAbi, method: &str) -> Vec<&'a Function> {
    match method.split_once('(') {
        Some((name, _)) => abi
            .function(name)
            .map(|overloads| {
                overloads
                    .iter()
                    .filter(|f| f.signature() == method)
                    .collect()
            })
            .unwrap_or_default(),
        None => abi
            .function(method)
            .map(|overloads| overloads.iter().collect())
            .unwrap_or_default(),
    }
}

/// Why no single overload could be picked for a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverloadError {
    /// No overload takes the given number of arguments.
    Arity,
    /// Several overloads take the given number of arguments. Holds their signatures.
    Ambiguous(Vec<String>),
}

/// The single overload of `method` taking `arg_count` arguments.
///
/// A bare name matching several overloads of the same arity is ambiguous; the
/// caller has to spell out the full signature instead.
pub fn find_function<'a>(
    abi: &'a JsonAbi,
    method: &str,
    arg_count: usize,
) -> Result<&'a Function, OverloadError> {
    let matching: Vec<&Function> = functions_named(abi, method)
        .into_iter()
        .filter(|f| f.inputs.len() == arg_count)
        .collect();

    match matching.as_slice() {
        [] => Err(OverloadError::Arity),
        [function] => Ok(*function),
        several => Err(OverloadError::Ambiguous(
            several.iter().map(|f| f.signature()).collect(),
        )),
    }
}

/// The event matching a bare name or full signature.
pub fn find_event<'a>(abi: &'a JsonAbi, event: &str) -> Option<&'a Event> {
    match event.split_once('(') {
        Some((name, _)) => abi
            .event(name)
            .and_then(|overloads| overloads.iter().find(|e| e.signature() == event)),
        None => abi.event(event).and_then(|overloads| overloads.first()),
    }
}

/// Whether calling `function` changes chain state.
pub fn is_state_mutating(function: &Function) -> bool {
    matches!(
        function.state_mutability,
        StateMutability::NonPayable | StateMutability::Payable
    )
}
