//! Per-vertex validation against artifacts and chain accounts.
//!
//! Every vertex is checked independently and every result is kept, so one pass
//! reports all problems in the graph.

mod dispatch;

use std::collections::BTreeMap;

use serde::Serialize;

use crate::{
    future::{CallPoint, format_call_points},
    graph::{DeploymentGraph, VertexId},
    services::Services,
};

/// Why a single vertex failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{label} (vertex {vertex_id}): {message}")]
pub struct ValidationFailure {
    pub vertex_id: VertexId,
    pub label: String,
    pub message: String,
    pub call_points: Vec<CallPoint>,
}

impl ValidationFailure {
    /// The failure with its call-site trace appended.
    pub fn describe(&self) -> String {
        if self.call_points.is_empty() {
            self.to_string()
        } else {
            format!("{}\n    at {}", self, format_call_points(&self.call_points))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationResult {
    Success,
    Failure(ValidationFailure),
}

/// Every failure of a validation pass.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Validation failed for {} vertices: {}", .0.len(), format_failures(.0))]
pub struct ValidationErrors(pub Vec<ValidationFailure>);

fn format_failures(failures: &[ValidationFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// The outcome of validating a whole graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub results: BTreeMap<VertexId, ValidationResult>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ValidationFailure> {
        self.results.values().filter_map(|result| match result {
            ValidationResult::Success => None,
            ValidationResult::Failure(failure) => Some(failure),
        })
    }

    pub fn into_result(self) -> Result<(), ValidationErrors> {
        let failures: Vec<ValidationFailure> = self
            .results
            .into_values()
            .filter_map(|result| match result {
                ValidationResult::Success => None,
                ValidationResult::Failure(failure) => Some(failure),
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors(failures))
        }
    }
}

/// Validate every vertex of `graph`.
pub fn validate_deployment_graph(graph: &DeploymentGraph, services: Services<'_>) -> ValidationReport {
    let results: BTreeMap<VertexId, ValidationResult> = graph
        .vertices
        .values()
        .map(|vertex| {
            let result = match dispatch::validate_vertex(vertex, graph, services) {
                Ok(()) => ValidationResult::Success,
                Err(message) => {
                    tracing::warn!(
                        vertex_id = vertex.id,
                        label = %vertex.label,
                        error = %message,
                        "Vertex failed validation"
                    );
                    ValidationResult::Failure(ValidationFailure {
                        vertex_id: vertex.id,
                        label: vertex.label.clone(),
                        message,
                        call_points: vertex.call_points.clone(),
                    })
                }
            };
            (vertex.id, result)
        })
        .collect();

    let report = ValidationReport { results };
    tracing::debug!(
        module_id = %graph.module_id,
        vertices = graph.len(),
        failures = report.failures().count(),
        "Validated deployment graph"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        future::ArgValue,
        graph::{ModuleParams, build_deployment_graph},
        module::{CallOptions, ContractOptions, EventOptions, LibraryOptions, ModuleBuilder},
        services::{Artifact, LinkReference, StaticAccounts},
    };
    use alloy_core::json_abi::JsonAbi;

    const ZERO: &str = "0x0000000000000000000000000000000000000000";

    fn artifact(name: &str, abi: serde_json::Value) -> Artifact {
        Artifact {
            contract_name: name.to_string(),
            source_name: format!("contracts/{}.sol", name),
            abi: serde_json::from_value(abi).unwrap(),
            bytecode: "0x6080".to_string(),
            link_references: Default::default(),
        }
    }

    fn artifacts() -> BTreeMap<String, Artifact> {
        let mut artifacts = BTreeMap::new();
        artifacts.insert("Bar".to_string(), artifact("Bar", serde_json::json!([])));
        artifacts.insert(
            "UsesContract".to_string(),
            artifact(
                "UsesContract",
                serde_json::json!([
                    {
                        "type": "constructor",
                        "inputs": [{ "name": "target", "type": "address", "internalType": "address" }],
                        "stateMutability": "nonpayable"
                    },
                    {
                        "type": "function",
                        "name": "setAddress",
                        "inputs": [{ "name": "target", "type": "address", "internalType": "address" }],
                        "outputs": [],
                        "stateMutability": "nonpayable"
                    },
                    {
                        "type": "event",
                        "name": "AddressSet",
                        "inputs": [{ "name": "target", "type": "address", "indexed": false }],
                        "anonymous": false
                    }
                ]),
            ),
        );
        artifacts
    }

    fn validate(module: &crate::module::Module, artifacts: &BTreeMap<String, Artifact>) -> ValidationReport {
        let accounts = StaticAccounts::default();
        let graph = build_deployment_graph(module, &ModuleParams::new()).unwrap();
        validate_deployment_graph(
            &graph,
            Services {
                artifacts,
                chain: &accounts,
            },
        )
    }

    fn messages(report: &ValidationReport) -> Vec<String> {
        report.failures().map(|f| f.message.clone()).collect()
    }

    #[test]
    fn test_valid_module() {
        let mut m = ModuleBuilder::new("MyModule");
        let bar = m.contract("Bar", ContractOptions::default());
        let uses = m.contract("UsesContract", ContractOptions::args([ArgValue::from(ZERO)]));
        m.call(&uses, "setAddress", CallOptions::args([ArgValue::from(&bar)]));
        let module = m.build([("bar", bar), ("usesContract", uses)]);

        let report = validate(&module, &artifacts());
        assert!(report.is_valid(), "{:?}", messages(&report));
        assert_eq!(report.results.len(), 3);
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn test_reports_every_failure() {
        let mut m = ModuleBuilder::new("Broken");
        let missing = m.contract("Missing", ContractOptions::default());
        let uses = m.contract("UsesContract", ContractOptions::default());
        let module = m.build([("missing", missing), ("uses", uses)]);

        let report = validate(&module, &artifacts());
        assert!(!report.is_valid());
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 2);
        assert!(failures.iter().any(|f| f.message.contains("'Missing' is invalid or missing")));
        assert!(failures.iter().any(|f| f.message.contains("expects 1 arguments but 0 were given")));
        assert!(failures.iter().all(|f| !f.call_points.is_empty()));

        let err = report.into_result().unwrap_err();
        assert_eq!(err.0.len(), 2);
    }

    #[test]
    fn test_deployed_contract_address() {
        let mut m = ModuleBuilder::new("M");
        let good = m.contract_at("Good", ZERO, JsonAbi::default());
        let bad = m.contract_at("Bad", "0x1234", JsonAbi::default());
        let module = m.build([("good", good), ("bad", bad)]);

        let report = validate(&module, &artifacts());
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].label, "M:Bad");
        assert!(failures[0].message.contains("Invalid address"));
    }

    #[test]
    fn test_call_checks() {
        let mut m = ModuleBuilder::new("M");
        let bar = m.contract("Bar", ContractOptions::default());
        let uses = m.contract("UsesContract", ContractOptions::args([ArgValue::from(ZERO)]));
        m.call(&uses, "missing", CallOptions::default());
        m.call(&uses, "setAddress", CallOptions::default());
        let set = m.call(
            &uses,
            "setAddress",
            CallOptions {
                args: vec![ArgValue::from(&bar)],
                value: Some(ArgValue::Number(1)),
                ..Default::default()
            },
        );
        m.call(&set, "poke", CallOptions::default());
        let module = m.build([("bar", bar)]);

        let messages = messages(&validate(&module, &artifacts()));
        assert_eq!(messages.len(), 4, "{:?}", messages);
        assert!(messages.iter().any(|m| m.contains("doesn't have a function missing")));
        assert!(messages.iter().any(|m| m.contains("expects 1 arguments but 0 were given")));
        assert!(messages.iter().any(|m| m.contains("not payable")));
        assert!(messages.iter().any(|m| m.contains("not a contract")));
    }

    #[test]
    fn test_same_arity_overload_needs_full_signature() {
        let mut artifacts = artifacts();
        artifacts.insert(
            "Store".to_string(),
            artifact(
                "Store",
                serde_json::json!([
                    {
                        "type": "function",
                        "name": "set",
                        "inputs": [{ "name": "x", "type": "uint256", "internalType": "uint256" }],
                        "outputs": [],
                        "stateMutability": "nonpayable"
                    },
                    {
                        "type": "function",
                        "name": "set",
                        "inputs": [{ "name": "x", "type": "string", "internalType": "string" }],
                        "outputs": [],
                        "stateMutability": "nonpayable"
                    }
                ]),
            ),
        );

        let mut m = ModuleBuilder::new("M");
        let store = m.contract("Store", ContractOptions::default());
        m.call(&store, "set", CallOptions::args([ArgValue::Number(1)]));
        m.call(&store, "set(uint256)", CallOptions::args([ArgValue::Number(1)]));
        let module = m.build([("store", store)]);

        let report = validate(&module, &artifacts);
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1, "{:?}", messages(&report));
        assert_eq!(failures[0].label, "M:Store.set");
        assert!(failures[0].message.contains("use the full signature"));
        assert!(failures[0].message.contains("set(uint256), set(string)"));
    }

    #[test]
    fn test_library_sender_and_linking() {
        let mut linked = artifact("Linked", serde_json::json!([]));
        linked.link_references.insert(
            "contracts/Math.sol".to_string(),
            BTreeMap::from([(
                "Math".to_string(),
                vec![LinkReference { start: 10, length: 20 }],
            )]),
        );
        let mut artifacts = artifacts();
        artifacts.insert("Math".to_string(), artifact("Math", serde_json::json!([])));
        artifacts.insert("Linked".to_string(), linked);

        let mut m = ModuleBuilder::new("M");
        let math = m.library(
            "Math",
            LibraryOptions {
                from: Some("not-an-address".to_string()),
                ..Default::default()
            },
        );
        let unlinked = m.contract("Linked", ContractOptions { id: Some("Unlinked".into()), ..Default::default() });
        let linked = m.contract(
            "Linked",
            ContractOptions {
                libraries: BTreeMap::from([("Math".to_string(), math.clone())]),
                ..Default::default()
            },
        );
        let module = m.build([("math", math), ("linked", linked), ("unlinked", unlinked)]);

        let report = validate(&module, &artifacts);
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 2);
        assert!(failures.iter().any(|f| f.label == "M:Math" && f.message.contains("`from`")));
        assert!(failures.iter().any(|f| f.label == "M:Unlinked" && f.message.contains("Missing library Math")));
    }

    #[test]
    fn test_event_checks() {
        let mut m = ModuleBuilder::new("M");
        let uses = m.contract("UsesContract", ContractOptions::args([ArgValue::from(ZERO)]));
        let set = m.event(&uses, "AddressSet", EventOptions::default());
        let target = m.event_param(&set, "target");
        let bogus = m.event_param(&set, "bogus");
        m.event(&uses, "Missing", EventOptions::default());
        m.contract_at("Target", &target, JsonAbi::default());
        m.contract_at("Bogus", &bogus, JsonAbi::default());
        let module = m.build([("uses", uses)]);

        let messages = messages(&validate(&module, &artifacts()));
        assert_eq!(messages.len(), 2, "{:?}", messages);
        assert!(messages.iter().any(|m| m.contains("doesn't have an event Missing")));
        assert!(messages.iter().any(|m| m.contains("parameter named bogus")));
    }
}
