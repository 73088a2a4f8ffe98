use std::collections::BTreeMap;

use alloy_core::{
    json_abi::{JsonAbi, Param},
    primitives::Address,
};

use crate::{
    abi,
    future::{ArgValue, FutureRef, OutputKind},
    graph::{DeploymentGraph, DeploymentVertex, FutureResolution, VertexKind},
    module::{CallBinding, ContractDeployment, EventBinding, LibraryDeployment},
    services::{Artifact, Services, parse_address},
};

use super::{
    ExecutionGraph, ExecutionKind, ExecutionVertex, Placeholder, ResolvedArg, TransformError,
    arg::{accepts, element_type},
};

/// Lower every vertex of a validated graph.
///
/// Vertex ids and dependency edges are carried over unchanged.
pub fn transform_deployment_graph(
    graph: &DeploymentGraph,
    services: Services<'_>,
) -> Result<ExecutionGraph, TransformError> {
    let mut vertices = BTreeMap::new();

    for vertex in graph.vertices.values() {
        let lowering = Lowering {
            graph,
            services,
            vertex,
        };
        let kind = lowering.lower()?;

        tracing::trace!(vertex_id = vertex.id, label = %vertex.label, step = %kind.step(), "Lowered vertex");

        vertices.insert(
            vertex.id,
            ExecutionVertex {
                id: vertex.id,
                label: vertex.label.clone(),
                future: vertex.future.clone(),
                dependencies: vertex.dependencies.clone(),
                kind,
            },
        );
    }

    tracing::info!(
        module_id = %graph.module_id,
        vertices = vertices.len(),
        "Transformed deployment graph into execution graph"
    );

    Ok(ExecutionGraph {
        module_id: graph.module_id.clone(),
        vertices,
        outputs: graph.outputs.clone(),
    })
}

struct Lowering<'a> {
    graph: &'a DeploymentGraph,
    services: Services<'a>,
    vertex: &'a DeploymentVertex,
}

impl Lowering<'_> {
    fn lower(&self) -> Result<ExecutionKind, TransformError> {
        match &self.vertex.kind {
            VertexKind::HardhatContract(d) => {
                let artifact = self.artifact(&d.contract_name)?;
                self.deploy_contract(artifact, d)
            }
            VertexKind::ArtifactContract {
                artifact,
                deployment,
            } => self.deploy_contract((**artifact).clone(), deployment),
            VertexKind::HardhatLibrary(d) => {
                let artifact = self.artifact(&d.library_name)?;
                self.deploy_library(artifact, d)
            }
            VertexKind::ArtifactLibrary {
                artifact,
                deployment,
            } => self.deploy_library((**artifact).clone(), deployment),
            VertexKind::DeployedContract(existing) => Ok(ExecutionKind::UseExisting {
                contract_name: existing.contract_name.clone(),
                address: self.resolve("address", &existing.address, "address")?,
                abi: existing.abi.clone(),
            }),
            VertexKind::Proxy { proxied } => Ok(ExecutionKind::UseExisting {
                contract_name: proxied.id.local_id.clone(),
                address: self.resolve("address", &ArgValue::from(proxied), "proxied contract")?,
                abi: self
                    .graph
                    .contract_abi(&proxied.id, self.services.artifacts)
                    .unwrap_or_default(),
            }),
            VertexKind::Call(call) => self.call(call),
            VertexKind::Event(event) => self.event(event),
        }
    }

    fn deploy_contract(
        &self,
        artifact: Artifact,
        d: &ContractDeployment,
    ) -> Result<ExecutionKind, TransformError> {
        let args = self.resolve_params(abi::constructor_inputs(&artifact.abi), &d.args, "constructor")?;
        Ok(ExecutionKind::DeployContract {
            contract_name: d.contract_name.clone(),
            libraries: self.libraries(&d.libraries)?,
            value: self.value(d.value.as_ref())?,
            from: self.sender(d.from.as_deref())?,
            args,
            artifact: Box::new(artifact),
        })
    }

    fn deploy_library(
        &self,
        artifact: Artifact,
        d: &LibraryDeployment,
    ) -> Result<ExecutionKind, TransformError> {
        let args = self.resolve_params(abi::constructor_inputs(&artifact.abi), &d.args, "constructor")?;
        Ok(ExecutionKind::DeployLibrary {
            library_name: d.library_name.clone(),
            libraries: self.libraries(&d.libraries)?,
            from: self.sender(d.from.as_deref())?,
            args,
            artifact: Box::new(artifact),
        })
    }

    fn call(&self, call: &CallBinding) -> Result<ExecutionKind, TransformError> {
        let contract_abi = self.abi_of(&call.contract)?;
        let function = abi::find_function(&contract_abi, &call.method, call.args.len())
            .map_err(|err| match err {
                abi::OverloadError::Arity => self.unresolved(format!(
                    "No overload of {} takes {} arguments",
                    call.method,
                    call.args.len()
                )),
                abi::OverloadError::Ambiguous(signatures) => self.unresolved(format!(
                    "{} is ambiguous between {}",
                    call.method,
                    signatures.join(", ")
                )),
            })?;

        let contract = self.resolve("address", &ArgValue::from(&call.contract), "call target")?;
        let args = self.resolve_params(&function.inputs, &call.args, &function.name)?;
        let from = self.sender(call.from.as_deref())?;
        let method = function.signature();

        if abi::is_state_mutating(function) {
            Ok(ExecutionKind::Call {
                contract,
                method,
                args,
                value: self.value(call.value.as_ref())?,
                from,
            })
        } else {
            Ok(ExecutionKind::StaticCall {
                contract,
                method,
                args,
                from,
            })
        }
    }

    fn event(&self, event: &EventBinding) -> Result<ExecutionKind, TransformError> {
        let emitter_abi = self.abi_of(&event.emitter)?;
        let definition = abi::find_event(&emitter_abi, &event.event)
            .ok_or_else(|| self.unresolved(format!("Unknown event {}", event.event)))?;

        let args = event
            .args
            .iter()
            .enumerate()
            .map(|(i, value)| {
                let ty = definition.inputs.get(i).map(|p| p.ty.as_str()).unwrap_or("");
                self.resolve(ty, value, &format!("event filter {}", i))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ExecutionKind::AwaitEvent {
            emitter: self.resolve("address", &ArgValue::from(&event.emitter), "event emitter")?,
            event: definition.signature(),
            args,
        })
    }

    fn resolve_params(
        &self,
        params: &[Param],
        values: &[ArgValue],
        what: &str,
    ) -> Result<Vec<ResolvedArg>, TransformError> {
        values
            .iter()
            .enumerate()
            .map(|(i, value)| {
                let ty = params.get(i).map(|p| p.ty.as_str()).unwrap_or("");
                self.resolve(ty, value, &format!("{} argument {}", what, i))
            })
            .collect()
    }

    fn libraries(
        &self,
        libraries: &BTreeMap<String, FutureRef>,
    ) -> Result<BTreeMap<String, ResolvedArg>, TransformError> {
        libraries
            .iter()
            .map(|(name, future)| {
                let arg = self.resolve("address", &ArgValue::from(future), &format!("library {}", name))?;
                Ok::<_, TransformError>((name.clone(), arg))
            })
            .collect()
    }

    fn value(&self, value: Option<&ArgValue>) -> Result<Option<ResolvedArg>, TransformError> {
        value.map(|v| self.resolve("uint256", v, "value")).transpose()
    }

    /// Resolve `value` for a slot of ABI type `ty`.
    fn resolve(&self, ty: &str, value: &ArgValue, position: &str) -> Result<ResolvedArg, TransformError> {
        Ok(match value {
            ArgValue::Null => ResolvedArg::Null,
            ArgValue::Bool(b) => ResolvedArg::Bool(*b),
            ArgValue::Number(n) => ResolvedArg::Number(*n),
            ArgValue::String(s) => ResolvedArg::String(s.clone()),
            ArgValue::Sequence(items) => {
                let element = element_type(ty).unwrap_or("");
                ResolvedArg::Sequence(
                    items
                        .iter()
                        .map(|item| self.resolve(element, item, position))
                        .collect::<Result<_, _>>()?,
                )
            }
            ArgValue::Struct(fields) => ResolvedArg::Struct(
                fields
                    .iter()
                    .map(|(k, v)| Ok::<_, TransformError>((k.clone(), self.resolve("", v, position)?)))
                    .collect::<Result<_, TransformError>>()?,
            ),
            ArgValue::Future(future) => return self.placeholder(ty, future, position),
        })
    }

    fn placeholder(
        &self,
        ty: &str,
        future: &FutureRef,
        position: &str,
    ) -> Result<ResolvedArg, TransformError> {
        let placeholder = match self.graph.resolution(&future.id) {
            Some(FutureResolution::Vertex(vertex)) => Placeholder {
                vertex: *vertex,
                output: future.output,
                field: None,
            },
            Some(FutureResolution::EventParam { vertex, param }) => Placeholder {
                vertex: *vertex,
                output: OutputKind::String,
                field: Some(param.clone()),
            },
            Some(FutureResolution::Literal(literal)) => return self.resolve(ty, literal, position),
            Some(FutureResolution::Group(_)) => {
                return Err(TransformError::VirtualValue {
                    vertex_id: self.vertex.id,
                    label: self.vertex.label.clone(),
                    future: future.id.clone(),
                });
            }
            None => return Err(self.unresolved(format!("Unknown future {}", future.id))),
        };

        if !accepts(ty, placeholder.output) {
            return Err(TransformError::OutputKindMismatch {
                vertex_id: self.vertex.id,
                label: self.vertex.label.clone(),
                position: position.to_string(),
                expected: ty.to_string(),
                future: future.id.clone(),
                found: placeholder.output,
            });
        }

        Ok(ResolvedArg::Placeholder(placeholder))
    }

    fn sender(&self, from: Option<&str>) -> Result<Address, TransformError> {
        match from {
            Some(from) => parse_address(from)
                .ok_or_else(|| self.unresolved(format!("Invalid sender address {}", from))),
            None => self
                .services
                .chain
                .default_sender()
                .ok_or_else(|| self.unresolved("No account available to send from".to_string())),
        }
    }

    fn artifact(&self, name: &str) -> Result<Artifact, TransformError> {
        self.services
            .artifacts
            .get_artifact(name)
            .map_err(|e| self.unresolved(format!("{:#}", e)))
    }

    fn abi_of(&self, future: &FutureRef) -> Result<JsonAbi, TransformError> {
        self.graph
            .contract_abi(&future.id, self.services.artifacts)
            .ok_or_else(|| self.unresolved(format!("No ABI available for {}", future.id)))
    }

    fn unresolved(&self, message: String) -> TransformError {
        TransformError::Unresolved {
            vertex_id: self.vertex.id,
            label: self.vertex.label.clone(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        graph::{ModuleParams, build_deployment_graph},
        module::{CallOptions, ContractOptions, EventOptions, ModuleBuilder},
        services::StaticAccounts,
        transform::StepKind,
    };

    const SENDER: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    fn artifacts() -> BTreeMap<String, Artifact> {
        let registry: Artifact = serde_json::from_value(serde_json::json!({
            "contractName": "Registry",
            "abi": [
                {
                    "type": "constructor",
                    "inputs": [{ "name": "owner", "type": "address", "internalType": "address" }],
                    "stateMutability": "nonpayable"
                },
                {
                    "type": "function",
                    "name": "register",
                    "inputs": [
                        { "name": "target", "type": "address", "internalType": "address" },
                        { "name": "ids", "type": "uint256[]", "internalType": "uint256[]" }
                    ],
                    "outputs": [],
                    "stateMutability": "nonpayable"
                },
                {
                    "type": "function",
                    "name": "owner",
                    "inputs": [],
                    "outputs": [{ "name": "", "type": "address", "internalType": "address" }],
                    "stateMutability": "view"
                },
                {
                    "type": "event",
                    "name": "Registered",
                    "inputs": [{ "name": "target", "type": "address", "indexed": true }],
                    "anonymous": false
                }
            ],
            "bytecode": "0x6080"
        }))
        .unwrap();
        BTreeMap::from([("Registry".to_string(), registry)])
    }

    fn lower(module: &crate::module::Module) -> Result<ExecutionGraph, TransformError> {
        let artifacts = artifacts();
        let accounts = StaticAccounts(vec![SENDER.parse().unwrap()]);
        let graph = build_deployment_graph(module, &ModuleParams::new()).unwrap();
        transform_deployment_graph(
            &graph,
            Services {
                artifacts: &artifacts,
                chain: &accounts,
            },
        )
    }

    #[test]
    fn test_lowering_keeps_ids_and_edges() {
        let mut m = ModuleBuilder::new("M");
        let owner = m.contract("Registry", ContractOptions::args([ArgValue::from(SENDER)]));
        let registry = m.contract(
            "Registry",
            ContractOptions::args([ArgValue::from(&owner)]),
        );
        let register = m.call(
            &registry,
            "register",
            CallOptions::args([ArgValue::from(&owner), ArgValue::seq([1i64, 2])]),
        );
        m.call(&registry, "owner", CallOptions { after: vec![register], ..Default::default() });
        m.event(&registry, "Registered", EventOptions::default());
        let module = m.build([("registry", registry)]);

        let graph = build_deployment_graph(&module, &ModuleParams::new()).unwrap();
        let execution = lower(&module).unwrap();

        assert_eq!(execution.vertices.len(), graph.len());
        for (id, vertex) in &graph.vertices {
            assert_eq!(execution.vertices[id].dependencies, vertex.dependencies);
            for p in execution.vertices[id].kind.placeholders() {
                assert!(vertex.dependencies.contains(&p.vertex));
            }
        }

        let steps: Vec<StepKind> = execution.vertices.values().map(|v| v.step()).collect();
        assert_eq!(
            steps,
            vec![
                StepKind::DeployContract,
                StepKind::DeployContract,
                StepKind::Call,
                StepKind::StaticCall,
                StepKind::AwaitEvent
            ]
        );

        match &execution.vertices[&2].kind {
            ExecutionKind::Call { method, from, args, .. } => {
                assert_eq!(method, "register(address,uint256[])");
                assert_eq!(from.to_checksum(None), SENDER);
                assert_eq!(
                    args[0],
                    ResolvedArg::Placeholder(Placeholder {
                        vertex: 0,
                        output: OutputKind::Contract,
                        field: None
                    })
                );
            }
            other => panic!("unexpected step {other:?}"),
        }
        assert_eq!(execution.compute_hash().unwrap().len(), 64);
    }

    #[test]
    fn test_tx_output_in_address_slot() {
        let mut m = ModuleBuilder::new("M");
        let registry = m.contract("Registry", ContractOptions::args([ArgValue::from(SENDER)]));
        let call = m.call(
            &registry,
            "register",
            CallOptions::args([ArgValue::from(SENDER), ArgValue::seq(Vec::<ArgValue>::new())]),
        );
        m.contract("Registry", ContractOptions::args([ArgValue::from(&call)]));
        let module = m.build([("registry", registry)]);

        match lower(&module).unwrap_err() {
            TransformError::OutputKindMismatch { expected, found, .. } => {
                assert_eq!(expected, "address");
                assert_eq!(found, OutputKind::Tx);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_proxy_lowers_to_use_existing() {
        let mut sub = ModuleBuilder::new("Sub");
        let registry = sub.contract("Registry", ContractOptions::args([ArgValue::from(SENDER)]));
        let sub = sub.build([("registry", registry)]);

        let mut root = ModuleBuilder::new("Root");
        let imported = root.use_module(&sub);
        let proxy = imported.get("registry").unwrap().clone();
        let module = root.build([("registry", proxy)]);

        let execution = lower(&module).unwrap();
        let proxy = execution.vertex(execution.outputs["registry"]).unwrap();
        match &proxy.kind {
            ExecutionKind::UseExisting { address, abi, .. } => {
                assert_eq!(address.placeholders()[0].vertex, 0);
                assert!(abi.function("register").is_some());
            }
            other => panic!("unexpected step {other:?}"),
        }
    }
}
