//! Assembles a [`DeploymentGraph`] from a module.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::{
    dependencies::extract_dependencies,
    future::{ArgValue, FutureId, FutureKind, FutureRef, OutputKind},
    module::{Binding, CallBinding, ContractDeployment, EventBinding, FutureDef, LibraryDeployment, Module},
};

use super::{
    DeploymentGraph, DeploymentVertex, FutureResolution, GraphError, ModuleParams, VertexId,
    VertexKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done,
}

struct GraphBuilder<'a> {
    module: &'a Module,
    params: &'a ModuleParams,
    defs: HashMap<&'a FutureId, &'a FutureDef>,
    visits: HashMap<FutureId, Visit>,
    stack: Vec<FutureId>,
    resolutions: BTreeMap<FutureId, FutureResolution>,
    vertices: BTreeMap<VertexId, DeploymentVertex>,
}

/// Build the deployment graph of `module`.
///
/// Traversal starts from the declared outputs, then covers every other
/// declaration so that side-effect-only calls and events are deployed too.
/// Vertex ids are assigned after a future's dependencies, so every edge points
/// from a higher id to a lower one.
pub fn build_deployment_graph(
    module: &Module,
    params: &ModuleParams,
) -> Result<DeploymentGraph, GraphError> {
    let mut defs: HashMap<&FutureId, &FutureDef> = HashMap::with_capacity(module.futures.len());
    for def in &module.futures {
        if defs.insert(&def.future.id, def).is_some() {
            return Err(GraphError::DuplicateFuture(def.future.id.clone()));
        }
    }

    for (output, future) in &module.outputs {
        if !is_returnable(&defs, future) {
            return Err(GraphError::InvalidModuleOutput {
                module_id: module.id.clone(),
                output: output.clone(),
                future: future.id.clone(),
                kind: future.kind,
            });
        }
    }

    let mut builder = GraphBuilder {
        module,
        params,
        defs,
        visits: HashMap::new(),
        stack: Vec::new(),
        resolutions: BTreeMap::new(),
        vertices: BTreeMap::new(),
    };

    let roots = module
        .outputs
        .values()
        .map(|future| &future.id)
        .chain(module.futures.iter().map(|def| &def.future.id));
    for root in roots {
        builder.visit(root)?;
    }

    let outputs = module
        .outputs
        .iter()
        .filter_map(|(name, future)| match builder.resolutions.get(&future.id) {
            Some(FutureResolution::Vertex(id)) => Some((name.clone(), *id)),
            _ => None,
        })
        .collect();

    tracing::debug!(
        module_id = %module.id,
        vertices = builder.vertices.len(),
        futures = module.futures.len(),
        "Built deployment graph"
    );

    Ok(DeploymentGraph {
        module_id: module.id.clone(),
        vertices: builder.vertices,
        outputs,
        resolutions: builder.resolutions,
    })
}

/// Only deployed artifacts may be returned, possibly behind proxies.
fn is_returnable(defs: &HashMap<&FutureId, &FutureDef>, future: &FutureRef) -> bool {
    if future.is_deployable() {
        return true;
    }
    if future.kind != FutureKind::Proxy {
        return false;
    }
    match defs.get(&future.id).map(|def| &def.binding) {
        Some(Binding::Proxy { proxied, .. }) => is_returnable(defs, proxied),
        _ => false,
    }
}

impl<'a> GraphBuilder<'a> {
    fn visit(&mut self, id: &FutureId) -> Result<(), GraphError> {
        match self.visits.get(id) {
            Some(Visit::Done) => return Ok(()),
            Some(Visit::InProgress) => return Err(self.cycle_error(id)),
            None => {}
        }

        let def = *self
            .defs
            .get(id)
            .ok_or_else(|| GraphError::UnknownFuture(id.clone()))?;

        self.visits.insert(id.clone(), Visit::InProgress);
        self.stack.push(id.clone());

        let inputs = def.inputs();
        let dependencies = extract_dependencies(&inputs);
        for dependency in &dependencies {
            self.visit(&dependency.id)?;
        }

        self.stack.pop();
        self.visits.insert(id.clone(), Visit::Done);

        let resolution = self.resolve(def, &dependencies)?;
        self.resolutions.insert(id.clone(), resolution);

        Ok(())
    }

    fn cycle_error(&self, id: &FutureId) -> GraphError {
        let start = self.stack.iter().position(|f| f == id).unwrap_or(0);
        let mut cycle: Vec<FutureId> = self.stack[start..].to_vec();
        cycle.push(id.clone());

        let call_points = self
            .defs
            .get(id)
            .map(|def| def.call_points.clone())
            .unwrap_or_default();

        tracing::debug!(future = %id, length = cycle.len() - 1, "Dependency cycle detected");

        GraphError::CyclicGraph { cycle, call_points }
    }

    /// Vertices for a list of dependency futures, deduplicated in order.
    fn dependency_vertices(&self, dependencies: &[FutureRef]) -> Vec<VertexId> {
        let mut seen = HashSet::new();
        dependencies
            .iter()
            .filter_map(|dep| self.resolutions.get(&dep.id))
            .flat_map(FutureResolution::vertices)
            .filter(|id| seen.insert(*id))
            .collect()
    }

    fn resolve(
        &mut self,
        def: &FutureDef,
        dependencies: &[FutureRef],
    ) -> Result<FutureResolution, GraphError> {
        let kind = match &def.binding {
            Binding::Parameter { name, default } => {
                return self
                    .parameter_value(def, name, default.as_ref())
                    .map(FutureResolution::Literal);
            }
            Binding::Virtual { .. } => {
                return Ok(FutureResolution::Group(self.dependency_vertices(dependencies)));
            }
            Binding::EventParam { event, param } => {
                return match self.resolutions.get(&event.id) {
                    Some(FutureResolution::Vertex(vertex)) => Ok(FutureResolution::EventParam {
                        vertex: *vertex,
                        param: param.clone(),
                    }),
                    _ => Err(GraphError::UnknownFuture(event.id.clone())),
                };
            }
            Binding::HardhatContract(d) => VertexKind::HardhatContract(self.contract(d)),
            Binding::ArtifactContract {
                artifact,
                deployment,
            } => VertexKind::ArtifactContract {
                artifact: artifact.clone(),
                deployment: self.contract(deployment),
            },
            Binding::DeployedContract(existing) => {
                let mut existing = existing.clone();
                existing.address = self.substitute(&existing.address);
                VertexKind::DeployedContract(existing)
            }
            Binding::HardhatLibrary(d) => VertexKind::HardhatLibrary(self.library(d)),
            Binding::ArtifactLibrary {
                artifact,
                deployment,
            } => VertexKind::ArtifactLibrary {
                artifact: artifact.clone(),
                deployment: self.library(deployment),
            },
            Binding::Call(call) => VertexKind::Call(CallBinding {
                args: self.substitute_all(&call.args),
                value: call.value.as_ref().map(|v| self.substitute(v)),
                ..call.clone()
            }),
            Binding::Event(event) => VertexKind::Event(EventBinding {
                args: self.substitute_all(&event.args),
                ..event.clone()
            }),
            Binding::Proxy { proxied, .. } => VertexKind::Proxy {
                proxied: proxied.clone(),
            },
        };

        let id = self.vertices.len();
        let vertex = DeploymentVertex {
            id,
            future: def.future.id.clone(),
            label: def.future.id.to_string(),
            dependencies: self.dependency_vertices(dependencies),
            call_points: def.call_points.clone(),
            kind,
        };

        tracing::trace!(
            vertex_id = id,
            label = %vertex.label,
            kind = vertex.kind.type_name(),
            dependencies = ?vertex.dependencies,
            "Added vertex"
        );

        self.vertices.insert(id, vertex);
        Ok(FutureResolution::Vertex(id))
    }

    fn parameter_value(
        &self,
        def: &FutureDef,
        name: &str,
        default: Option<&ArgValue>,
    ) -> Result<ArgValue, GraphError> {
        let module_id = &def.future.id.module_id;
        let value = self
            .params
            .get(module_id)
            .and_then(|params| params.get(name))
            .or(default)
            .cloned()
            .ok_or_else(|| GraphError::MissingParameter {
                module_id: module_id.clone(),
                name: name.to_string(),
                call_points: def.call_points.clone(),
            })?;

        let matches = match def.future.output {
            OutputKind::Number => matches!(value, ArgValue::Number(_)),
            _ => !matches!(value, ArgValue::Number(_) | ArgValue::Future(_)),
        };
        if !matches {
            return Err(GraphError::ParameterKind {
                module_id: module_id.clone(),
                name: name.to_string(),
                expected: def.future.output,
                found: value.type_name(),
            });
        }

        tracing::trace!(module_id = %self.module.id, parameter = name, "Resolved parameter");
        Ok(value)
    }

    /// Replace parameter references with their values.
    fn substitute(&self, value: &ArgValue) -> ArgValue {
        match value {
            ArgValue::Future(future) => match self.resolutions.get(&future.id) {
                Some(FutureResolution::Literal(literal)) => literal.clone(),
                _ => value.clone(),
            },
            ArgValue::Sequence(items) => ArgValue::Sequence(self.substitute_all(items)),
            ArgValue::Struct(fields) => ArgValue::Struct(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), self.substitute(v)))
                    .collect(),
            ),
            _ => value.clone(),
        }
    }

    fn substitute_all(&self, values: &[ArgValue]) -> Vec<ArgValue> {
        values.iter().map(|v| self.substitute(v)).collect()
    }

    fn contract(&self, d: &ContractDeployment) -> ContractDeployment {
        ContractDeployment {
            args: self.substitute_all(&d.args),
            value: d.value.as_ref().map(|v| self.substitute(v)),
            ..d.clone()
        }
    }

    fn library(&self, d: &LibraryDeployment) -> LibraryDeployment {
        LibraryDeployment {
            args: self.substitute_all(&d.args),
            ..d.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{CallOptions, ContractOptions, ModuleBuilder};

    #[test]
    fn test_call_depends_on_receiver_and_args() {
        let mut m = ModuleBuilder::new("MyModule");
        let bar = m.contract("Bar", ContractOptions::default());
        let uses = m.contract(
            "UsesContract",
            ContractOptions::args([ArgValue::from("0x0000000000000000000000000000000000000000")]),
        );
        m.call(&uses, "setAddress", CallOptions::args([ArgValue::from(&bar)]));
        let module = m.build([("bar", bar), ("usesContract", uses)]);

        let graph = build_deployment_graph(&module, &ModuleParams::new()).unwrap();
        assert_eq!(graph.len(), 3);

        let bar = graph.find("MyModule:Bar").unwrap();
        let uses = graph.find("MyModule:UsesContract").unwrap();
        let call = graph.find("MyModule:UsesContract.setAddress").unwrap();
        assert!(bar.dependencies.is_empty());
        assert!(uses.dependencies.is_empty());
        assert_eq!(call.dependencies, vec![uses.id, bar.id]);
        assert_eq!(graph.outputs["bar"], bar.id);
    }

    #[test]
    fn test_duplicate_future_ids_are_rejected() {
        let mut m = ModuleBuilder::new("M");
        let token = m.contract("Token", ContractOptions::default());
        let mut module = m.build([("token", token.clone())]);
        let copy = module.futures[0].clone();
        module.futures.push(copy);

        match build_deployment_graph(&module, &ModuleParams::new()) {
            Err(GraphError::DuplicateFuture(id)) => assert_eq!(id, token.id),
            other => panic!("expected a duplicate future error, got {other:?}"),
        }
    }

    #[test]
    fn test_cycle_through_after_edges() {
        let mut m = ModuleBuilder::new("Cyclic");
        let x = m.contract("X", ContractOptions::default());
        let y = m.contract("Y", ContractOptions::args([ArgValue::from(&x)]));
        m.depends_on(&x, &y);
        let module = m.build([("x", x.clone())]);

        let err = build_deployment_graph(&module, &ModuleParams::new()).unwrap_err();
        match err {
            GraphError::CyclicGraph { cycle, call_points } => {
                assert_eq!(cycle.first(), cycle.last());
                assert!(cycle.contains(&x.id));
                assert!(cycle.contains(&y.id));
                assert!(!call_points.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let mut m = ModuleBuilder::new("Selfish");
        let x = m.contract("X", ContractOptions::default());
        m.depends_on(&x, &x);
        let module = m.build([("x", x)]);

        assert!(matches!(
            build_deployment_graph(&module, &ModuleParams::new()),
            Err(GraphError::CyclicGraph { .. })
        ));
    }

    #[test]
    fn test_call_cannot_be_module_output() {
        let mut m = ModuleBuilder::new("M");
        let bar = m.contract("Bar", ContractOptions::default());
        let call = m.call(&bar, "poke", CallOptions::default());
        let module = m.build([("poke", call)]);

        let err = build_deployment_graph(&module, &ModuleParams::new()).unwrap_err();
        assert!(matches!(
            err,
            GraphError::InvalidModuleOutput { kind: FutureKind::Call, ref output, .. } if output == "poke"
        ));
    }

    #[test]
    fn test_parameters_are_substituted() {
        let mut m = ModuleBuilder::new("M");
        let owner = m.parameter("owner", OutputKind::String);
        let supply = m.parameter_or("supply", 1000i64);
        let token = m.contract(
            "Token",
            ContractOptions::args([ArgValue::from(&owner), ArgValue::from(&supply)]),
        );
        let module = m.build([("token", token)]);

        let mut params = ModuleParams::new();
        params.entry("M".to_string()).or_default().insert(
            "owner".to_string(),
            ArgValue::from("0x0000000000000000000000000000000000000001"),
        );

        let graph = build_deployment_graph(&module, &params).unwrap();
        assert_eq!(graph.len(), 1);
        let vertex = graph.find("M:Token").unwrap();
        assert!(vertex.dependencies.is_empty());
        match &vertex.kind {
            VertexKind::HardhatContract(d) => assert_eq!(
                d.args,
                vec![
                    ArgValue::from("0x0000000000000000000000000000000000000001"),
                    ArgValue::Number(1000)
                ]
            ),
            other => panic!("unexpected vertex {other:?}"),
        }
    }

    #[test]
    fn test_missing_parameter() {
        let mut m = ModuleBuilder::new("M");
        let owner = m.parameter("owner", OutputKind::String);
        let token = m.contract("Token", ContractOptions::args([ArgValue::from(&owner)]));
        let module = m.build([("token", token)]);

        let err = build_deployment_graph(&module, &ModuleParams::new()).unwrap_err();
        assert!(matches!(err, GraphError::MissingParameter { ref name, .. } if name == "owner"));
    }

    #[test]
    fn test_parameter_kind_mismatch() {
        let mut m = ModuleBuilder::new("M");
        let supply = m.parameter("supply", OutputKind::Number);
        let token = m.contract("Token", ContractOptions::args([ArgValue::from(&supply)]));
        let module = m.build([("token", token)]);

        let mut params = ModuleParams::new();
        params
            .entry("M".to_string())
            .or_default()
            .insert("supply".to_string(), ArgValue::from("lots"));

        assert!(matches!(
            build_deployment_graph(&module, &params),
            Err(GraphError::ParameterKind { expected: OutputKind::Number, found: "string", .. })
        ));
    }

    #[test]
    fn test_submodule_proxy_waits_for_whole_submodule() {
        let mut sub = ModuleBuilder::new("Sub");
        let token = sub.contract("Token", ContractOptions::default());
        sub.call(&token, "init", CallOptions::default());
        let sub = sub.build([("token", token)]);

        let mut root = ModuleBuilder::new("Root");
        let imported = root.use_module(&sub);
        let proxy = imported.get("token").unwrap().clone();
        let module = root.build([("token", proxy)]);

        let graph = build_deployment_graph(&module, &ModuleParams::new()).unwrap();
        // Token, init call and the proxy; the virtual does not become a vertex.
        assert_eq!(graph.len(), 3);

        let token = graph.find("Sub:Token").unwrap();
        let init = graph.find("Sub:Token.init").unwrap();
        let proxy = graph.find("Root:Sub.token").unwrap();
        assert_eq!(proxy.dependencies, vec![token.id, init.id]);
        assert_eq!(graph.outputs["token"], proxy.id);
        assert!(matches!(
            graph.resolution(&imported.completed.id),
            Some(FutureResolution::Group(ids)) if ids == &vec![token.id, init.id]
        ));
    }

    #[test]
    fn test_event_param_resolves_to_event_vertex() {
        let mut m = ModuleBuilder::new("M");
        let factory = m.contract("Factory", ContractOptions::default());
        let created = m.call(&factory, "create", CallOptions::default());
        let event = m.event(
            &factory,
            "Created",
            crate::module::EventOptions {
                after: vec![created],
                ..Default::default()
            },
        );
        let child_address = m.event_param(&event, "child");
        let child = m.contract_at("Child", &child_address, Default::default());
        let module = m.build([("child", child)]);

        let graph = build_deployment_graph(&module, &ModuleParams::new()).unwrap();
        let event = graph.find("M:Factory/Created").unwrap();
        let child = graph.find("M:Child").unwrap();
        assert_eq!(child.dependencies, vec![event.id]);
        assert!(event.id < child.id);
    }
}
