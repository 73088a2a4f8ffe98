//! Module definitions.
//!
//! A [`ModuleBuilder`] records declarations and hands back [`FutureRef`] handles.
//! Nothing is resolved here: the builder only stores what the user asked for and
//! where they asked for it.

use std::{
    collections::{BTreeMap, HashMap},
    panic::Location,
};

use alloy_core::json_abi::JsonAbi;
use serde::{Deserialize, Serialize};

use crate::{
    future::{ArgValue, CallPoint, FutureId, FutureKind, FutureRef, OutputKind},
    services::Artifact,
};

/// Constructor arguments and linking for a contract deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractDeployment {
    pub contract_name: String,
    pub args: Vec<ArgValue>,
    pub libraries: BTreeMap<String, FutureRef>,
    pub value: Option<ArgValue>,
    pub from: Option<String>,
}

/// Constructor arguments and linking for a library deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryDeployment {
    pub library_name: String,
    pub args: Vec<ArgValue>,
    pub libraries: BTreeMap<String, FutureRef>,
    pub from: Option<String>,
}

/// A contract that already lives on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingContract {
    pub contract_name: String,
    pub address: ArgValue,
    pub abi: JsonAbi,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallBinding {
    pub contract: FutureRef,
    pub method: String,
    pub args: Vec<ArgValue>,
    pub value: Option<ArgValue>,
    pub from: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBinding {
    pub emitter: FutureRef,
    pub event: String,
    pub args: Vec<ArgValue>,
}

/// What a future was declared as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Binding {
    HardhatContract(ContractDeployment),
    ArtifactContract {
        artifact: Box<Artifact>,
        deployment: ContractDeployment,
    },
    DeployedContract(ExistingContract),
    HardhatLibrary(LibraryDeployment),
    ArtifactLibrary {
        artifact: Box<Artifact>,
        deployment: LibraryDeployment,
    },
    Call(CallBinding),
    Event(EventBinding),
    EventParam {
        event: FutureRef,
        param: String,
    },
    Proxy {
        proxied: FutureRef,
        module: FutureRef,
    },
    Parameter {
        name: String,
        default: Option<ArgValue>,
    },
    Virtual {
        members: Vec<FutureRef>,
    },
}

/// A declared future together with its binding and provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FutureDef {
    pub future: FutureRef,
    pub binding: Binding,
    /// Explicit ordering edges (`after`).
    pub after: Vec<FutureRef>,
    pub call_points: Vec<CallPoint>,
}

impl FutureDef {
    /// The input structure of this future, in the order dependencies are discovered.
    ///
    /// Calls and events list their receiver first.
    pub fn inputs(&self) -> Vec<ArgValue> {
        let mut inputs = Vec::new();

        match &self.binding {
            Binding::HardhatContract(d) | Binding::ArtifactContract { deployment: d, .. } => {
                inputs.extend(d.args.iter().cloned());
                inputs.extend(d.libraries.values().map(ArgValue::from));
                inputs.extend(d.value.iter().cloned());
            }
            Binding::DeployedContract(existing) => inputs.push(existing.address.clone()),
            Binding::HardhatLibrary(d) | Binding::ArtifactLibrary { deployment: d, .. } => {
                inputs.extend(d.args.iter().cloned());
                inputs.extend(d.libraries.values().map(ArgValue::from));
            }
            Binding::Call(call) => {
                inputs.push(ArgValue::from(&call.contract));
                inputs.extend(call.args.iter().cloned());
                inputs.extend(call.value.iter().cloned());
            }
            Binding::Event(event) => {
                inputs.push(ArgValue::from(&event.emitter));
                inputs.extend(event.args.iter().cloned());
            }
            Binding::EventParam { event, .. } => inputs.push(ArgValue::from(event)),
            Binding::Proxy { proxied, module } => {
                inputs.push(ArgValue::from(proxied));
                inputs.push(ArgValue::from(module));
            }
            Binding::Parameter { .. } => {}
            Binding::Virtual { members } => inputs.extend(members.iter().map(ArgValue::from)),
        }

        inputs.extend(self.after.iter().map(ArgValue::from));
        inputs
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContractOptions {
    pub id: Option<String>,
    pub args: Vec<ArgValue>,
    pub libraries: BTreeMap<String, FutureRef>,
    pub after: Vec<FutureRef>,
    pub value: Option<ArgValue>,
    pub from: Option<String>,
}

impl ContractOptions {
    pub fn args<I: IntoIterator<Item = ArgValue>>(args: I) -> Self {
        Self {
            args: args.into_iter().collect(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LibraryOptions {
    pub id: Option<String>,
    pub args: Vec<ArgValue>,
    pub libraries: BTreeMap<String, FutureRef>,
    pub after: Vec<FutureRef>,
    pub from: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub id: Option<String>,
    pub args: Vec<ArgValue>,
    pub after: Vec<FutureRef>,
    pub value: Option<ArgValue>,
    pub from: Option<String>,
}

impl CallOptions {
    pub fn args<I: IntoIterator<Item = ArgValue>>(args: I) -> Self {
        Self {
            args: args.into_iter().collect(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventOptions {
    pub id: Option<String>,
    pub args: Vec<ArgValue>,
    pub after: Vec<FutureRef>,
}

#[derive(Debug, Clone, Default)]
pub struct ContractAtOptions {
    pub id: Option<String>,
    pub after: Vec<FutureRef>,
}

/// Handles returned when composing a submodule.
#[derive(Debug, Clone)]
pub struct SubmoduleOutputs {
    /// Completes once every future of the submodule has completed.
    pub completed: FutureRef,
    /// Proxies of the submodule's declared outputs.
    pub outputs: BTreeMap<String, FutureRef>,
}

impl SubmoduleOutputs {
    pub fn get(&self, name: &str) -> Option<&FutureRef> {
        self.outputs.get(name)
    }
}

/// A finished module definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub id: String,
    /// Every declared future, including those of composed submodules, in
    /// declaration order.
    pub futures: Vec<FutureDef>,
    pub outputs: BTreeMap<String, FutureRef>,
}

impl Module {
    pub fn future(&self, id: &FutureId) -> Option<&FutureDef> {
        self.futures.iter().find(|def| &def.future.id == id)
    }
}

/// Records the declarations of one module.
#[derive(Debug, Clone)]
pub struct ModuleBuilder {
    id: String,
    futures: Vec<FutureDef>,
    index: HashMap<FutureId, usize>,
}

impl ModuleBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            futures: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Pick an unused local id, suffixing taken names with the lowest free `#n`.
    fn local_id(&self, requested: String) -> String {
        let taken = |local: &str| self.index.contains_key(&FutureId::new(self.id.as_str(), local));
        if !taken(&requested) {
            return requested;
        }
        (1..)
            .map(|n| format!("{}#{}", requested, n))
            .find(|candidate| !taken(candidate))
            .unwrap_or(requested)
    }

    fn declare(
        &mut self,
        local_id: String,
        kind: FutureKind,
        output: OutputKind,
        binding: Binding,
        after: Vec<FutureRef>,
        caller: &Location<'_>,
    ) -> FutureRef {
        let local_id = self.local_id(local_id);
        let future = FutureRef {
            id: FutureId::new(self.id.clone(), local_id),
            kind,
            output,
        };

        tracing::trace!(future = %future, "Declared future");

        self.index.insert(future.id.clone(), self.futures.len());
        self.futures.push(FutureDef {
            future: future.clone(),
            binding,
            after,
            call_points: vec![CallPoint::from_caller(&self.id, caller)],
        });

        future
    }

    /// Deploy a contract whose artifact is looked up by name.
    #[track_caller]
    pub fn contract(&mut self, name: &str, opts: ContractOptions) -> FutureRef {
        let (id, deployment, after) = contract_parts(name, opts);
        self.declare(
            id,
            FutureKind::Contract,
            OutputKind::Contract,
            Binding::HardhatContract(deployment),
            after,
            Location::caller(),
        )
    }

    /// Deploy a contract from an artifact supplied by the caller.
    #[track_caller]
    pub fn contract_from_artifact(
        &mut self,
        name: &str,
        artifact: Artifact,
        opts: ContractOptions,
    ) -> FutureRef {
        let (id, deployment, after) = contract_parts(name, opts);
        self.declare(
            id,
            FutureKind::Contract,
            OutputKind::Contract,
            Binding::ArtifactContract {
                artifact: Box::new(artifact),
                deployment,
            },
            after,
            Location::caller(),
        )
    }

    /// Reuse a contract already deployed at `address`.
    #[track_caller]
    pub fn contract_at(
        &mut self,
        name: &str,
        address: impl Into<ArgValue>,
        abi: JsonAbi,
    ) -> FutureRef {
        self.contract_at_with(name, address, abi, ContractAtOptions::default())
    }

    /// [`Self::contract_at`] with an explicit id or ordering edges.
    #[track_caller]
    pub fn contract_at_with(
        &mut self,
        name: &str,
        address: impl Into<ArgValue>,
        abi: JsonAbi,
        opts: ContractAtOptions,
    ) -> FutureRef {
        self.declare(
            opts.id.unwrap_or_else(|| name.to_string()),
            FutureKind::Contract,
            OutputKind::Contract,
            Binding::DeployedContract(ExistingContract {
                contract_name: name.to_string(),
                address: address.into(),
                abi,
            }),
            opts.after,
            Location::caller(),
        )
    }

    #[track_caller]
    pub fn library(&mut self, name: &str, opts: LibraryOptions) -> FutureRef {
        let (id, deployment, after) = library_parts(name, opts);
        self.declare(
            id,
            FutureKind::Library,
            OutputKind::Contract,
            Binding::HardhatLibrary(deployment),
            after,
            Location::caller(),
        )
    }

    #[track_caller]
    pub fn library_from_artifact(
        &mut self,
        name: &str,
        artifact: Artifact,
        opts: LibraryOptions,
    ) -> FutureRef {
        let (id, deployment, after) = library_parts(name, opts);
        self.declare(
            id,
            FutureKind::Library,
            OutputKind::Contract,
            Binding::ArtifactLibrary {
                artifact: Box::new(artifact),
                deployment,
            },
            after,
            Location::caller(),
        )
    }

    /// Call `method` on a deployed contract.
    #[track_caller]
    pub fn call(&mut self, contract: &FutureRef, method: &str, opts: CallOptions) -> FutureRef {
        let id = opts
            .id
            .unwrap_or_else(|| format!("{}.{}", contract.id.local_id, method));
        self.declare(
            id,
            FutureKind::Call,
            OutputKind::Tx,
            Binding::Call(CallBinding {
                contract: contract.clone(),
                method: method.to_string(),
                args: opts.args,
                value: opts.value,
                from: opts.from,
            }),
            opts.after,
            Location::caller(),
        )
    }

    /// Wait for `event` to be emitted by `emitter`.
    #[track_caller]
    pub fn event(&mut self, emitter: &FutureRef, event: &str, opts: EventOptions) -> FutureRef {
        let id = opts
            .id
            .unwrap_or_else(|| format!("{}/{}", emitter.id.local_id, event));
        self.declare(
            id,
            FutureKind::Event,
            OutputKind::Tx,
            Binding::Event(EventBinding {
                emitter: emitter.clone(),
                event: event.to_string(),
                args: opts.args,
            }),
            opts.after,
            Location::caller(),
        )
    }

    /// A named argument of an observed event.
    #[track_caller]
    pub fn event_param(&mut self, event: &FutureRef, param: &str) -> FutureRef {
        self.declare(
            format!("{}.{}", event.id.local_id, param),
            FutureKind::EventParam,
            OutputKind::String,
            Binding::EventParam {
                event: event.clone(),
                param: param.to_string(),
            },
            Vec::new(),
            Location::caller(),
        )
    }

    /// A required module parameter.
    #[track_caller]
    pub fn parameter(&mut self, name: &str, output: OutputKind) -> FutureRef {
        self.declare(
            format!("param.{}", name),
            FutureKind::Parameter,
            output,
            Binding::Parameter {
                name: name.to_string(),
                default: None,
            },
            Vec::new(),
            Location::caller(),
        )
    }

    /// An optional module parameter falling back to `default`.
    #[track_caller]
    pub fn parameter_or(&mut self, name: &str, default: impl Into<ArgValue>) -> FutureRef {
        let default = default.into();
        let output = match default {
            ArgValue::Number(_) => OutputKind::Number,
            _ => OutputKind::String,
        };
        self.declare(
            format!("param.{}", name),
            FutureKind::Parameter,
            output,
            Binding::Parameter {
                name: name.to_string(),
                default: Some(default),
            },
            Vec::new(),
            Location::caller(),
        )
    }

    /// Add an explicit ordering edge: `future` runs after `dependency`.
    ///
    /// Returns `false` if `future` was not declared by this builder.
    pub fn depends_on(&mut self, future: &FutureRef, dependency: &FutureRef) -> bool {
        match self.index.get(&future.id) {
            Some(&i) => {
                let def = &mut self.futures[i];
                if !def.after.contains(dependency) {
                    def.after.push(dependency.clone());
                }
                true
            }
            None => false,
        }
    }

    /// Compose `module` into this one.
    ///
    /// The submodule's futures are imported with their own ids; importing the same
    /// submodule twice reuses them. Its outputs are exposed through proxies that
    /// also wait for the whole submodule to complete.
    #[track_caller]
    pub fn use_module(&mut self, module: &Module) -> SubmoduleOutputs {
        let caller = Location::caller();
        let use_site = CallPoint::from_caller(&self.id, caller);

        let mut members = Vec::new();
        for def in &module.futures {
            if !matches!(def.future.kind, FutureKind::Parameter | FutureKind::Virtual) {
                members.push(def.future.clone());
            }
            if self.index.contains_key(&def.future.id) {
                continue;
            }
            let mut def = def.clone();
            def.call_points.insert(0, use_site.clone());
            self.index.insert(def.future.id.clone(), self.futures.len());
            self.futures.push(def);
        }

        let completed = self.declare(
            format!("module.{}", module.id),
            FutureKind::Virtual,
            OutputKind::String,
            Binding::Virtual { members },
            Vec::new(),
            caller,
        );

        let outputs = module
            .outputs
            .iter()
            .map(|(name, future)| {
                let proxy = self.declare(
                    format!("{}.{}", module.id, name),
                    FutureKind::Proxy,
                    future.output,
                    Binding::Proxy {
                        proxied: future.clone(),
                        module: completed.clone(),
                    },
                    Vec::new(),
                    caller,
                );
                (name.clone(), proxy)
            })
            .collect();

        SubmoduleOutputs { completed, outputs }
    }

    /// Finish the module with its declared outputs.
    pub fn build<I, K>(self, outputs: I) -> Module
    where
        I: IntoIterator<Item = (K, FutureRef)>,
        K: Into<String>,
    {
        Module {
            id: self.id,
            futures: self.futures,
            outputs: outputs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

fn contract_parts(
    name: &str,
    opts: ContractOptions,
) -> (String, ContractDeployment, Vec<FutureRef>) {
    (
        opts.id.unwrap_or_else(|| name.to_string()),
        ContractDeployment {
            contract_name: name.to_string(),
            args: opts.args,
            libraries: opts.libraries,
            value: opts.value,
            from: opts.from,
        },
        opts.after,
    )
}

fn library_parts(name: &str, opts: LibraryOptions) -> (String, LibraryDeployment, Vec<FutureRef>) {
    (
        opts.id.unwrap_or_else(|| name.to_string()),
        LibraryDeployment {
            library_name: name.to_string(),
            args: opts.args,
            libraries: opts.libraries,
            from: opts.from,
        },
        opts.after,
    )
}
