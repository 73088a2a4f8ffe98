//! Declarative TOML module manifests.
//!
//! ```toml
//! [module]
//! id = "MyModule"
//! outputs = ["bar", "usesContract"]
//!
//! [[futures]]
//! name = "bar"
//! type = "contract"
//! contract = "Bar"
//!
//! [[futures]]
//! name = "setAddress"
//! type = "call"
//! contract = "@usesContract"
//! method = "setAddress"
//! args = ["@bar"]
//! ```
//!
//! Strings starting with `@` reference an earlier entry by name.

use std::{collections::BTreeMap, path::Path};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::{
    future::{ArgValue, FutureRef, OutputKind},
    graph::ModuleParams,
    module::{
        CallOptions, ContractAtOptions, ContractOptions, EventOptions, LibraryOptions, Module, ModuleBuilder,
    },
    services::ArtifactSource,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleManifest {
    pub module: ManifestModule,
    #[serde(default)]
    pub futures: Vec<FutureEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestModule {
    pub id: String,
    /// Entry names returned from the module.
    #[serde(default)]
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FutureEntry {
    pub name: String,
    #[serde(flatten)]
    pub kind: EntryKind,
    #[serde(default)]
    pub args: Vec<toml::Value>,
    #[serde(default)]
    pub after: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EntryKind {
    Contract {
        contract: String,
        #[serde(default)]
        libraries: BTreeMap<String, String>,
        value: Option<toml::Value>,
        from: Option<String>,
    },
    Library {
        library: String,
        #[serde(default)]
        libraries: BTreeMap<String, String>,
        from: Option<String>,
    },
    /// An existing contract; its ABI comes from the artifact named `contract`.
    Deployed {
        contract: String,
        address: toml::Value,
    },
    Call {
        contract: String,
        method: String,
        value: Option<toml::Value>,
        from: Option<String>,
    },
    Event {
        emitter: String,
        event: String,
    },
    EventParam {
        event: String,
        param: String,
    },
    Parameter {
        parameter: String,
        kind: Option<OutputKind>,
        default: Option<toml::Value>,
    },
}

impl ModuleManifest {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse manifest: {}", path.display()))
    }

    /// Declare every entry on a fresh builder and finish the module.
    pub fn into_module(&self, artifacts: &dyn ArtifactSource) -> Result<Module> {
        let mut builder = ModuleBuilder::new(&self.module.id);
        let mut handles: BTreeMap<String, FutureRef> = BTreeMap::new();

        for entry in &self.futures {
            if handles.contains_key(&entry.name) {
                bail!("Duplicate future name `{}` in module {}", entry.name, self.module.id);
            }
            let handle = declare(&mut builder, entry, &handles, artifacts)
                .with_context(|| format!("Invalid future `{}`", entry.name))?;
            handles.insert(entry.name.clone(), handle);
        }

        // Ordering edges may point forward, so they are added last.
        for entry in &self.futures {
            let future = &handles[&entry.name];
            for dependency in &entry.after {
                let dependency = lookup(&handles, dependency.trim_start_matches('@'))?;
                builder.depends_on(future, dependency);
            }
        }

        let outputs = self
            .module
            .outputs
            .iter()
            .map(|name| Ok::<_, anyhow::Error>((name.clone(), lookup(&handles, name)?.clone())))
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(
            module_id = %self.module.id,
            futures = self.futures.len(),
            outputs = outputs.len(),
            "Loaded module manifest"
        );
        Ok(builder.build(outputs))
    }
}

/// Convert a TOML table of module parameters (module id -> name -> value).
///
/// Values are literals; `@name` references are rejected.
pub fn parameter_values(
    parameters: &BTreeMap<String, BTreeMap<String, toml::Value>>,
) -> Result<ModuleParams> {
    let handles = BTreeMap::new();
    parameters
        .iter()
        .map(|(module_id, values)| {
            let values: BTreeMap<String, ArgValue> = values
                .iter()
                .map(|(name, value)| {
                    let value = to_arg(value, &handles)
                        .with_context(|| format!("Invalid parameter {}.{}", module_id, name))?;
                    Ok::<_, anyhow::Error>((name.clone(), value))
                })
                .collect::<Result<_>>()?;
            Ok::<_, anyhow::Error>((module_id.clone(), values))
        })
        .collect()
}

fn declare(
    builder: &mut ModuleBuilder,
    entry: &FutureEntry,
    handles: &BTreeMap<String, FutureRef>,
    artifacts: &dyn ArtifactSource,
) -> Result<FutureRef> {
    let args = entry
        .args
        .iter()
        .map(|v| to_arg(v, handles))
        .collect::<Result<Vec<_>>>()?;
    let id = Some(entry.name.clone());

    Ok(match &entry.kind {
        EntryKind::Contract {
            contract,
            libraries,
            value,
            from,
        } => builder.contract(
            contract,
            ContractOptions {
                id,
                args,
                libraries: link(libraries, handles)?,
                value: value.as_ref().map(|v| to_arg(v, handles)).transpose()?,
                from: from.clone(),
                ..Default::default()
            },
        ),
        EntryKind::Library {
            library,
            libraries,
            from,
        } => builder.library(
            library,
            LibraryOptions {
                id,
                args,
                libraries: link(libraries, handles)?,
                from: from.clone(),
                ..Default::default()
            },
        ),
        EntryKind::Deployed { contract, address } => {
            let artifact = artifacts.get_artifact(contract)?;
            builder.contract_at_with(
                contract,
                to_arg(address, handles)?,
                artifact.abi,
                ContractAtOptions {
                    id,
                    ..Default::default()
                },
            )
        }
        EntryKind::Call {
            contract,
            method,
            value,
            from,
        } => builder.call(
            reference(contract, handles)?,
            method,
            CallOptions {
                id,
                args,
                value: value.as_ref().map(|v| to_arg(v, handles)).transpose()?,
                from: from.clone(),
                ..Default::default()
            },
        ),
        EntryKind::Event { emitter, event } => builder.event(
            reference(emitter, handles)?,
            event,
            EventOptions {
                id,
                args,
                ..Default::default()
            },
        ),
        EntryKind::EventParam { event, param } => {
            builder.event_param(reference(event, handles)?, param)
        }
        EntryKind::Parameter {
            parameter,
            kind,
            default,
        } => match default {
            Some(default) => builder.parameter_or(parameter, to_arg(default, handles)?),
            None => builder.parameter(parameter, kind.unwrap_or(OutputKind::String)),
        },
    })
}

fn lookup<'a>(handles: &'a BTreeMap<String, FutureRef>, name: &str) -> Result<&'a FutureRef> {
    handles
        .get(name)
        .with_context(|| format!("Unknown future `{}`", name))
}

/// A `@name` reference to an earlier entry.
fn reference<'a>(value: &str, handles: &'a BTreeMap<String, FutureRef>) -> Result<&'a FutureRef> {
    match value.strip_prefix('@') {
        Some(name) => lookup(handles, name),
        None => bail!("Expected a `@name` reference, got `{}`", value),
    }
}

fn link(
    libraries: &BTreeMap<String, String>,
    handles: &BTreeMap<String, FutureRef>,
) -> Result<BTreeMap<String, FutureRef>> {
    libraries
        .iter()
        .map(|(name, value)| Ok::<_, anyhow::Error>((name.clone(), reference(value, handles)?.clone())))
        .collect()
}

fn to_arg(value: &toml::Value, handles: &BTreeMap<String, FutureRef>) -> Result<ArgValue> {
    Ok(match value {
        toml::Value::String(s) => match s.strip_prefix('@') {
            Some(name) => ArgValue::from(lookup(handles, name)?),
            None => ArgValue::String(s.clone()),
        },
        toml::Value::Integer(n) => ArgValue::Number(*n),
        toml::Value::Boolean(b) => ArgValue::Bool(*b),
        toml::Value::Float(f) => bail!("Floating point arguments are not supported: {}", f),
        toml::Value::Datetime(d) => ArgValue::String(d.to_string()),
        toml::Value::Array(items) => ArgValue::Sequence(
            items
                .iter()
                .map(|item| to_arg(item, handles))
                .collect::<Result<_>>()?,
        ),
        toml::Value::Table(fields) => ArgValue::Struct(
            fields
                .iter()
                .map(|(k, v)| Ok::<_, anyhow::Error>((k.clone(), to_arg(v, handles)?)))
                .collect::<Result<_>>()?,
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        future::FutureKind,
        graph::{GraphError, ModuleParams, build_deployment_graph},
    };

    const MANIFEST: &str = r#"
[module]
id = "MyModule"
outputs = ["bar", "usesContract"]

[[futures]]
name = "bar"
type = "contract"
contract = "Bar"

[[futures]]
name = "usesContract"
type = "contract"
contract = "UsesContract"
args = ["0x0000000000000000000000000000000000000000"]

[[futures]]
name = "setAddress"
type = "call"
contract = "@usesContract"
method = "setAddress"
args = ["@bar"]
"#;

    fn no_artifacts() -> BTreeMap<String, crate::services::Artifact> {
        BTreeMap::new()
    }

    #[test]
    fn test_manifest_builds_module() {
        let manifest: ModuleManifest = toml::from_str(MANIFEST).unwrap();
        let module = manifest.into_module(&no_artifacts()).unwrap();

        assert_eq!(module.id, "MyModule");
        assert_eq!(module.futures.len(), 3);
        assert_eq!(module.outputs["bar"].kind, FutureKind::Contract);

        let graph = build_deployment_graph(&module, &ModuleParams::new()).unwrap();
        assert_eq!(graph.len(), 3);
        let call = graph.find("MyModule:setAddress").unwrap();
        assert_eq!(call.dependencies.len(), 2);
    }

    #[test]
    fn test_unknown_reference() {
        let manifest: ModuleManifest = toml::from_str(
            r#"
[module]
id = "M"

[[futures]]
name = "call"
type = "call"
contract = "@missing"
method = "poke"
"#,
        )
        .unwrap();

        let err = manifest.into_module(&no_artifacts()).unwrap_err();
        assert!(format!("{:#}", err).contains("Unknown future `missing`"));
    }

    #[test]
    fn test_after_edges_can_form_cycles() {
        let manifest: ModuleManifest = toml::from_str(
            r#"
[module]
id = "M"
outputs = ["x"]

[[futures]]
name = "x"
type = "contract"
contract = "X"
after = ["@y"]

[[futures]]
name = "y"
type = "contract"
contract = "Y"
args = ["@x"]
"#,
        )
        .unwrap();

        let module = manifest.into_module(&no_artifacts()).unwrap();
        assert!(matches!(
            build_deployment_graph(&module, &ModuleParams::new()),
            Err(GraphError::CyclicGraph { .. })
        ));
    }

    #[test]
    fn test_parameters_and_nested_args() {
        let manifest: ModuleManifest = toml::from_str(
            r#"
[module]
id = "M"
outputs = ["token"]

[[futures]]
name = "supply"
type = "parameter"
parameter = "supply"
default = 1000

[[futures]]
name = "token"
type = "contract"
contract = "Token"
args = ["@supply", { holders = ["0x0000000000000000000000000000000000000001"], live = true }]
"#,
        )
        .unwrap();

        let module = manifest.into_module(&no_artifacts()).unwrap();
        let token = module.future(&module.outputs["token"].id).unwrap();
        match &token.binding {
            crate::module::Binding::HardhatContract(d) => {
                assert_eq!(d.args.len(), 2);
                assert!(matches!(d.args[1], ArgValue::Struct(_)));
            }
            other => panic!("unexpected binding {other:?}"),
        }
    }

    #[test]
    fn test_deployed_entry_keeps_contract_name() {
        let manifest: ModuleManifest = toml::from_str(
            r#"
[module]
id = "M"
outputs = ["registry"]

[[futures]]
name = "registry"
type = "deployed"
contract = "Registry"
address = "0x0000000000000000000000000000000000000001"
"#,
        )
        .unwrap();

        let artifacts = BTreeMap::from([(
            "Registry".to_string(),
            crate::services::Artifact {
                contract_name: "Registry".to_string(),
                source_name: "contracts/Registry.sol".to_string(),
                abi: Default::default(),
                bytecode: "0x".to_string(),
                link_references: Default::default(),
            },
        )]);
        let module = manifest.into_module(&artifacts).unwrap();
        let registry = &module.outputs["registry"];
        assert_eq!(registry.id.local_id, "registry");

        match &module.future(&registry.id).unwrap().binding {
            crate::module::Binding::DeployedContract(existing) => {
                assert_eq!(existing.contract_name, "Registry");
            }
            other => panic!("unexpected binding {other:?}"),
        }
    }

    #[test]
    fn test_parameter_values_are_literals() {
        let parameters: BTreeMap<String, BTreeMap<String, toml::Value>> = toml::from_str(
            r#"
[Token]
supply = 1000
symbol = "TKN"

[Other]
target = "@token"
"#,
        )
        .unwrap();

        let err = parameter_values(&parameters).unwrap_err();
        assert!(format!("{:#}", err).contains("Invalid parameter Other.target"));

        let mut parameters = parameters;
        parameters.remove("Other");
        let values = parameter_values(&parameters).unwrap();
        assert_eq!(values["Token"]["supply"], ArgValue::Number(1000));
        assert_eq!(values["Token"]["symbol"], ArgValue::String("TKN".to_string()));
    }
}
