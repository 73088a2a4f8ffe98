//! An in-process executor that answers every step without a chain.
//!
//! Addresses and transaction hashes are derived from vertex labels, so running
//! the same plan twice yields the same results.

use std::{collections::BTreeSet, time::Duration};

use alloy_core::primitives::{Address, B256, keccak256};
use anyhow::{Context, Result, bail};
use ignis_core::{
    BindingOutput, ContractHandle, DeployCoordinator, DeploySnapshot, DeployStateCommand,
    ExecutionGraph, ExecutionKind, ExecutionVertex, Placeholder, TxHandle, VertexId,
    VertexStatus, services::parse_address,
};
use serde_json::Value;

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Simulator<'a> {
    graph: &'a ExecutionGraph,
    /// Labels of vertices that revert instead of confirming.
    revert: BTreeSet<String>,
}

impl<'a> Simulator<'a> {
    pub fn new(graph: &'a ExecutionGraph, revert: impl IntoIterator<Item = String>) -> Self {
        Self {
            graph,
            revert: revert.into_iter().collect(),
        }
    }

    /// Drive the run until it completes or fails.
    pub async fn run(&self, coordinator: &DeployCoordinator) -> Result<()> {
        let mut snapshots = coordinator.subscribe();

        loop {
            let snapshot = coordinator.snapshot();
            if snapshot.phase.is_terminal() {
                return Ok(());
            }

            // Transactions recorded by an earlier attempt are confirmed first.
            let pending: Vec<VertexId> = snapshot
                .statuses
                .iter()
                .filter(|(_, status)| matches!(status, VertexStatus::AwaitingConfirmation { .. }))
                .map(|(id, _)| *id)
                .chain(snapshot.eligible.iter().copied())
                .collect();
            if pending.is_empty() {
                bail!("No vertex can make progress in phase {}", snapshot.phase);
            }

            for id in pending {
                for command in self.commands(id, &snapshot)? {
                    coordinator.send(command).await?;
                }

                tokio::time::timeout(
                    STEP_TIMEOUT,
                    snapshots.wait_for(|s| s.statuses.get(&id).is_some_and(VertexStatus::is_terminal)),
                )
                .await
                .with_context(|| format!("Vertex {} did not settle", id))?
                .context("Deployment coordinator has stopped")?;
            }
        }
    }

    /// The commands a chain would produce for one step.
    fn commands(&self, id: VertexId, snapshot: &DeploySnapshot) -> Result<Vec<DeployStateCommand>> {
        let vertex = self
            .graph
            .vertex(id)
            .with_context(|| format!("Vertex {} is not part of the plan", id))?;
        let fresh = matches!(snapshot.statuses.get(&id), Some(VertexStatus::Unstarted));

        for placeholder in vertex.kind.placeholders() {
            if resolve(placeholder, snapshot).is_none() {
                bail!(
                    "{} reads the output of vertex {} before it is available",
                    vertex.label,
                    placeholder.vertex
                );
            }
        }

        let tx = TxHandle {
            hash: simulated_hash(&vertex.label),
        };
        let mut commands = Vec::new();
        if fresh {
            commands.push(DeployStateCommand::Start { vertex: id });
        }

        if self.revert.contains(&vertex.label) {
            commands.push(DeployStateCommand::Reverted {
                vertex: id,
                reason: "reverted by simulation".to_string(),
            });
            return Ok(commands);
        }

        let sends = vertex.step().sends_transaction();
        if sends && fresh {
            commands.push(DeployStateCommand::TransactionSent { vertex: id, tx });
        }

        let result = match &vertex.kind {
            ExecutionKind::DeployContract {
                contract_name,
                artifact,
                ..
            }
            | ExecutionKind::DeployLibrary {
                library_name: contract_name,
                artifact,
                ..
            } => BindingOutput::Contract(ContractHandle {
                name: contract_name.clone(),
                address: simulated_address(&vertex.label),
                abi: artifact.abi.clone(),
            }),
            ExecutionKind::Call { .. } => BindingOutput::Tx(tx),
            ExecutionKind::StaticCall { .. } => BindingOutput::String("0x".to_string()),
            ExecutionKind::AwaitEvent { .. } => {
                commands.push(DeployStateCommand::EventObserved {
                    vertex: id,
                    tx,
                    params: self.event_params(vertex),
                });
                return Ok(commands);
            }
            ExecutionKind::UseExisting {
                contract_name,
                address,
                abi,
            } => {
                let value = address
                    .substitute(&mut |p| resolve(p, snapshot))
                    .with_context(|| format!("{} has an unresolved address", vertex.label))?;
                let address = value
                    .as_str()
                    .and_then(parse_address)
                    .with_context(|| format!("{} resolved to an invalid address: {}", vertex.label, value))?;
                BindingOutput::Contract(ContractHandle {
                    name: contract_name.clone(),
                    address,
                    abi: abi.clone(),
                })
            }
        };
        commands.push(DeployStateCommand::Confirmed { vertex: id, result });

        tracing::debug!(vertex_id = id, label = %vertex.label, step = %vertex.step(), "Simulated step");
        Ok(commands)
    }

    /// Values for every event argument some other vertex reads.
    fn event_params(&self, event: &ExecutionVertex) -> std::collections::BTreeMap<String, String> {
        self.graph
            .vertices
            .values()
            .flat_map(|v| v.kind.placeholders())
            .filter(|p| p.vertex == event.id)
            .filter_map(|p| p.field.clone())
            .map(|field| {
                let value = simulated_address(&format!("{}.{}", event.label, field));
                (field, value.to_string())
            })
            .collect()
    }
}

fn simulated_hash(seed: &str) -> B256 {
    keccak256(seed.as_bytes())
}

fn simulated_address(seed: &str) -> Address {
    Address::from_word(simulated_hash(seed))
}

/// The runtime value a placeholder stands for, once its vertex completed.
fn resolve(placeholder: &Placeholder, snapshot: &DeploySnapshot) -> Option<Value> {
    let VertexStatus::Completed {
        output,
        event_params,
    } = snapshot.statuses.get(&placeholder.vertex)?
    else {
        return None;
    };

    if let Some(field) = &placeholder.field {
        return event_params.get(field).cloned().map(Value::String);
    }
    Some(match output {
        BindingOutput::String(s) => Value::String(s.clone()),
        BindingOutput::Number(n) => Value::from(*n),
        BindingOutput::Contract(contract) => Value::String(contract.address.to_string()),
        BindingOutput::Tx(tx) => Value::String(tx.hash.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use ignis_core::{OutputKind, RunPhase};

    fn snapshot(statuses: BTreeMap<VertexId, VertexStatus>) -> DeploySnapshot {
        DeploySnapshot {
            eligible: vec![],
            statuses,
            phase: RunPhase::Running,
        }
    }

    #[test]
    fn test_resolve_reads_completed_outputs() {
        let address = simulated_address("M:A");
        let snapshot = snapshot(BTreeMap::from([
            (
                0,
                VertexStatus::Completed {
                    output: BindingOutput::Contract(ContractHandle {
                        name: "A".to_string(),
                        address,
                        abi: Default::default(),
                    }),
                    event_params: BTreeMap::new(),
                },
            ),
            (
                1,
                VertexStatus::Completed {
                    output: BindingOutput::Tx(TxHandle {
                        hash: simulated_hash("M:A.Created"),
                    }),
                    event_params: BTreeMap::from([("owner".to_string(), "0xabc".to_string())]),
                },
            ),
            (2, VertexStatus::Started),
        ]));

        let contract = Placeholder {
            vertex: 0,
            output: OutputKind::Contract,
            field: None,
        };
        assert_eq!(
            resolve(&contract, &snapshot),
            Some(Value::String(address.to_string()))
        );

        let param = Placeholder {
            vertex: 1,
            output: OutputKind::String,
            field: Some("owner".to_string()),
        };
        assert_eq!(resolve(&param, &snapshot), Some(Value::String("0xabc".to_string())));

        let pending = Placeholder {
            vertex: 2,
            output: OutputKind::Contract,
            field: None,
        };
        assert_eq!(resolve(&pending, &snapshot), None);
    }

    #[test]
    fn test_simulated_values_are_stable() {
        assert_eq!(simulated_address("M:A"), simulated_address("M:A"));
        assert_ne!(simulated_address("M:A"), simulated_address("M:B"));
    }
}
