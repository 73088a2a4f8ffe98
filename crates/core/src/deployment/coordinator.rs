//! The single owner of a run's [`DeployState`].
//!
//! Executors submit commands over a channel from any number of tasks; one task
//! applies them in arrival order, journals them and publishes a snapshot.

use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

use crate::graph::VertexId;

use super::{DeployJournal, DeployState, DeployStateCommand, RunPhase, VertexStatus};

const COMMAND_BUFFER: usize = 64;

/// What executors see after every applied command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploySnapshot {
    pub eligible: Vec<VertexId>,
    pub statuses: BTreeMap<VertexId, VertexStatus>,
    pub phase: RunPhase,
}

impl DeploySnapshot {
    fn of(state: &DeployState) -> Self {
        Self {
            eligible: state.eligible(),
            statuses: state.statuses().clone(),
            phase: state.phase(),
        }
    }
}

/// A cloneable sender for executor tasks.
#[derive(Debug, Clone)]
pub struct CommandSender(mpsc::Sender<DeployStateCommand>);

impl CommandSender {
    pub async fn send(&self, command: DeployStateCommand) -> Result<()> {
        self.0
            .send(command)
            .await
            .map_err(|_| anyhow!("Deployment coordinator has stopped"))
    }
}

pub struct DeployCoordinator {
    commands: CommandSender,
    snapshots: watch::Receiver<DeploySnapshot>,
    task: JoinHandle<Result<DeployState>>,
}

impl DeployCoordinator {
    /// Start the coordinating task.
    ///
    /// Without a journal, applied commands are only kept in memory.
    pub fn spawn(state: DeployState, journal: Option<DeployJournal>) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (snapshot_tx, snapshot_rx) = watch::channel(DeploySnapshot::of(&state));

        let task = tokio::spawn(run(state, journal, command_rx, snapshot_tx));

        Self {
            commands: CommandSender(command_tx),
            snapshots: snapshot_rx,
            task,
        }
    }

    pub fn sender(&self) -> CommandSender {
        self.commands.clone()
    }

    pub async fn send(&self, command: DeployStateCommand) -> Result<()> {
        self.commands.send(command).await
    }

    pub fn subscribe(&self) -> watch::Receiver<DeploySnapshot> {
        self.snapshots.clone()
    }

    pub fn snapshot(&self) -> DeploySnapshot {
        self.snapshots.borrow().clone()
    }

    /// Stop accepting commands and wait for the final state.
    ///
    /// Returns once the run is terminal or every [`CommandSender`] is dropped.
    pub async fn finish(self) -> Result<DeployState> {
        drop(self.commands);
        self.task.await.context("Deployment coordinator task panicked")?
    }
}

async fn run(
    mut state: DeployState,
    mut journal: Option<DeployJournal>,
    mut commands: mpsc::Receiver<DeployStateCommand>,
    snapshots: watch::Sender<DeploySnapshot>,
) -> Result<DeployState> {
    tracing::info!(
        module_id = %state.module_id(),
        eligible = ?state.eligible(),
        phase = %state.phase(),
        "Deployment coordinator started"
    );

    while !state.phase().is_terminal() {
        let Some(command) = commands.recv().await else {
            tracing::debug!("All command senders dropped");
            break;
        };

        let vertex = command.vertex();
        let name = command.name();
        match state.apply(command.clone()) {
            Ok(()) => {
                if let Some(journal) = journal.as_mut() {
                    journal.append(&command)?;
                }
                tracing::debug!(
                    vertex_id = vertex,
                    label = state.label(vertex).unwrap_or_default(),
                    command = name,
                    status = state.status(vertex).map(VertexStatus::name).unwrap_or_default(),
                    "Applied command"
                );
                snapshots.send_replace(DeploySnapshot::of(&state));
            }
            Err(rejection) => {
                tracing::warn!(vertex_id = vertex, command = name, %rejection, "Rejected command");
            }
        }
    }

    tracing::info!(
        module_id = %state.module_id(),
        phase = %state.phase(),
        applied = state.history().len(),
        "Deployment coordinator stopped"
    );
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bindings::{BindingOutput, ContractHandle},
        deployment::{GraphHeader, HeaderVertex},
        transform::StepKind,
    };
    use alloy_core::primitives::Address;

    fn header() -> GraphHeader {
        GraphHeader {
            module_id: "M".to_string(),
            graph_hash: "h".to_string(),
            vertices: vec![
                HeaderVertex {
                    id: 0,
                    label: "M:A".to_string(),
                    step: StepKind::UseExisting,
                    dependencies: vec![],
                },
                HeaderVertex {
                    id: 1,
                    label: "M:A.get".to_string(),
                    step: StepKind::StaticCall,
                    dependencies: vec![0],
                },
            ],
            outputs: BTreeMap::from([("a".to_string(), 0)]),
        }
    }

    fn contract() -> BindingOutput {
        BindingOutput::Contract(ContractHandle {
            name: "A".to_string(),
            address: Address::with_last_byte(1),
            abi: Default::default(),
        })
    }

    #[tokio::test]
    async fn test_coordinator_runs_to_completion() {
        let coordinator = DeployCoordinator::spawn(DeployState::new(&header()), None);
        let mut snapshots = coordinator.subscribe();
        assert_eq!(coordinator.snapshot().eligible, vec![0]);

        // Rejected: the dependency has not completed.
        coordinator.send(DeployStateCommand::Start { vertex: 1 }).await.unwrap();
        coordinator.send(DeployStateCommand::Start { vertex: 0 }).await.unwrap();
        coordinator
            .send(DeployStateCommand::Confirmed {
                vertex: 0,
                result: contract(),
            })
            .await
            .unwrap();

        snapshots
            .wait_for(|s| s.eligible == vec![1])
            .await
            .unwrap();

        let sender = coordinator.sender();
        sender.send(DeployStateCommand::Start { vertex: 1 }).await.unwrap();
        sender
            .send(DeployStateCommand::Confirmed {
                vertex: 1,
                result: BindingOutput::Number(7),
            })
            .await
            .unwrap();
        drop(sender);

        let state = coordinator.finish().await.unwrap();
        assert_eq!(state.phase(), RunPhase::Completed);
        assert_eq!(state.history().len(), 4);
        assert_eq!(state.module_result()["a"], contract());
    }

    #[tokio::test]
    async fn test_dropping_senders_stops_the_run() {
        let coordinator = DeployCoordinator::spawn(DeployState::new(&header()), None);
        coordinator.send(DeployStateCommand::Start { vertex: 0 }).await.unwrap();

        let state = coordinator.finish().await.unwrap();
        assert_eq!(state.phase(), RunPhase::Running);
        assert_eq!(state.status(0), Some(&VertexStatus::Started));
    }
}
