//! Deployment run state and its reducer.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{
    bindings::{BindingOutput, ModuleResult, TxHandle},
    future::OutputKind,
    graph::VertexId,
    transform::StepKind,
};

use super::{DeployStateCommand, GraphHeader};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, strum::IntoStaticStr)]
#[serde(tag = "status", rename_all = "camelCase")]
#[strum(serialize_all = "kebab-case")]
pub enum VertexStatus {
    Unstarted,
    Started,
    AwaitingConfirmation {
        tx: TxHandle,
    },
    Completed {
        output: BindingOutput,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        event_params: BTreeMap<String, String>,
    },
    Failed {
        reason: String,
    },
    /// A dependency failed or was blocked; this vertex will never start.
    Blocked {
        dependency: VertexId,
    },
}

impl VertexStatus {
    pub fn name(&self) -> &'static str {
        self.into()
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Failed or blocked: nothing depending on this vertex can run.
    pub fn is_dead(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::Blocked { .. })
    }

    pub fn is_terminal(&self) -> bool {
        self.is_completed() || self.is_dead()
    }
}

/// Where the run as a whole stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RunPhase {
    /// Some vertex can still make progress.
    Running,
    /// Every vertex completed.
    Completed,
    /// Nothing left to do, and at least one vertex failed.
    Failed,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        self != Self::Running
    }
}

/// Why a command left the state unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("vertex {0} is not part of this deployment")]
    UnknownVertex(VertexId),
    #[error("vertex {vertex} is waiting for dependency {dependency}")]
    DependencyPending {
        vertex: VertexId,
        dependency: VertexId,
    },
    #[error("{step} vertex {vertex} cannot accept `{command}` while {status}")]
    InvalidTransition {
        vertex: VertexId,
        step: StepKind,
        status: &'static str,
        command: &'static str,
    },
    #[error("{step} vertex {vertex} must produce a `{expected}` output, got `{found}`")]
    OutputKind {
        vertex: VertexId,
        step: StepKind,
        expected: OutputKind,
        found: OutputKind,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StepInfo {
    label: String,
    step: StepKind,
    dependencies: Vec<VertexId>,
}

/// State of one deployment run.
///
/// Only [`DeployState::apply`] mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployState {
    module_id: String,
    steps: BTreeMap<VertexId, StepInfo>,
    module_outputs: BTreeMap<String, VertexId>,
    vertices: BTreeMap<VertexId, VertexStatus>,
    history: Vec<DeployStateCommand>,
    /// Outputs of completed vertices keyed by `Module:local` label.
    outputs: BTreeMap<String, BindingOutput>,
}

/// Apply `command`, leaving the state unchanged if it is not valid now.
pub fn deploy_state_reducer(mut state: DeployState, command: &DeployStateCommand) -> DeployState {
    let _ = state.apply(command.clone());
    state
}

impl DeployState {
    /// A fresh run where every vertex is unstarted.
    pub fn new(header: &GraphHeader) -> Self {
        Self {
            module_id: header.module_id.clone(),
            steps: header
                .vertices
                .iter()
                .map(|v| {
                    (
                        v.id,
                        StepInfo {
                            label: v.label.clone(),
                            step: v.step,
                            dependencies: v.dependencies.clone(),
                        },
                    )
                })
                .collect(),
            module_outputs: header.outputs.clone(),
            vertices: header
                .vertices
                .iter()
                .map(|v| (v.id, VertexStatus::Unstarted))
                .collect(),
            history: Vec::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Rebuild a run by folding the reducer over journaled commands.
    pub fn replay<'a, I>(header: &GraphHeader, commands: I) -> Self
    where
        I: IntoIterator<Item = &'a DeployStateCommand>,
    {
        commands
            .into_iter()
            .fold(Self::new(header), deploy_state_reducer)
    }

    /// Rebuild a run for another attempt.
    ///
    /// Completed vertices and vertices with a submitted transaction keep their
    /// commands; every other vertex goes back to unstarted.
    pub fn resume(header: &GraphHeader, commands: &[DeployStateCommand]) -> Self {
        let previous = Self::replay(header, commands);
        let kept: BTreeSet<VertexId> = previous
            .vertices
            .iter()
            .filter(|(_, status)| {
                matches!(
                    status,
                    VertexStatus::Completed { .. } | VertexStatus::AwaitingConfirmation { .. }
                )
            })
            .map(|(id, _)| *id)
            .collect();

        Self::replay(
            header,
            previous
                .history
                .iter()
                .filter(|command| kept.contains(&command.vertex())),
        )
    }

    /// Apply one command.
    ///
    /// On success the command is recorded in the history and failure is
    /// propagated to dependents. A rejected command changes nothing.
    pub fn apply(&mut self, command: DeployStateCommand) -> Result<(), Rejection> {
        let vertex = command.vertex();
        let next = self.transition(&command)?;

        if let VertexStatus::Completed { output, .. } = &next {
            if let Some(info) = self.steps.get(&vertex) {
                self.outputs.insert(info.label.clone(), output.clone());
            }
        }
        self.vertices.insert(vertex, next);
        self.history.push(command);
        self.propagate_blocked();

        Ok(())
    }

    fn transition(&self, command: &DeployStateCommand) -> Result<VertexStatus, Rejection> {
        use DeployStateCommand as C;
        use VertexStatus as S;

        let vertex = command.vertex();
        let (info, status) = match (self.steps.get(&vertex), self.vertices.get(&vertex)) {
            (Some(info), Some(status)) => (info, status),
            _ => return Err(Rejection::UnknownVertex(vertex)),
        };
        let sends = info.step.sends_transaction();

        match (status, command) {
            (S::Unstarted, C::Start { .. }) => {
                match info
                    .dependencies
                    .iter()
                    .find(|dep| !self.status(**dep).is_some_and(VertexStatus::is_completed))
                {
                    Some(dependency) => Err(Rejection::DependencyPending {
                        vertex,
                        dependency: *dependency,
                    }),
                    None => Ok(S::Started),
                }
            }
            (S::Started, C::TransactionSent { tx, .. }) if sends => {
                Ok(S::AwaitingConfirmation { tx: *tx })
            }
            (S::AwaitingConfirmation { .. }, C::Confirmed { result, .. }) if sends => {
                self.check_output(vertex, info.step, result)?;
                Ok(S::Completed {
                    output: result.clone(),
                    event_params: BTreeMap::new(),
                })
            }
            (S::Started, C::Confirmed { result, .. })
                if matches!(info.step, StepKind::StaticCall | StepKind::UseExisting) =>
            {
                self.check_output(vertex, info.step, result)?;
                Ok(S::Completed {
                    output: result.clone(),
                    event_params: BTreeMap::new(),
                })
            }
            (S::Started | S::AwaitingConfirmation { .. }, C::EventObserved { tx, params, .. })
                if info.step == StepKind::AwaitEvent =>
            {
                Ok(S::Completed {
                    output: BindingOutput::Tx(*tx),
                    event_params: params.clone(),
                })
            }
            (S::Started | S::AwaitingConfirmation { .. }, C::Reverted { reason, .. }) => {
                Ok(S::Failed {
                    reason: reason.clone(),
                })
            }
            (S::Started | S::AwaitingConfirmation { .. }, C::Timeout { .. }) => Ok(S::Failed {
                reason: "timed out waiting for confirmation".to_string(),
            }),
            _ => Err(Rejection::InvalidTransition {
                vertex,
                step: info.step,
                status: status.name(),
                command: command.name(),
            }),
        }
    }

    /// Deployments and existing contracts yield contracts, calls yield transactions.
    fn check_output(
        &self,
        vertex: VertexId,
        step: StepKind,
        output: &BindingOutput,
    ) -> Result<(), Rejection> {
        let expected = match step {
            StepKind::DeployContract | StepKind::DeployLibrary | StepKind::UseExisting => {
                OutputKind::Contract
            }
            StepKind::Call | StepKind::AwaitEvent => OutputKind::Tx,
            StepKind::StaticCall => return Ok(()),
        };
        if output.kind() != expected {
            return Err(Rejection::OutputKind {
                vertex,
                step,
                expected,
                found: output.kind(),
            });
        }
        Ok(())
    }

    /// Mark unstarted vertices with a dead dependency as blocked, to a fixpoint.
    fn propagate_blocked(&mut self) {
        loop {
            let newly_blocked: Vec<(VertexId, VertexId)> = self
                .vertices
                .iter()
                .filter(|(_, status)| matches!(status, VertexStatus::Unstarted))
                .filter_map(|(id, _)| {
                    let info = self.steps.get(id)?;
                    info.dependencies
                        .iter()
                        .find(|dep| self.status(**dep).is_some_and(VertexStatus::is_dead))
                        .map(|dep| (*id, *dep))
                })
                .collect();

            if newly_blocked.is_empty() {
                return;
            }
            for (id, dependency) in newly_blocked {
                self.vertices.insert(id, VertexStatus::Blocked { dependency });
            }
        }
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub fn status(&self, vertex: VertexId) -> Option<&VertexStatus> {
        self.vertices.get(&vertex)
    }

    pub fn statuses(&self) -> &BTreeMap<VertexId, VertexStatus> {
        &self.vertices
    }

    pub fn label(&self, vertex: VertexId) -> Option<&str> {
        self.steps.get(&vertex).map(|info| info.label.as_str())
    }

    pub fn step(&self, vertex: VertexId) -> Option<StepKind> {
        self.steps.get(&vertex).map(|info| info.step)
    }

    pub fn history(&self) -> &[DeployStateCommand] {
        &self.history
    }

    /// Completed outputs keyed by `Module:local` label.
    pub fn outputs(&self) -> &BTreeMap<String, BindingOutput> {
        &self.outputs
    }

    /// Unstarted vertices whose dependencies have all completed.
    pub fn eligible(&self) -> Vec<VertexId> {
        self.vertices
            .iter()
            .filter(|(_, status)| matches!(status, VertexStatus::Unstarted))
            .filter(|(id, _)| {
                self.steps.get(*id).is_some_and(|info| {
                    info.dependencies
                        .iter()
                        .all(|dep| self.status(*dep).is_some_and(VertexStatus::is_completed))
                })
            })
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn phase(&self) -> RunPhase {
        if self.vertices.values().any(|s| !s.is_terminal()) {
            RunPhase::Running
        } else if self.vertices.values().all(VertexStatus::is_completed) {
            RunPhase::Completed
        } else {
            RunPhase::Failed
        }
    }

    /// Declared module outputs that have completed, by output name.
    pub fn module_result(&self) -> ModuleResult {
        self.module_outputs
            .iter()
            .filter_map(|(name, vertex)| match self.status(*vertex)? {
                VertexStatus::Completed { output, .. } => Some((name.clone(), output.clone())),
                _ => None,
            })
            .collect()
    }
}
