//! Execution of an execution graph: the reducer, its journal and the
//! coordinating actor.

mod command;
mod coordinator;
mod journal;
mod state;

pub use command::DeployStateCommand;
pub use coordinator::{CommandSender, DeployCoordinator, DeploySnapshot};
pub use journal::{DeployJournal, GraphHeader, HeaderVertex};
pub use state::{DeployState, Rejection, RunPhase, VertexStatus, deploy_state_reducer};
