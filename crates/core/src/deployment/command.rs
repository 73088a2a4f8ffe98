use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    bindings::{BindingOutput, TxHandle},
    graph::VertexId,
};

/// Something the executor observed about one vertex.
///
/// Commands are the only input of the reducer and the unit of the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, strum::IntoStaticStr)]
#[serde(tag = "command", rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum DeployStateCommand {
    Start {
        vertex: VertexId,
    },
    TransactionSent {
        vertex: VertexId,
        tx: TxHandle,
    },
    Confirmed {
        vertex: VertexId,
        result: BindingOutput,
    },
    Reverted {
        vertex: VertexId,
        reason: String,
    },
    EventObserved {
        vertex: VertexId,
        tx: TxHandle,
        #[serde(default)]
        params: BTreeMap<String, String>,
    },
    Timeout {
        vertex: VertexId,
    },
}

impl DeployStateCommand {
    pub fn vertex(&self) -> VertexId {
        match self {
            Self::Start { vertex }
            | Self::TransactionSent { vertex, .. }
            | Self::Confirmed { vertex, .. }
            | Self::Reverted { vertex, .. }
            | Self::EventObserved { vertex, .. }
            | Self::Timeout { vertex } => *vertex,
        }
    }

    pub fn name(&self) -> &'static str {
        self.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_format() {
        let command = DeployStateCommand::Reverted {
            vertex: 3,
            reason: "out of gas".to_string(),
        };
        let json = serde_json::to_value(&command).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "command": "reverted", "vertex": 3, "reason": "out of gas" })
        );
        assert_eq!(command.name(), "reverted");

        let sent: DeployStateCommand = serde_json::from_value(serde_json::json!({
            "command": "transactionSent",
            "vertex": 1,
            "tx": { "hash": format!("0x{}", "ab".repeat(32)) }
        }))
        .unwrap();
        assert_eq!(sent.vertex(), 1);
        assert_eq!(sent.name(), "transactionSent");
    }
}
