use serde::{Deserialize, Serialize};

use crate::domain::operation::ParamKey;

/// Where the pending mutation of a session sits in the confirmation handshake.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingStatus {
    #[default]
    None,
    CollectingParameters,
    AwaitingConfirmation,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateEvent {
    MutationRequested,
    ParametersSupplied,
    Affirmed,
    Declined,
    Corrected,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GateContext {
    pub missing_parameters: Vec<ParamKey>,
}

impl GateContext {
    pub fn missing(missing_parameters: Vec<ParamKey>) -> Self {
        Self { missing_parameters }
    }

    pub fn complete() -> Self {
        Self::default()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateAction {
    PromptForMissingParameters,
    RequestConfirmation,
    ExecuteOperation,
    AbandonNegotiation,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: PendingStatus,
    pub to: PendingStatus,
    pub event: GateEvent,
    pub actions: Vec<GateAction>,
}

impl TransitionOutcome {
    pub fn executes(&self) -> bool {
        self.actions.contains(&GateAction::ExecuteOperation)
    }
}
