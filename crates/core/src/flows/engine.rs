use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::operation::ParamKey;
use crate::flows::states::{GateAction, GateContext, GateEvent, PendingStatus, TransitionOutcome};

pub trait FlowDefinition {
    fn initial_state(&self) -> PendingStatus;
    fn transition(
        &self,
        current: &PendingStatus,
        event: &GateEvent,
        context: &GateContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// Collect, confirm, execute. The only path to `ExecuteOperation` runs
/// through `AwaitingConfirmation`.
#[derive(Clone, Debug, Default)]
pub struct ConfirmationFlow;

impl FlowDefinition for ConfirmationFlow {
    fn initial_state(&self) -> PendingStatus {
        PendingStatus::None
    }

    fn transition(
        &self,
        current: &PendingStatus,
        event: &GateEvent,
        context: &GateContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_confirmation(current, event, context)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> PendingStatus {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &PendingStatus,
        event: &GateEvent,
        context: &GateContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &PendingStatus,
        event: &GateEvent,
        context: &GateContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::from_context(
                        audit,
                        "gate.transition_applied",
                        AuditCategory::Gate,
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", format!("{:?}", outcome.from))
                    .with_metadata("to", format!("{:?}", outcome.to))
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::from_context(
                        audit,
                        "gate.transition_rejected",
                        AuditCategory::Gate,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<ConfirmationFlow> {
    fn default() -> Self {
        Self::new(ConfirmationFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("missing required parameters while {state:?}: {missing_parameters:?}")]
    MissingRequiredFields { state: PendingStatus, missing_parameters: Vec<ParamKey> },
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: PendingStatus, event: GateEvent },
}

fn transition_confirmation(
    current: &PendingStatus,
    event: &GateEvent,
    context: &GateContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use GateAction::{
        AbandonNegotiation, ExecuteOperation, PromptForMissingParameters, RequestConfirmation,
    };
    use GateEvent::{Affirmed, Corrected, Declined, MutationRequested, ParametersSupplied};
    use PendingStatus::{AwaitingConfirmation, CollectingParameters, None};

    let (to, actions) = match (current, event) {
        (None, MutationRequested)
        | (CollectingParameters, ParametersSupplied)
        | (CollectingParameters, MutationRequested)
        | (AwaitingConfirmation, Corrected) => {
            if context.missing_parameters.is_empty() {
                (AwaitingConfirmation, vec![RequestConfirmation])
            } else {
                (CollectingParameters, vec![PromptForMissingParameters])
            }
        }
        (AwaitingConfirmation, Affirmed) => {
            if !context.missing_parameters.is_empty() {
                return Err(FlowTransitionError::MissingRequiredFields {
                    state: *current,
                    missing_parameters: context.missing_parameters.clone(),
                });
            }
            (None, vec![ExecuteOperation])
        }
        (CollectingParameters, Affirmed) => {
            return Err(FlowTransitionError::MissingRequiredFields {
                state: *current,
                missing_parameters: context.missing_parameters.clone(),
            });
        }
        (CollectingParameters, Declined) | (AwaitingConfirmation, Declined) => {
            (None, vec![AbandonNegotiation])
        }
        _ => {
            return Err(FlowTransitionError::InvalidTransition { state: *current, event: *event });
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: *event, actions })
}
