pub mod engine;
pub mod states;

pub use engine::{ConfirmationFlow, FlowDefinition, FlowEngine, FlowTransitionError};
pub use states::{GateAction, GateContext, GateEvent, PendingStatus, TransitionOutcome};
