//! Conversation runtime for the calendar assistant.
//!
//! One turn flows through a fixed pipeline:
//! 1. **Routing** (`conversation`) - the interpreter maps text to a structured request
//! 2. **Negotiation** (`guardrails`) - mutations wait in a confirmation gate until the user says yes
//! 3. **Execution** (`tools`) - validated requests become calendar calls
//! 4. **Rendering** (`synthesizer`) - payloads and failures become replies
//!
//! The interpreter only translates. It never executes anything and never
//! decides whether a booking change is confirmed.

pub mod conversation;
pub mod guardrails;
pub mod llm;
pub mod runtime;
pub mod session;
pub mod synthesizer;
pub mod tools;

pub use conversation::IntentRouter;
pub use guardrails::{classify_reply, ConfirmationGate, ReplyClass};
pub use llm::{InterpretationContext, InterpretedCall, Interpreter, InterpreterError, OpenAiInterpreter};
pub use runtime::{AgentRuntime, AgentRuntimeBuilder, RuntimeBuildError};
pub use session::SessionStore;
pub use synthesizer::ResponseSynthesizer;
pub use tools::{ParameterProblem, Payload, RateBudget, RetryPolicy, ToolAdapter};
