use std::io::{self, BufRead, Write};

use calhelper_agent::AgentRuntime;
use calhelper_core::config::{AppConfig, LoadOptions};
use calhelper_core::domain::session::SessionId;
use calhelper_core::errors::InterfaceError;
use thiserror::Error;

use crate::commands::{CommandResult, Failure};

const GREETING: &str =
    "Cal.com assistant ready. Ask about your event types, bookings or free slots. Type `exit` to quit.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatSummary {
    pub turns: usize,
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("terminal input/output failed: {0}")]
    Io(#[from] io::Error),
    #[error("{}", .0.user_message())]
    Unauthorized(InterfaceError),
}

pub fn run(session: Option<String>) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure("chat", Failure::ConfigValidation, error.to_string());
        }
    };
    crate::logging::init(&config);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                Failure::Runtime,
                format!("failed to initialize async runtime: {error}"),
            );
        }
    };
    let agent = match AgentRuntime::from_config(&config) {
        Ok(agent) => agent,
        Err(error) => return CommandResult::failure("chat", Failure::Bootstrap, error.to_string()),
    };

    let session_id = session.map(SessionId).unwrap_or_else(SessionId::new_random);
    tracing::info!(
        event_name = "system.chat.started",
        session_id = %session_id,
        model = %config.llm.model,
        "interactive chat started"
    );

    let stdin = io::stdin();
    let stdout = io::stdout();
    match converse(&runtime, &agent, &session_id, stdin.lock(), stdout.lock()) {
        Ok(summary) => CommandResult::success(
            "chat",
            format!("session {session_id} ended after {} turns", summary.turns),
        ),
        Err(ChatError::Unauthorized(error)) => {
            CommandResult::failure("chat", Failure::Unauthorized, error.user_message())
        }
        Err(error @ ChatError::Io(_)) => CommandResult::failure("chat", Failure::Io, error.to_string()),
    }
}

/// Runs the prompt loop until `exit`, `quit`, end of input, or a fatal error.
pub fn converse<R: BufRead, W: Write>(
    runtime: &tokio::runtime::Runtime,
    agent: &AgentRuntime,
    session_id: &SessionId,
    mut input: R,
    mut output: W,
) -> Result<ChatSummary, ChatError> {
    writeln!(output, "{GREETING}")?;
    let mut turns = 0;
    let mut line = String::new();

    loop {
        write!(output, "You: ")?;
        output.flush()?;
        line.clear();
        if input.read_line(&mut line)? == 0 {
            writeln!(output)?;
            break;
        }

        let text = line.trim();
        if is_exit(text) {
            writeln!(output, "Assistant: Goodbye!")?;
            break;
        }

        match runtime.block_on(agent.handle_turn(session_id, text)) {
            Ok(reply) => {
                writeln!(output, "Assistant: {reply}")?;
                turns += 1;
            }
            Err(error) => {
                let error = error.into_interface(session_id.as_str());
                writeln!(output, "Assistant: {}", error.user_message())?;
                return Err(ChatError::Unauthorized(error));
            }
        }
    }

    runtime.block_on(agent.end_session(session_id));
    Ok(ChatSummary { turns })
}

fn is_exit(text: &str) -> bool {
    text.eq_ignore_ascii_case("exit") || text.eq_ignore_ascii_case("quit")
}
