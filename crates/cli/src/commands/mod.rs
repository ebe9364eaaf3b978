pub mod chat;
pub mod config;
pub mod doctor;

use serde::Serialize;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

/// Why a command stopped, with its process exit code and what to do about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Failure {
    ConfigValidation,
    Runtime,
    Bootstrap,
    Unauthorized,
    Io,
}

impl Failure {
    pub fn exit_code(self) -> u8 {
        match self {
            Self::ConfigValidation | Self::Bootstrap => 2,
            Self::Unauthorized => 3,
            Self::Runtime | Self::Io => 1,
        }
    }

    fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigValidation => {
                Some("set CAL_API_KEY and OPENAI_API_KEY, or run `calhelper config` for a template")
            }
            Self::Bootstrap => Some("run `calhelper doctor` to check the calendar and model settings"),
            Self::Unauthorized => Some("create a new API key in Cal.com settings and update CAL_API_KEY"),
            Self::Runtime | Self::Io => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum Status {
    Ok,
    Error,
}

#[derive(Debug, Serialize)]
struct Outcome<'a> {
    command: &'a str,
    status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_class: Option<Failure>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<&'static str>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let outcome =
            Outcome { command, status: Status::Ok, error_class: None, message: message.into(), hint: None };
        Self { exit_code: 0, output: render(&outcome) }
    }

    pub fn failure(command: &str, failure: Failure, message: impl Into<String>) -> Self {
        let outcome = Outcome {
            command,
            status: Status::Error,
            error_class: Some(failure),
            message: message.into(),
            hint: failure.hint(),
        };
        Self { exit_code: failure.exit_code(), output: render(&outcome) }
    }
}

fn render(outcome: &Outcome<'_>) -> String {
    serde_json::to_string(outcome).unwrap_or_else(|error| {
        serde_json::json!({
            "command": outcome.command,
            "status": Status::Error,
            "message": error.to_string(),
        })
        .to_string()
    })
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::{CommandResult, Failure};

    fn parse(output: &str) -> Value {
        serde_json::from_str(output).expect("json outcome")
    }

    #[test]
    fn success_omits_failure_fields() {
        let result = CommandResult::success("chat", "session s-1 ended after 2 turns");
        let payload = parse(&result.output);

        assert_eq!(result.exit_code, 0);
        assert_eq!(payload["status"], "ok");
        assert!(payload.get("error_class").is_none());
        assert!(payload.get("hint").is_none());
    }

    #[test]
    fn rejected_key_exits_three_and_points_at_cal_com_settings() {
        let result = CommandResult::failure("chat", Failure::Unauthorized, "key rejected");
        let payload = parse(&result.output);

        assert_eq!(result.exit_code, 3);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "unauthorized");
        assert!(payload["hint"].as_str().expect("hint").contains("CAL_API_KEY"));
    }

    #[test]
    fn terminal_failures_carry_no_hint() {
        let result = CommandResult::failure("chat", Failure::Io, "broken pipe");
        let payload = parse(&result.output);

        assert_eq!(result.exit_code, 1);
        assert_eq!(payload["error_class"], "io");
        assert!(payload.get("hint").is_none());
    }
}
