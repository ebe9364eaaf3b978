use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

use calhelper_core::config::LlmConfig;
use calhelper_core::domain::operation::OperationKind;
use calhelper_core::domain::session::{Role, Turn};

/// Everything the interpreter may look at for one user turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterpretationContext {
    pub now: DateTime<FixedOffset>,
    pub time_zone: String,
    pub history: Vec<Turn>,
    pub user_text: String,
    pub pending: Option<String>,
    pub slots: Vec<String>,
    pub booking_candidates: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InterpretedCall {
    pub tool: String,
    pub arguments: Value,
    pub message: Option<String>,
}

impl InterpretedCall {
    pub fn tool(name: impl Into<String>, arguments: Value) -> Self {
        Self { tool: name.into(), arguments, message: None }
    }

    pub fn reply(message: impl Into<String>) -> Self {
        Self {
            tool: OperationKind::None.tool_name().to_string(),
            arguments: Value::Object(Map::new()),
            message: Some(message.into()),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterpreterError {
    #[error("interpreter request failed: {0}")]
    Transport(String),
    #[error("interpreter responded with status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("interpreter returned malformed output: {0}")]
    Malformed(String),
    #[error("interpreter timed out")]
    Timeout,
}

#[async_trait]
pub trait Interpreter: Send + Sync {
    async fn interpret(
        &self,
        context: &InterpretationContext,
    ) -> Result<InterpretedCall, InterpreterError>;
}

/// Chat-completions interpreter for OpenAI and OpenAI-compatible servers such as Ollama.
pub struct OpenAiInterpreter {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
}

impl OpenAiInterpreter {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<SecretString>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, InterpreterError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| InterpreterError::Transport(error.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, InterpreterError> {
        Self::new(
            config.effective_base_url(),
            config.api_key.clone(),
            config.model.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn request_body(&self, context: &InterpretationContext) -> Value {
        let mut messages = vec![json!({ "role": "system", "content": system_prompt(context) })];
        for turn in &context.history {
            let role = match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            messages.push(json!({ "role": role, "content": turn.text }));
        }
        let last_is_current = context
            .history
            .last()
            .map(|turn| turn.role == Role::User && turn.text == context.user_text)
            .unwrap_or(false);
        if !last_is_current {
            messages.push(json!({ "role": "user", "content": context.user_text }));
        }

        json!({
            "model": self.model,
            "temperature": 0,
            "messages": messages,
            "tools": tool_definitions(),
            "tool_choice": "auto",
        })
    }
}

#[async_trait]
impl Interpreter for OpenAiInterpreter {
    async fn interpret(
        &self,
        context: &InterpretationContext,
    ) -> Result<InterpretedCall, InterpreterError> {
        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&self.request_body(context));
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request.send().await.map_err(|error| {
            if error.is_timeout() {
                InterpreterError::Timeout
            } else {
                InterpreterError::Transport(error.to_string())
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InterpreterError::Transport(error.to_string()))?;
        if !status.is_success() {
            return Err(InterpreterError::Status {
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
            });
        }

        parse_completion(&body)
    }
}

fn parse_completion(body: &str) -> Result<InterpretedCall, InterpreterError> {
    #[derive(Deserialize)]
    struct FunctionCall {
        name: String,
        arguments: String,
    }
    #[derive(Deserialize)]
    struct ToolCall {
        function: FunctionCall,
    }
    #[derive(Deserialize)]
    struct Message {
        content: Option<String>,
        #[serde(default)]
        tool_calls: Vec<ToolCall>,
    }
    #[derive(Deserialize)]
    struct Choice {
        message: Message,
    }
    #[derive(Deserialize)]
    struct Completion {
        choices: Vec<Choice>,
    }

    let completion: Completion =
        serde_json::from_str(body).map_err(|error| InterpreterError::Malformed(error.to_string()))?;
    let message = completion
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message)
        .ok_or_else(|| InterpreterError::Malformed("completion had no choices".to_string()))?;
    let content = message.content.filter(|content| !content.trim().is_empty());

    match message.tool_calls.into_iter().next() {
        Some(call) => {
            let arguments = if call.function.arguments.trim().is_empty() {
                Value::Object(Map::new())
            } else {
                serde_json::from_str(&call.function.arguments)
                    .map_err(|error| InterpreterError::Malformed(error.to_string()))?
            };
            Ok(InterpretedCall { tool: call.function.name, arguments, message: content })
        }
        None => content
            .map(InterpretedCall::reply)
            .ok_or_else(|| InterpreterError::Malformed("completion had neither text nor tool call".to_string())),
    }
}

fn system_prompt(context: &InterpretationContext) -> String {
    let mut prompt = format!(
        "You are a helpful assistant that manages the user's Cal.com calendar.\n\
         Current time: {now}. Time zone: {zone}.\n\
         Always express times in ISO-8601 with an offset, e.g. 2025-07-10T09:00:00-0700.\n\
         Call exactly one tool when the user wants calendar data or a calendar change.\n\
         For create_booking, cancel_booking and reschedule_booking pass every detail the user has given so far, \
         even if some are still missing; the system collects the rest and asks the user to confirm. \
         Never claim a booking was created, cancelled or rescheduled yourself.\n\
         When the user refers to a numbered slot or booking, pass slot_index or booking_index instead of guessing ids. \
         When they refer to a booking by its time (\"my 3pm meeting\"), pass booking_hint as an ISO-8601 time.\n\
         For anything else, answer briefly without calling a tool.",
        now = context.now.to_rfc3339(),
        zone = context.time_zone,
    );

    if let Some(pending) = &context.pending {
        prompt.push_str("\n\nOpen request awaiting details or confirmation:\n");
        prompt.push_str(pending);
    }
    if !context.slots.is_empty() {
        prompt.push_str("\n\nSlots last shown to the user:\n");
        prompt.push_str(&context.slots.join("\n"));
    }
    if !context.booking_candidates.is_empty() {
        prompt.push_str("\n\nBookings last shown to the user:\n");
        prompt.push_str(&context.booking_candidates.join("\n"));
    }
    prompt
}

fn tool_definitions() -> Value {
    let string = |description: &str| json!({ "type": "string", "description": description });
    let index = |description: &str| json!({ "type": "integer", "minimum": 1, "description": description });
    let function = |name: &str, description: &str, properties: Value| {
        json!({
            "type": "function",
            "function": {
                "name": name,
                "description": description,
                "parameters": { "type": "object", "properties": properties },
            }
        })
    };

    json!([
        function(
            "list_event_types",
            "List the event types (meeting kinds) the user offers.",
            json!({}),
        ),
        function(
            "list_bookings",
            "List the user's bookings, optionally within a time range.",
            json!({
                "range_start": string("Start of the range, ISO-8601 time or YYYY-MM-DD date."),
                "range_end": string("End of the range, ISO-8601 time or YYYY-MM-DD date (inclusive)."),
            }),
        ),
        function(
            "find_slots",
            "Find open slots for an event type.",
            json!({
                "event_type": string("Event type id, title or slug."),
                "range_start": string("Start of the search range, ISO-8601 time or YYYY-MM-DD date."),
                "range_end": string("End of the search range, ISO-8601 time or YYYY-MM-DD date (inclusive)."),
            }),
        ),
        function(
            "create_booking",
            "Book a meeting. The user is asked to confirm before anything is booked.",
            json!({
                "event_type": string("Event type id, title or slug."),
                "start_time": string("Meeting start, ISO-8601 with offset."),
                "slot_index": index("1-based number of a slot from the last slot list."),
                "attendee_name": string("Attendee full name."),
                "attendee_email": string("Attendee email address."),
                "attendee_time_zone": string("Attendee IANA time zone, e.g. America/Los_Angeles."),
            }),
        ),
        function(
            "cancel_booking",
            "Cancel a booking. The user is asked to confirm first.",
            json!({
                "booking_id": string("Booking uid."),
                "booking_index": index("1-based number of a booking from the last booking list."),
                "booking_hint": string("Start time of the booking the user mentioned, ISO-8601."),
                "reason": string("Cancellation reason."),
            }),
        ),
        function(
            "reschedule_booking",
            "Move a booking to a new start time. The user is asked to confirm first.",
            json!({
                "booking_id": string("Booking uid."),
                "booking_index": index("1-based number of a booking from the last booking list."),
                "booking_hint": string("Current start time of the booking the user mentioned, ISO-8601."),
                "new_start_time": string("New start, ISO-8601 with offset."),
                "slot_index": index("1-based number of a slot from the last slot list."),
            }),
        ),
    ])
}
