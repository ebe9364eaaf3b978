use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use calhelper_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let llm_api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };
    let fields = [
        field(
            "calendar.api_key",
            redact_token(config.calendar.api_key.expose_secret()),
            &["CALHELPER_CALENDAR_API_KEY", "CAL_API_KEY"],
        ),
        field("calendar.base_url", config.calendar.base_url.clone(), &["CALHELPER_CALENDAR_BASE_URL"]),
        field(
            "calendar.timeout_secs",
            config.calendar.timeout_secs.to_string(),
            &["CALHELPER_CALENDAR_TIMEOUT_SECS"],
        ),
        field(
            "calendar.max_requests_per_minute",
            config.calendar.max_requests_per_minute.to_string(),
            &["CALHELPER_CALENDAR_MAX_REQUESTS_PER_MINUTE"],
        ),
        field("llm.provider", config.llm.provider.as_str().to_string(), &["CALHELPER_LLM_PROVIDER"]),
        field("llm.model", config.llm.model.clone(), &["CALHELPER_LLM_MODEL"]),
        field("llm.base_url", config.llm.effective_base_url().to_string(), &["CALHELPER_LLM_BASE_URL"]),
        field("llm.api_key", llm_api_key.to_string(), &["CALHELPER_LLM_API_KEY", "OPENAI_API_KEY"]),
        field("llm.timeout_secs", config.llm.timeout_secs.to_string(), &["CALHELPER_LLM_TIMEOUT_SECS"]),
        field(
            "assistant.time_zone",
            config.assistant.time_zone.clone(),
            &["CALHELPER_ASSISTANT_TIME_ZONE"],
        ),
        field(
            "assistant.history_turns",
            config.assistant.history_turns.to_string(),
            &["CALHELPER_ASSISTANT_HISTORY_TURNS"],
        ),
        field(
            "server.bind_address",
            config.server.bind_address.clone(),
            &["CALHELPER_SERVER_BIND_ADDRESS"],
        ),
        field("server.port", config.server.port.to_string(), &["CALHELPER_SERVER_PORT"]),
        field(
            "logging.level",
            config.logging.level.clone(),
            &["CALHELPER_LOGGING_LEVEL", "CALHELPER_LOG_LEVEL"],
        ),
        field(
            "logging.format",
            format!("{:?}", config.logging.format),
            &["CALHELPER_LOGGING_FORMAT", "CALHELPER_LOG_FORMAT"],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_keys) in fields {
        let source =
            field_source(key, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }
    lines.join("\n")
}

type Field = (&'static str, String, &'static [&'static str]);

fn field(key: &'static str, value: impl Into<String>, env_keys: &'static [&'static str]) -> Field {
    (key, value.into(), env_keys)
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("calhelper.toml"), PathBuf::from("config/calhelper.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps only the key family prefix, e.g. `cal_live_...` becomes `cal_***`.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('_') {
        return format!("{prefix}_***");
    }

    "<redacted>".to_string()
}

#[cfg(test)]
mod tests {
    use super::{contains_path, redact_token};

    #[test]
    fn tokens_keep_only_their_family_prefix() {
        assert_eq!(redact_token("cal_live_0123456789"), "cal_***");
        assert_eq!(redact_token("opaque"), "<redacted>");
        assert_eq!(redact_token("  "), "<empty>");
    }

    #[test]
    fn nested_keys_are_found_in_file_documents() {
        let doc = "[calendar]\nbase_url = \"http://localhost\"\n"
            .parse::<toml::Value>()
            .expect("valid toml");
        assert!(contains_path(&doc, "calendar.base_url"));
        assert!(!contains_path(&doc, "calendar.api_key"));
    }
}
