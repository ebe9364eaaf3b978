use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::time::TimeContext;

pub const DEFAULT_CALENDAR_BASE_URL: &str = "https://api.cal.com/v2";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub calendar: CalendarConfig,
    pub llm: LlmConfig,
    pub assistant: AssistantConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct CalendarConfig {
    pub api_key: SecretString,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_requests_per_minute: u32,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

impl LlmConfig {
    pub fn effective_base_url(&self) -> &str {
        match (&self.base_url, self.provider) {
            (Some(base_url), _) => base_url.trim_end_matches('/'),
            (None, LlmProvider::OpenAi) => DEFAULT_OPENAI_BASE_URL,
            (None, LlmProvider::Ollama) => DEFAULT_OLLAMA_BASE_URL,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AssistantConfig {
    pub time_zone: String,
    pub history_turns: usize,
}

impl AssistantConfig {
    pub fn time_context(&self) -> TimeContext {
        TimeContext::from_zone_name(&self.time_zone).unwrap_or_default()
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(alias = "openai")]
    OpenAi,
    Ollama,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub calendar_api_key: Option<String>,
    pub calendar_base_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub assistant_time_zone: Option<String>,
    pub server_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            calendar: CalendarConfig {
                api_key: String::new().into(),
                base_url: DEFAULT_CALENDAR_BASE_URL.to_string(),
                timeout_secs: 15,
                max_requests_per_minute: 100,
            },
            llm: LlmConfig {
                provider: LlmProvider::OpenAi,
                api_key: None,
                base_url: None,
                model: "gpt-4o".to_string(),
                timeout_secs: 30,
            },
            assistant: AssistantConfig { time_zone: "UTC".to_string(), history_turns: 12 },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from("calhelper.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(calendar) = patch.calendar {
            if let Some(calendar_api_key_value) = calendar.api_key {
                self.calendar.api_key = secret_value(calendar_api_key_value);
            }
            if let Some(base_url) = calendar.base_url {
                self.calendar.base_url = base_url;
            }
            if let Some(timeout_secs) = calendar.timeout_secs {
                self.calendar.timeout_secs = timeout_secs;
            }
            if let Some(max_requests_per_minute) = calendar.max_requests_per_minute {
                self.calendar.max_requests_per_minute = max_requests_per_minute;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(assistant) = patch.assistant {
            if let Some(time_zone) = assistant.time_zone {
                self.assistant.time_zone = time_zone;
            }
            if let Some(history_turns) = assistant.history_turns {
                self.assistant.history_turns = history_turns;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        let calendar_api_key =
            read_env("CALHELPER_CALENDAR_API_KEY").or_else(|| read_env("CAL_API_KEY"));
        if let Some(value) = calendar_api_key {
            self.calendar.api_key = secret_value(value);
        }
        if let Some(value) = read_env("CALHELPER_CALENDAR_BASE_URL") {
            self.calendar.base_url = value;
        }
        if let Some(value) = read_env("CALHELPER_CALENDAR_TIMEOUT_SECS") {
            self.calendar.timeout_secs = parse_u64("CALHELPER_CALENDAR_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CALHELPER_CALENDAR_MAX_REQUESTS_PER_MINUTE") {
            self.calendar.max_requests_per_minute =
                parse_u32("CALHELPER_CALENDAR_MAX_REQUESTS_PER_MINUTE", &value)?;
        }

        if let Some(value) = read_env("CALHELPER_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        let llm_api_key = read_env("CALHELPER_LLM_API_KEY").or_else(|| read_env("OPENAI_API_KEY"));
        if let Some(value) = llm_api_key {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("CALHELPER_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("CALHELPER_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("CALHELPER_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("CALHELPER_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CALHELPER_ASSISTANT_TIME_ZONE") {
            self.assistant.time_zone = value;
        }
        if let Some(value) = read_env("CALHELPER_ASSISTANT_HISTORY_TURNS") {
            self.assistant.history_turns =
                parse_u32("CALHELPER_ASSISTANT_HISTORY_TURNS", &value)? as usize;
        }

        if let Some(value) = read_env("CALHELPER_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CALHELPER_SERVER_PORT") {
            self.server.port = parse_u16("CALHELPER_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("CALHELPER_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("CALHELPER_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("CALHELPER_LOGGING_LEVEL").or_else(|| read_env("CALHELPER_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CALHELPER_LOGGING_FORMAT").or_else(|| read_env("CALHELPER_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(calendar_api_key) = overrides.calendar_api_key {
            self.calendar.api_key = secret_value(calendar_api_key);
        }
        if let Some(calendar_base_url) = overrides.calendar_base_url {
            self.calendar.base_url = calendar_base_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(time_zone) = overrides.assistant_time_zone {
            self.assistant.time_zone = time_zone;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_calendar(&self.calendar)?;
        validate_llm(&self.llm)?;
        validate_assistant(&self.assistant)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("calhelper.toml"), PathBuf::from("config/calhelper.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_calendar(calendar: &CalendarConfig) -> Result<(), ConfigError> {
    let api_key = calendar.api_key.expose_secret().trim();
    if api_key.is_empty() {
        return Err(ConfigError::Validation(
            "calendar.api_key is required (CAL_API_KEY). Get it from https://app.cal.com > Settings > Developer > API Keys".to_string(),
        ));
    }
    if !api_key.starts_with("cal_") {
        let hint = if api_key.starts_with("sk-") {
            " (hint: you may have used the OpenAI key instead of the Cal.com key)"
        } else {
            ""
        };
        return Err(ConfigError::Validation(format!(
            "calendar.api_key must start with `cal_`{hint}. Get it from https://app.cal.com/settings/developer/api-keys"
        )));
    }

    let base_url = calendar.base_url.trim();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "calendar.base_url must start with http:// or https://".to_string(),
        ));
    }

    if calendar.timeout_secs == 0 || calendar.timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "calendar.timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    if calendar.max_requests_per_minute == 0 {
        return Err(ConfigError::Validation(
            "calendar.max_requests_per_minute must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    match llm.provider {
        LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the openai provider (OPENAI_API_KEY)".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let blank =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(false);
            if blank {
                return Err(ConfigError::Validation(
                    "llm.base_url must not be blank for the ollama provider".to_string(),
                ));
            }
        }
    }

    if let Some(base_url) = &llm.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "llm.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_assistant(assistant: &AssistantConfig) -> Result<(), ConfigError> {
    if TimeContext::from_zone_name(&assistant.time_zone).is_none() {
        return Err(ConfigError::Validation(format!(
            "assistant.time_zone `{}` is not an IANA time zone (e.g. `UTC`, `America/Los_Angeles`)",
            assistant.time_zone
        )));
    }

    if assistant.history_turns == 0 {
        return Err(ConfigError::Validation(
            "assistant.history_turns must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    calendar: Option<CalendarPatch>,
    llm: Option<LlmPatch>,
    assistant: Option<AssistantPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct CalendarPatch {
    api_key: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
    max_requests_per_minute: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AssistantPatch {
    time_zone: Option<String>,
    history_turns: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    const CREDENTIAL_VARS: [&str; 4] =
        ["CAL_API_KEY", "OPENAI_API_KEY", "CALHELPER_CALENDAR_API_KEY", "CALHELPER_LLM_API_KEY"];

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&CREDENTIAL_VARS);

        env::set_var("TEST_CAL_KEY", "cal_live_from_env");
        env::set_var("TEST_OPENAI_KEY", "sk-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("calhelper.toml");
            fs::write(
                &path,
                r#"
[calendar]
api_key = "${TEST_CAL_KEY}"

[llm]
api_key = "${TEST_OPENAI_KEY}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.calendar.api_key.expose_secret() == "cal_live_from_env",
                "calendar key should be loaded from environment",
            )?;
            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret()) == Some("sk-from-env"),
                "llm key should be loaded from environment",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_CAL_KEY", "TEST_OPENAI_KEY"]);
        result
    }

    #[test]
    fn original_env_names_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&CREDENTIAL_VARS);

        env::set_var("CAL_API_KEY", "cal_live_alias");
        env::set_var("OPENAI_API_KEY", "sk-alias");
        env::set_var("CALHELPER_LOG_LEVEL", "warn");
        env::set_var("CALHELPER_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.calendar.api_key.expose_secret() == "cal_live_alias",
                "CAL_API_KEY should populate calendar.api_key",
            )?;
            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            ensure(config.llm.model == "gpt-4o", "default model should be gpt-4o")?;
            Ok(())
        })();

        clear_vars(&[
            "CAL_API_KEY",
            "OPENAI_API_KEY",
            "CALHELPER_LOG_LEVEL",
            "CALHELPER_LOG_FORMAT",
        ]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&CREDENTIAL_VARS);

        env::set_var("CALHELPER_CALENDAR_API_KEY", "cal_live_from_env");
        env::set_var("CALHELPER_ASSISTANT_TIME_ZONE", "Europe/Berlin");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("calhelper.toml");
            fs::write(
                &path,
                r#"
[calendar]
api_key = "cal_live_from_file"
max_requests_per_minute = 40

[llm]
provider = "ollama"
model = "llama3.1"

[assistant]
time_zone = "America/Los_Angeles"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    log_level: Some("debug".to_string()),
                    llm_model: Some("qwen2.5".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.llm.model == "qwen2.5", "override model should win")?;
            ensure(config.llm.provider == LlmProvider::Ollama, "file provider should apply")?;
            ensure(
                config.llm.effective_base_url() == "http://localhost:11434/v1",
                "ollama should default to the local endpoint",
            )?;
            ensure(
                config.calendar.api_key.expose_secret() == "cal_live_from_env",
                "env calendar key should win over file and defaults",
            )?;
            ensure(config.calendar.max_requests_per_minute == 40, "file rate budget should apply")?;
            ensure(
                config.assistant.time_zone == "Europe/Berlin",
                "env time zone should win over file",
            )?;
            Ok(())
        })();

        clear_vars(&["CALHELPER_CALENDAR_API_KEY", "CALHELPER_ASSISTANT_TIME_ZONE"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&CREDENTIAL_VARS);

        env::set_var("CAL_API_KEY", "sk-wrong-key");
        env::set_var("OPENAI_API_KEY", "sk-valid");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message)
                    if message.contains("calendar.api_key") && message.contains("hint")
            );
            ensure(has_message, "validation failure should mention calendar.api_key with a hint")
        })();

        clear_vars(&["CAL_API_KEY", "OPENAI_API_KEY"]);
        result
    }

    #[test]
    fn unknown_time_zone_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&CREDENTIAL_VARS);

        let result = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                calendar_api_key: Some("cal_live_x".to_string()),
                llm_api_key: Some("sk-x".to_string()),
                assistant_time_zone: Some("Mars/Olympus".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        });

        ensure(
            matches!(result, Err(ConfigError::Validation(ref message)) if message.contains("assistant.time_zone")),
            "invalid zone should fail validation",
        )
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&CREDENTIAL_VARS);

        env::set_var("CAL_API_KEY", "cal_live_secret_value");
        env::set_var("OPENAI_API_KEY", "sk-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(
                !debug.contains("cal_live_secret_value"),
                "debug output should not contain calendar key",
            )?;
            ensure(!debug.contains("sk-secret-value"), "debug output should not contain llm key")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&["CAL_API_KEY", "OPENAI_API_KEY"]);
        result
    }
}
