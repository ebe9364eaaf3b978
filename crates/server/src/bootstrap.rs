use std::sync::Arc;

use calhelper_agent::{AgentRuntime, RuntimeBuildError};
use calhelper_core::config::{AppConfig, ConfigError};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub agent: Arc<AgentRuntime>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("agent runtime could not be built: {0}")]
    Runtime(#[from] RuntimeBuildError),
}

pub fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        calendar_base_url = %config.calendar.base_url,
        llm_provider = config.llm.provider.as_str(),
        "starting application bootstrap"
    );

    let agent = AgentRuntime::from_config(&config)?;
    info!(
        event_name = "system.bootstrap.agent_ready",
        correlation_id = "bootstrap",
        time_zone = %config.assistant.time_zone,
        "agent runtime initialized"
    );

    Ok(Application { config, agent: Arc::new(agent) })
}
