use calhelper_calendar::{CalComClient, CalendarClient, CalendarError};
use calhelper_core::config::{AppConfig, LlmProvider, LoadOptions};
use serde::Serialize;

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_interpreter(&config));
            checks.push(check_remote_calendar(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["interpreter_settings", "calendar_credentials"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_interpreter(config: &AppConfig) -> DoctorCheck {
    let key_state = match (config.llm.provider, config.llm.api_key.is_some()) {
        (LlmProvider::OpenAi, true) => "api key present",
        (LlmProvider::OpenAi, false) => "api key missing",
        (LlmProvider::Ollama, _) => "no api key required",
    };
    DoctorCheck {
        name: "interpreter_settings",
        status: CheckStatus::Pass,
        details: format!(
            "{} model `{}` at {} ({key_state})",
            config.llm.provider.as_str(),
            config.llm.model,
            config.llm.effective_base_url()
        ),
    }
}

fn check_remote_calendar(config: &AppConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "calendar_credentials",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };
    let client = match CalComClient::from_config(&config.calendar) {
        Ok(client) => client,
        Err(error) => {
            return DoctorCheck {
                name: "calendar_credentials",
                status: CheckStatus::Fail,
                details: format!("failed to build calendar client: {error}"),
            };
        }
    };

    runtime.block_on(check_calendar_credentials(&client))
}

/// The profile endpoint is the cheapest authenticated call.
async fn check_calendar_credentials(client: &dyn CalendarClient) -> DoctorCheck {
    match client.profile().await {
        Ok(profile) => DoctorCheck {
            name: "calendar_credentials",
            status: CheckStatus::Pass,
            details: format!("authenticated as {}", profile.email),
        },
        Err(CalendarError::Status { status: 401 | 403, .. }) => DoctorCheck {
            name: "calendar_credentials",
            status: CheckStatus::Fail,
            details: "the calendar rejected CAL_API_KEY; create a new key under Settings > Developer > API Keys"
                .to_string(),
        },
        Err(error) => DoctorCheck {
            name: "calendar_credentials",
            status: CheckStatus::Fail,
            details: error.to_string(),
        },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use calhelper_calendar::{CalendarError, CalendarOperation, InMemoryCalendar};

    use super::{check_calendar_credentials, CheckStatus};

    #[tokio::test]
    async fn profile_lookup_passes_with_valid_credentials() {
        let calendar = InMemoryCalendar::new();
        let check = check_calendar_credentials(&calendar).await;

        assert_eq!(check.status, CheckStatus::Pass);
        assert!(check.details.contains("owner@example.com"));
    }

    #[tokio::test]
    async fn rejected_key_points_at_cal_api_key() {
        let calendar = InMemoryCalendar::new();
        calendar.fail_next(CalendarOperation::Profile, CalendarError::status(401, "bad key")).await;

        let check = check_calendar_credentials(&calendar).await;
        assert_eq!(check.status, CheckStatus::Fail);
        assert!(check.details.contains("CAL_API_KEY"));
    }
}
