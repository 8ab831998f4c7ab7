use std::time::Duration;

use common::utils::config::AppConfig;

/// Deployment-time knobs for the orchestrator, lifted out of the shared `AppConfig` once at
/// startup and passed by value to every component that needs them.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub binary: String,
    pub model_allowlist: Vec<String>,
    pub global_concurrency: usize,
    pub user_concurrency: usize,
    pub idle_timeout: Duration,
}

impl From<&AppConfig> for OrchestratorConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            binary: config.orchestrator_binary.clone(),
            model_allowlist: config.orchestrator_model_allowlist.clone(),
            global_concurrency: config.orchestrator_global_concurrency,
            user_concurrency: config.orchestrator_user_concurrency,
            idle_timeout: Duration::from_secs(config.orchestrator_idle_timeout_secs),
        }
    }
}
