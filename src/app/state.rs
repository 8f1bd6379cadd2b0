use parking_lot::RwLock;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::app::config::LlmSettings;
use crate::error::Result;
use crate::models::circuit_breaker::{BreakerRegistry, CircuitState};
use crate::models::factory::{ProviderFactory, ProviderKind};

#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub provider: String,
    pub available: bool,
    pub state: CircuitState,
    pub failure_count: u32,
}

/// Process-wide settings plus the breaker registry shared by every model
/// built from them.
pub struct AppState {
    config: Arc<RwLock<LlmSettings>>,
    config_path: PathBuf,
    breakers: Arc<BreakerRegistry>,
}

impl AppState {
    pub fn new(config: LlmSettings, config_path: impl Into<PathBuf>) -> Self {
        info!("Initializing application state");

        let breakers = Arc::new(BreakerRegistry::new(config.breaker_config()));

        Self {
            config: Arc::new(RwLock::new(config)),
            config_path: config_path.into(),
            breakers,
        }
    }

    pub fn get_config(&self) -> LlmSettings {
        self.config.read().clone()
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    /// Factory over a snapshot of the current settings.
    pub fn factory(&self) -> ProviderFactory {
        ProviderFactory::new(self.get_config())
    }

    /// Applies `updater`, validates, then persists. An invalid update leaves
    /// the current settings untouched.
    pub async fn update_config<F>(&self, updater: F) -> Result<()>
    where
        F: FnOnce(&mut LlmSettings),
    {
        debug!("Updating LLM configuration");

        let mut candidate = self.get_config();
        updater(&mut candidate);
        candidate.validate()?;

        candidate.save(&self.config_path).await?;
        *self.config.write() = candidate;

        info!("Configuration updated and saved");
        Ok(())
    }

    /// Runs each provider's breaker once.
    pub async fn health(&self) -> Vec<ProviderHealth> {
        let factory = self.factory();
        let mut report = Vec::new();

        for kind in [ProviderKind::Ollama, ProviderKind::OpenAi] {
            let breaker = factory.breaker(&self.breakers, kind);
            let available = breaker.is_available().await;
            report.push(ProviderHealth {
                provider: kind.as_str().to_string(),
                available,
                state: breaker.state(),
                failure_count: breaker.failure_count(),
            });
        }

        report
    }
}
