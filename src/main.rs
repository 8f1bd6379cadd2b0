mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use clinical_llm::app::{AppState, EnvironmentSource, LlmSettings};
use clinical_llm::chat::invoke_structured;
use clinical_llm::models::{invoke, LanguageModel, ProviderTier};

use cli::{Cli, Commands, ConfigAction};

fn init_logging(settings: &LlmSettings, debug: bool) -> Result<()> {
    if !settings.logging_enabled && !debug {
        return Ok(());
    }

    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::from_default_env().add_directive(format!("clinical_llm={}", level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

fn default_tier(settings: &LlmSettings) -> ProviderTier {
    if settings.provider.eq_ignore_ascii_case("ollama") {
        ProviderTier::LocalFast
    } else {
        ProviderTier::CloudFast
    }
}

/// How `invoke` picks its model.
struct ModelSelection {
    tier: Option<String>,
    task: Option<String>,
    sensitive: bool,
    temperature: Option<f32>,
    no_fallback: bool,
}

/// A task or the sensitive flag goes through the task policy; otherwise the
/// named (or configured) tier is built, with a fallback unless disabled.
async fn resolve_model(state: &AppState, selection: ModelSelection) -> Result<Box<dyn LanguageModel>> {
    let factory = state.factory();

    if selection.task.is_some() || selection.sensitive {
        let task = selection.task.as_deref().unwrap_or_default();
        return Ok(factory.select_for_task(task, selection.sensitive, selection.temperature)?);
    }

    let tier = match selection.tier {
        Some(name) => name.parse::<ProviderTier>()?,
        None => default_tier(factory.settings()),
    };

    if selection.no_fallback {
        Ok(factory.create(tier, selection.temperature)?)
    } else {
        let llm = factory
            .create_resilient(tier, state.breakers(), selection.temperature)
            .await?;
        Ok(Box::new(llm))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (settings, config_path) = match cli.config.map(PathBuf::from) {
        Some(path) => (LlmSettings::load_from(&path, EnvironmentSource::from_process()), path),
        None => (LlmSettings::load(), LlmSettings::config_file_path()),
    };
    let settings = settings.context("Failed to load LLM configuration")?;

    init_logging(&settings, cli.debug)?;
    info!("Starting clinical-llm");

    let state = AppState::new(settings, config_path);

    match cli.command {
        Commands::Tiers => {
            let factory = state.factory();
            for (tier, profile) in factory.profiles() {
                println!(
                    "{:<16} {}:{} (temperature {})",
                    tier, profile.provider_name, profile.model_id, profile.default_temperature
                );
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("{}", serde_json::to_string_pretty(&state.get_config().redacted())?);
            }
            ConfigAction::Save { path } => {
                let path = path.map(PathBuf::from).unwrap_or_else(|| state.config_path().to_path_buf());
                state.get_config().save(&path).await?;
                println!("Saved configuration to {}", path.display());
            }
        },
        Commands::Health => {
            for health in state.health().await {
                println!(
                    "{:<8} {} (circuit {}, failures {})",
                    health.provider,
                    if health.available { "available" } else { "unavailable" },
                    health.state,
                    health.failure_count
                );
            }
        }
        Commands::Invoke {
            prompt,
            tier,
            task,
            sensitive,
            temperature,
            no_fallback,
            json_keys,
        } => {
            let selection = ModelSelection {
                tier,
                task,
                sensitive,
                temperature,
                no_fallback,
            };
            let model = resolve_model(&state, selection).await?;

            info!("Invoking {}:{}", model.provider(), model.model_name());

            if json_keys.is_empty() {
                println!("{}", invoke(&model, prompt).await?);
            } else {
                let keys: Vec<&str> = json_keys.iter().map(String::as_str).collect();
                let object = invoke_structured(&model, prompt, &keys).await?;
                println!("{}", serde_json::to_string_pretty(&object)?);
            }
        }
    }

    Ok(())
}
