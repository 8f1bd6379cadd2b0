use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "clinical-llm")]
#[command(about = "Resilient access to local and cloud language models")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List provider tiers and the model each one resolves to
    Tiers,

    /// Inspect or persist the effective configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Probe every provider once and report availability
    Health,

    /// Send a prompt to a resolved model
    Invoke {
        prompt: String,

        /// Provider tier (local_fast, local_accurate, cloud_fast, cloud_accurate)
        #[arg(long, conflicts_with = "task")]
        tier: Option<String>,

        /// Task kind used to pick a tier (diagnosis, summarization, ...)
        #[arg(long)]
        task: Option<String>,

        /// Treat the prompt as sensitive data (selects through the task policy)
        #[arg(long, conflicts_with = "tier")]
        sensitive: bool,

        /// Override the tier's default temperature
        #[arg(short, long)]
        temperature: Option<f32>,

        /// Call the tier's model without a fallback
        #[arg(long)]
        no_fallback: bool,

        /// Require a JSON object response with these keys
        #[arg(long, value_delimiter = ',')]
        json_keys: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the settings with secrets redacted
    Show,

    /// Write the settings to disk
    Save {
        /// Destination (defaults to the loaded configuration path)
        #[arg(short, long)]
        path: Option<String>,
    },
}
