use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

mod completion;
mod controller;
mod error;
mod models;
mod repl;
mod sentiment;
mod server;
mod session;
mod settings;
mod store;

use completion::CompletionClient;
use controller::ChatController;
use models::GeminiClient;
use settings::{AppConfig, CliOverrides, RetrySettings, SessionSettings, SettingsLayers};
use store::SessionStore;

#[derive(Debug, Parser)]
#[command(name = "eliza")]
#[command(about = "Customer support chat front end for a hosted Gemini model", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct ChatOptions {
    /// Model id, e.g. gemini-2.5-flash
    #[arg(long)]
    model: Option<String>,
    /// System prompt sent ahead of every conversation ("" to send none)
    #[arg(long)]
    system_prompt: Option<String>,
    /// Total attempts per message when the endpoint is busy
    #[arg(long)]
    max_retries: Option<u32>,
    /// Seconds to wait between attempts
    #[arg(long)]
    retry_wait: Option<f64>,
    /// Session archive file
    #[arg(long)]
    data_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve the browser chat UI and JSON API
    Serve {
        #[arg(long, default_value = "127.0.0.1:7171")]
        listen: String,
        #[command(flatten)]
        opts: ChatOptions,
    },
    /// Chat in the terminal
    Chat {
        #[command(flatten)]
        opts: ChatOptions,
    },
    /// Print the saved session archive as JSON
    Sessions {
        #[arg(long)]
        data_file: Option<PathBuf>,
    },
    /// Score the polarity of a piece of text
    Sentiment { text: Vec<String> },
}

impl ChatOptions {
    fn overrides(&self) -> anyhow::Result<CliOverrides> {
        if let Some(w) = self.retry_wait.filter(|w| settings::retry_wait(*w).is_none()) {
            anyhow::bail!("--retry-wait must be a non-negative number of seconds, got {w}");
        }
        let retry = (self.max_retries.is_some() || self.retry_wait.is_some()).then_some(
            RetrySettings {
                max_retries: self.max_retries,
                wait_secs: self.retry_wait,
            },
        );
        Ok(CliOverrides {
            model: self.model.clone(),
            system_prompt: self.system_prompt.clone(),
            retry,
        })
    }
}

/// What `serve` and `chat` share: config, model client, and a store that loads cleanly.
struct Bootstrap {
    config: AppConfig,
    client: CompletionClient,
    layers: SettingsLayers,
    store: SessionStore,
}

fn bootstrap(opts: &ChatOptions) -> anyhow::Result<Bootstrap> {
    let config = AppConfig::from_env()?;
    if config.api_key.is_none() {
        tracing::warn!("GOOGLE_API_KEY is not set; every completion will fail");
    }
    let model = GeminiClient::from_config(&config)?;
    let client = CompletionClient::new(Arc::new(model), config.classifier.clone());
    let layers = SettingsLayers {
        global: config.defaults.clone(),
        cli: opts.overrides()?,
    };
    let path = opts.data_file.clone().unwrap_or_else(|| config.data_file.clone());
    let store = SessionStore::open(path)?;
    Ok(Bootstrap {
        config,
        client,
        layers,
        store,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { listen, opts } => {
            let addr: SocketAddr = listen.parse()?;
            let boot = bootstrap(&opts)?;
            let state = server::AppState::new(boot.client, boot.layers, boot.store)
                .with_idle_timeout(boot.config.session_idle_timeout);
            server::serve(addr, state).await?;
        }
        Commands::Chat { opts } => {
            let boot = bootstrap(&opts)?;
            let controller = ChatController::new(
                boot.client,
                Arc::new(boot.layers),
                SessionSettings::default(),
            );
            repl::run(controller, boot.store).await?;
        }
        Commands::Sessions { data_file } => {
            let config = AppConfig::from_env()?;
            let store = SessionStore::new(data_file.unwrap_or(config.data_file));
            let archive = store.load()?;
            println!("{}", serde_json::to_string_pretty(&archive)?);
        }
        Commands::Sentiment { text } => {
            println!("{:.2}", sentiment::score(&text.join(" ")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(retry_wait: Option<f64>) -> ChatOptions {
        ChatOptions {
            model: None,
            system_prompt: None,
            max_retries: None,
            retry_wait,
            data_file: None,
        }
    }

    #[test]
    fn retry_wait_flag_is_range_checked() {
        assert!(options(Some(1e30)).overrides().is_err());
        assert!(options(Some(-1.0)).overrides().is_err());
        let ok = options(Some(0.5)).overrides().unwrap();
        assert_eq!(ok.retry.and_then(|r| r.wait_secs), Some(0.5));
        assert!(options(None).overrides().unwrap().retry.is_none());
    }

    #[test]
    fn cli_parses_serve_flags() {
        let cli = Cli::try_parse_from([
            "eliza",
            "serve",
            "--listen",
            "0.0.0.0:8080",
            "--max-retries",
            "5",
            "--system-prompt",
            "",
        ])
        .unwrap();
        match cli.command {
            Commands::Serve { listen, opts } => {
                assert_eq!(listen, "0.0.0.0:8080");
                assert_eq!(opts.max_retries, Some(5));
                assert_eq!(opts.system_prompt.as_deref(), Some(""));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
