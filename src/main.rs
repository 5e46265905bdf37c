use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use wayfarer::api::{self, AppState};
use wayfarer::executors::ExecutorRegistry;
use wayfarer::providers::ModelGateway;
use wayfarer::storage::InMemoryTaskHistory;
use wayfarer::{Config, Dispatcher, RoutingContext};

#[derive(Parser)]
#[command(name = "wayfarer")]
#[command(about = "Agentic task routing and iterative web automation", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML config file; environment variables still override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one task and print the answer
    Run {
        #[arg(help = "Task description")]
        prompt: String,
    },
    /// Serve the HTTP API
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the executor registry and statistics
    Agents,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env(),
    };

    match cli.command {
        Commands::Run { prompt } => run_task(&config, &prompt).await?,
        Commands::Serve { port } => {
            let dispatcher = build_dispatcher(&config)?;
            api::serve(AppState { dispatcher }, port.unwrap_or(config.port)).await?
        }
        Commands::Agents => {
            let dispatcher = build_dispatcher(&config)?;
            println!("{}", serde_json::to_string_pretty(&dispatcher.introspect(10))?);
        }
    }

    Ok(())
}

async fn run_task(config: &Config, prompt: &str) -> Result<()> {
    let dispatcher = build_dispatcher(config)?;
    let result = dispatcher.submit(prompt, None, RoutingContext::new()).await?;

    match result.result.get("response").and_then(|r| r.as_str()) {
        Some(answer) => println!("{}", answer),
        None => println!("{}", serde_json::to_string_pretty(&result.result)?),
    }
    log::info!("Completed in {}ms", result.execution_time_ms);
    Ok(())
}

fn build_dispatcher(config: &Config) -> Result<Arc<Dispatcher>> {
    let gateway = Arc::new(ModelGateway::from_config(config)?);
    let registry = build_registry(config, gateway.clone());

    Ok(Arc::new(Dispatcher::new(
        Arc::new(registry),
        gateway,
        Arc::new(InMemoryTaskHistory::new()),
        config.dispatcher.clone(),
    )))
}

#[cfg(feature = "chromium")]
fn build_registry(config: &Config, gateway: Arc<ModelGateway>) -> ExecutorRegistry {
    use wayfarer::browser::{BrowserAgent, ChromiumEngine};

    let engine = Arc::new(ChromiumEngine::new(config.browser.headless));
    let agent = BrowserAgent::new(engine, gateway, config.browser.clone());
    ExecutorRegistry::with_defaults(Some(Arc::new(agent)))
}

#[cfg(not(feature = "chromium"))]
fn build_registry(_config: &Config, _gateway: Arc<ModelGateway>) -> ExecutorRegistry {
    log::warn!("Built without the chromium feature; WebAgent is registered as planned");
    ExecutorRegistry::with_defaults(None)
}
