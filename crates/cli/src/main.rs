mod config;
mod error;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use runtime::{Agent, OpenAiBackend, ToolHost};
use tracing_subscriber::EnvFilter;

use config::Config;
use error::Result;

const CONFIG_FILE: &str = "mcp-agent.toml";

#[derive(Parser)]
#[command(name = "mcp-agent")]
#[command(about = "Chat with an LLM that can call tools from MCP providers", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat session
    Chat,
    /// List the tools offered by the configured providers
    Tools,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load_or_default(&cli.config)?;

    match cli.command {
        Some(Commands::Chat) | None => cmd_chat(config).await,
        Some(Commands::Tools) => cmd_tools(config).await,
    }
}

/// Start every configured provider. Providers that fail to start are skipped.
async fn start_providers(config: &Config) -> Arc<ToolHost> {
    let host = Arc::new(ToolHost::new(config.session_options()));
    for provider in &config.providers {
        let name = provider.name.clone();
        match host.register_provider(provider.clone()).await {
            Ok(()) => tracing::info!(provider = %name, "provider started"),
            Err(e) => tracing::warn!(provider = %name, error = %e, "failed to start provider, skipping"),
        }
    }
    host
}

async fn cmd_chat(config: Config) -> Result<()> {
    println!("mcp-agent v{}", env!("CARGO_PKG_VERSION"));

    let api_key = config.api_key()?;
    let backend = OpenAiBackend::builder(api_key, &config.backend.model)
        .base_url(&config.backend.base_url)
        .temperature(config.backend.temperature)
        .max_tokens(config.backend.max_tokens)
        .build();

    let host = start_providers(&config).await;
    let providers = host.provider_names().await;
    println!("Model: {}", config.backend.model);
    if providers.is_empty() {
        println!("Providers: none");
    } else {
        println!("Providers: {}", providers.join(", "));
    }
    println!("Type 'tools' to list tools, 'quit' or Ctrl+D to exit.\n");

    let mut agent =
        Agent::new(backend, host.clone()).with_history_limit(config.session.history_limit);

    let result = chat_loop(&mut agent).await;
    host.shutdown_all().await;
    println!("\nSession ended.");
    result
}

async fn chat_loop(agent: &mut Agent<OpenAiBackend>) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            // EOF
            break;
        }

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "quit" || input == "exit" {
            break;
        }
        if input == "tools" {
            print_tools(agent.host()).await;
            continue;
        }

        match agent.process_message(input).await {
            Ok(response) => println!("\n{response}\n"),
            Err(e) => eprintln!("Error: {e}\n"),
        }
    }

    Ok(())
}

async fn cmd_tools(config: Config) -> Result<()> {
    let host = start_providers(&config).await;
    print_tools(&host).await;
    host.shutdown_all().await;
    Ok(())
}

async fn print_tools(host: &ToolHost) {
    let tools = host.list_all_tools().await;
    if tools.is_empty() {
        println!("No tools available.");
        return;
    }

    for registered in tools {
        let description = registered
            .tool
            .description
            .as_deref()
            .unwrap_or("No description");
        println!(
            "- {} ({}): {description}",
            registered.tool.name, registered.provider
        );
    }
}
