//! CLI entry point for chatterm.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use colored::Colorize;
use dotenvy::dotenv;

use chatterm::agent::ToolCallingAgent;
use chatterm::client::OpenAiClient;
use chatterm::config::Config;
use chatterm::core::error_log::ErrorLog;
use chatterm::core::mode::{Mode, SubmitBehavior};
use chatterm::core::session::{Collaborators, Session, SessionOptions};
use chatterm::llm_client::{NoTools, ToolManager};
use chatterm::logging;
use chatterm::mcp::{McpConfig, McpPool, McpToolManager};
use chatterm::palette;
use chatterm::surface::ConsoleSurface;
use chatterm::tui::{TuiSurface, run_tui};

#[derive(Parser, Debug)]
#[command(
    name = "chatterm",
    author,
    version,
    about = "Chat, shell and agent in one terminal",
    after_help = "Examples:\
    \n   chatterm                       # Start the interactive session\
    \n   chatterm --mode agent          # Start in agent mode\
    \n   chatterm -p 'hello'            # One-shot chat reply\
    \n   chatterm check                 # Validate config and MCP servers"
)]
struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    command: Option<Commands>,

    /// Send a one-shot prompt (non-interactive)
    #[arg(short, long)]
    prompt: Option<String>,

    /// Mode to start in (chat, terminal, agent)
    #[arg(long, default_value = "chat")]
    mode: Mode,

    /// Start with Enter inserting a new line instead of submitting
    #[arg(long)]
    multiline: bool,

    /// Path to config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Config profile name
    #[arg(long)]
    profile: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
enum Commands {
    /// Validate the configuration and try every MCP server
    Check,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    logging::set_verbose(cli.verbose);

    if let Some(Commands::Completions { shell }) = cli.command {
        generate_completions(shell);
        return Ok(());
    }

    let config = Config::load(cli.config.clone(), cli.profile.as_deref())?;
    let log_path = config.log_path();
    if let Err(err) = logging::init(&log_path, cli.verbose) {
        logging::warn(format!("Diagnostics log disabled: {err:#}"));
    }
    logging::info(format!("Diagnostics log: {}", log_path.display()));

    if let Some(Commands::Check) = cli.command {
        return run_check(&config).await;
    }

    let collaborators = build_collaborators(&config)?;
    let error_log = ErrorLog::new(config.error_log_path());
    let options = SessionOptions {
        mode: cli.mode,
        submit_behavior: if cli.multiline {
            SubmitBehavior::MultilineInsert
        } else {
            SubmitBehavior::SingleLineSubmit
        },
        ..config.session_options()
    };

    if let Some(prompt) = cli.prompt {
        let mut session = Session::new(ConsoleSurface::stdout(), collaborators, error_log, options);
        session.submit(&prompt);
        session.settle().await;
        println!();
        return Ok(());
    }

    tracing::info!(mode = cli.mode.label(), "Starting interactive session");
    let session = Session::new(TuiSurface::new(), collaborators, error_log, options);
    run_tui(session).await
}

fn build_collaborators(config: &Config) -> Result<Collaborators> {
    let mcp_path = config.mcp_config_path();
    let mcp_config = McpConfig::load(&mcp_path)?;
    let tools: Arc<dyn ToolManager> = if mcp_config.servers.is_empty() {
        logging::info(format!("No MCP servers configured at {}", mcp_path.display()));
        Arc::new(NoTools)
    } else {
        Arc::new(McpToolManager::new(mcp_config))
    };

    let chat = OpenAiClient::from_config(config, config.chat_model())?;
    let agent_client = OpenAiClient::from_config(config, config.agent_model())?;
    let agent = ToolCallingAgent::new(agent_client, config.agent_model(), Arc::clone(&tools))
        .with_system_prompt(config.agent_prompt());

    Ok(Collaborators {
        chat: Arc::new(chat),
        agent: Arc::new(agent),
        tools,
    })
}

/// Report the resolved configuration and connect every enabled MCP server.
async fn run_check(config: &Config) -> Result<()> {
    let (blue_r, blue_g, blue_b) = palette::BLUE_RGB;
    let (green_r, green_g, green_b) = palette::GREEN_RGB;
    let (red_r, red_g, red_b) = palette::RED_RGB;
    let (muted_r, muted_g, muted_b) = palette::SILVER_RGB;
    let ok = "✓".truecolor(green_r, green_g, green_b);
    let fail = "✗".truecolor(red_r, red_g, red_b);

    println!("{}", "chatterm check".truecolor(blue_r, blue_g, blue_b).bold());
    println!("  Base URL:     {}", config.base_url());
    println!("  Chat model:   {}", config.chat_model());
    println!("  Agent model:  {}", config.agent_model());
    println!("  Error log:    {}", config.error_log_path().display());
    match config.api_key() {
        Ok(_) => println!("{ok} API key configured"),
        Err(_) => println!("{fail} API key missing (set CHATTERM_API_KEY or OPENAI_API_KEY)"),
    }

    let mcp_path = config.mcp_config_path();
    let mut pool = match McpPool::from_config_path(&mcp_path) {
        Ok(pool) => pool,
        Err(err) => {
            println!("{fail} MCP config {}: {err:#}", mcp_path.display());
            return Ok(());
        }
    };
    if pool.config().servers.is_empty() {
        println!(
            "{} No MCP servers configured ({})",
            "·".truecolor(muted_r, muted_g, muted_b),
            mcp_path.display()
        );
        return Ok(());
    }

    let errors = pool.connect_all().await;
    let tools = pool.api_tools();
    for name in pool.connected_servers() {
        println!("{ok} MCP server {name} connected");
    }
    for (name, err) in &errors {
        println!("{fail} MCP server {name}: {err:#}");
    }
    println!("  {} tool(s) available", tools.len());
    Ok(())
}

/// Generate shell completions for the given shell
fn generate_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
}
