//! CLI binary that sends a prompt to one LLM model or fans it out to every
//! configured provider.

mod config;
mod display;

use std::io::{IsTerminal, Read};
use std::time::Duration;

use anyhow::{bail, Context};
use chorus_history::{HistoryStore, DEFAULT_LIMIT};
use chorus_llm::{
    with_max_tokens, with_system, with_temperature, ChorusError, LlmService, ModelRegistry,
    QueryContext,
};
use clap::{Args, Parser, Subcommand};

use crate::config::Config;

/// Transport timeout and per-query deadline.
const QUERY_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Parser)]
#[command(
    name = "chorus",
    version,
    about = "Send a prompt to one or every configured LLM provider",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    query: QueryArgs,

    /// Show a detailed table and debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args)]
struct QueryArgs {
    /// Prompt text (read from stdin when omitted)
    prompt: Option<String>,

    /// Model to query
    #[arg(short, long, default_value = "claude-3-7-sonnet-latest")]
    model: String,

    /// System prompt
    #[arg(short, long)]
    system: Option<String>,

    /// Sampling temperature
    #[arg(short, long, default_value_t = 0.7)]
    temperature: f64,

    /// Maximum output tokens
    #[arg(long, default_value_t = 1000)]
    max_tokens: u32,

    /// Query every configured provider at once
    #[arg(short, long)]
    all: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a provider API key in the config file
    Set {
        /// Provider name (see `chorus models`)
        provider: String,

        /// API key for the provider
        #[arg(long)]
        api_key: String,
    },

    /// List supported models by provider
    Models,

    /// Show recent queries
    History {
        /// Number of queries to show
        #[arg(short, long, default_value_t = DEFAULT_LIMIT)]
        limit: i64,

        /// Print the most recent query in full
        #[arg(short, long)]
        detail: bool,

        /// Only queries whose prompt or response contains this text
        #[arg(short, long)]
        search: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let registry = ModelRegistry::builtin();

    match cli.command {
        Some(Commands::Set { provider, api_key }) => {
            cmd_set(&registry, &provider, &api_key)?;
        }
        Some(Commands::Models) => {
            print!("{}", display::models(&registry));
        }
        Some(Commands::History {
            limit,
            detail,
            search,
        }) => {
            cmd_history(limit, detail, search.as_deref()).await?;
        }
        None => {
            cmd_query(cli.query, cli.verbose, registry).await?;
        }
    }

    Ok(())
}

fn cmd_set(registry: &ModelRegistry, provider: &str, api_key: &str) -> anyhow::Result<()> {
    let mut config = Config::load().context("error loading config")?;
    config
        .set_api_key(registry, provider, api_key)
        .context("error setting API key")?;
    let path = config.save().context("error saving config")?;

    println!("API key for {provider} has been set.");
    println!("Configuration saved to {}", path.display());
    Ok(())
}

async fn cmd_history(limit: i64, detail: bool, search: Option<&str>) -> anyhow::Result<()> {
    let store = HistoryStore::open(&config::config_dir()?)
        .await
        .context("failed to open query history")?;

    let records = match search {
        Some(text) => store.search_queries(text, limit).await,
        None => store.recent_queries(limit).await,
    };
    store.close().await;
    let records = records?;

    if records.is_empty() {
        if search.is_some() {
            println!("No queries found matching your search.");
        } else {
            println!("No query history found.");
        }
        return Ok(());
    }

    print!("{}", display::history(&records));
    if detail {
        print!("{}", display::history_detail(&records[0]));
    }
    Ok(())
}

async fn cmd_query(args: QueryArgs, verbose: bool, registry: ModelRegistry) -> anyhow::Result<()> {
    let prompt = read_prompt(args.prompt)?;
    let config = Config::load().context("error loading config")?;

    let api_keys = config.api_keys(&registry);
    if args.all && api_keys.is_empty() {
        bail!(
            "no API keys found. Set at least one provider API key with: \
             chorus set <provider> --api-key YOUR_API_KEY"
        );
    }

    let http = reqwest::Client::builder()
        .timeout(QUERY_TIMEOUT)
        .build()
        .context("failed to build HTTP client")?;
    let mut service = LlmService::new(&api_keys, http).with_registry(registry);

    match HistoryStore::open(&config::config_dir()?).await {
        Ok(store) => service = service.with_history(store),
        Err(err) => eprintln!("Warning: query logging disabled - {err}"),
    }

    let mut options = vec![
        with_max_tokens(args.max_tokens),
        with_temperature(args.temperature),
    ];
    if let Some(system) = args.system.filter(|s| !s.is_empty()) {
        options.push(with_system(system));
    }

    let ctx = QueryContext::with_timeout(QUERY_TIMEOUT);

    let outcome = if args.all {
        eprintln!(
            "Querying {} providers...",
            service.configured_providers().len()
        );
        let results = service.query_all(&ctx, &prompt, &options).await;
        print!("{}", display::fan_out(&results));
        Ok(())
    } else {
        match service
            .query_with_timing(&ctx, &prompt, &args.model, &options)
            .await
        {
            Ok((response, elapsed)) => {
                if verbose {
                    print!(
                        "{}",
                        display::single_verbose(&prompt, &args.model, &response, elapsed)
                    );
                } else {
                    print!("{}", display::single(&response, elapsed));
                }
                Ok(())
            }
            Err(ChorusError::ProviderNotConfigured(provider)) => Err(anyhow::anyhow!(
                "{provider} API key not found. Set it with: chorus set {provider} --api-key YOUR_API_KEY"
            )),
            Err(err) => {
                let stage = err.stage();
                Err(anyhow::Error::new(err).context(format!("error querying model ({stage})")))
            }
        }
    };

    service.shutdown().await;
    outcome
}

/// The prompt argument, or all of stdin when it is piped.
fn read_prompt(arg: Option<String>) -> anyhow::Result<String> {
    if let Some(prompt) = arg {
        return Ok(prompt);
    }

    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        bail!("no input provided via argument or stdin");
    }

    let mut prompt = String::new();
    stdin
        .lock()
        .read_to_string(&mut prompt)
        .context("failed to read prompt from stdin")?;
    if prompt.is_empty() {
        bail!("no input provided via argument or stdin");
    }
    Ok(prompt)
}
