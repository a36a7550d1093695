//! Pulse CLI - repository activity extracts for dashboards
//!
//! Pulls issues, commits and pull-request review metrics from the GitHub
//! GraphQL API and writes them as CSV files.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use pulse_core::{Config, Overrides};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::{Context, IssuesArgs};

/// Pulse: GitHub activity extracts
#[derive(Parser, Debug)]
#[command(name = "pulse")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Repository (owner/repo or GitHub URL)
    #[arg(short, long, global = true)]
    repo: Option<String>,

    /// Only include activity updated since this ISO-8601 date
    #[arg(long, global = true)]
    since: Option<String>,

    /// Pull-request creation range, e.g. 2024-01-01..2024-03-31
    #[arg(long, global = true)]
    date_range: Option<String>,

    /// Directory the CSV files are written to
    #[arg(short, long, global = true)]
    output_dir: Option<PathBuf>,

    /// Pull requests resolved in parallel
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Stop after this many API requests
    #[arg(long, global = true)]
    max_requests: Option<u64>,

    /// Config file (defaults to ~/.config/pulse/config.toml)
    #[arg(short, long, global = true, env = "PULSE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show version information
    Version,

    /// Extract issues with the contributors of their linked pull requests
    #[command(visible_alias = "i")]
    Issues(IssuesArgs),

    /// Extract default-branch commits
    #[command(visible_alias = "c")]
    Commits,

    /// Extract pull-request review metrics
    Prs,

    /// Run every extract
    All(IssuesArgs),

    /// Show current configuration
    Config,
}

impl Cli {
    fn overrides(&self) -> anyhow::Result<Overrides> {
        let (owner, repo) = match &self.repo {
            Some(spec) => {
                let (owner, repo) = pulse_github::parse_repository(spec)?;
                (Some(owner), Some(repo))
            }
            None => (None, None),
        };

        Ok(Overrides {
            owner,
            repo,
            since: self.since.clone(),
            date_range: self.date_range.clone(),
            output_dir: self.output_dir.clone(),
            concurrency: self.concurrency,
            max_requests: self.max_requests,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; RUST_LOG wins over -v
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let config = Config::load_with_overrides(cli.config.as_deref(), cli.overrides()?)?;

    if cli.verbose {
        tracing::debug!(
            owner = ?config.github.owner,
            repo = ?config.github.repo,
            since = ?config.fetch.since,
            "Configuration loaded"
        );
    }

    match cli.command {
        Some(Commands::Version) => {
            println!("pulse {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Issues(args)) => {
            let ctx = Context::new(config)?;
            args.execute(&ctx).await?;
        }
        Some(Commands::Commits) => {
            let ctx = Context::new(config)?;
            commands::commits::execute(&ctx).await?;
        }
        Some(Commands::Prs) => {
            let ctx = Context::new(config)?;
            commands::prs::execute(&ctx).await?;
        }
        Some(Commands::All(args)) => {
            let ctx = Context::new(config)?;
            args.execute(&ctx).await?;
            commands::commits::execute(&ctx).await?;
            commands::prs::execute(&ctx).await?;
            ctx.log_usage();
        }
        Some(Commands::Config) => print_config(&config, cli.config.as_deref()),
        None => {
            println!("Pulse - GitHub activity extracts");
            println!();
            println!("Use --help for usage information");
        }
    }

    Ok(())
}

fn print_config(config: &Config, path: Option<&std::path::Path>) {
    let unset = "(not set)";

    println!("Pulse Configuration");
    println!("===================");
    println!();
    println!("GitHub:");
    println!("  api_url: {}", config.github.api_url);
    println!("  owner: {}", config.github.owner.as_deref().unwrap_or(unset));
    println!("  repo: {}", config.github.repo.as_deref().unwrap_or(unset));
    println!();
    println!("Fetch:");
    println!("  since: {}", config.fetch.since.as_deref().unwrap_or(unset));
    println!("  date_range: {}", config.fetch.date_range.as_deref().unwrap_or(unset));
    println!("  issues_per_page: {}", config.fetch.issues_per_page);
    println!("  timeline_window: {}", config.fetch.timeline_window);
    println!("  full_timeline: {}", config.fetch.full_timeline);
    println!();
    println!("Limits:");
    println!("  concurrency: {}", config.limits.concurrency);
    match config.limits.max_requests {
        Some(n) => println!("  max_requests: {}", n),
        None => println!("  max_requests: (unlimited)"),
    }
    match config.limits.max_duration {
        Some(d) => println!("  max_duration: {:?}", d),
        None => println!("  max_duration: (unlimited)"),
    }
    println!("  retry_attempts: {}", config.limits.retry_attempts);
    println!();
    println!("Output:");
    println!("  issues: {}", config.output.issues_path().display());
    println!("  commits: {}", config.output.commits_path().display());
    println!("  prs: {}", config.output.prs_path().display());
    println!();

    let path = path.map(|p| p.to_path_buf()).or_else(Config::default_config_path);
    if let Some(path) = path {
        println!("Config file: {}", path.display());
        if path.exists() {
            println!("  (exists)");
        } else {
            println!("  (not found - using defaults)");
        }
    }
}
