//! gitsc - drive the Git source-control provider from a terminal
//!
//! Run with `gitsc --help` for usage.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use gitsc::{
    APP_NAME, Config, FileState, GitProvider, OperationRequest, RefreshScope, VERSION,
    dispatch::{OperationPayload, OperationReport},
    git::{GitExecutor, ToolInvocation, ToolRunner, find_binary, resolve_root},
};

#[derive(Parser)]
#[command(name = APP_NAME)]
#[command(version = VERSION)]
#[command(about = "Git source-control provider console")]
#[command(long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Working copy (default: configured root, else current directory)
    #[arg(short = 'C', long)]
    repo: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh and show file states (changed files when no path is given)
    Status { paths: Vec<String> },

    /// Refresh file states
    Refresh { paths: Vec<String> },

    /// Stage files for addition
    Add {
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Mark files for deletion
    Delete {
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Discard local changes
    Revert {
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Commit files (the staged index when no path is given)
    Commit {
        /// Commit message
        #[arg(short, long)]
        message: String,

        paths: Vec<String>,
    },

    /// Pull with rebase from the configured remote
    Sync,

    /// Push the current branch
    Push,

    /// Take LFS locks
    Lock {
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Release LFS locks
    Unlock {
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Mark conflicts as resolved
    Resolve {
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// List local branches
    Branches,

    /// Switch to another branch
    Switch {
        branch: String,

        /// Create the branch first
        #[arg(short = 'b', long)]
        create: bool,
    },

    /// Show the history of a file
    Log { path: String },

    /// Show repository, remote, user and branch
    Info,

    /// Show configuration
    Config {
        /// Initialize config file with defaults
        #[arg(long)]
        init: bool,
    },

    /// Run a raw git command in the working copy
    Exec {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        args: Vec<String>,
    },
}

fn setup_logging(debug: bool, log_file: Option<&Path>) -> Result<()> {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        // Use info level for our crate, warn for dependencies
        EnvFilter::new("info")
            .add_directive("gix=warn".parse()?)
            .add_directive("tokio=warn".parse()?)
    };

    if let Some(path) = log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;

        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(file).with_target(false))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .with(filter)
            .init();
    }

    Ok(())
}

fn print_state(state: &FileState) {
    let mut line = format!("{:>18}  {}", state.status, state.path);
    if let Some(from) = &state.renamed_from {
        line.push_str(&format!(" (from {from})"));
    }
    if let Some(owner) = &state.lock_owner {
        line.push_str(&format!(" [locked by {owner}]"));
    }
    if state.stale {
        line.push_str(" (stale)");
    }
    println!("{line}");
}

fn print_report(report: &OperationReport) {
    for line in &report.info {
        println!("{line}");
    }
    match &report.payload {
        OperationPayload::None | OperationPayload::Commit(_) => {}
        OperationPayload::Branches(branches) => {
            for branch in branches {
                let marker = if branch.current { "*" } else { " " };
                let upstream = branch
                    .upstream
                    .as_deref()
                    .map(|u| format!(" -> {u}"))
                    .unwrap_or_default();
                println!("{} {} {}{}", marker, branch.name, &branch.commit_id[..branch.commit_id.len().min(8)], upstream);
            }
        }
        OperationPayload::History(revisions) => {
            for rev in revisions {
                println!(
                    "r{:<4} {} {} {:<24} {:?} {}",
                    rev.revision_number,
                    rev.short_id,
                    rev.date.format("%Y-%m-%d %H:%M"),
                    rev.author,
                    rev.action,
                    rev.message.lines().next().unwrap_or("")
                );
            }
        }
    }
}

/// Submit a request, wait for it and print what happened
async fn run(provider: &GitProvider, request: OperationRequest) -> Result<OperationReport> {
    let handle = provider.submit(request)?;
    info!("submitted {} operation {}", handle.kind(), handle.id());
    let report = handle.await?;
    print_report(&report);
    Ok(report)
}

fn print_changed(provider: &GitProvider, report: &OperationReport) {
    for state in provider.query_state(&report.changed) {
        if let Some(state) = state.state {
            print_state(&state);
        }
    }
}

/// Refresh scope for the given host paths
fn scope(paths: Vec<String>) -> RefreshScope {
    if paths.is_empty() {
        RefreshScope::Full
    } else {
        RefreshScope::paths(paths)
    }
}

async fn exec(config: &Config, args: Vec<String>) -> Result<()> {
    let binary = find_binary(config)?;
    let root = resolve_root(config)?;
    let executor = GitExecutor::new(binary).with_output_cap(config.output_cap_bytes);
    let invocation = ToolInvocation::new(root, args).with_timeout(config.operation_timeout());
    let output = executor.execute(&invocation).await?;
    print!("{}", output.stdout);
    eprint!("{}", output.stderr);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install color-eyre error hooks
    color_eyre::install()?;

    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load().unwrap_or_else(|e| {
            eprintln!("Warning: Failed to load config, using defaults: {}", e);
            Config::default()
        }),
    };
    if let Some(repo) = cli.repo {
        config.repository_root = Some(repo);
    }

    setup_logging(cli.debug || config.debug, config.log_file.as_deref())?;

    match cli.command {
        Commands::Config { init } => {
            if init {
                match &cli.config {
                    Some(path) => config.save_to(path)?,
                    None => config.save()?,
                }
                println!(
                    "Configuration initialized at {:?}",
                    cli.config.map_or_else(Config::config_file_path, Ok)?
                );
            } else {
                println!("Configuration:");
                println!("{}", toml::to_string_pretty(&config)?);
                println!("\nConfig file: {:?}", Config::config_file_path()?);
            }
            return Ok(());
        }
        Commands::Exec { args } => return exec(&config, args).await,
        _ => {}
    }

    let provider = GitProvider::activate(config).await;
    if !provider.is_available() {
        return Err(eyre!("{}", provider.status_text()));
    }

    match cli.command {
        Commands::Status { paths } => {
            let request = OperationRequest::Refresh(scope(paths.clone()));
            provider.submit(request)?.await?;
            if paths.is_empty() {
                let changed = provider.cache().changed();
                if changed.is_empty() {
                    println!("Nothing to commit, working copy clean");
                }
                changed.iter().for_each(print_state);
            } else {
                for queried in provider.query_state(&paths) {
                    let status = queried.host_status();
                    match &queried.state {
                        Some(state) => print_state(state),
                        None => println!("{:>18}  {}", status.display_name, queried.requested),
                    }
                }
            }
        }
        Commands::Refresh { paths } => {
            let report = run(&provider, OperationRequest::Refresh(scope(paths))).await?;
            println!("{} path(s) changed", report.changed.len());
        }
        Commands::Add { paths } => {
            let report = run(&provider, OperationRequest::Add(paths)).await?;
            print_changed(&provider, &report);
        }
        Commands::Delete { paths } => {
            let report = run(&provider, OperationRequest::Delete(paths)).await?;
            print_changed(&provider, &report);
        }
        Commands::Revert { paths } => {
            let report = run(&provider, OperationRequest::Revert(paths)).await?;
            print_changed(&provider, &report);
        }
        Commands::Commit { message, paths } => {
            run(&provider, OperationRequest::Commit { paths, message }).await?;
        }
        Commands::Sync => {
            let report = run(&provider, OperationRequest::Sync).await?;
            print_changed(&provider, &report);
        }
        Commands::Push => {
            run(&provider, OperationRequest::Push).await?;
        }
        Commands::Lock { paths } => {
            let report = run(&provider, OperationRequest::Lock(paths)).await?;
            print_changed(&provider, &report);
        }
        Commands::Unlock { paths } => {
            let report = run(&provider, OperationRequest::Unlock(paths)).await?;
            print_changed(&provider, &report);
        }
        Commands::Resolve { paths } => {
            let report = run(&provider, OperationRequest::Resolve(paths)).await?;
            print_changed(&provider, &report);
        }
        Commands::Branches => {
            run(&provider, OperationRequest::ListBranches).await?;
        }
        Commands::Switch { branch, create } => {
            run(&provider, OperationRequest::SwitchBranch { branch, create }).await?;
            println!("{}", provider.status_text());
        }
        Commands::Log { path } => {
            run(&provider, OperationRequest::History { path }).await?;
        }
        Commands::Info => {
            println!("{}", provider.status_text());
        }
        Commands::Config { .. } | Commands::Exec { .. } => {}
    }

    provider.shutdown().await;
    Ok(())
}
