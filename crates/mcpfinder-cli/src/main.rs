//! mcpfinder - MCP server introspection and registration
//!
//! Usage:
//!   mcpfinder register [LOCATOR]   # Introspect a server and register it
//!   mcpfinder inspect <LOCATOR>    # Introspect only, print capabilities
//!   mcpfinder search <QUERY>       # Search the registry

mod interactive;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mcpfinder_core::commands::{
    InspectCommand, InspectReport, RegisterCommand, RegisterOptions, RegisterOutcome,
    RegisterReport,
};
use mcpfinder_core::config::{FinderConfig, parse_registry_url};
use mcpfinder_core::manifest::Manifest;
use mcpfinder_core::registry::{PreparedSubmission, RegistryClient, RegistryEntry};

use crate::interactive::{NoticeStream, TerminalOperator};

#[derive(Parser)]
#[command(name = "mcpfinder", version)]
#[command(about = "Introspect MCP servers and register them with the mcpfinder registry", long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/mcpfinder/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Registry base URL (overrides config file and MCPFINDER_API_URL)
    #[arg(long, global = true, value_name = "URL")]
    registry_url: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Introspect an MCP server and register it
    Register(RegisterArgs),

    /// Introspect an MCP server without registering it
    Inspect {
        /// npm package name or http(s) URL
        locator: String,
        /// Output format
        #[arg(short = 'o', long, default_value = "table")]
        format: OutputFormat,
    },

    /// Search the registry
    Search {
        /// Search text
        query: String,
        /// Maximum number of results
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Output format
        #[arg(short = 'o', long, default_value = "table")]
        format: OutputFormat,
    },
}

#[derive(Args)]
struct RegisterArgs {
    /// npm package name or http(s) URL; prompted for when omitted
    locator: Option<String>,
    /// Server description; prompted for when omitted
    #[arg(long)]
    description: Option<String>,
    /// Tag to attach (repeatable); prompted for when omitted
    #[arg(long = "tag", value_name = "TAG")]
    tags: Vec<String>,
    /// Submit without the final confirmation
    #[arg(short = 'y', long)]
    yes: bool,
    /// Print the manifest (and signature) instead of submitting
    #[arg(long)]
    dry_run: bool,
    /// Output format
    #[arg(short = 'o', long, default_value = "table")]
    format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Table,
    Json,
    Quiet,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout belongs to prompts and results
    let default_filter = if cli.verbose {
        "mcpfinder=debug,info"
    } else {
        "mcpfinder=info,warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(&cli)?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let result = runtime.block_on(run_cli(cli.command, &config));
    // A prompt abandoned on timeout may still hold a blocking thread
    runtime.shutdown_timeout(Duration::from_millis(100));
    result
}

fn load_config(cli: &Cli) -> Result<FinderConfig> {
    let mut config = FinderConfig::load(cli.config.as_deref())?;
    if let Some(raw) = &cli.registry_url {
        config = config.with_registry_url(parse_registry_url(raw)?);
    }
    tracing::debug!(?config, "configuration loaded");
    Ok(config)
}

async fn run_cli(command: Commands, config: &FinderConfig) -> Result<()> {
    match command {
        Commands::Register(args) => run_register(args, config).await,
        Commands::Inspect { locator, format } => run_inspect(&locator, format, config).await,
        Commands::Search {
            query,
            limit,
            format,
        } => run_search(&query, limit, format, config).await,
    }
}

async fn run_register(args: RegisterArgs, config: &FinderConfig) -> Result<()> {
    let mut options = RegisterOptions::new()
        .with_assume_yes(args.yes)
        .with_dry_run(args.dry_run);
    if let Some(locator) = &args.locator {
        options = options.with_locator(locator);
    }
    if let Some(description) = &args.description {
        options = options.with_description(description);
    }
    for tag in &args.tags {
        options = options.with_tag(tag);
    }

    let cmd = RegisterCommand::from_config(config)?;
    let mut operator = TerminalOperator::new(notice_stream(args.format));
    if matches!(args.format, OutputFormat::Table) {
        operator.print_header("Register an MCP server")?;
    }

    match cmd.execute(&options, &mut operator).await {
        Ok(outcome) => print_register_outcome(&outcome, args.format),
        Err(e) if e.is_cancelled() => {
            println!("Registration cancelled.");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Notices share stdout with a table report and move to stderr otherwise.
fn notice_stream(format: OutputFormat) -> NoticeStream {
    match format {
        OutputFormat::Table => NoticeStream::Stdout,
        OutputFormat::Json | OutputFormat::Quiet => NoticeStream::Stderr,
    }
}

fn print_register_outcome(outcome: &RegisterOutcome, format: OutputFormat) -> Result<()> {
    match outcome {
        RegisterOutcome::Submitted(report) => print_register_report(report, format),
        RegisterOutcome::DryRun { manifest, prepared } => {
            print_dry_run(manifest, prepared, format)
        }
        RegisterOutcome::Declined => {
            if !matches!(format, OutputFormat::Quiet) {
                println!("Registration not submitted.");
            }
            Ok(())
        }
    }
}

fn print_register_report(report: &RegisterReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            println!(
                "✓ Registered '{}' ({}, id {})",
                report.manifest.name, report.result.operation, report.result.id
            );
            println!("  {} capabilities", report.manifest.capabilities.len());
            if !report.manifest.tags.is_empty() {
                println!("  Tags: {}", report.manifest.tags.join(", "));
            }
            if let Some(stage) = report.fallback {
                println!("  Auth fallback: {stage}");
            }
            if report.capability_only {
                println!("  Updated capabilities of an existing entry");
            }
            for warning in &report.warnings {
                println!("  ⚠ {}", warning);
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        OutputFormat::Quiet => {}
    }
    Ok(())
}

fn print_dry_run(
    manifest: &Manifest,
    prepared: &PreparedSubmission,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Table => {
            println!("{}", serde_json::to_string_pretty(manifest)?);
            match prepared.authorization() {
                Some(authorization) => println!("Authorization: {authorization}"),
                None => println!("(unsigned)"),
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "manifest": manifest,
                "body": prepared.body_text(),
                "authorization": prepared.authorization(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Quiet => println!("{}", prepared.body_text()),
    }
    Ok(())
}

async fn run_inspect(locator: &str, format: OutputFormat, config: &FinderConfig) -> Result<()> {
    let cmd = InspectCommand::from_config(config);
    let report = cmd.execute(locator).await?;
    print_inspect_report(&report, format)
}

fn print_inspect_report(report: &InspectReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            let server = &report.server;
            println!(
                "{} {}",
                server.server_name.as_deref().unwrap_or(&report.locator),
                server.server_version.as_deref().unwrap_or("")
            );
            println!(
                "  Protocol: {}",
                server.protocol_version.as_deref().unwrap_or("-")
            );
            println!();

            println!("Tools ({})", server.tools.len());
            for tool in &server.tools {
                print_capability_row(&tool.name, tool.description.as_deref());
            }
            println!("Resources ({})", server.resources.len());
            for resource in &server.resources {
                print_capability_row(&resource.name, Some(resource.uri.as_str()));
            }
            println!("Prompts ({})", server.prompts.len());
            for prompt in &server.prompts {
                print_capability_row(&prompt.name, prompt.description.as_deref());
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        OutputFormat::Quiet => println!("{}", report.server.capability_count()),
    }
    Ok(())
}

fn print_capability_row(name: &str, detail: Option<&str>) {
    match detail {
        Some(detail) if !detail.is_empty() => println!("  {:<30} {}", name, detail),
        _ => println!("  {}", name),
    }
}

async fn run_search(
    query: &str,
    limit: usize,
    format: OutputFormat,
    config: &FinderConfig,
) -> Result<()> {
    let client = RegistryClient::from_config(config).context("Failed to create registry client")?;
    let entries = client.search(query, limit).await?;

    match format {
        OutputFormat::Table => print_search_table(&entries),
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        OutputFormat::Quiet => {
            for entry in &entries {
                println!("{}", entry.url);
            }
        }
    }
    Ok(())
}

fn print_search_table(entries: &[RegistryEntry]) {
    if entries.is_empty() {
        println!("No matching servers.");
        return;
    }

    println!("{:<24} {:<40} Tags", "Name", "URL");
    println!("{}", "-".repeat(80));

    for entry in entries {
        println!(
            "{:<24} {:<40} {}",
            entry.name.as_deref().unwrap_or("-"),
            entry.url,
            entry.tags.join(", ")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::{Cli, Commands, NoticeStream, OutputFormat, notice_stream};
    use clap::Parser;

    #[test]
    fn notices_share_stdout_with_table_output() {
        assert_eq!(notice_stream(OutputFormat::Table), NoticeStream::Stdout);
    }

    #[test]
    fn notices_leave_stdout_for_machine_output() {
        assert_eq!(notice_stream(OutputFormat::Json), NoticeStream::Stderr);
        assert_eq!(notice_stream(OutputFormat::Quiet), NoticeStream::Stderr);
    }

    #[test]
    fn register_json_flag_selects_stderr_notices() {
        let cli = Cli::parse_from(["mcpfinder", "register", "@acme/weather-mcp", "-o", "json"]);
        match cli.command {
            Commands::Register(args) => {
                assert_eq!(notice_stream(args.format), NoticeStream::Stderr);
            }
            _ => panic!("expected register"),
        }
    }
}
