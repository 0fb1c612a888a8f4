// Matrix - local runtime for Matrix Hub tool servers
// Main entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use matrix::config::load_config;
use matrix::errors::{wrap_error_with_suggestion, MatrixError};
use matrix::mcp::CallOutcome;
use matrix::tools::CallInput;
use matrix::Matrix;
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "matrix")]
#[command(about = "Install, run and talk to Matrix Hub tool servers", version)]
struct Args {
    /// Hub base URL (overrides MATRIX_HUB_BASE and config.toml)
    #[arg(long, global = true)]
    hub: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve a specifier and install it under an alias
    Install {
        /// [type:]name[@version]
        specifier: String,
        #[arg(long)]
        alias: Option<String>,
        /// Install directory (default: ~/.matrix/runners/<alias>)
        #[arg(long)]
        target: Option<PathBuf>,
        /// Bypass the resolution cache
        #[arg(long)]
        force: bool,
    },
    /// Resolve a specifier to a fully-qualified id
    Resolve {
        specifier: String,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        json: bool,
    },
    /// Start an installed alias
    Run {
        alias: String,
        #[arg(long)]
        port: Option<u16>,
    },
    /// List running aliases
    Ps {
        #[arg(long)]
        json: bool,
    },
    /// Stop a running alias
    Stop { alias: String },
    /// Health-check a running alias
    Doctor { alias: String },
    /// Show the tail of an alias log
    Logs {
        alias: String,
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: usize,
    },
    /// Talk to an MCP server directly
    Mcp {
        #[command(subcommand)]
        command: McpCommand,
    },
    /// Hand free text or a file to a server and let it pick the tool
    Do {
        alias: String,
        /// Free text for the tool's default input field
        text: Vec<String>,
        #[arg(long)]
        path: Option<PathBuf>,
        #[arg(long)]
        tool: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        timeout: Option<u64>,
        #[arg(long)]
        json: bool,
    },
    /// Manage the alias map
    Alias {
        #[command(subcommand)]
        command: AliasCommand,
    },
}

#[derive(Subcommand, Debug)]
enum McpCommand {
    /// Handshake and list tools
    Probe {
        alias: Option<String>,
        #[arg(long)]
        url: Option<String>,
        /// Seconds
        #[arg(long)]
        timeout: Option<u64>,
        #[arg(long)]
        json: bool,
    },
    /// Call one tool
    Call {
        tool: String,
        alias: Option<String>,
        #[arg(long)]
        url: Option<String>,
        /// Free text for the tool's default input field
        #[arg(long)]
        text: Option<String>,
        #[arg(long)]
        path: Option<PathBuf>,
        /// key=value, coerced by the schema's property type
        #[arg(long = "arg", value_parser = parse_key_value)]
        kv: Vec<(String, String)>,
        /// Full JSON argument object; skips inference
        #[arg(long)]
        args: Option<String>,
        #[arg(long)]
        timeout: Option<u64>,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum AliasCommand {
    Add {
        alias: String,
        id: String,
        target: PathBuf,
    },
    Rm {
        alias: String,
    },
    List,
    Show {
        alias: String,
    },
}

fn parse_key_value(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(k, _)| !k.trim().is_empty())
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let matrix_error = err.chain().find_map(|e| e.downcast_ref::<MatrixError>());
            let code = matrix_error.map(|e| e.exit_class().code()).unwrap_or(1);
            match matrix_error.and_then(MatrixError::suggestion) {
                Some(suggestion) => eprintln!(
                    "Error: {}",
                    wrap_error_with_suggestion(format!("{:#}", err), &suggestion)
                ),
                None => eprintln!("Error: {:#}", err),
            }
            ExitCode::from(code as u8)
        }
    }
}

fn init_tracing() {
    let show_debug = std::env::var("MATRIX_DEBUG")
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false);

    // Default: INFO level, RUST_LOG overrides, MATRIX_DEBUG forces debug
    let env_filter = if show_debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();

    // Bridge log crate -> tracing (for dependencies using log crate)
    tracing_log::LogTracer::init().ok();
}

async fn run(args: Args) -> Result<()> {
    let mut config = load_config().context("Failed to load configuration")?;
    if let Some(hub) = args.hub {
        config.hub.base_url = hub;
    }
    let matrix = Matrix::from_config(config).context("Failed to open the Matrix home")?;

    match args.command {
        Command::Install {
            specifier,
            alias,
            target,
            force,
        } => {
            let report = matrix
                .install(&specifier, alias.as_deref(), target, force)
                .await?;
            println!("Installed {} as '{}'", report.fqid, report.alias);
            println!("  target: {}", report.target.display());
            if report.resolution.used_local_fallback {
                println!("  (resolved through local hub {})", report.resolution.source_hub);
            }
            println!("Next: matrix run {}", report.alias);
        }
        Command::Resolve {
            specifier,
            force,
            json,
        } => {
            let resolution = matrix.resolve(&specifier, force).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&resolution)?);
            } else {
                println!("{}", resolution.fqid);
            }
        }
        Command::Run { alias, port } => {
            let record = matrix.run(&alias, port).await?;
            match (record.pid, record.port, record.url.as_deref()) {
                (0, _, Some(url)) => println!("'{}' connected to {}", alias, url),
                (pid, Some(port), _) => println!("'{}' running (PID: {}, port {})", alias, pid, port),
                (pid, None, _) => println!("'{}' running (PID: {})", alias, pid),
            }
            println!("Logs: matrix logs {}", alias);
        }
        Command::Ps { json } => {
            let entries = matrix.ps()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("No running servers");
            } else {
                println!(
                    "{:<20} {:>8} {:>6} {:>8}  {}",
                    "ALIAS", "PID", "PORT", "UPTIME", "URL"
                );
                for entry in entries {
                    println!(
                        "{:<20} {:>8} {:>6} {:>8}  {}",
                        entry.record.alias,
                        entry.record.pid,
                        entry.record.port.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
                        format_uptime(entry.uptime_seconds),
                        entry.endpoint.as_deref().unwrap_or("-"),
                    );
                }
            }
        }
        Command::Stop { alias } => {
            let outcome = matrix.stop(&alias).await?;
            if outcome.forced {
                println!("Stopped '{}' (killed after grace period)", alias);
            } else {
                println!("Stopped '{}'", alias);
            }
        }
        Command::Doctor { alias } => {
            let status = matrix.doctor(&alias).await?;
            println!("{}", serde_json::to_string(&status)?);
            if !status.is_ok() {
                anyhow::bail!("'{}' is unhealthy: {}", alias, status.reason);
            }
        }
        Command::Logs { alias, lines } => {
            for line in matrix.logs(&alias, lines)? {
                println!("{}", line);
            }
        }
        Command::Mcp { command } => run_mcp(&matrix, command).await?,
        Command::Do {
            alias,
            text,
            path,
            tool,
            url,
            timeout,
            json,
        } => {
            let input = CallInput {
                text: (!text.is_empty()).then(|| text.join(" ")),
                path: path.map(|p| p.display().to_string()),
                ..CallInput::default()
            };
            let outcome = matrix
                .do_task(
                    Some(&alias),
                    url.as_deref(),
                    &input,
                    tool.as_deref(),
                    timeout.map(Duration::from_secs),
                )
                .await?;
            print_outcome(&outcome, json)?;
        }
        Command::Alias { command } => match command {
            AliasCommand::Add { alias, id, target } => {
                matrix.alias_add(&alias, &id, target)?;
                println!("Alias '{}' -> {}", alias, id);
            }
            AliasCommand::Rm { alias } => {
                if matrix.alias_rm(&alias)? {
                    println!("Removed alias '{}'", alias);
                } else {
                    println!("No alias '{}'", alias);
                }
            }
            AliasCommand::List => {
                for (alias, entry) in matrix.alias_list()? {
                    println!("{:<20} {:<40} {}", alias, entry.id, entry.target.display());
                }
            }
            AliasCommand::Show { alias } => {
                let entry = matrix.alias_show(&alias)?;
                println!("{}", serde_json::to_string_pretty(&entry)?);
            }
        },
    }
    Ok(())
}

async fn run_mcp(matrix: &Matrix, command: McpCommand) -> Result<()> {
    match command {
        McpCommand::Probe {
            alias,
            url,
            timeout,
            json,
        } => {
            let report = matrix
                .probe(
                    alias.as_deref(),
                    url.as_deref(),
                    timeout.map(Duration::from_secs),
                )
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }
            if let Some(info) = &report.server_info {
                println!("Connected to {} {} at {}", info.name, info.version, report.url);
            } else {
                println!("Connected to {}", report.url);
            }
            println!("{} tool(s):", report.tools.len());
            for tool in &report.tools {
                match &tool.description {
                    Some(desc) => println!("  - {}: {}", tool.name, desc),
                    None => println!("  - {}", tool.name),
                }
            }
        }
        McpCommand::Call {
            tool,
            alias,
            url,
            text,
            path,
            kv,
            args,
            timeout,
            json,
        } => {
            let input = CallInput {
                text,
                kv,
                path: path.map(|p| p.display().to_string()),
                raw_args: args,
            };
            let outcome = matrix
                .call(
                    &tool,
                    alias.as_deref(),
                    url.as_deref(),
                    &input,
                    timeout.map(Duration::from_secs),
                )
                .await?;
            print_outcome(&outcome, json)?;
        }
    }
    Ok(())
}

fn print_outcome(outcome: &CallOutcome, json: bool) -> Result<()> {
    if json || outcome.text.is_empty() {
        println!("{}", serde_json::to_string_pretty(outcome)?);
    } else {
        println!("{}", outcome.text);
    }
    Ok(())
}

fn format_uptime(seconds: i64) -> String {
    match seconds {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m", s / 60),
        s => format!("{}h{}m", s / 3600, (s % 3600) / 60),
    }
}
