//! Snapshot control for emulated targets behind a GDB stub.
//!
//! Run with: cargo run -p qsnap-cli -- [--target HOST:PORT] [--config PATH] [command...]
//!
//! Without a command an interactive prompt reads commands from stdin.
//! `--target emulated` talks to an in-process emulated target.

mod commands;
mod config;

use std::{io::Write, path::PathBuf, process::ExitCode};

use anyhow::Context;
use clap::Parser;
use qsnap_client::SnapshotClient;
use qsnap_core::CommandChannel;
use qsnap_transport::{MemoryTarget, RspChannel};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    commands::{CommandTable, Session, tokenize},
    config::{CliConfig, EMULATED_TARGET},
};

/// Snapshot control for emulated targets behind a GDB stub.
#[derive(Parser, Debug)]
#[command(name = "qsnap", version, about)]
struct Args {
    /// GDB stub address (HOST:PORT), or `emulated` for the in-process target
    #[arg(long, value_name = "HOST:PORT")]
    target: Option<String>,

    /// Config file (defaults to <config_dir>/qsnap/config.json when present)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Snapshot command and its arguments; omit for an interactive prompt
    #[arg(trailing_var_arg = true, value_name = "COMMAND")]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let mut config = CliConfig::load(args.config.as_deref())?;
    config.apply_env(|key| std::env::var(key).ok());
    if let Some(target) = args.target {
        config.target = target;
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log.as_str().into()),
        )
        .init();

    let channel = connect(&config).await?;
    let mut session = Session::new(SnapshotClient::new(channel), config.extension);
    let table = CommandTable::snapshot_commands();

    if args.command.is_empty() {
        interactive(&table, &mut session).await?;
        return Ok(ExitCode::SUCCESS);
    }

    table
        .dispatch(&mut session, &args.command, &mut std::io::stdout())
        .await?;
    Ok(ExitCode::SUCCESS)
}

async fn connect(config: &CliConfig) -> anyhow::Result<Box<dyn CommandChannel>> {
    if config.target == EMULATED_TARGET {
        tracing::info!("Using in-process emulated target");
        return Ok(Box::new(MemoryTarget::new()));
    }

    let channel = RspChannel::connect(config.target.as_str())
        .await
        .with_context(|| format!("Failed to connect to {}", config.target))?;
    tracing::info!(addr = %config.target, "Connected");
    Ok(Box::new(channel.with_max_retries(config.max_retries)))
}

async fn interactive<C: CommandChannel>(
    table: &CommandTable<C>,
    session: &mut Session<C>,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = std::io::stdout();

    loop {
        write!(stdout, "(qsnap) ")?;
        stdout.flush()?;

        let Some(line) = lines.next_line().await? else {
            writeln!(stdout)?;
            break;
        };
        if matches!(line.trim(), "quit" | "exit") {
            break;
        }

        let result = match tokenize(&line) {
            Ok(tokens) => table.dispatch(session, &tokens, &mut stdout).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            eprintln!("Error: {e:#}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    fn args(list: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("qsnap").chain(list.iter().copied()))
    }

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_flags_and_command() {
        let parsed = args(&["--target", "emulated", "save", "alpha", "--odd-name"]).unwrap();
        assert_eq!(parsed.target.as_deref(), Some("emulated"));
        assert_eq!(parsed.command, ["save", "alpha", "--odd-name"]);

        let parsed = args(&["--config=/tmp/c.json", "--target=1.2.3.4:9"]).unwrap();
        assert_eq!(parsed.config, Some(PathBuf::from("/tmp/c.json")));
        assert_eq!(parsed.target.as_deref(), Some("1.2.3.4:9"));
        assert!(parsed.command.is_empty());
    }

    #[test]
    fn test_parse_errors() {
        assert!(args(&["--target"]).is_err());
        assert!(args(&["--verbose"]).is_err());

        let err = args(&["-h"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}
