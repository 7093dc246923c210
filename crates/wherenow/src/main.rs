//! `wherenow` - CLI for the wherenow location log
//!
//! This binary runs the HTTP service and offers a few commands for looking at
//! the log and the configuration from the terminal.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use anyhow::Context;
use clap::Parser;

use wherenow::cli::{Cli, Command, ConfigCommand, OutputFormat, RecentCommand, ServeCommand};
use wherenow::{clamp_limit, init_logging, server, Config, LocationLog, RecentEntry};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    match cli.command {
        Command::Serve(serve_cmd) => handle_serve(cli.config, serve_cmd),
        Command::Recent(recent_cmd) => {
            let config = Config::load_unvalidated(cli.config)?;
            handle_recent(&config, &recent_cmd)
        }
        Command::Config(config_cmd) => handle_config(cli.config, config_cmd),
    }
}

fn handle_serve(config_path: Option<std::path::PathBuf>, cmd: ServeCommand) -> anyhow::Result<()> {
    let mut config = Config::load_unvalidated(config_path)?;
    if let Some(host) = cmd.host {
        config.server.host = host;
    }
    if let Some(port) = cmd.port {
        config.server.port = port;
    }
    config.validate()?;

    let runtime = tokio::runtime::Runtime::new().context("failed to start the async runtime")?;
    runtime.block_on(server::serve(&config))?;
    Ok(())
}

fn handle_recent(config: &Config, cmd: &RecentCommand) -> anyhow::Result<()> {
    let log = LocationLog::open(config.log_path())?;
    let entries = log.list_recent(clamp_limit(Some(cmd.limit)))?;

    match cmd.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Plain if entries.is_empty() => {
            println!("No locations in {}", log.path().display());
        }
        OutputFormat::Plain => {
            for entry in &entries {
                println!("{}", plain_line(entry));
            }
        }
    }
    Ok(())
}

fn plain_line(entry: &RecentEntry) -> String {
    let text = |value: &serde_json::Value| match value {
        serde_json::Value::Null => "-".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let mut line = format!(
        "{:<26} {:>11} {:>12}  ±{}m",
        text(&entry.timestamp),
        text(&entry.lat),
        text(&entry.lon),
        text(&entry.accuracy),
    );
    for value in [&entry.label, &entry.category, &entry.note] {
        if !value.is_null() {
            line.push_str("  ");
            line.push_str(&text(value));
        }
    }
    line
}

fn handle_config(
    config_path: Option<std::path::PathBuf>,
    cmd: ConfigCommand,
) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = Config::load_unvalidated(config_path)?.redacted();
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Server]");
                println!("  Host:               {}", config.server.host);
                println!("  Port:               {}", config.server.port);
                println!();
                println!("[Auth]");
                println!(
                    "  Token:              {}",
                    if config.auth.token.is_empty() {
                        "(not set)"
                    } else {
                        config.auth.token.as_str()
                    }
                );
                println!();
                println!("[Log]");
                println!("  Path:               {}", config.log_path().display());
            }
        }
        ConfigCommand::Path => {
            println!(
                "{}",
                config_path
                    .unwrap_or_else(Config::default_config_path)
                    .display()
            );
        }
        ConfigCommand::Validate { file } => {
            let path = file
                .or(config_path)
                .unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => {
                    println!("Configuration error: {e}");
                    std::process::exit(1);
                }
            }
        }
    }
    Ok(())
}
