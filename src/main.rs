// src/main.rs - Run MOVE_SYNC and friends against a simulated printer
use std::io::{self, BufRead, IsTerminal};
use std::path::PathBuf;

use clap::Parser;
use krusty_sync::config::{self, Config};
use krusty_sync::{CommandResponse, Printer};

#[derive(Debug, Parser)]
#[command(name = "move-sync", version, about = "Synchronized multi-stepper moves on a simulated printer")]
struct Cli {
    /// Machine configuration (TOML). Defaults are used when omitted.
    #[arg(long)]
    config: Option<String>,

    /// Command to run; may be repeated.
    #[arg(short = 'c', long = "command")]
    commands: Vec<String>,

    /// File with one command per line.
    #[arg(long, conflicts_with = "commands")]
    script: Option<PathBuf>,

    /// Print responses as JSON.
    #[arg(long)]
    json: bool,

    #[arg(long, default_value = "info")]
    log_level: tracing::Level,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_writer(io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path);
            config::load_config(path).map_err(|e| {
                tracing::error!("Failed to load config from '{}': {}", path, e);
                e
            })?
        }
        None => Config::default(),
    };

    let printer = Printer::new(config)?;
    let clock = printer.start_clock();

    let lines = read_commands(&cli)?;
    let mut failed = false;
    for line in &lines {
        match printer.process_gcode(line).await {
            Ok(response) => print_response(&response, cli.json)?,
            Err(e) => {
                failed = true;
                if cli.json {
                    println!("{}", serde_json::json!({ "type": "error", "command": line, "message": e.to_string() }));
                } else {
                    println!("!! {}", e);
                }
            }
        }
    }

    printer.shutdown();
    clock.await?;

    if failed {
        return Err("one or more commands failed".into());
    }
    Ok(())
}

fn read_commands(cli: &Cli) -> io::Result<Vec<String>> {
    if !cli.commands.is_empty() {
        return Ok(cli.commands.clone());
    }
    if let Some(path) = &cli.script {
        return Ok(std::fs::read_to_string(path)?.lines().map(str::to_string).collect());
    }
    let stdin = io::stdin();
    if stdin.is_terminal() {
        tracing::info!("Reading commands from stdin, end with Ctrl-D");
    }
    stdin.lock().lines().collect()
}

fn print_response(response: &CommandResponse, json: bool) -> serde_json::Result<()> {
    if json {
        if !matches!(response, CommandResponse::Ok) {
            println!("{}", serde_json::to_string(response)?);
        }
        return Ok(());
    }
    match response {
        CommandResponse::Ok => {}
        CommandResponse::Moved(report) => {
            println!("// move_sync start={:.6} end={:.6}", report.start_time, report.end_time());
            for actuator in &report.actuators {
                println!(
                    "//   {}: {:.6} -> {:.6} (accel_t={:.6} cruise_t={:.6} cruise_v={:.3})",
                    actuator.name,
                    actuator.start_time,
                    actuator.end_time,
                    actuator.profile.accel_t,
                    actuator.profile.cruise_t,
                    actuator.profile.cruise_v
                );
            }
        }
        CommandResponse::Help { commands } => {
            for (name, help) in commands {
                println!("// {:<10} {}", name, help);
            }
        }
    }
    Ok(())
}
