mod cli;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands, ShowArgs, print_config};
use prompt_autopilot::config::load_config;
use prompt_autopilot::engine::Engine;
use prompt_autopilot::error::EngineError;
use prompt_autopilot::upload::build_uploader;
use std::path::Path;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments first to get debug flag
    let cli = Cli::parse();

    let level = if cli.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    match &cli.command {
        Some(Commands::Show(args)) => handle_show_command(args),
        None => {
            let code = run_session(&cli.config_path(), cli.json).await?;
            std::process::exit(code);
        }
    }
}

/// Run one supervised session and return the process exit code
async fn run_session(config_path: &Path, json: bool) -> Result<i32> {
    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => return Ok(report_fatal(EngineError::Config(e))),
    };

    let uploader = build_uploader(&config.upload);
    let engine = Engine::new(config.rules, config.settings, uploader);

    println!("🎯 prompt-autopilot started");
    println!("📂 Config file: {}", config_path.display());
    println!("🚀 Command: {}", config.launch.display());
    println!("🛑 Press Ctrl+C to stop");

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            println!("\n🛑 Received Ctrl+C, shutting down...");
            ctrl_c.cancel();
        }
    });

    match engine.run(&config.launch, cancel).await {
        Ok(outcome) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print!("{outcome}");
            }
            Ok(outcome.exit_code())
        }
        Err(e) => Ok(report_fatal(e)),
    }
}

fn report_fatal(err: EngineError) -> i32 {
    tracing::error!("{:?}", err);
    eprintln!("❌ {} failed: {}", err.phase(), err);
    1
}

/// Handle show command
fn handle_show_command(args: &ShowArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    print_config(&config);
    Ok(())
}
