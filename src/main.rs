mod cli;

use camserve::{capture::CaptureSupervisor, config, device::DeviceDetector, output::OutputArea, server, tools};

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use std::sync::Arc;

async fn start_server(
    host: String,
    port: u16,
    config_path: Option<&std::path::Path>,
) -> Result<()> {
    // Load config
    let mut config = config::load_config_or_default(config_path)?;

    // Override host/port from CLI if specified
    config.server.host = host;
    config.server.port = port;

    tracing::info!("Starting camserve");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );
    tracing::info!("Capture mode: {:?}", config.capture.mode);
    tracing::info!("Output directory: {:?}", config.capture.output_dir);

    // Detect the capture device once; the selection is cached for the
    // process lifetime and handed to the supervisor.
    let detector = DeviceDetector::new(config.detect.clone(), config.tools.clone());
    let selection = detector.detect();
    if selection.is_fallback() {
        tracing::info!("Streaming from the synthetic test pattern");
    }

    let output = OutputArea::new(config.capture.output_dir.clone());
    let supervisor = Arc::new(CaptureSupervisor::new(
        selection,
        config.capture.clone(),
        output,
        config.tools.ffmpeg_program(),
    ));

    server::start_server(config, supervisor).await
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "camserve=trace,tower_http=debug".to_string()
        } else {
            "camserve=debug,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            // Create tokio runtime
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::CheckTools => check_tools(),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("camserve {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn check_tools() -> Result<()> {
    println!("Checking external tools...\n");

    let tools = tools::check_tools();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All capture tools are available!");
    } else {
        println!("Some tools are missing; detection falls back to the test pattern.");
    }

    Ok(())
}

fn validate_config(path: Option<&std::path::Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!(
                "  Public host: {}",
                config.server.public_host.as_deref().unwrap_or("(unset)")
            );
            println!("  Capture mode: {:?}", config.capture.mode);
            println!("  Output directory: {:?}", config.capture.output_dir);
            println!(
                "  Resolution: {} @ {} fps",
                config.capture.size(),
                config.capture.framerate
            );
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!("  Capture mode: {:?}", config.capture.mode);
        }
    }

    Ok(())
}
