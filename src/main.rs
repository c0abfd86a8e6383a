//! ferry - framed point-to-point file transfer
//!
//! `ferry server <port>` stores every incoming file under the sender's
//! basename; `ferry client <host:port> <path>` sends one file to it.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use ferry::cli::{limits_from_mb, Cli, Command, ServerOpts};
use ferry::logger::{NoopLogger, SessionLogger, TextLogger};
use ferry::net::{client, server};

fn main() -> Result<()> {
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted by user. Exiting (Ctrl-C)...");
        std::process::exit(130);
    })
    .context("Error setting Ctrl-C handler")?;

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    match cli.command {
        Command::Server(opts) => rt.block_on(server_main(opts)),
        Command::Client { addr, path } => {
            match rt.block_on(client::push_file(&addr, &path)) {
                Ok(bytes) => {
                    println!("sent {} ({} bytes) to {}", path.display(), bytes, addr);
                    Ok(())
                }
                Err(e) => {
                    println!("transfer failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Command::Offer { bind, path } => {
            let (peer, bytes) = rt
                .block_on(client::offer_file(&bind, &path))
                .with_context(|| format!("offer {}", path.display()))?;
            println!("sent {} ({} bytes) to {}", path.display(), bytes, peer);
            Ok(())
        }
        Command::Fetch {
            addr,
            dest,
            max_frame_mb,
        } => {
            let bytes = rt
                .block_on(client::fetch_file(&addr, &dest, &limits_from_mb(max_frame_mb)))
                .with_context(|| format!("fetch into {}", dest.display()))?;
            println!("received {} bytes into {}", bytes, dest.display());
            Ok(())
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn server_main(opts: ServerOpts) -> Result<()> {
    let root = validate_root(&opts.root)?;

    let logger: Arc<dyn SessionLogger> = match opts.log_file {
        Some(ref p) => Arc::new(TextLogger::new(p)?),
        None => Arc::new(NoopLogger),
    };

    println!("Starting ferry server:");
    println!("  Root: {}", root.display());
    println!("  Bind: {}", opts.bind());

    let config = server::ServerConfig {
        bind: opts.bind(),
        root,
        limits: opts.limits(),
    };
    server::serve(config, logger).await
}

fn validate_root(root: &Path) -> Result<std::path::PathBuf> {
    if !root.exists() {
        anyhow::bail!("Root directory does not exist: {}", root.display());
    }
    if !root.is_dir() {
        anyhow::bail!("Root path is not a directory: {}", root.display());
    }
    std::fs::canonicalize(root)
        .with_context(|| format!("Failed to canonicalize root path: {}", root.display()))
}
