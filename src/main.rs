use clap::Parser;
use deltabox::config::{Args, ServerConfig};
use deltabox::engine::SyncEngine;
use deltabox::server::Server;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        Level::DEBUG
    } else if args.quiet {
        Level::ERROR
    } else {
        Level::INFO
    };

    // stdout carries protocol packets in server mode, so logs go to stderr
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.server {
        let config = ServerConfig::from_args(&args)?;
        info!(root = %config.root.display(), block_size = config.block_size, "Starting server mode...");
        if let Err(e) = Server::new(config).run() {
            error!("Server error: {}", e);
            std::process::exit(1);
        }
        return Ok(());
    }

    let engine = SyncEngine::new(args);
    if let Err(e) = engine.run() {
        error!("Sync failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
