//! roomcast chat server entry point.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use roomcast_server::{ChatServer, ServerConfig};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// roomcast chat server
#[derive(Parser, Debug)]
#[command(name = "roomcast-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Address to listen on (defaults to `127.0.0.1:8737`)
    #[arg(long, value_name = "ADDR")]
    listen: Option<String>,

    /// Config file (defaults to `~/.config/roomcast/server.json`)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Security session clients must authenticate with
    #[arg(long)]
    session_name: Option<String>,

    /// Target name clients must expect
    #[arg(long)]
    target_name: Option<String>,

    /// Shared secret clients must present
    #[arg(long)]
    shared_secret: Option<String>,
}

/// Set up logging.
/// In debug builds, defaults to debug level and also logs to a timestamped file.
/// In release builds, defaults to info level and logs to stderr.
fn setup_logging() {
    let default_level = if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("roomcast={default_level}")));

    if cfg!(debug_assertions) {
        let temp_dir = std::env::temp_dir();
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let log_filename = format!("roomcast-server-{timestamp}.log");

        let file_appender = tracing_appender::rolling::never(&temp_dir, &log_filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        std::mem::forget(guard);

        let stderr_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true);
        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(file_layer)
            .with(stderr_layer)
            .with(filter)
            .init();

        eprintln!("Logging to: {} (and stderr)", temp_dir.join(log_filename).display());
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            )
            .with(filter)
            .init();
    }
}

fn load_config(args: Args) -> anyhow::Result<ServerConfig> {
    let mut config = match args.config.or_else(ServerConfig::default_path) {
        Some(path) => ServerConfig::load(&path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => ServerConfig::default(),
    };

    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if args.session_name.is_some() {
        config.session_name = args.session_name;
    }
    if args.target_name.is_some() {
        config.target_name = args.target_name;
    }
    if args.shared_secret.is_some() {
        config.shared_secret = args.shared_secret;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    setup_logging();

    let config = load_config(args)?;
    let server = ChatServer::bind(&config.listen, config.key_store())
        .await
        .with_context(|| format!("failed to listen on {}", config.listen))?;

    info!(
        addr = %server.local_addr()?,
        session = config.session_name.as_deref().unwrap_or("<any>"),
        "Chat server listening"
    );

    server.run_until_ctrl_c().await?;

    info!("Chat server stopped");
    Ok(())
}
