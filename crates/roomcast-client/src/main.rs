//! roomcast console client entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use roomcast_client::{ChatClient, ClientConfig, ConsoleReceiver, StdinLines};
use roomcast_rpc::Credentials;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// roomcast chat client
#[derive(Parser, Debug)]
#[command(name = "roomcast")]
#[command(version, about, long_about = None)]
struct Args {
    /// Nickname to join with (prompted for when omitted)
    #[arg(short, long)]
    nickname: Option<String>,

    /// Config file (defaults to `~/.config/roomcast/client.json`)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Server address, e.g. `tcp://127.0.0.1:8737`
    #[arg(long, value_name = "URI")]
    remote_host_uri: Option<String>,

    /// Security session to authenticate with
    #[arg(long)]
    session_name: Option<String>,

    /// Target name the server must present
    #[arg(long)]
    target_name: Option<String>,

    /// User to authenticate as instead of the process user
    #[arg(long)]
    user: Option<String>,

    /// Shared secret for `--user`
    #[arg(long, requires = "user")]
    secret: Option<String>,
}

/// Set up logging.
/// In debug builds, defaults to debug level and also logs to a timestamped file.
/// In release builds, defaults to warn level so the console stays readable.
fn setup_logging() {
    let default_level = if cfg!(debug_assertions) {
        "debug"
    } else {
        "warn"
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("roomcast={default_level}")));

    if cfg!(debug_assertions) {
        let temp_dir = std::env::temp_dir();
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let log_filename = format!("roomcast-client-{timestamp}.log");

        let file_appender = tracing_appender::rolling::never(&temp_dir, &log_filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        std::mem::forget(guard);

        let stderr_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false);
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
                    .with_target(false),
            )
            .with(filter)
            .init();
    }
}

fn load_config(args: &Args) -> anyhow::Result<ClientConfig> {
    let mut config = match args.config.clone().or_else(ClientConfig::default_path) {
        Some(path) => ClientConfig::load(&path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => ClientConfig::default(),
    };

    if let Some(uri) = &args.remote_host_uri {
        config.remote_host_uri.clone_from(uri);
    }
    if let Some(session_name) = &args.session_name {
        config.session_name.clone_from(session_name);
    }
    if args.target_name.is_some() {
        config.target_name.clone_from(&args.target_name);
    }
    if args.user.is_some() {
        config.credentials = Some(Credentials {
            user: args.user.clone(),
            secret: args.secret.clone(),
        });
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    setup_logging();

    let config = load_config(&args)?;
    let mut input = StdinLines::new();

    let nickname = match args.nickname {
        Some(nickname) => nickname.trim().to_string(),
        None => loop {
            match input.ask("Please enter a nickname:").await {
                Some(nickname) if !nickname.trim().is_empty() => break nickname.trim().to_string(),
                Some(_) => {}
                None => return Ok(()),
            }
        },
    };

    info!(%nickname, server = %config.remote_host_uri, "Starting chat client");

    let mut client = ChatClient::new(config, nickname)?;
    client.register_receiver(Arc::new(ConsoleReceiver::stdout()));

    client.session().run(&mut input).await?;

    info!("Chat client stopped");
    Ok(())
}
