//! shell-relay binary entry point.

use std::process::ExitCode;

use shell_relay::api::{serve_with_state, AppState};
use shell_relay::cli::{self, Args};
use shell_relay::config::Config;
use shell_relay::logging;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let args = match cli::parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!("Try 'shell-relay --help' for more information.");
            return ExitCode::from(2);
        }
    };

    if args.help {
        cli::print_help();
        return ExitCode::SUCCESS;
    }
    if args.version {
        cli::print_version();
        return ExitCode::SUCCESS;
    }

    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!("{}", message);
            eprintln!("error: {}", message);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &Args) -> Result<(), String> {
    let config = Config::load(args).map_err(|e| e.to_string())?;

    if logging::init_with_filter(config.log_filter()).is_err() {
        eprintln!("warning: logging already initialized");
    }

    info!("shell-relay v{}", env!("CARGO_PKG_VERSION"));

    let server_config = config.to_server_config().map_err(|e| e.to_string())?;
    let state = AppState::from_config(&config).map_err(|e| e.to_string())?;
    state
        .staging
        .prepare()
        .await
        .map_err(|e| format!("staging directory: {}", e))?;

    info!(
        servers = config.servers.len(),
        connect_timeout_secs = config.remote.connect_timeout_secs,
        "configuration loaded"
    );

    serve_with_state(server_config, state)
        .await
        .map_err(|e| e.to_string())
}
