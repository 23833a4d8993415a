use chrono::Local;
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tgrecorder::Recorder;
use tgrecorder::bridge::JsonBridgeFactory;
use tgrecorder::config::{Config, DEFAULT_CONFIG_PATH};
use tgrecorder::prompt::StdinPrompt;
use tgrecorder::store::SqliteStore;

// Records every incoming message, user and chat of an account into SQLite
// while marking messages as read at a human pace.
//
// Usage:
//   cargo run                           # reads tgrec.toml
//   cargo run -- -c other.toml -v       # other config, debug logging

#[derive(Debug, Parser)]
#[command(version, about = "Record a messaging account into a local database")]
struct Args {
    /// Path of the TOML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let Some(bridge_command) = config.bridge_command.clone() else {
        error!("bridge_command must be set in {}", args.config.display());
        return ExitCode::FAILURE;
    };

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to build tokio runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let code = rt.block_on(async {
        let store = match SqliteStore::open(&config.database_path) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!("Failed to open {}: {}", config.database_path.display(), e);
                return ExitCode::FAILURE;
            }
        };
        info!("Database {} ready.", config.database_path.display());

        let recorder = match Recorder::builder()
            .with_config(config)
            .with_store(store)
            .with_client_factory(Arc::new(JsonBridgeFactory::new(bridge_command)))
            .with_prompt(Arc::new(StdinPrompt))
            .build()
        {
            Ok(recorder) => recorder,
            Err(e) => {
                error!("Failed to build recorder: {}", e);
                return ExitCode::FAILURE;
            }
        };

        if let Err(e) = recorder.start().await {
            error!("Recorder failed to start: {}", e);
            return ExitCode::FAILURE;
        }

        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to wait for ctrl-c: {}", e);
        }
        info!("Interrupted, shutting down...");

        if let Err(e) = recorder.stop().await {
            error!("Recorder failed to stop cleanly: {}", e);
            return ExitCode::FAILURE;
        }
        ExitCode::SUCCESS
    });

    // prompt threads blocked on stdin must not keep the process alive
    rt.shutdown_timeout(Duration::from_secs(1));
    code
}
