use clap::Parser;
use smartsheet_reaper::args::{Args, Command};
use smartsheet_reaper::{commands, Config, Mode, Result, Runtime};
use std::process::ExitCode;
use tracing::{debug, error, trace};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let log_level = args.common().log_level();
    init_logger(log_level);
    debug!("Log level set to {}", log_level.to_string().to_lowercase());

    match main_inner(args).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Exiting with error: {e}");
            ExitCode::FAILURE
        }
    }
}

pub async fn main_inner(args: Args) -> Result<()> {
    trace!("{args:?}");
    let home = args.common().home().path();

    // When REAPER_TEST_MODE is set and non-empty the in-memory Smartsheet is used instead of the
    // live API.
    let mode = Mode::from_env();
    let runtime = Runtime::detect();
    debug!("Runtime: {runtime}, mode: {mode}");

    let _: () = match args.command() {
        Command::Init(init_args) => commands::init(home, init_args).await?.print(),

        Command::Auth(auth_args) => {
            let config = Config::load(home).await?;
            if auth_args.verify() {
                commands::auth_verify(&config, runtime, mode).await?.print()
            } else {
                commands::auth(&config, runtime, mode).await?.print()
            }
        }

        Command::Run(run_args) => {
            let config = Config::load(home).await?;
            commands::run(&config, runtime, mode, run_args.dry_run())
                .await?
                .print()
        }

        Command::Export(export_args) => {
            let config = Config::load(home).await?;
            commands::export(&config, runtime, mode, export_args.out())
                .await?
                .print()
        }

        Command::Config => {
            let config = Config::load(home).await?;
            commands::show_config(&config, runtime).await?.print()
        }
    };
    Ok(())
}

/// Initializes the tracing subscriber.
pub fn init_logger(level: LevelFilter) {
    let filter = match std::env::var("RUST_LOG").ok() {
        Some(_) => EnvFilter::from_default_env(),
        // The library crate is named after the package, the binary is not.
        None => EnvFilter::new(format!(
            "{}={},{}={}",
            env!("CARGO_PKG_NAME").replace('-', "_"),
            level,
            env!("CARGO_BIN_NAME"),
            level
        )),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
