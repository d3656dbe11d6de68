//! CLI entry point.
//!
//! ```bash
//! viscell run-input.json [--config config.json] [--root /opt/cell]
//! RUST_LOG=debug viscell run-input.json
//! ```
//!
//! Exit status is 0 on success and 1 on failure; the final document on
//! stdout is the machine-readable outcome either way.

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use viscell::config::{self, Config};
use viscell::error::RunError;
use viscell::input::RunInput;
use viscell::report::RunOutcome;
use viscell::runner::{self, RunContext};

#[derive(Parser, Debug)]
#[command(name = "viscell")]
#[command(about = "Automated visual-inspection test runner")]
#[command(version)]
struct CliArgs {
    /// Run input JSON: { "steps": [ { "device"?, "program"? } ] }
    input: PathBuf,

    /// Config path; defaults to config.production.json, then config.json,
    /// under the run root
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run root anchoring bin/, the default FTP root, and {root}
    /// placeholders; defaults to the current directory
    #[arg(long)]
    root: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    // Stdout is reserved for the final document.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = CliArgs::parse();

    let outcome = match execute(args).await {
        Ok(outcome) => outcome,
        Err(err) => RunOutcome::failure(err),
    };

    if let RunOutcome::Failure(err) = &outcome {
        error!("{}", err.message);
    }
    info!("Bye, bye!");

    println!("{}", outcome.to_document());
    std::process::exit(outcome.exit_code());
}

async fn execute(args: CliArgs) -> Result<RunOutcome, RunError> {
    let root = args
        .root
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    info!("Reading input JSON: {}", args.input.display());
    let input = RunInput::load(&args.input)?;

    let config = Config::load(&root, args.config.as_deref())?;

    match config.ftp_root(&root) {
        Some(ftp_root) => {
            info!("Setting up the FTP directory...");
            config::prepare_ftp_root(&ftp_root)?;
        }
        None => info!("Skipping FTP setup..."),
    }

    let ctx = RunContext::new(root, config);
    Ok(runner::run(ctx, input).await)
}
