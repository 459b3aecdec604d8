//! `ccflow` operator CLI.
//!
//! - `policy`   build an endorsement policy and optionally evaluate signers
//! - `package`  package the configured chaincode source tree
//! - `simulate` run the install/instantiate and install/upgrade phases
//!   against an in-process network, logging every channel event

mod commands;

use ccflow_core::{
    Error,
    config::ConfigError,
    domain::policy::endorsement::EndorsementPolicyError,
    ops::{event::EventError, package::PackageError},
};
use ccflow_testkit::SimError;
use clap::{Parser, Subcommand};
use std::{path::PathBuf, process::ExitCode};
use thiserror::Error as ThisError;
use tracing_subscriber::EnvFilter;

///
/// CliError
///

#[derive(Debug, ThisError)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Core(#[from] Error),

    #[error(transparent)]
    Event(#[from] EventError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Package(#[from] PackageError),

    #[error(transparent)]
    Policy(#[from] EndorsementPolicyError),

    #[error(transparent)]
    Sim(#[from] SimError),

    #[error("{0}")]
    Usage(String),
}

///
/// Cli
///

#[derive(Parser)]
#[command(name = "ccflow")]
#[command(about = "Chaincode lifecycle orchestration", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Build an endorsement policy and print it as JSON
    Policy {
        /// Policy expression, or ANY
        expr: String,

        /// MSP the ANY shortcut resolves against
        #[arg(long, default_value = "Org1MSP")]
        msp: String,

        /// Signer to evaluate, as <MspId>.<role>; repeatable
        #[arg(long = "signer")]
        signers: Vec<String>,
    },

    /// Package the chaincode named in a deployment config
    Package {
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Run both lifecycle phases against a simulated network
    Simulate {
        /// Deployment config; a two-org sample is used when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Version the second phase upgrades to
        #[arg(long, default_value = "v2")]
        upgrade_to: String,
    },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Command::Policy { expr, msp, signers } => commands::policy::run(&expr, &msp, &signers),
        Command::Package { config } => commands::package::run(&config),
        Command::Simulate { config, upgrade_to } => {
            commands::simulate::run(config.as_deref(), upgrade_to).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Core(err)) => {
            tracing::error!(class = %err.class(), "{err}");
            ExitCode::FAILURE
        }
        Err(err) => {
            tracing::error!("{err}");
            ExitCode::FAILURE
        }
    }
}
