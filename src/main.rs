//! EKS deployment operations CLI.
//!
//! Validates the environment before a deploy, orchestrates the Terraform
//! plan/apply pipeline with an approval gate, verifies the provisioned
//! cluster, and installs the standard add-ons.

// Allow product names without backticks in doc comments
#![allow(clippy::doc_markdown)]

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod addons;
mod aws;
mod cidr;
mod commands;
mod k8s;
mod notify;
mod pipeline;
mod preflight;
mod settings;
mod terraform;
mod ui;
mod vars;
mod verifier;

use commands::addons::AddonsCommand;
use commands::deploy::DeployCommand;
use commands::preflight::PreflightCommand;
use commands::verify::VerifyCommand;

/// EKS deployment operations.
#[derive(Parser)]
#[command(
    name = "eksops",
    version,
    about = "EKS deployment operations",
    long_about = "Provision and operate AWS EKS clusters with Terraform.\n\n\
                  Validates the environment before a deploy, runs the plan/apply\n\
                  pipeline with an approval gate, verifies the provisioned cluster,\n\
                  and installs the standard add-ons.\n\n\
                  Warnings never change the exit code; only hard failures do."
)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate tools, credentials, quotas, and variables before deploying.
    Preflight(PreflightCommand),

    /// Run the deploy (or destroy) pipeline end to end.
    ///
    /// Format check, init, validate, security scans, plan, cost estimate,
    /// approval gate, apply, post-deploy verification, and add-ons.
    Deploy(DeployCommand),

    /// Verify a deployed cluster is active, reachable, and healthy.
    Verify(VerifyCommand),

    /// Install the load balancer controller and metrics server.
    Addons(AddonsCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("info,eksops=debug")
    } else {
        EnvFilter::new("warn,eksops=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Preflight(cmd) => cmd.run(),
        Commands::Deploy(cmd) => cmd.run().await,
        Commands::Verify(cmd) => cmd.run().await,
        Commands::Addons(cmd) => cmd.run().await,
    }
}
