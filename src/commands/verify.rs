//! Verify command - post-deploy cluster health checks.

use anyhow::Result;
use clap::Args;

use crate::settings::EnvOpts;
use crate::ui;
use crate::verifier::{ClusterVerifier, VerifyOptions};

/// Verify a deployed cluster.
#[derive(Args)]
pub struct VerifyCommand {
    #[command(flatten)]
    env: EnvOpts,

    /// Cluster to verify (defaults to the `cluster_name` deployment output)
    #[arg(long, value_name = "NAME")]
    cluster: Option<String>,

    /// Ready-node count to wait for (defaults to the configured desired size)
    #[arg(long, value_name = "COUNT")]
    expect_nodes: Option<u32>,
}

impl VerifyCommand {
    /// Run verification and print the report.
    ///
    /// # Errors
    ///
    /// Returns an error when the cluster cannot be resolved, never becomes
    /// active, or the API server stays unreachable. Degraded findings are
    /// reported as warnings with a zero exit code.
    pub async fn run(&self) -> Result<()> {
        ui::print_section("Post-deploy verification");

        let settings = self.env.resolve()?;
        let options = VerifyOptions {
            cluster: self.cluster.clone(),
            expect_nodes: self.expect_nodes,
        };

        let report = ClusterVerifier::new(settings, options).run().await?;

        println!();
        ui::print_kv("Cluster", &report.cluster_name);
        if let Some(endpoint) = &report.endpoint {
            ui::print_kv("Endpoint", endpoint);
        }
        if let Some(version) = &report.api_version {
            ui::print_kv("API server", version);
        }
        ui::print_kv(
            "Nodes ready",
            &format!("{}/{}", report.ready_nodes, report.total_nodes),
        );

        println!();
        if report.warnings.is_empty() {
            ui::print_success("cluster verified");
        } else {
            for warning in &report.warnings {
                ui::print_warning(warning);
            }
            ui::print_warning(&format!(
                "cluster verified with {} warning(s)",
                report.warnings.len()
            ));
        }
        Ok(())
    }
}
