//! Addons command - install the standard cluster add-ons.

use anyhow::{bail, Result};
use clap::Args;

use crate::addons::{AddonInstaller, AddonOptions, InstallOutcome};
use crate::settings::EnvOpts;
use crate::ui;

/// Install the load balancer controller and metrics server.
#[derive(Args)]
pub struct AddonsCommand {
    #[command(flatten)]
    env: EnvOpts,

    /// Cluster to install into (defaults to the `cluster_name` deployment output)
    #[arg(long, value_name = "NAME")]
    cluster: Option<String>,
}

impl AddonsCommand {
    /// Run the installer.
    ///
    /// # Errors
    ///
    /// Returns an error when any add-on's install step failed; readiness
    /// warnings alone keep the exit code at zero.
    pub async fn run(&self) -> Result<()> {
        ui::print_section("Cluster add-ons");

        let settings = self.env.resolve()?;
        let options = AddonOptions {
            cluster: self.cluster.clone(),
        };

        let report = AddonInstaller::new(settings, options).run().await?;

        println!();
        let failed = report
            .statuses
            .iter()
            .filter(|status| matches!(status.outcome, InstallOutcome::Failed(_)))
            .count();
        if report.any_failed() {
            bail!("{failed} add-on(s) failed to install");
        }

        if report.warning_count() == 0 {
            ui::print_success("all add-ons installed");
        } else {
            ui::print_warning(&format!(
                "add-ons installed with {} readiness warning(s)",
                report.warning_count()
            ));
        }
        Ok(())
    }
}
