//! Deploy command - the full plan/apply pipeline.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use crate::pipeline::{Pipeline, PipelineOptions};
use crate::settings::EnvOpts;
use crate::ui;

/// Run the deploy (or destroy) pipeline.
#[derive(Args)]
pub struct DeployCommand {
    #[command(flatten)]
    env: EnvOpts,

    /// Plan and apply a destruction of the deployed infrastructure
    #[arg(long)]
    destroy: bool,

    /// Apply the plan without the interactive approval prompt
    #[arg(long)]
    auto_approve: bool,

    /// Skip the tfsec/checkov scan stage
    #[arg(long)]
    skip_scans: bool,

    /// Skip post-deploy verification
    #[arg(long)]
    skip_verify: bool,

    /// Skip add-on installation
    #[arg(long)]
    skip_addons: bool,

    /// Directory scan and cost reports are written to
    #[arg(long, default_value = "reports", value_name = "DIR")]
    out_dir: PathBuf,
}

impl DeployCommand {
    /// Run the pipeline end to end.
    ///
    /// # Errors
    ///
    /// Returns an error when a hard stage fails or the plan is not approved.
    pub async fn run(&self) -> Result<()> {
        ui::print_banner();
        if self.destroy {
            ui::print_section("Destroy pipeline");
        } else {
            ui::print_section("Deploy pipeline");
        }

        let settings = self.env.resolve()?;
        ui::print_kv("Region", &settings.region);
        ui::print_kv("Working directory", &settings.tf_dir.display().to_string());
        println!();

        let options = PipelineOptions {
            destroy: self.destroy,
            auto_approve: self.auto_approve,
            skip_scans: self.skip_scans,
            skip_verify: self.skip_verify,
            skip_addons: self.skip_addons,
            out_dir: self.out_dir.clone(),
        };

        Pipeline::new(settings, options).run().await
    }
}
