//! Preflight command - pre-deploy environment validation.

use anyhow::Result;
use clap::Args;

use crate::preflight::Preflight;
use crate::settings::EnvOpts;
use crate::ui;

/// Validate the environment before deploying.
#[derive(Args)]
pub struct PreflightCommand {
    #[command(flatten)]
    env: EnvOpts,
}

impl PreflightCommand {
    /// Run the checklist.
    ///
    /// # Errors
    ///
    /// Returns an error when a critical check fails; warnings alone keep the
    /// exit code at zero.
    pub fn run(&self) -> Result<()> {
        ui::print_section("Pre-deploy validation");

        let settings = self.env.resolve()?;
        ui::print_kv("Region", &settings.region);
        ui::print_kv("Working directory", &settings.tf_dir.display().to_string());
        println!();

        let report = Preflight::new(settings).run()?;

        println!();
        if report.warned_count() == 0 {
            ui::print_success(&format!(
                "{} check(s) passed; environment is ready",
                report.passed_count()
            ));
        } else {
            ui::print_warning(&format!(
                "{} check(s) passed with {} warning(s); review before deploying",
                report.passed_count(),
                report.warned_count()
            ));
        }
        Ok(())
    }
}
