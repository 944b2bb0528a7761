//! Deploy and destroy pipeline orchestration.
//!
//! Sequences the stages the CI job used to run one by one: format check,
//! init, validate, security scans, plan, cost estimate, approval gate,
//! apply, post-deploy verification, add-on installation, and notification.
//! The apply decision comes from the structured plan outcome, never from
//! scraping plan text. The two security scanners are the only concurrent
//! work; everything else is strictly sequential.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use dialoguer::Confirm;
use tracing::{debug, warn};

use crate::addons::{AddonInstaller, AddonOptions};
use crate::notify::{self, PipelineEvent, SlackChannel};
use crate::settings::Settings;
use crate::terraform::{PlanOutcome, Terraform, PLAN_FILE};
use crate::ui;
use crate::vars::DeployVars;
use crate::verifier::{ClusterVerifier, VerifyOptions};

/// Report file for tfsec findings under the report directory.
const TFSEC_REPORT: &str = "tfsec-report.json";

/// Report file for checkov findings under the report directory.
const CHECKOV_REPORT: &str = "checkov-report.json";

/// Cost breakdown text under the report directory.
const INFRACOST_REPORT: &str = "infracost.txt";

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    /// Formatting drift check (soft).
    FmtCheck,
    /// Backend and provider initialization.
    Init,
    /// Configuration validation.
    Validate,
    /// Concurrent tfsec and checkov scans (soft).
    SecurityScans,
    /// Saved plan with the structured diff signal.
    Plan,
    /// Optional infracost breakdown (soft).
    CostEstimate,
    /// Apply approval decision.
    Gate,
    /// Apply the saved plan (or destroy plan).
    Apply,
    /// Post-deploy cluster verification.
    PostVerify,
    /// Cluster add-on installation.
    Addons,
    /// Final success or no-changes notification.
    Notify,
    /// Pipeline finished.
    Done,
}

impl PipelineStage {
    /// Next stage in the sequence.
    #[must_use]
    pub fn next(&self) -> Self {
        match self {
            Self::FmtCheck => Self::Init,
            Self::Init => Self::Validate,
            Self::Validate => Self::SecurityScans,
            Self::SecurityScans => Self::Plan,
            Self::Plan => Self::CostEstimate,
            Self::CostEstimate => Self::Gate,
            Self::Gate => Self::Apply,
            Self::Apply => Self::PostVerify,
            Self::PostVerify => Self::Addons,
            Self::Addons => Self::Notify,
            Self::Notify | Self::Done => Self::Done,
        }
    }

    /// Human-readable description of the stage.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::FmtCheck => "Checking Terraform formatting",
            Self::Init => "Initializing Terraform",
            Self::Validate => "Validating configuration",
            Self::SecurityScans => "Running security scans",
            Self::Plan => "Planning infrastructure changes",
            Self::CostEstimate => "Estimating costs",
            Self::Gate => "Waiting for apply approval",
            Self::Apply => "Applying the saved plan",
            Self::PostVerify => "Verifying the cluster",
            Self::Addons => "Installing add-ons",
            Self::Notify => "Sending notifications",
            Self::Done => "Done",
        }
    }

    /// Stage number for progress display.
    #[must_use]
    pub fn step_number(&self) -> u8 {
        match self {
            Self::FmtCheck => 1,
            Self::Init => 2,
            Self::Validate => 3,
            Self::SecurityScans => 4,
            Self::Plan => 5,
            Self::CostEstimate => 6,
            Self::Gate => 7,
            Self::Apply => 8,
            Self::PostVerify => 9,
            Self::Addons => 10,
            Self::Notify => 11,
            Self::Done => 12,
        }
    }

    /// Number of stages that perform work.
    pub const TOTAL_STAGES: u8 = 11;
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// What the approval gate decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateDecision {
    /// Nothing to apply; the remaining apply-side stages are skipped.
    SkipNoChanges,
    /// Changes approved up front.
    Proceed,
    /// Changes need an interactive confirmation.
    RequireApproval,
}

fn gate_decision(outcome: PlanOutcome, auto_approve: bool) -> GateDecision {
    match (outcome, auto_approve) {
        (PlanOutcome::Clean, _) => GateDecision::SkipNoChanges,
        (PlanOutcome::Changes, true) => GateDecision::Proceed,
        (PlanOutcome::Changes, false) => GateDecision::RequireApproval,
    }
}

/// The default vars file inside the working directory is picked up by
/// Terraform on its own; anything else needs an explicit `-var-file`,
/// passed relative to the working directory the commands run in.
fn var_file_override(settings: &Settings) -> Option<PathBuf> {
    let relative = settings
        .vars_file
        .strip_prefix(&settings.tf_dir)
        .unwrap_or(&settings.vars_file);
    if relative == Path::new("terraform.tfvars.json") {
        None
    } else {
        Some(relative.to_path_buf())
    }
}

/// How one scanner run ended.
#[derive(Debug, PartialEq, Eq)]
enum ScanOutcome {
    Clean,
    Findings,
    Unavailable,
    Error(String),
}

struct ScanResult {
    scanner: &'static str,
    report: PathBuf,
    outcome: ScanOutcome,
}

fn classify_scan(success: bool, stdout_empty: bool, stderr: &str) -> ScanOutcome {
    if success {
        ScanOutcome::Clean
    } else if stdout_empty {
        ScanOutcome::Error(stderr.trim().to_string())
    } else {
        ScanOutcome::Findings
    }
}

/// Run one scanner, writing its stdout to the report file. Findings and a
/// missing binary are recorded, never propagated.
async fn run_scanner(
    scanner: &'static str,
    mut cmd: tokio::process::Command,
    report: PathBuf,
) -> ScanResult {
    let outcome = match cmd.output().await {
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => ScanOutcome::Unavailable,
        Err(err) => ScanOutcome::Error(err.to_string()),
        Ok(output) => {
            if !output.stdout.is_empty() {
                if let Err(err) = fs::write(&report, &output.stdout) {
                    debug!(scanner, "could not write scan report: {err}");
                }
            }
            classify_scan(
                output.status.success(),
                output.stdout.is_empty(),
                &String::from_utf8_lossy(&output.stderr),
            )
        }
    };

    ScanResult {
        scanner,
        report,
        outcome,
    }
}

fn tfsec_command(tf_dir: &Path) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("tfsec");
    cmd.arg(tf_dir).args(["--format", "json", "--no-color"]);
    cmd
}

fn checkov_command(tf_dir: &Path) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("checkov");
    cmd.arg("-d").arg(tf_dir).args(["-o", "json", "--quiet"]);
    cmd
}

fn print_scan_result(result: &ScanResult) {
    match &result.outcome {
        ScanOutcome::Clean => ui::print_check_pass(result.scanner, Some("no findings")),
        ScanOutcome::Findings => ui::print_check_warn(
            result.scanner,
            Some(&format!("findings recorded in {}", result.report.display())),
        ),
        ScanOutcome::Unavailable => ui::print_check_skip(result.scanner, Some("not installed")),
        ScanOutcome::Error(err) => ui::print_check_warn(result.scanner, Some(err)),
    }
}

/// Options for a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Plan and apply a destruction instead of a deployment.
    pub destroy: bool,
    /// Apply without the interactive approval prompt.
    pub auto_approve: bool,
    /// Skip the security scan stage.
    pub skip_scans: bool,
    /// Skip post-deploy verification.
    pub skip_verify: bool,
    /// Skip add-on installation.
    pub skip_addons: bool,
    /// Directory scan and cost reports are written to.
    pub out_dir: PathBuf,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            destroy: false,
            auto_approve: false,
            skip_scans: false,
            skip_verify: false,
            skip_addons: false,
            out_dir: PathBuf::from("reports"),
        }
    }
}

/// Executes the stage progression.
pub struct Pipeline {
    settings: Settings,
    options: PipelineOptions,
    terraform: Terraform,
    notifier: SlackChannel,
    started: Instant,
    plan_outcome: Option<PlanOutcome>,
    no_changes: bool,
}

impl Pipeline {
    #[must_use]
    pub fn new(settings: Settings, options: PipelineOptions) -> Self {
        let terraform = Terraform::new(&settings.tf_dir);
        Self {
            settings,
            options,
            terraform,
            notifier: SlackChannel::from_env(),
            started: Instant::now(),
            plan_outcome: None,
            no_changes: false,
        }
    }

    /// Run all stages in order.
    ///
    /// # Errors
    ///
    /// Returns an error when a hard stage fails or the apply is not
    /// approved. Soft stages record warnings and keep going.
    pub async fn run(mut self) -> Result<()> {
        let project = self.project_label();

        fs::create_dir_all(&self.options.out_dir).with_context(|| {
            format!(
                "failed to create report directory {}",
                self.options.out_dir.display()
            )
        })?;

        self.send_event(&PipelineEvent::Started {
            project: project.clone(),
            region: self.settings.region.clone(),
            destroy: self.options.destroy,
        })
        .await;

        let mut stage = PipelineStage::FmtCheck;
        while stage != PipelineStage::Done {
            ui::print_progress_step(
                stage.step_number(),
                PipelineStage::TOTAL_STAGES,
                stage.description(),
            );

            if let Err(err) = self.execute_stage(stage).await {
                self.send_event(&PipelineEvent::Failed {
                    project: project.clone(),
                    region: self.settings.region.clone(),
                    stage: stage.description().to_string(),
                    error: format!("{err:#}"),
                })
                .await;
                return Err(err.context(format!("pipeline failed at: {}", stage.description())));
            }

            stage = stage.next();
        }

        ui::print_success(&format!(
            "pipeline finished in {}",
            notify::format_duration(self.started.elapsed().as_secs())
        ));
        Ok(())
    }

    async fn execute_stage(&mut self, stage: PipelineStage) -> Result<()> {
        match stage {
            PipelineStage::FmtCheck => self.run_fmt_check(),
            PipelineStage::Init => self.terraform.init(),
            PipelineStage::Validate => self.run_validate(),
            PipelineStage::SecurityScans => self.run_security_scans().await,
            PipelineStage::Plan => self.run_plan(),
            PipelineStage::CostEstimate => self.run_cost_estimate(),
            PipelineStage::Gate => self.run_gate(),
            PipelineStage::Apply => self.run_apply(),
            PipelineStage::PostVerify => self.run_post_verify().await,
            PipelineStage::Addons => self.run_addons().await,
            PipelineStage::Notify => self.run_final_notify().await,
            PipelineStage::Done => Ok(()),
        }
    }

    fn run_fmt_check(&self) -> Result<()> {
        match self.terraform.fmt_check() {
            Ok(files) if files.is_empty() => ui::print_success("formatting clean"),
            Ok(files) => {
                ui::print_warning(&format!("{} file(s) need `terraform fmt`:", files.len()));
                for file in &files {
                    println!("    {file}");
                }
            }
            Err(err) => ui::print_warning(&format!("fmt check did not run: {err:#}")),
        }
        Ok(())
    }

    fn run_validate(&self) -> Result<()> {
        self.terraform.validate()?;
        ui::print_success("configuration valid");
        Ok(())
    }

    async fn run_security_scans(&self) -> Result<()> {
        if self.options.skip_scans {
            ui::print_info("security scans skipped (--skip-scans)");
            return Ok(());
        }

        let (tfsec, checkov) = futures::join!(
            run_scanner(
                "tfsec",
                tfsec_command(&self.settings.tf_dir),
                self.options.out_dir.join(TFSEC_REPORT),
            ),
            run_scanner(
                "checkov",
                checkov_command(&self.settings.tf_dir),
                self.options.out_dir.join(CHECKOV_REPORT),
            ),
        );

        print_scan_result(&tfsec);
        print_scan_result(&checkov);
        Ok(())
    }

    fn run_plan(&mut self) -> Result<()> {
        let var_file = var_file_override(&self.settings);
        let outcome = self
            .terraform
            .plan(self.options.destroy, var_file.as_deref())?;

        match outcome {
            PlanOutcome::Clean => {
                ui::print_success("infrastructure matches the configuration");
            }
            PlanOutcome::Changes => ui::print_info(&format!("plan saved to {PLAN_FILE}")),
        }

        self.plan_outcome = Some(outcome);
        Ok(())
    }

    fn run_cost_estimate(&self) -> Result<()> {
        if which::which("infracost").is_err() {
            ui::print_check_skip("infracost", Some("not installed"));
            return Ok(());
        }

        let result = std::process::Command::new("infracost")
            .args(["breakdown", "--path"])
            .arg(&self.settings.tf_dir)
            .output();

        match result {
            Ok(output) if output.status.success() => {
                let table = String::from_utf8_lossy(&output.stdout);
                println!("{}", table.trim_end());
                let report = self.options.out_dir.join(INFRACOST_REPORT);
                if let Err(err) = fs::write(&report, table.as_bytes()) {
                    debug!("could not write cost report: {err}");
                }
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                ui::print_warning(&format!("infracost failed: {}", stderr.trim()));
            }
            Err(err) => ui::print_warning(&format!("infracost did not run: {err}")),
        }
        Ok(())
    }

    fn run_gate(&mut self) -> Result<()> {
        let Some(outcome) = self.plan_outcome else {
            bail!("approval gate reached without a plan outcome");
        };

        match gate_decision(outcome, self.options.auto_approve) {
            GateDecision::SkipNoChanges => {
                self.no_changes = true;
                ui::print_info("no changes to apply; approval and apply skipped");
            }
            GateDecision::Proceed => ui::print_info("approval granted (--auto-approve)"),
            GateDecision::RequireApproval => {
                let verb = if self.options.destroy {
                    "Destroy"
                } else {
                    "Apply"
                };
                let confirmed = Confirm::new()
                    .with_prompt(format!("{verb} the saved plan?"))
                    .default(false)
                    .interact()
                    .map_err(|err| {
                        anyhow!("approval required but no terminal available ({err}); re-run with --auto-approve")
                    })?;
                if !confirmed {
                    bail!("plan not approved");
                }
                ui::print_success("plan approved");
            }
        }
        Ok(())
    }

    fn run_apply(&self) -> Result<()> {
        if self.no_changes {
            ui::print_check_skip("apply", Some("no changes"));
            return Ok(());
        }

        self.terraform.apply_saved_plan()?;
        if self.options.destroy {
            ui::print_success("infrastructure destroyed");
        } else {
            ui::print_success("infrastructure applied");
        }
        Ok(())
    }

    async fn run_post_verify(&self) -> Result<()> {
        if self.options.destroy {
            ui::print_check_skip("verification", Some("destroy run"));
            return Ok(());
        }
        if self.no_changes {
            ui::print_check_skip("verification", Some("no changes"));
            return Ok(());
        }
        if self.options.skip_verify {
            ui::print_info("verification skipped (--skip-verify)");
            return Ok(());
        }

        let verifier = ClusterVerifier::new(self.settings.clone(), VerifyOptions::default());
        let report = verifier.run().await?;
        ui::print_success(&format!(
            "cluster {} verified: {}/{} nodes ready, {} warning(s)",
            report.cluster_name,
            report.ready_nodes,
            report.total_nodes,
            report.warnings.len()
        ));
        Ok(())
    }

    async fn run_addons(&self) -> Result<()> {
        if self.options.destroy {
            ui::print_check_skip("add-ons", Some("destroy run"));
            return Ok(());
        }
        if self.no_changes {
            ui::print_check_skip("add-ons", Some("no changes"));
            return Ok(());
        }
        if self.options.skip_addons {
            ui::print_info("add-ons skipped (--skip-addons)");
            return Ok(());
        }

        let installer = AddonInstaller::new(self.settings.clone(), AddonOptions::default());
        let report = installer.run().await?;
        if report.any_failed() {
            bail!("add-on installation failed");
        }
        Ok(())
    }

    async fn run_final_notify(&self) -> Result<()> {
        let event = if self.no_changes {
            PipelineEvent::NoChanges {
                project: self.project_label(),
                region: self.settings.region.clone(),
            }
        } else {
            PipelineEvent::Succeeded {
                project: self.project_label(),
                region: self.settings.region.clone(),
                duration_secs: self.started.elapsed().as_secs(),
                destroy: self.options.destroy,
            }
        };
        self.send_event(&event).await;
        Ok(())
    }

    async fn send_event(&self, event: &PipelineEvent) {
        if !self.notifier.enabled() {
            return;
        }
        if let Err(err) = self.notifier.send(event).await {
            warn!("notification delivery failed: {err:#}");
            ui::print_warning(&format!("Slack notification failed: {err}"));
        }
    }

    fn project_label(&self) -> String {
        if let Some(project) = &self.settings.project {
            return project.clone();
        }
        DeployVars::load(&self.settings.vars_file)
            .map(|vars| vars.project_name)
            .unwrap_or_else(|_| "eks-cluster".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_run_in_order_and_terminate() {
        let mut stage = PipelineStage::FmtCheck;
        let mut seen = Vec::new();
        while stage != PipelineStage::Done {
            seen.push(stage.step_number());
            stage = stage.next();
        }
        assert_eq!(seen, (1..=11).collect::<Vec<u8>>());
        assert_eq!(seen.len() as u8, PipelineStage::TOTAL_STAGES);
        assert_eq!(PipelineStage::Done.next(), PipelineStage::Done);
    }

    #[test]
    fn gate_skips_approval_and_apply_on_clean_plan() {
        assert_eq!(
            gate_decision(PlanOutcome::Clean, false),
            GateDecision::SkipNoChanges
        );
        assert_eq!(
            gate_decision(PlanOutcome::Clean, true),
            GateDecision::SkipNoChanges
        );
    }

    #[test]
    fn gate_requires_approval_for_changes_unless_auto_approved() {
        assert_eq!(
            gate_decision(PlanOutcome::Changes, true),
            GateDecision::Proceed
        );
        assert_eq!(
            gate_decision(PlanOutcome::Changes, false),
            GateDecision::RequireApproval
        );
    }

    #[test]
    fn default_vars_file_needs_no_var_file_flag() {
        let settings = Settings {
            region: "us-west-2".to_string(),
            project: None,
            backend: None,
            tf_dir: PathBuf::from("infra"),
            vars_file: PathBuf::from("infra/terraform.tfvars.json"),
        };
        assert_eq!(var_file_override(&settings), None);
    }

    #[test]
    fn custom_vars_file_is_passed_relative_to_the_working_directory() {
        let settings = Settings {
            region: "us-west-2".to_string(),
            project: None,
            backend: None,
            tf_dir: PathBuf::from("infra"),
            vars_file: PathBuf::from("infra/staging.tfvars.json"),
        };
        assert_eq!(
            var_file_override(&settings),
            Some(PathBuf::from("staging.tfvars.json"))
        );
    }

    #[test]
    fn absolute_vars_file_is_passed_as_is() {
        let settings = Settings {
            region: "us-west-2".to_string(),
            project: None,
            backend: None,
            tf_dir: PathBuf::from("infra"),
            vars_file: PathBuf::from("/etc/eks/vars.json"),
        };
        assert_eq!(
            var_file_override(&settings),
            Some(PathBuf::from("/etc/eks/vars.json"))
        );
    }

    #[test]
    fn scan_classification() {
        assert_eq!(classify_scan(true, true, ""), ScanOutcome::Clean);
        assert_eq!(classify_scan(false, false, ""), ScanOutcome::Findings);
        assert_eq!(
            classify_scan(false, true, "panic: bad flag\n"),
            ScanOutcome::Error("panic: bad flag".to_string())
        );
    }
}
