//! Terraform CLI adapter.
//!
//! Thin process wrapper around the `terraform` binary, run inside the
//! configured working directory. Short read-only commands capture output;
//! `init`, `plan`, `apply` stream theirs so the operator sees Terraform's own
//! progress. The plan diff signal comes from `-detailed-exitcode`, never from
//! scraping plan text.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::debug;

/// Saved plan file consumed by the apply stage.
pub const PLAN_FILE: &str = "eksops.tfplan";

/// Structured result of `terraform plan -detailed-exitcode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanOutcome {
    /// Exit 0: infrastructure matches the configuration.
    Clean,
    /// Exit 2: a diff exists and the plan file was saved.
    Changes,
}

impl PlanOutcome {
    /// Map a `-detailed-exitcode` status to an outcome.
    ///
    /// # Errors
    ///
    /// Exit 1 (or a signal death) is a plan failure.
    pub fn from_detailed_exit(code: Option<i32>) -> Result<Self> {
        match code {
            Some(0) => Ok(PlanOutcome::Clean),
            Some(2) => Ok(PlanOutcome::Changes),
            Some(code) => bail!("terraform plan failed with exit code {code}"),
            None => bail!("terraform plan was terminated by a signal"),
        }
    }
}

/// Cluster descriptor read from Terraform outputs.
///
/// Sourced from state, never mutated here. Individual outputs may be absent
/// when the configuration does not export them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterOutputs {
    pub cluster_name: Option<String>,
    pub cluster_endpoint: Option<String>,
    pub region: Option<String>,
    pub vpc_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OutputEntry {
    value: serde_json::Value,
}

/// Parse the map produced by `terraform output -json`.
fn parse_outputs(json: &str) -> Result<ClusterOutputs> {
    let entries: std::collections::HashMap<String, OutputEntry> =
        serde_json::from_str(json).context("failed to parse terraform output JSON")?;

    let string_output = |name: &str| -> Option<String> {
        entries
            .get(name)
            .and_then(|entry| entry.value.as_str())
            .map(ToString::to_string)
    };

    Ok(ClusterOutputs {
        cluster_name: string_output("cluster_name"),
        cluster_endpoint: string_output("cluster_endpoint"),
        region: string_output("region"),
        vpc_id: string_output("vpc_id"),
    })
}

/// Handle on a Terraform working directory.
pub struct Terraform {
    dir: PathBuf,
}

impl Terraform {
    #[must_use]
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        debug!(dir = %self.dir.display(), ?args, "running terraform");
        let mut cmd = Command::new("terraform");
        cmd.current_dir(&self.dir).args(args);
        cmd
    }

    fn run_captured(&self, args: &[&str]) -> Result<String> {
        let output = self
            .command(args)
            .output()
            .context("failed to execute terraform")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("terraform {} failed: {}", args[0], stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_streamed(&self, args: &[&str]) -> Result<()> {
        let status = self
            .command(args)
            .status()
            .context("failed to execute terraform")?;

        if !status.success() {
            bail!("terraform {} failed", args[0]);
        }

        Ok(())
    }

    /// `terraform fmt -check -recursive`, returning the files that need
    /// formatting (empty means clean).
    ///
    /// # Errors
    ///
    /// Returns an error when terraform itself fails (not on formatting drift).
    pub fn fmt_check(&self) -> Result<Vec<String>> {
        let output = self
            .command(&["fmt", "-check", "-recursive"])
            .output()
            .context("failed to execute terraform")?;

        if output.status.success() {
            return Ok(Vec::new());
        }

        let files = list_lines(&String::from_utf8_lossy(&output.stdout));
        if files.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("terraform fmt failed: {}", stderr.trim());
        }
        Ok(files)
    }

    /// `terraform init -input=false`, streaming output.
    ///
    /// # Errors
    ///
    /// Returns an error when init fails.
    pub fn init(&self) -> Result<()> {
        self.run_streamed(&["init", "-input=false"])
    }

    /// `terraform validate`.
    ///
    /// # Errors
    ///
    /// Returns an error with Terraform's diagnostics when validation fails.
    pub fn validate(&self) -> Result<()> {
        self.run_captured(&["validate"]).map(|_| ())
    }

    /// `terraform plan -detailed-exitcode -out eksops.tfplan`, streaming
    /// output. Pass `destroy` for a destruction plan; the saved plan file is
    /// applied the same way either direction.
    ///
    /// # Errors
    ///
    /// Returns an error when the plan itself fails (exit 1).
    pub fn plan(&self, destroy: bool, var_file: Option<&Path>) -> Result<PlanOutcome> {
        let var_file_arg = var_file.map(|path| format!("-var-file={}", path.display()));
        let mut args = vec![
            "plan",
            "-input=false",
            "-detailed-exitcode",
            "-out",
            PLAN_FILE,
        ];
        if destroy {
            args.push("-destroy");
        }
        if let Some(arg) = &var_file_arg {
            args.push(arg);
        }

        let status = self
            .command(&args)
            .status()
            .context("failed to execute terraform")?;

        PlanOutcome::from_detailed_exit(status.code())
    }

    /// Apply the plan file saved by [`Terraform::plan`], streaming output.
    /// Executes a destroy when the saved plan was a destruction plan.
    ///
    /// # Errors
    ///
    /// Returns an error when the apply fails; no cleanup is attempted.
    pub fn apply_saved_plan(&self) -> Result<()> {
        self.run_streamed(&["apply", "-input=false", PLAN_FILE])
    }

    /// Read the cluster descriptor from `terraform output -json`.
    ///
    /// # Errors
    ///
    /// Returns an error when the command or JSON parsing fails.
    pub fn outputs(&self) -> Result<ClusterOutputs> {
        let json = self.run_captured(&["output", "-json"])?;
        parse_outputs(&json)
    }
}

fn list_lines(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_outcome_maps_detailed_exit_codes() {
        assert_eq!(
            PlanOutcome::from_detailed_exit(Some(0)).unwrap(),
            PlanOutcome::Clean
        );
        assert_eq!(
            PlanOutcome::from_detailed_exit(Some(2)).unwrap(),
            PlanOutcome::Changes
        );
        assert!(PlanOutcome::from_detailed_exit(Some(1)).is_err());
        assert!(PlanOutcome::from_detailed_exit(Some(3)).is_err());
        assert!(PlanOutcome::from_detailed_exit(None).is_err());
    }

    #[test]
    fn parses_cluster_outputs() {
        let json = r#"{
            "cluster_name": {"sensitive": false, "type": "string", "value": "demo-eks"},
            "cluster_endpoint": {"sensitive": false, "type": "string", "value": "https://ABC.gr7.eu-west-1.eks.amazonaws.com"},
            "region": {"sensitive": false, "type": "string", "value": "eu-west-1"},
            "vpc_id": {"sensitive": false, "type": "string", "value": "vpc-0a1b2c3d"},
            "node_group_arn": {"sensitive": false, "type": "string", "value": "arn:aws:eks:..."}
        }"#;
        let outputs = parse_outputs(json).unwrap();
        assert_eq!(outputs.cluster_name.as_deref(), Some("demo-eks"));
        assert_eq!(outputs.vpc_id.as_deref(), Some("vpc-0a1b2c3d"));
        assert_eq!(outputs.region.as_deref(), Some("eu-west-1"));
    }

    #[test]
    fn missing_outputs_are_none_not_errors() {
        let outputs = parse_outputs("{}").unwrap();
        assert_eq!(outputs, ClusterOutputs::default());

        let partial = parse_outputs(
            r#"{"cluster_name": {"sensitive": false, "type": "string", "value": "demo-eks"}}"#,
        )
        .unwrap();
        assert_eq!(partial.cluster_name.as_deref(), Some("demo-eks"));
        assert!(partial.vpc_id.is_none());
    }

    #[test]
    fn non_string_output_values_are_ignored() {
        let outputs = parse_outputs(
            r#"{"vpc_id": {"sensitive": false, "type": "number", "value": 7}}"#,
        )
        .unwrap();
        assert!(outputs.vpc_id.is_none());
    }

    #[test]
    fn fmt_file_list_parsing() {
        assert_eq!(
            list_lines("main.tf\n  modules/vpc/vars.tf \n\n"),
            vec!["main.tf".to_string(), "modules/vpc/vars.tf".to_string()]
        );
        assert!(list_lines("").is_empty());
    }

    #[test]
    fn malformed_output_json_is_an_error() {
        assert!(parse_outputs("not json").is_err());
    }
}
