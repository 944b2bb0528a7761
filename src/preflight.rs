//! Pre-deploy validation checklist.
//!
//! Fixed, ordered checks; each is independent and side-effect-free apart
//! from read-only AWS calls. The tool check runs before anything touches
//! AWS. A critical failure terminates the run immediately; soft findings
//! become warnings and execution continues.

use anyhow::{anyhow, Result};

use crate::aws::{self, Aws, VpcSummary};
use crate::cidr::Cidr;
use crate::settings::Settings;
use crate::terraform::Terraform;
use crate::ui;
use crate::vars::DeployVars;

/// Checklist entries in execution order.
pub const CHECK_NAMES: [&str; 9] = [
    "required tools",
    "AWS credentials",
    "region",
    "service quotas",
    "terraform formatting",
    "variables file",
    "VPC CIDR conflicts",
    "EKS version availability",
    "remote state backend",
];

struct ToolSpec {
    name: &'static str,
    install_hint: &'static str,
}

const REQUIRED_TOOLS: [ToolSpec; 4] = [
    ToolSpec {
        name: "terraform",
        install_hint: "https://developer.hashicorp.com/terraform/install",
    },
    ToolSpec {
        name: "aws",
        install_hint: "https://docs.aws.amazon.com/cli/latest/userguide/getting-started-install.html",
    },
    ToolSpec {
        name: "kubectl",
        install_hint: "https://kubernetes.io/docs/tasks/tools/",
    },
    ToolSpec {
        name: "helm",
        install_hint: "https://helm.sh/docs/intro/install/",
    },
];

/// Result of a single checklist entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckResult {
    Passed(Option<String>),
    Failed(String),
    Skipped(String),
}

/// Final status of a check after severity is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Passed,
    Warned,
    Skipped,
}

/// One line of the checklist report.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub name: &'static str,
    pub status: CheckStatus,
    pub detail: Option<String>,
}

/// Accumulated checklist results when no critical check failed.
#[derive(Debug, Default)]
pub struct PreflightReport {
    pub outcomes: Vec<CheckOutcome>,
}

impl PreflightReport {
    #[must_use]
    pub fn passed_count(&self) -> usize {
        self.count(CheckStatus::Passed)
    }

    #[must_use]
    pub fn warned_count(&self) -> usize {
        self.count(CheckStatus::Warned)
    }

    fn count(&self, status: CheckStatus) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status == status)
            .count()
    }

    fn record(&mut self, name: &'static str, critical: bool, result: CheckResult) -> Result<()> {
        match result {
            CheckResult::Passed(detail) => {
                ui::print_check_pass(name, detail.as_deref());
                self.outcomes.push(CheckOutcome {
                    name,
                    status: CheckStatus::Passed,
                    detail,
                });
                Ok(())
            }
            CheckResult::Skipped(reason) => {
                ui::print_check_skip(name, Some(&reason));
                self.outcomes.push(CheckOutcome {
                    name,
                    status: CheckStatus::Skipped,
                    detail: Some(reason),
                });
                Ok(())
            }
            CheckResult::Failed(detail) if critical => {
                ui::print_check_fail(name, Some(&detail));
                Err(anyhow!("preflight check '{name}' failed: {detail}"))
            }
            CheckResult::Failed(detail) => {
                ui::print_check_warn(name, Some(&detail));
                self.outcomes.push(CheckOutcome {
                    name,
                    status: CheckStatus::Warned,
                    detail: Some(detail),
                });
                Ok(())
            }
        }
    }
}

/// The pre-deploy validator.
pub struct Preflight {
    settings: Settings,
}

impl Preflight {
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// Run the checklist in order.
    ///
    /// # Errors
    ///
    /// Returns an error as soon as a critical check fails; soft findings are
    /// recorded as warnings in the report instead.
    pub fn run(&self) -> Result<PreflightReport> {
        let mut report = PreflightReport::default();

        // The tool check runs before the AWS handle even exists.
        report.record(CHECK_NAMES[0], true, check_tools(tool_on_path))?;

        let aws = Aws::new(&self.settings.region);

        report.record(CHECK_NAMES[1], true, self.check_credentials(&aws))?;
        report.record(CHECK_NAMES[2], true, self.check_region(&aws))?;
        report.record(CHECK_NAMES[3], false, self.check_quotas(&aws))?;
        report.record(CHECK_NAMES[4], false, self.check_fmt())?;

        let (result, vars) = self.check_vars();
        report.record(CHECK_NAMES[5], true, result)?;

        report.record(
            CHECK_NAMES[6],
            false,
            self.check_cidr_conflicts(&aws, vars.as_ref()),
        )?;
        report.record(
            CHECK_NAMES[7],
            false,
            self.check_eks_version(&aws, vars.as_ref()),
        )?;
        report.record(CHECK_NAMES[8], true, self.check_backend(&aws))?;

        Ok(report)
    }

    fn check_credentials(&self, aws: &Aws) -> CheckResult {
        match aws.caller_identity() {
            Ok(identity) => CheckResult::Passed(Some(format!(
                "account {} ({})",
                identity.account, identity.arn
            ))),
            Err(err) => CheckResult::Failed(format!("{err:#}")),
        }
    }

    fn check_region(&self, aws: &Aws) -> CheckResult {
        match aws.region_exists() {
            Ok(true) => CheckResult::Passed(Some(self.settings.region.clone())),
            Ok(false) => CheckResult::Failed(format!(
                "`{}` is not a known AWS region",
                self.settings.region
            )),
            Err(err) => CheckResult::Failed(format!("{err:#}")),
        }
    }

    fn check_quotas(&self, aws: &Aws) -> CheckResult {
        let vpc_quota = aws
            .service_quota("vpc", aws::VPC_QUOTA_CODE)
            .unwrap_or(aws::DEFAULT_QUOTA);
        let eip_quota = aws
            .service_quota("ec2", aws::EIP_QUOTA_CODE)
            .unwrap_or(aws::DEFAULT_QUOTA);

        let vpc_count = match aws.vpc_summaries() {
            Ok(vpcs) => vpcs.len(),
            Err(err) => return CheckResult::Failed(format!("{err:#}")),
        };
        let eip_count = match aws.address_count() {
            Ok(count) => count,
            Err(err) => return CheckResult::Failed(format!("{err:#}")),
        };

        let mut near = Vec::new();
        if let Some(warning) = quota_headroom("VPCs", vpc_count, vpc_quota) {
            near.push(warning);
        }
        if let Some(warning) = quota_headroom("elastic IPs", eip_count, eip_quota) {
            near.push(warning);
        }

        if near.is_empty() {
            CheckResult::Passed(Some(format!(
                "VPCs {vpc_count}/{vpc_quota}, elastic IPs {eip_count}/{eip_quota}"
            )))
        } else {
            CheckResult::Failed(near.join("; "))
        }
    }

    fn check_fmt(&self) -> CheckResult {
        match Terraform::new(&self.settings.tf_dir).fmt_check() {
            Ok(files) if files.is_empty() => CheckResult::Passed(None),
            Ok(files) => CheckResult::Failed(format!(
                "{} file(s) need `terraform fmt`: {}",
                files.len(),
                files.join(", ")
            )),
            Err(err) => CheckResult::Failed(format!("{err:#}")),
        }
    }

    fn check_vars(&self) -> (CheckResult, Option<DeployVars>) {
        let vars = match DeployVars::load(&self.settings.vars_file) {
            Ok(vars) => vars,
            Err(err) => return (CheckResult::Failed(format!("{err:#}")), None),
        };

        let violations = vars.violations();
        if violations.is_empty() {
            let detail = format!("{}", self.settings.vars_file.display());
            (CheckResult::Passed(Some(detail)), Some(vars))
        } else {
            let joined = violations
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            (CheckResult::Failed(joined), None)
        }
    }

    fn check_cidr_conflicts(&self, aws: &Aws, vars: Option<&DeployVars>) -> CheckResult {
        let Some(vars) = vars else {
            return CheckResult::Skipped("variables file not loaded".to_string());
        };
        let Ok(vpc_block) = vars.vpc_block() else {
            return CheckResult::Skipped("vpc_cidr not parseable".to_string());
        };

        let existing = match aws.vpc_summaries() {
            Ok(vpcs) => vpcs,
            Err(err) => return CheckResult::Failed(format!("{err:#}")),
        };

        let conflicts = conflicting_vpcs(vpc_block, &existing);
        if conflicts.is_empty() {
            CheckResult::Passed(Some(format!("{vpc_block} is free in the region")))
        } else {
            CheckResult::Failed(format!(
                "vpc_cidr {vpc_block} overlaps {}",
                conflicts.join(", ")
            ))
        }
    }

    fn check_eks_version(&self, aws: &Aws, vars: Option<&DeployVars>) -> CheckResult {
        let Some(vars) = vars else {
            return CheckResult::Skipped("variables file not loaded".to_string());
        };

        match aws.eks_cluster_versions() {
            Ok(offered) if offered.iter().any(|v| v == &vars.kubernetes_version) => {
                CheckResult::Passed(Some(vars.kubernetes_version.clone()))
            }
            Ok(offered) => CheckResult::Failed(format!(
                "kubernetes_version {} is not offered by EKS (offered: {})",
                vars.kubernetes_version,
                offered.join(", ")
            )),
            Err(err) => CheckResult::Failed(format!("{err:#}")),
        }
    }

    fn check_backend(&self, aws: &Aws) -> CheckResult {
        let Some(backend) = &self.settings.backend else {
            return CheckResult::Skipped(
                "TF_STATE_BUCKET / TF_STATE_LOCK_TABLE not set".to_string(),
            );
        };

        if let Err(err) = aws.head_bucket(&backend.bucket) {
            return CheckResult::Failed(format!("state bucket `{}`: {err:#}", backend.bucket));
        }

        match aws.lock_table_status(&backend.lock_table) {
            Ok(status) if status == "ACTIVE" => CheckResult::Passed(Some(format!(
                "s3://{} + {}",
                backend.bucket, backend.lock_table
            ))),
            Ok(status) => CheckResult::Failed(format!(
                "lock table `{}` is {status}, expected ACTIVE",
                backend.lock_table
            )),
            Err(err) => CheckResult::Failed(format!(
                "lock table `{}`: {err:#}",
                backend.lock_table
            )),
        }
    }
}

fn tool_on_path(tool: &str) -> bool {
    which::which(tool).is_ok()
}

fn check_tools(lookup: impl Fn(&str) -> bool) -> CheckResult {
    let missing: Vec<&ToolSpec> = REQUIRED_TOOLS
        .iter()
        .filter(|tool| !lookup(tool.name))
        .collect();

    if missing.is_empty() {
        return CheckResult::Passed(Some("terraform, aws, kubectl, helm".to_string()));
    }

    let detail = missing
        .iter()
        .map(|tool| format!("{} not on PATH (install: {})", tool.name, tool.install_hint))
        .collect::<Vec<_>>()
        .join("; ");
    CheckResult::Failed(detail)
}

fn quota_headroom(resource: &str, count: usize, quota: f64) -> Option<String> {
    #[allow(clippy::cast_precision_loss)]
    let used = count as f64;
    if used + 1.0 >= quota {
        Some(format!(
            "{resource} at {count} of {quota} quota, within 1 of the limit"
        ))
    } else {
        None
    }
}

fn conflicting_vpcs(vpc_block: Cidr, existing: &[VpcSummary]) -> Vec<String> {
    existing
        .iter()
        .filter_map(|vpc| {
            let block: Cidr = vpc.cidr_block.parse().ok()?;
            if vpc_block.overlaps(&block) {
                Some(format!("{} ({})", vpc.vpc_id, vpc.cidr_block))
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tools_check_is_first_and_names_every_missing_tool() {
        assert_eq!(CHECK_NAMES[0], "required tools");

        let result = check_tools(|_| false);
        let CheckResult::Failed(detail) = result else {
            panic!("expected failure when no tool is installed");
        };
        for tool in ["terraform", "aws", "kubectl", "helm"] {
            assert!(detail.contains(tool), "missing {tool} in: {detail}");
        }
    }

    #[test]
    fn tools_check_passes_when_all_present() {
        assert_eq!(
            check_tools(|_| true),
            CheckResult::Passed(Some("terraform, aws, kubectl, helm".to_string()))
        );
    }

    #[test]
    fn tools_check_reports_partial_absence() {
        let result = check_tools(|tool| tool != "helm");
        let CheckResult::Failed(detail) = result else {
            panic!("expected failure");
        };
        assert!(detail.contains("helm"));
        assert!(!detail.contains("terraform not on PATH"));
    }

    #[test]
    fn quota_headroom_warns_within_one_of_limit() {
        assert!(quota_headroom("VPCs", 4, 5.0).is_some());
        assert!(quota_headroom("VPCs", 5, 5.0).is_some());
        assert!(quota_headroom("VPCs", 3, 5.0).is_none());
        assert!(quota_headroom("elastic IPs", 0, 5.0).is_none());
    }

    #[test]
    fn vpc_conflicts_list_only_overlapping_blocks() {
        let existing = vec![
            VpcSummary {
                vpc_id: "vpc-overlap".to_string(),
                cidr_block: "10.0.128.0/17".to_string(),
            },
            VpcSummary {
                vpc_id: "vpc-clear".to_string(),
                cidr_block: "172.31.0.0/16".to_string(),
            },
        ];
        let conflicts = conflicting_vpcs("10.0.0.0/16".parse().unwrap(), &existing);
        assert_eq!(conflicts, vec!["vpc-overlap (10.0.128.0/17)".to_string()]);
    }

    #[test]
    fn report_counts_by_status() {
        let mut report = PreflightReport::default();
        report
            .record("required tools", true, CheckResult::Passed(None))
            .unwrap();
        report
            .record(
                "service quotas",
                false,
                CheckResult::Failed("near limit".to_string()),
            )
            .unwrap();
        report
            .record(
                "remote state backend",
                true,
                CheckResult::Skipped("not configured".to_string()),
            )
            .unwrap();

        assert_eq!(report.passed_count(), 1);
        assert_eq!(report.warned_count(), 1);
        assert_eq!(report.outcomes.len(), 3);
    }

    #[test]
    fn critical_failure_stops_the_run() {
        let mut report = PreflightReport::default();
        let err = report
            .record(
                "AWS credentials",
                true,
                CheckResult::Failed("expired token".to_string()),
            )
            .unwrap_err();
        assert!(err.to_string().contains("AWS credentials"));
        assert!(err.to_string().contains("expired token"));
    }

    #[test]
    fn soft_failure_becomes_a_warning_and_continues() {
        let mut report = PreflightReport::default();
        report
            .record(
                "terraform formatting",
                false,
                CheckResult::Failed("2 file(s) need `terraform fmt`".to_string()),
            )
            .unwrap();
        assert_eq!(report.warned_count(), 1);
    }
}
