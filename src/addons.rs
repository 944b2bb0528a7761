//! Cluster add-on installation.
//!
//! Two independent add-ons, installed idempotently and in order: the AWS
//! load balancer controller (Helm, gated on its IRSA service account) and
//! metrics-server (upstream static manifest). Failure of one never blocks
//! the other, and nothing is rolled back. Readiness waits after a
//! successful install degrade to warnings; the install still counts.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use kube::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::aws::Aws;
use crate::k8s;
use crate::settings::Settings;
use crate::terraform::Terraform;
use crate::ui;

const ALB_CONTROLLER: &str = "aws-load-balancer-controller";
const ALB_CHART_REPO: &str = "https://aws.github.io/eks-charts";
const METRICS_SERVER: &str = "metrics-server";
const METRICS_SERVER_MANIFEST: &str =
    "https://github.com/kubernetes-sigs/metrics-server/releases/latest/download/components.yaml";

const ROLLOUT_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const ROLLOUT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Terminal state of one add-on's install step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed,
    Failed(String),
}

/// Result of one add-on.
#[derive(Debug, Clone)]
pub struct AddonStatus {
    pub name: &'static str,
    pub outcome: InstallOutcome,
    pub warnings: Vec<String>,
}

/// Results of the whole installer run.
#[derive(Debug, Clone, Default)]
pub struct AddonReport {
    pub statuses: Vec<AddonStatus>,
}

impl AddonReport {
    /// Whether any install step itself failed (readiness warnings excluded).
    #[must_use]
    pub fn any_failed(&self) -> bool {
        self.statuses
            .iter()
            .any(|status| matches!(status.outcome, InstallOutcome::Failed(_)))
    }

    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.statuses.iter().map(|s| s.warnings.len()).sum()
    }
}

/// Options for an installer run.
#[derive(Debug, Clone, Default)]
pub struct AddonOptions {
    /// Explicit cluster name; otherwise resolved from Terraform outputs.
    pub cluster: Option<String>,
}

/// Installs the cluster add-ons.
pub struct AddonInstaller {
    settings: Settings,
    options: AddonOptions,
}

impl AddonInstaller {
    #[must_use]
    pub fn new(settings: Settings, options: AddonOptions) -> Self {
        Self { settings, options }
    }

    /// Install both add-ons.
    ///
    /// # Errors
    ///
    /// Returns an error only when no cluster can be resolved or reached at
    /// all; per-add-on failures are recorded in the report so the other
    /// add-on still gets its attempt.
    pub async fn run(&self) -> Result<AddonReport> {
        let (cluster, vpc_id) = self.resolve_cluster()?;

        let aws = Aws::new(&self.settings.region);
        aws.update_kubeconfig(&cluster)
            .context("failed to update kubeconfig")?;
        let client = k8s::connect().await?;

        let mut report = AddonReport::default();

        ui::print_step(&format!("Installing {ALB_CONTROLLER}"));
        let alb = self
            .install_alb_controller(&client, &cluster, vpc_id.as_deref())
            .await;
        print_addon_result(&alb);
        report.statuses.push(alb);

        ui::print_step(&format!("Installing {METRICS_SERVER}"));
        let metrics = self.install_metrics_server(&client).await;
        print_addon_result(&metrics);
        report.statuses.push(metrics);

        Ok(report)
    }

    fn resolve_cluster(&self) -> Result<(String, Option<String>)> {
        let outputs = Terraform::new(&self.settings.tf_dir)
            .outputs()
            .unwrap_or_default();

        let cluster = self
            .options
            .cluster
            .clone()
            .or(outputs.cluster_name)
            .context(
                "no cluster name available; pass --cluster or run where terraform state has a \
                 `cluster_name` output",
            )?;

        Ok((cluster, outputs.vpc_id))
    }

    async fn install_alb_controller(
        &self,
        client: &Client,
        cluster: &str,
        vpc_id: Option<&str>,
    ) -> AddonStatus {
        let mut status = AddonStatus {
            name: ALB_CONTROLLER,
            outcome: InstallOutcome::Installed,
            warnings: Vec::new(),
        };

        // IRSA gate: the controller assumes an out-of-band service account
        // bound to the OIDC provider role.
        match k8s::service_account_exists(client, "kube-system", ALB_CONTROLLER).await {
            Ok(true) => {}
            Ok(false) => {
                let reason = format!(
                    "service account kube-system/{ALB_CONTROLLER} not found; \
                     the IRSA role must exist before this controller can be installed"
                );
                ui::print_error(&reason);
                status.outcome = InstallOutcome::Failed(reason);
                return status;
            }
            Err(err) => {
                status.outcome = InstallOutcome::Failed(format!("{err:#}"));
                return status;
            }
        }

        // The repo may already be registered; `repo update` surfaces real
        // failures.
        let _ = k8s::helm(&["repo", "add", "eks", ALB_CHART_REPO]);
        if let Err(err) = k8s::helm(&["repo", "update"]) {
            status.outcome = InstallOutcome::Failed(format!("{err:#}"));
            return status;
        }

        let args = alb_helm_args(cluster, &self.settings.region, vpc_id);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        if let Err(err) = k8s::helm(&arg_refs) {
            status.outcome = InstallOutcome::Failed(format!("{err:#}"));
            return status;
        }
        info!(cluster, "load balancer controller release upgraded");

        if let Some(warning) =
            wait_rollout(client, "kube-system", ALB_CONTROLLER, ROLLOUT_TIMEOUT).await
        {
            status.warnings.push(warning);
        }
        status
    }

    async fn install_metrics_server(&self, client: &Client) -> AddonStatus {
        let mut status = AddonStatus {
            name: METRICS_SERVER,
            outcome: InstallOutcome::Installed,
            warnings: Vec::new(),
        };

        let manifest = match fetch_manifest(METRICS_SERVER_MANIFEST).await {
            Ok(manifest) => manifest,
            Err(err) => {
                status.outcome = InstallOutcome::Failed(format!("{err:#}"));
                return status;
            }
        };

        ui::print_info(&format!(
            "applying {} manifest ({} documents)",
            METRICS_SERVER,
            manifest_doc_count(&manifest)
        ));

        if let Err(err) = k8s::kubectl_apply_stdin(&manifest) {
            status.outcome = InstallOutcome::Failed(format!("{err:#}"));
            return status;
        }

        if let Some(warning) =
            wait_rollout(client, "kube-system", METRICS_SERVER, ROLLOUT_TIMEOUT).await
        {
            status.warnings.push(warning);
        }
        status
    }
}

fn print_addon_result(status: &AddonStatus) {
    match &status.outcome {
        InstallOutcome::Installed if status.warnings.is_empty() => {
            ui::print_success(&format!("{} installed", status.name));
        }
        InstallOutcome::Installed => {
            ui::print_success(&format!("{} installed (with warnings)", status.name));
        }
        InstallOutcome::Failed(reason) => {
            ui::print_error(&format!("{} failed: {reason}", status.name));
        }
    }
}

async fn fetch_manifest(url: &str) -> Result<String> {
    debug!(url, "fetching manifest");
    let response = reqwest::get(url)
        .await
        .with_context(|| format!("failed to fetch {url}"))?;
    let response = response
        .error_for_status()
        .with_context(|| format!("manifest fetch {url} returned an error status"))?;
    response
        .text()
        .await
        .context("failed to read manifest body")
}

/// Count the non-empty YAML documents in a multi-document manifest.
fn manifest_doc_count(yaml: &str) -> usize {
    serde_yaml::Deserializer::from_str(yaml)
        .filter(|doc| {
            serde_yaml::Value::deserialize(doc)
                .map(|value| !value.is_null())
                .unwrap_or(false)
        })
        .count()
}

/// Bounded readiness wait after an install; timeout degrades to a warning.
async fn wait_rollout(
    client: &Client,
    namespace: &str,
    name: &str,
    timeout: Duration,
) -> Option<String> {
    let start = Instant::now();
    let spinner = ui::wait_spinner(&format!("waiting for {name} rollout"));

    loop {
        if start.elapsed() > timeout {
            spinner.finish_and_clear();
            let warning = format!(
                "{name} rollout not complete after {}s; the install is recorded, \
                 the deployment may still be converging",
                timeout.as_secs()
            );
            warn!(addon = name, "rollout wait timed out");
            ui::print_warning(&warning);
            return Some(warning);
        }

        match k8s::deployment_readiness(client, namespace, name).await {
            Ok(Some(readiness)) if readiness.is_ready() => {
                spinner.finish_and_clear();
                ui::print_success(&format!(
                    "{name} rollout complete ({}/{})",
                    readiness.ready, readiness.desired
                ));
                return None;
            }
            Ok(Some(readiness)) => {
                spinner.set_message(format!(
                    "{name}: {}/{} replicas ready ({}s elapsed)",
                    readiness.ready,
                    readiness.desired,
                    start.elapsed().as_secs()
                ));
            }
            Ok(None) => {
                spinner.set_message(format!("{name}: deployment not created yet"));
            }
            Err(err) => {
                debug!(error = %err, "rollout status fetch failed, retrying");
            }
        }

        tokio::time::sleep(ROLLOUT_POLL_INTERVAL).await;
    }
}

fn alb_helm_args(cluster: &str, region: &str, vpc_id: Option<&str>) -> Vec<String> {
    let mut args: Vec<String> = [
        "upgrade",
        "--install",
        ALB_CONTROLLER,
        "eks/aws-load-balancer-controller",
        "--namespace",
        "kube-system",
        "--set",
        "serviceAccount.create=false",
        "--set",
        "serviceAccount.name=aws-load-balancer-controller",
    ]
    .iter()
    .map(ToString::to_string)
    .collect();

    args.push("--set".to_string());
    args.push(format!("clusterName={cluster}"));
    args.push("--set".to_string());
    args.push(format!("region={region}"));

    if let Some(vpc_id) = vpc_id {
        args.push("--set".to_string());
        args.push(format!("vpcId={vpc_id}"));
    }

    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_manifest_documents() {
        let yaml = "apiVersion: v1\nkind: ServiceAccount\nmetadata:\n  name: a\n---\napiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: b\n---\n";
        assert_eq!(manifest_doc_count(yaml), 2);
        assert_eq!(manifest_doc_count(""), 0);
        assert_eq!(manifest_doc_count("---\n---\n"), 0);
    }

    #[test]
    fn helm_args_carry_cluster_values() {
        let args = alb_helm_args("demo-eks", "eu-west-1", Some("vpc-0a1b"));
        let joined = args.join(" ");
        assert!(joined.starts_with("upgrade --install aws-load-balancer-controller"));
        assert!(joined.contains("--set clusterName=demo-eks"));
        assert!(joined.contains("--set region=eu-west-1"));
        assert!(joined.contains("--set vpcId=vpc-0a1b"));
        assert!(joined.contains("serviceAccount.create=false"));
    }

    #[test]
    fn helm_args_omit_vpc_when_unknown() {
        let args = alb_helm_args("demo-eks", "eu-west-1", None);
        assert!(!args.join(" ").contains("vpcId"));
    }

    #[test]
    fn report_fails_only_on_install_failures() {
        let mut report = AddonReport::default();
        report.statuses.push(AddonStatus {
            name: ALB_CONTROLLER,
            outcome: InstallOutcome::Installed,
            warnings: vec!["rollout not complete after 300s".to_string()],
        });
        assert!(!report.any_failed());
        assert_eq!(report.warning_count(), 1);

        report.statuses.push(AddonStatus {
            name: METRICS_SERVER,
            outcome: InstallOutcome::Failed("service account missing".to_string()),
            warnings: Vec::new(),
        });
        assert!(report.any_failed());
    }
}
