//! Post-deploy cluster verification.
//!
//! Walks the cluster through an explicit phase progression: resolve the
//! cluster name, wait for the control plane to become active, refresh
//! credentials, probe the API server, then the workload-plane checks.
//! Terminal success requires an active cluster and a reachable API server;
//! node, system-workload, and connectivity findings degrade to warnings
//! because add-ons may still be converging right after an apply.

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use kube::Client;
use tracing::{debug, info, warn};

use crate::aws::Aws;
use crate::k8s::{self, ProbeOutcome};
use crate::settings::Settings;
use crate::terraform::Terraform;
use crate::ui;
use crate::vars::DeployVars;

const CLUSTER_POLL_INTERVAL: Duration = Duration::from_secs(30);
const CLUSTER_TIMEOUT: Duration = Duration::from_secs(20 * 60);
const API_PROBE_ATTEMPTS: u32 = 10;
const API_PROBE_BACKOFF: Duration = Duration::from_secs(15);
const NODE_POLL_INTERVAL: Duration = Duration::from_secs(20);
const NODE_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const PROBE_TIMEOUT: Duration = Duration::from_secs(2 * 60);

/// Verification phases, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VerifyPhase {
    /// Resolving the cluster name from flags or Terraform outputs.
    ResolvingOutputs,
    /// Polling the managed control plane until it reports ACTIVE.
    WaitingClusterActive,
    /// Merging cluster credentials into the local kubeconfig.
    UpdatingKubeconfig,
    /// Probing the API server with bounded retries.
    ProbingApiServer,
    /// Waiting for worker nodes to join and report Ready.
    WaitingNodesReady,
    /// Checking the kube-system workloads.
    CheckingSystemWorkloads,
    /// Running the synthetic connectivity pod probe.
    RunningConnectivityProbe,
    /// Verification finished.
    Complete,
}

impl VerifyPhase {
    /// Next phase in the sequence.
    #[must_use]
    pub fn next(&self) -> Self {
        match self {
            Self::ResolvingOutputs => Self::WaitingClusterActive,
            Self::WaitingClusterActive => Self::UpdatingKubeconfig,
            Self::UpdatingKubeconfig => Self::ProbingApiServer,
            Self::ProbingApiServer => Self::WaitingNodesReady,
            Self::WaitingNodesReady => Self::CheckingSystemWorkloads,
            Self::CheckingSystemWorkloads => Self::RunningConnectivityProbe,
            Self::RunningConnectivityProbe | Self::Complete => Self::Complete,
        }
    }

    /// Human-readable description of the phase.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::ResolvingOutputs => "Resolving cluster from deployment outputs",
            Self::WaitingClusterActive => "Waiting for cluster to become active",
            Self::UpdatingKubeconfig => "Updating kubeconfig",
            Self::ProbingApiServer => "Probing API server",
            Self::WaitingNodesReady => "Waiting for nodes to be Ready",
            Self::CheckingSystemWorkloads => "Checking system workloads",
            Self::RunningConnectivityProbe => "Running connectivity probe",
            Self::Complete => "Complete",
        }
    }

    /// Phase number for progress display.
    #[must_use]
    pub fn step_number(&self) -> u8 {
        match self {
            Self::ResolvingOutputs => 1,
            Self::WaitingClusterActive => 2,
            Self::UpdatingKubeconfig => 3,
            Self::ProbingApiServer => 4,
            Self::WaitingNodesReady => 5,
            Self::CheckingSystemWorkloads => 6,
            Self::RunningConnectivityProbe => 7,
            Self::Complete => 8,
        }
    }

    /// Number of phases that perform work.
    pub const TOTAL_PHASES: u8 = 7;
}

impl std::fmt::Display for VerifyPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// How a control-plane status maps onto the wait loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClusterProgress {
    Ready,
    Converging,
    Broken,
}

fn classify_cluster_status(status: &str) -> ClusterProgress {
    match status {
        "ACTIVE" => ClusterProgress::Ready,
        "CREATING" | "UPDATING" | "PENDING" => ClusterProgress::Converging,
        _ => ClusterProgress::Broken,
    }
}

/// Ready-node count the wait loop aims for.
fn node_target(expect_nodes: Option<u32>, vars: Option<&DeployVars>) -> u32 {
    expect_nodes
        .or_else(|| vars.map(|v| v.node_desired_size))
        .unwrap_or(1)
        .max(1)
}

/// Worker shortfall at the deadline; reported, never fatal.
fn node_shortfall_warning(ready: usize, target: u32, waited_secs: u64) -> String {
    format!(
        "only {ready} of {target} expected node(s) Ready after {waited_secs}s; \
         the node group may still be scaling"
    )
}

/// A non-Passed probe outcome becomes a warning, never an error.
fn probe_warning(outcome: &ProbeOutcome) -> Option<String> {
    match outcome {
        ProbeOutcome::Passed => None,
        ProbeOutcome::Failed(reason) => Some(format!("connectivity probe failed: {reason}")),
        ProbeOutcome::Skipped(reason) => Some(format!("connectivity probe skipped: {reason}")),
    }
}

/// Options for a verification run.
#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    /// Explicit cluster name; otherwise resolved from Terraform outputs.
    pub cluster: Option<String>,
    /// Ready-node target; otherwise the configured desired size.
    pub expect_nodes: Option<u32>,
}

/// What verification observed.
#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    pub cluster_name: String,
    pub endpoint: Option<String>,
    pub api_version: Option<String>,
    pub ready_nodes: usize,
    pub total_nodes: usize,
    pub warnings: Vec<String>,
}

/// Executes the verification phase progression.
pub struct ClusterVerifier {
    settings: Settings,
    options: VerifyOptions,
    aws: Aws,
    client: Option<Client>,
    report: VerifyReport,
}

impl ClusterVerifier {
    #[must_use]
    pub fn new(settings: Settings, options: VerifyOptions) -> Self {
        let aws = Aws::new(&settings.region);
        Self {
            settings,
            options,
            aws,
            client: None,
            report: VerifyReport::default(),
        }
    }

    /// Run all phases in order.
    ///
    /// # Errors
    ///
    /// Returns an error when the cluster cannot be resolved, never becomes
    /// active, or the API server stays unreachable. Node, workload, and
    /// connectivity findings are warnings in the report instead.
    pub async fn run(mut self) -> Result<VerifyReport> {
        let mut phase = VerifyPhase::ResolvingOutputs;

        while phase != VerifyPhase::Complete {
            ui::print_progress_step(
                phase.step_number(),
                VerifyPhase::TOTAL_PHASES,
                phase.description(),
            );
            self.execute_phase(phase).await?;
            phase = phase.next();
        }

        Ok(self.report)
    }

    async fn execute_phase(&mut self, phase: VerifyPhase) -> Result<()> {
        match phase {
            VerifyPhase::ResolvingOutputs => self.resolve_cluster(),
            VerifyPhase::WaitingClusterActive => self.wait_cluster_active().await,
            VerifyPhase::UpdatingKubeconfig => self.update_kubeconfig(),
            VerifyPhase::ProbingApiServer => self.probe_api_server().await,
            VerifyPhase::WaitingNodesReady => self.wait_nodes_ready().await,
            VerifyPhase::CheckingSystemWorkloads => self.check_system_workloads().await,
            VerifyPhase::RunningConnectivityProbe => self.run_connectivity_probe().await,
            VerifyPhase::Complete => Ok(()),
        }
    }

    fn resolve_cluster(&mut self) -> Result<()> {
        if let Some(cluster) = &self.options.cluster {
            self.report.cluster_name = cluster.clone();
            ui::print_info(&format!("verifying cluster `{cluster}` (from --cluster)"));
            return Ok(());
        }

        let outputs = Terraform::new(&self.settings.tf_dir)
            .outputs()
            .context("failed to read terraform outputs")?;

        let cluster = outputs.cluster_name.context(
            "no cluster name available; pass --cluster or run where terraform state has a \
             `cluster_name` output",
        )?;
        ui::print_info(&format!("verifying cluster `{cluster}` (from outputs)"));
        self.report.cluster_name = cluster;
        Ok(())
    }

    async fn wait_cluster_active(&mut self) -> Result<()> {
        let cluster = self.report.cluster_name.clone();
        let start = Instant::now();
        let spinner = ui::wait_spinner(&format!("describing cluster {cluster}"));

        loop {
            if start.elapsed() > CLUSTER_TIMEOUT {
                spinner.finish_and_clear();
                bail!(
                    "cluster {cluster} did not become ACTIVE within {}s",
                    CLUSTER_TIMEOUT.as_secs()
                );
            }

            let state = match self.aws.eks_cluster_state(&cluster) {
                Ok(state) => state,
                Err(err) => {
                    spinner.finish_and_clear();
                    return Err(err);
                }
            };

            match classify_cluster_status(&state.status) {
                ClusterProgress::Ready => {
                    spinner.finish_and_clear();
                    self.report.endpoint = state.endpoint;
                    info!(cluster = %cluster, "cluster is ACTIVE");
                    ui::print_success(&format!("cluster {cluster} is ACTIVE"));
                    return Ok(());
                }
                ClusterProgress::Converging => {
                    spinner.set_message(format!(
                        "cluster {cluster} is {} ({}s elapsed)",
                        state.status,
                        start.elapsed().as_secs()
                    ));
                }
                ClusterProgress::Broken => {
                    spinner.finish_and_clear();
                    bail!("cluster {cluster} is in state {}", state.status);
                }
            }

            tokio::time::sleep(CLUSTER_POLL_INTERVAL).await;
        }
    }

    fn update_kubeconfig(&mut self) -> Result<()> {
        self.aws
            .update_kubeconfig(&self.report.cluster_name)
            .context("failed to update kubeconfig")?;
        match k8s::kubeconfig_path() {
            Some(path) => ui::print_success(&format!("kubeconfig updated ({})", path.display())),
            None => ui::print_success("kubeconfig updated"),
        }
        Ok(())
    }

    async fn probe_api_server(&mut self) -> Result<()> {
        for attempt in 1..=API_PROBE_ATTEMPTS {
            match self.try_api_probe().await {
                Ok(version) => {
                    ui::print_success(&format!("API server reachable ({version})"));
                    self.report.api_version = Some(version);
                    return Ok(());
                }
                Err(err) => {
                    debug!(attempt, error = %err, "API probe attempt failed");
                    if attempt < API_PROBE_ATTEMPTS {
                        tokio::time::sleep(API_PROBE_BACKOFF).await;
                    }
                }
            }
        }

        bail!(
            "API server unreachable after {API_PROBE_ATTEMPTS} attempts \
             ({}s apart)",
            API_PROBE_BACKOFF.as_secs()
        );
    }

    async fn try_api_probe(&mut self) -> Result<String> {
        if self.client.is_none() {
            self.client = Some(k8s::connect().await?);
        }
        let client = self
            .client
            .as_ref()
            .context("Kubernetes client not initialized")?;
        k8s::api_server_version(client).await
    }

    async fn wait_nodes_ready(&mut self) -> Result<()> {
        let vars = DeployVars::load(&self.settings.vars_file).ok();
        let target = node_target(self.options.expect_nodes, vars.as_ref());
        let client = self
            .client
            .clone()
            .context("Kubernetes client not initialized")?;

        let start = Instant::now();
        let spinner = ui::wait_spinner(&format!("waiting for {target} Ready node(s)"));

        loop {
            if start.elapsed() > NODE_TIMEOUT {
                spinner.finish_and_clear();
                let warning = node_shortfall_warning(
                    self.report.ready_nodes,
                    target,
                    NODE_TIMEOUT.as_secs(),
                );
                warn!(ready = self.report.ready_nodes, target, "node wait timed out");
                ui::print_warning(&warning);
                self.report.warnings.push(warning);
                return Ok(());
            }

            match k8s::node_counts(&client).await {
                Ok((ready, total)) => {
                    self.report.ready_nodes = ready;
                    self.report.total_nodes = total;
                    if ready >= target as usize {
                        spinner.finish_and_clear();
                        ui::print_success(&format!("{ready}/{total} node(s) Ready"));
                        return Ok(());
                    }
                    spinner.set_message(format!(
                        "{ready}/{target} node(s) Ready ({}s elapsed)",
                        start.elapsed().as_secs()
                    ));
                }
                Err(err) => {
                    debug!(error = %err, "node list failed, retrying");
                }
            }

            tokio::time::sleep(NODE_POLL_INTERVAL).await;
        }
    }

    async fn check_system_workloads(&mut self) -> Result<()> {
        let client = self
            .client
            .clone()
            .context("Kubernetes client not initialized")?;

        self.note_workload(
            "coredns",
            k8s::deployment_readiness(&client, "kube-system", "coredns").await,
        );
        self.note_workload(
            "aws-node",
            k8s::daemonset_readiness(&client, "kube-system", "aws-node").await,
        );
        self.note_workload(
            "kube-proxy",
            k8s::daemonset_readiness(&client, "kube-system", "kube-proxy").await,
        );

        Ok(())
    }

    // Informational only: absence or unreadiness is a warning.
    fn note_workload(&mut self, name: &str, readiness: Result<Option<k8s::Readiness>>) {
        match readiness {
            Ok(Some(r)) if r.is_ready() => {
                ui::print_check_pass(name, Some(&format!("{}/{} ready", r.ready, r.desired)));
            }
            Ok(Some(r)) => {
                let warning = format!("{name} not fully ready ({}/{})", r.ready, r.desired);
                ui::print_check_warn(name, Some(&format!("{}/{} ready", r.ready, r.desired)));
                self.report.warnings.push(warning);
            }
            Ok(None) => {
                let warning = format!("{name} not found in kube-system");
                ui::print_check_warn(name, Some("not found"));
                self.report.warnings.push(warning);
            }
            Err(err) => {
                let warning = format!("{name} status unavailable: {err:#}");
                ui::print_check_warn(name, Some("status unavailable"));
                debug!(workload = name, error = %err, "workload status fetch failed");
                self.report.warnings.push(warning);
            }
        }
    }

    async fn run_connectivity_probe(&mut self) -> Result<()> {
        let client = self
            .client
            .clone()
            .context("Kubernetes client not initialized")?;

        let outcome = k8s::run_connectivity_probe(&client, PROBE_TIMEOUT).await;
        match probe_warning(&outcome) {
            None => ui::print_success("connectivity probe passed (kubernetes.default resolves)"),
            Some(warning) => {
                ui::print_warning(&warning);
                self.report.warnings.push(warning);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_advance_in_order_and_terminate() {
        let mut phase = VerifyPhase::ResolvingOutputs;
        let mut seen = vec![phase];
        while phase != VerifyPhase::Complete {
            phase = phase.next();
            seen.push(phase);
        }
        assert_eq!(seen.len(), 8);
        assert_eq!(VerifyPhase::Complete.next(), VerifyPhase::Complete);

        for (i, phase) in seen.iter().enumerate() {
            assert_eq!(usize::from(phase.step_number()), i + 1);
        }
    }

    #[test]
    fn cluster_status_classification() {
        assert_eq!(classify_cluster_status("ACTIVE"), ClusterProgress::Ready);
        assert_eq!(
            classify_cluster_status("CREATING"),
            ClusterProgress::Converging
        );
        assert_eq!(
            classify_cluster_status("UPDATING"),
            ClusterProgress::Converging
        );
        assert_eq!(
            classify_cluster_status("PENDING"),
            ClusterProgress::Converging
        );
        assert_eq!(classify_cluster_status("FAILED"), ClusterProgress::Broken);
        assert_eq!(classify_cluster_status("DELETING"), ClusterProgress::Broken);
        assert_eq!(classify_cluster_status("bogus"), ClusterProgress::Broken);
    }

    #[test]
    fn node_target_prefers_flag_then_vars_then_one() {
        let vars = DeployVars {
            node_desired_size: 3,
            ..DeployVars::default()
        };
        assert_eq!(node_target(Some(5), Some(&vars)), 5);
        assert_eq!(node_target(None, Some(&vars)), 3);
        assert_eq!(node_target(None, None), 1);

        let zero = DeployVars {
            node_desired_size: 0,
            ..DeployVars::default()
        };
        assert_eq!(node_target(None, Some(&zero)), 1);
    }

    #[test]
    fn node_shortfall_at_timeout_reports_the_observed_count() {
        let warning = node_shortfall_warning(0, 2, 600);
        assert!(warning.contains("only 0 of 2"));
        assert!(warning.contains("after 600s"));
    }

    #[test]
    fn probe_outcomes_never_escalate_past_warnings() {
        assert_eq!(probe_warning(&ProbeOutcome::Passed), None);

        let failed = probe_warning(&ProbeOutcome::Failed("pod exited non-zero".to_string()));
        assert!(failed.unwrap().contains("failed"));

        let skipped =
            probe_warning(&ProbeOutcome::Skipped("pod creation failed: 403".to_string()));
        assert!(skipped.unwrap().contains("skipped"));
    }
}
