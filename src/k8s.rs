//! Kubernetes API helpers.
//!
//! Reads go through the `kube` client against the kubeconfig context that
//! `aws eks update-kubeconfig` just wrote. Manifest application and Helm
//! releases still go through the `kubectl`/`helm` binaries, which own merge
//! and release semantics this tool has no business reimplementing.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{Container, Node, Pod, PodSpec, ServiceAccount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use tracing::{debug, warn};

/// Build a client from the default kubeconfig context.
///
/// # Errors
///
/// Returns an error when no usable kubeconfig or in-cluster config exists.
pub async fn connect() -> Result<Client> {
    Client::try_default()
        .await
        .context("failed to build Kubernetes client from kubeconfig")
}

/// Path the cluster credentials were written to, honoring `KUBECONFIG`.
pub fn kubeconfig_path() -> Option<PathBuf> {
    std::env::var_os("KUBECONFIG")
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|home| home.join(".kube").join("config")))
}

/// Ask the API server for its version string.
///
/// # Errors
///
/// Returns an error when the API server is unreachable.
pub async fn api_server_version(client: &Client) -> Result<String> {
    let info = client
        .apiserver_version()
        .await
        .context("API server version probe failed")?;
    Ok(info.git_version)
}

/// Ready and total node counts.
///
/// # Errors
///
/// Returns an error when the node list cannot be fetched.
pub async fn node_counts(client: &Client) -> Result<(usize, usize)> {
    let nodes: Api<Node> = Api::all(client.clone());
    let list = nodes
        .list(&Default::default())
        .await
        .context("failed to list nodes")?;
    Ok(count_ready(&list.items))
}

fn count_ready(nodes: &[Node]) -> (usize, usize) {
    let ready = nodes
        .iter()
        .filter(|node| {
            node.status
                .as_ref()
                .and_then(|status| status.conditions.as_ref())
                .is_some_and(|conditions| {
                    conditions
                        .iter()
                        .any(|c| c.type_ == "Ready" && c.status == "True")
                })
        })
        .count();
    (ready, nodes.len())
}

/// Replica readiness of a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub ready: i32,
    pub desired: i32,
}

impl Readiness {
    /// Fully rolled out: every desired replica is ready and at least one is
    /// desired.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.desired > 0 && self.ready >= self.desired
    }
}

/// Readiness of a deployment, or `None` when it does not exist.
///
/// # Errors
///
/// Returns an error on API failures other than absence.
pub async fn deployment_readiness(
    client: &Client,
    namespace: &str,
    name: &str,
) -> Result<Option<Readiness>> {
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let deployment = deployments
        .get_opt(name)
        .await
        .with_context(|| format!("failed to get deployment {namespace}/{name}"))?;

    Ok(deployment.map(|d| {
        let desired = d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);
        let ready = d
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0);
        Readiness { ready, desired }
    }))
}

/// Readiness of a daemonset, or `None` when it does not exist.
///
/// # Errors
///
/// Returns an error on API failures other than absence.
pub async fn daemonset_readiness(
    client: &Client,
    namespace: &str,
    name: &str,
) -> Result<Option<Readiness>> {
    let daemonsets: Api<DaemonSet> = Api::namespaced(client.clone(), namespace);
    let daemonset = daemonsets
        .get_opt(name)
        .await
        .with_context(|| format!("failed to get daemonset {namespace}/{name}"))?;

    Ok(daemonset.map(|d| {
        let status = d.status.as_ref();
        Readiness {
            ready: status.map_or(0, |s| s.number_ready),
            desired: status.map_or(0, |s| s.desired_number_scheduled),
        }
    }))
}

/// Whether a service account exists.
///
/// # Errors
///
/// Returns an error when the lookup itself fails.
pub async fn service_account_exists(client: &Client, namespace: &str, name: &str) -> Result<bool> {
    let accounts: Api<ServiceAccount> = Api::namespaced(client.clone(), namespace);
    let account = accounts
        .get_opt(name)
        .await
        .with_context(|| format!("failed to get service account {namespace}/{name}"))?;
    Ok(account.is_some())
}

/// Result of the synthetic connectivity probe. Never fatal to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The probe pod completed successfully.
    Passed,
    /// The probe pod ran but did not succeed within the window.
    Failed(String),
    /// The probe could not be started at all.
    Skipped(String),
}

const PROBE_POD: &str = "eksops-connectivity-probe";

fn probe_pod_manifest() -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(PROBE_POD.to_string()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "probe".to_string(),
                image: Some("busybox:1.36".to_string()),
                command: Some(
                    ["nslookup", "kubernetes.default"]
                        .iter()
                        .map(ToString::to_string)
                        .collect(),
                ),
                ..Default::default()
            }],
            restart_policy: Some("Never".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn pod_phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref().and_then(|s| s.phase.as_deref())
}

/// Create a short-lived busybox pod that resolves `kubernetes.default`, wait
/// for it to finish, and delete it. Best-effort: every failure mode maps to
/// a non-fatal outcome.
pub async fn run_connectivity_probe(client: &Client, timeout: Duration) -> ProbeOutcome {
    let pods: Api<Pod> = Api::namespaced(client.clone(), "default");

    // Clear any leftover probe pod from an earlier run.
    let _ = pods.delete(PROBE_POD, &DeleteParams::default()).await;

    if let Err(err) = pods
        .create(&PostParams::default(), &probe_pod_manifest())
        .await
    {
        warn!(error = %err, "connectivity probe pod could not be created");
        return ProbeOutcome::Skipped(format!("pod creation failed: {err}"));
    }

    let outcome = wait_for_probe_pod(&pods, timeout).await;

    if let Err(err) = pods.delete(PROBE_POD, &DeleteParams::default()).await {
        debug!(error = %err, "probe pod cleanup failed");
    }

    outcome
}

async fn wait_for_probe_pod(pods: &Api<Pod>, timeout: Duration) -> ProbeOutcome {
    let start = Instant::now();
    let poll_interval = Duration::from_secs(5);

    loop {
        if start.elapsed() > timeout {
            return ProbeOutcome::Failed(format!(
                "probe pod did not complete within {}s",
                timeout.as_secs()
            ));
        }

        match pods.get_opt(PROBE_POD).await {
            Ok(Some(pod)) => match pod_phase(&pod) {
                Some("Succeeded") => return ProbeOutcome::Passed,
                Some("Failed") => {
                    return ProbeOutcome::Failed("probe pod exited non-zero".to_string())
                }
                _ => {}
            },
            Ok(None) => return ProbeOutcome::Failed("probe pod disappeared".to_string()),
            Err(err) => {
                debug!(error = %err, "probe pod status fetch failed, retrying");
            }
        }

        tokio::time::sleep(poll_interval).await;
    }
}

/// Apply a manifest through `kubectl apply -f -`, returning kubectl's
/// per-object summary lines.
///
/// # Errors
///
/// Returns an error when kubectl cannot be spawned or the apply fails.
pub fn kubectl_apply_stdin(yaml: &str) -> Result<String> {
    let mut child = Command::new("kubectl")
        .args(["apply", "-f", "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .context("failed to spawn kubectl")?;

    if let Some(ref mut stdin) = child.stdin {
        stdin
            .write_all(yaml.as_bytes())
            .context("failed to write manifest to kubectl stdin")?;
    }

    let output = child
        .wait_with_output()
        .context("failed to wait for kubectl")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("kubectl apply failed: {}", stderr.trim());
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Run a helm command against the current kubeconfig context.
///
/// # Errors
///
/// Returns an error when helm fails.
pub fn helm(args: &[&str]) -> Result<String> {
    debug!(?args, "running helm");
    let output = Command::new("helm")
        .args(args)
        .output()
        .context("failed to execute helm")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("helm failed: {}", stderr.trim());
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{NodeCondition, NodeStatus, PodStatus};

    fn node(ready: bool) -> Node {
        Node {
            status: Some(NodeStatus {
                conditions: Some(vec![NodeCondition {
                    type_: "Ready".to_string(),
                    status: if ready { "True" } else { "False" }.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn counts_ready_nodes() {
        let nodes = vec![node(true), node(false), node(true)];
        assert_eq!(count_ready(&nodes), (2, 3));
        assert_eq!(count_ready(&[]), (0, 0));

        let statusless = Node::default();
        assert_eq!(count_ready(&[statusless]), (0, 1));
    }

    #[test]
    fn readiness_requires_all_desired_replicas() {
        assert!(Readiness { ready: 2, desired: 2 }.is_ready());
        assert!(Readiness { ready: 3, desired: 2 }.is_ready());
        assert!(!Readiness { ready: 1, desired: 2 }.is_ready());
        assert!(!Readiness { ready: 0, desired: 0 }.is_ready());
    }

    #[test]
    fn probe_pod_manifest_shape() {
        let pod = probe_pod_manifest();
        assert_eq!(pod.metadata.name.as_deref(), Some(PROBE_POD));
        let spec = pod.spec.unwrap();
        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
        assert_eq!(
            spec.containers[0].command,
            Some(vec!["nslookup".to_string(), "kubernetes.default".to_string()])
        );
    }

    #[test]
    fn pod_phase_extraction() {
        let pod = Pod {
            status: Some(PodStatus {
                phase: Some("Succeeded".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(pod_phase(&pod), Some("Succeeded"));
        assert_eq!(pod_phase(&Pod::default()), None);
    }
}
