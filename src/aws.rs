//! AWS CLI adapter.
//!
//! Read-only calls used by the preflight checklist and the cluster state
//! polls, plus the kubeconfig refresh. Every call pins the configured region
//! and requests JSON, parsed into typed payloads. EC2/STS/DynamoDB payloads
//! are PascalCase; the EKS API speaks camelCase.

use std::process::Command;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::debug;

/// Service-quota code for VPCs per region.
pub const VPC_QUOTA_CODE: &str = "L-F678F1CE";
/// Service-quota code for EC2-VPC elastic IPs.
pub const EIP_QUOTA_CODE: &str = "L-0263D0A3";
/// AWS default limit for both quotas, used when the quota API is unavailable.
pub const DEFAULT_QUOTA: f64 = 5.0;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CallerIdentity {
    pub account: String,
    pub arn: String,
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RegionList {
    regions: Vec<RegionEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RegionEntry {
    region_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VpcList {
    vpcs: Vec<VpcSummary>,
}

/// Existing VPC, as listed by `describe-vpcs`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct VpcSummary {
    pub vpc_id: String,
    pub cidr_block: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AddressList {
    addresses: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct QuotaEnvelope {
    quota: QuotaEntry,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct QuotaEntry {
    value: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TableEnvelope {
    table: TableEntry,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TableEntry {
    table_status: String,
}

#[derive(Debug, Deserialize)]
struct ClusterEnvelope {
    cluster: ClusterState,
}

/// EKS cluster state from `describe-cluster`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ClusterState {
    pub status: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

fn parse_caller_identity(json: &str) -> Result<CallerIdentity> {
    serde_json::from_str(json).context("failed to parse sts get-caller-identity output")
}

fn parse_region_names(json: &str) -> Result<Vec<String>> {
    let list: RegionList =
        serde_json::from_str(json).context("failed to parse describe-regions output")?;
    Ok(list.regions.into_iter().map(|r| r.region_name).collect())
}

fn parse_vpc_summaries(json: &str) -> Result<Vec<VpcSummary>> {
    let list: VpcList =
        serde_json::from_str(json).context("failed to parse describe-vpcs output")?;
    Ok(list.vpcs)
}

fn parse_address_count(json: &str) -> Result<usize> {
    let list: AddressList =
        serde_json::from_str(json).context("failed to parse describe-addresses output")?;
    Ok(list.addresses.len())
}

fn parse_quota_value(json: &str) -> Result<f64> {
    let envelope: QuotaEnvelope =
        serde_json::from_str(json).context("failed to parse get-service-quota output")?;
    Ok(envelope.quota.value)
}

fn parse_table_status(json: &str) -> Result<String> {
    let envelope: TableEnvelope =
        serde_json::from_str(json).context("failed to parse describe-table output")?;
    Ok(envelope.table.table_status)
}

fn parse_cluster_state(json: &str) -> Result<ClusterState> {
    let envelope: ClusterEnvelope =
        serde_json::from_str(json).context("failed to parse describe-cluster output")?;
    Ok(envelope.cluster)
}

fn parse_version_list(json: &str) -> Result<Vec<String>> {
    let versions: Vec<String> =
        serde_json::from_str(json).context("failed to parse describe-addon-versions output")?;
    let mut unique = versions;
    unique.sort();
    unique.dedup();
    Ok(unique)
}

/// Handle on the AWS CLI, pinned to one region.
pub struct Aws {
    region: String,
}

impl Aws {
    #[must_use]
    pub fn new(region: &str) -> Self {
        Self {
            region: region.to_string(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        debug!(region = %self.region, ?args, "running aws");
        let output = Command::new("aws")
            .args(args)
            .args(["--region", &self.region, "--output", "json"])
            .output()
            .context("failed to execute aws")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("aws {} {} failed: {}", args[0], args[1], stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Who the configured credentials belong to.
    ///
    /// # Errors
    ///
    /// Fails when the credentials are missing, expired, or invalid.
    pub fn caller_identity(&self) -> Result<CallerIdentity> {
        let json = self.run(&["sts", "get-caller-identity"])?;
        parse_caller_identity(&json)
    }

    /// Whether the configured region is a real AWS region.
    ///
    /// # Errors
    ///
    /// Fails when the region listing itself cannot be fetched.
    pub fn region_exists(&self) -> Result<bool> {
        let json = self.run(&["ec2", "describe-regions", "--all-regions"])?;
        let names = parse_region_names(&json)?;
        Ok(names.iter().any(|name| name == &self.region))
    }

    /// Applied quota value, or `None` when the quota API is unavailable.
    #[must_use]
    pub fn service_quota(&self, service_code: &str, quota_code: &str) -> Option<f64> {
        let json = self
            .run(&[
                "service-quotas",
                "get-service-quota",
                "--service-code",
                service_code,
                "--quota-code",
                quota_code,
            ])
            .ok()?;
        parse_quota_value(&json).ok()
    }

    /// Existing VPCs in the region.
    ///
    /// # Errors
    ///
    /// Fails when the listing cannot be fetched or parsed.
    pub fn vpc_summaries(&self) -> Result<Vec<VpcSummary>> {
        let json = self.run(&["ec2", "describe-vpcs"])?;
        parse_vpc_summaries(&json)
    }

    /// Number of allocated elastic IPs in the region.
    ///
    /// # Errors
    ///
    /// Fails when the listing cannot be fetched or parsed.
    pub fn address_count(&self) -> Result<usize> {
        let json = self.run(&["ec2", "describe-addresses"])?;
        parse_address_count(&json)
    }

    /// Kubernetes versions EKS currently offers, via the addon compatibility
    /// matrix.
    ///
    /// # Errors
    ///
    /// Fails when the listing cannot be fetched or parsed.
    pub fn eks_cluster_versions(&self) -> Result<Vec<String>> {
        let json = self.run(&[
            "eks",
            "describe-addon-versions",
            "--query",
            "addons[].addonVersions[].compatibilities[].clusterVersion",
        ])?;
        parse_version_list(&json)
    }

    /// Probe the remote-state bucket.
    ///
    /// # Errors
    ///
    /// Fails when the bucket is missing or inaccessible.
    pub fn head_bucket(&self, bucket: &str) -> Result<()> {
        self.run(&["s3api", "head-bucket", "--bucket", bucket])
            .map(|_| ())
    }

    /// Status of the remote-state lock table.
    ///
    /// # Errors
    ///
    /// Fails when the table is missing or inaccessible.
    pub fn lock_table_status(&self, table: &str) -> Result<String> {
        let json = self.run(&["dynamodb", "describe-table", "--table-name", table])?;
        parse_table_status(&json)
    }

    /// Current state of an EKS cluster.
    ///
    /// # Errors
    ///
    /// Fails when the cluster does not exist or cannot be described.
    pub fn eks_cluster_state(&self, cluster: &str) -> Result<ClusterState> {
        let json = self.run(&["eks", "describe-cluster", "--name", cluster])?;
        parse_cluster_state(&json)
    }

    /// Merge the cluster's credentials into the local kubeconfig.
    ///
    /// # Errors
    ///
    /// Fails when the kubeconfig update fails.
    pub fn update_kubeconfig(&self, cluster: &str) -> Result<()> {
        self.run(&["eks", "update-kubeconfig", "--name", cluster])
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_caller_identity() {
        let json = r#"{
            "UserId": "AIDAEXAMPLE",
            "Account": "123456789012",
            "Arn": "arn:aws:iam::123456789012:user/deployer"
        }"#;
        let identity = parse_caller_identity(json).unwrap();
        assert_eq!(identity.account, "123456789012");
        assert_eq!(identity.arn, "arn:aws:iam::123456789012:user/deployer");
    }

    #[test]
    fn parses_region_names() {
        let json = r#"{"Regions": [
            {"Endpoint": "ec2.eu-west-1.amazonaws.com", "RegionName": "eu-west-1", "OptInStatus": "opt-in-not-required"},
            {"Endpoint": "ec2.us-east-1.amazonaws.com", "RegionName": "us-east-1", "OptInStatus": "opt-in-not-required"}
        ]}"#;
        let names = parse_region_names(json).unwrap();
        assert_eq!(names, vec!["eu-west-1", "us-east-1"]);
    }

    #[test]
    fn parses_vpc_summaries() {
        let json = r#"{"Vpcs": [
            {"VpcId": "vpc-0a1b", "CidrBlock": "10.0.0.0/16", "IsDefault": false},
            {"VpcId": "vpc-0c2d", "CidrBlock": "172.31.0.0/16", "IsDefault": true}
        ]}"#;
        let vpcs = parse_vpc_summaries(json).unwrap();
        assert_eq!(vpcs.len(), 2);
        assert_eq!(vpcs[0].vpc_id, "vpc-0a1b");
        assert_eq!(vpcs[1].cidr_block, "172.31.0.0/16");
    }

    #[test]
    fn parses_quota_and_address_count() {
        let quota = parse_quota_value(
            r#"{"Quota": {"ServiceCode": "vpc", "QuotaCode": "L-F678F1CE", "Value": 15.0}}"#,
        )
        .unwrap();
        assert!((quota - 15.0).abs() < f64::EPSILON);

        let count =
            parse_address_count(r#"{"Addresses": [{"PublicIp": "3.3.3.3"}, {"PublicIp": "4.4.4.4"}]}"#)
                .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn parses_cluster_state_camel_case() {
        let json = r#"{"cluster": {
            "name": "demo-eks",
            "status": "ACTIVE",
            "endpoint": "https://ABC.gr7.eu-west-1.eks.amazonaws.com",
            "version": "1.31"
        }}"#;
        let state = parse_cluster_state(json).unwrap();
        assert_eq!(state.status, "ACTIVE");
        assert_eq!(state.version.as_deref(), Some("1.31"));
    }

    #[test]
    fn cluster_state_tolerates_missing_endpoint() {
        let state = parse_cluster_state(r#"{"cluster": {"status": "CREATING"}}"#).unwrap();
        assert_eq!(state.status, "CREATING");
        assert!(state.endpoint.is_none());
    }

    #[test]
    fn version_list_is_deduplicated() {
        let versions = parse_version_list(r#"["1.31", "1.30", "1.31", "1.29", "1.30"]"#).unwrap();
        assert_eq!(versions, vec!["1.29", "1.30", "1.31"]);
    }

    #[test]
    fn parses_table_status() {
        let status =
            parse_table_status(r#"{"Table": {"TableName": "tf-locks", "TableStatus": "ACTIVE"}}"#)
                .unwrap();
        assert_eq!(status, "ACTIVE");
    }
}
