//! Deployment variable set and its validation predicates.
//!
//! `DeployVars` mirrors the Terraform input variables and is read from the
//! same `terraform.tfvars.json` file Terraform consumes, so the two can never
//! drift. Every predicate runs before any resource is materialized; all
//! violations are collected and reported together as one hard failure.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::cidr::{Cidr, CidrError};

/// A single validation predicate violation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VarsError {
    #[error("project_name `{0}` must be lowercase DNS-safe and 2-28 chars (^[a-z][a-z0-9-]{{1,27}}$)")]
    ProjectName(String),
    #[error("region `{0}` does not look like an AWS region")]
    RegionShape(String),
    #[error("{field}: {source}")]
    BadCidr { field: String, source: CidrError },
    #[error("vpc_cidr `{cidr}` prefix /{prefix} is outside the /16-/24 range")]
    VpcPrefix { cidr: String, prefix: u8 },
    #[error("{field} needs at least two entries (one per AZ), got {count}")]
    SubnetCount { field: &'static str, count: usize },
    #[error("subnet `{subnet}` is not contained in vpc_cidr `{vpc}`")]
    SubnetOutsideVpc { subnet: String, vpc: String },
    #[error("subnets `{a}` and `{b}` overlap")]
    SubnetOverlap { a: String, b: String },
    #[error("kubernetes_version `{0}` must match ^1\\.[0-9]{{2}}$ (e.g. 1.31)")]
    KubernetesVersion(String),
    #[error("node group sizing must satisfy 1 <= min <= desired <= max, got min={min} desired={desired} max={max}")]
    NodeBounds { min: u32, desired: u32, max: u32 },
    #[error("node_instance_types must not be empty")]
    InstanceTypes,
    #[error("capacity_type `{0}` must be ON_DEMAND or SPOT")]
    CapacityType(String),
    #[error("node_disk_size {0} GiB is outside the 20-1000 range")]
    DiskSize(u32),
    #[error("single_nat_gateway requires enable_nat_gateway")]
    NatConfig,
}

/// The deployment variable set, with the same defaults Terraform declares.
#[derive(Debug, Clone, Deserialize)]
pub struct DeployVars {
    #[serde(default = "default_project_name")]
    pub project_name: String,
    #[serde(default = "default_region", alias = "aws_region")]
    pub region: String,
    #[serde(default = "default_vpc_cidr")]
    pub vpc_cidr: String,
    #[serde(default = "default_public_subnets")]
    pub public_subnet_cidrs: Vec<String>,
    #[serde(default = "default_private_subnets")]
    pub private_subnet_cidrs: Vec<String>,
    #[serde(default = "default_kubernetes_version")]
    pub kubernetes_version: String,
    #[serde(default = "default_min_size")]
    pub node_min_size: u32,
    #[serde(default = "default_desired_size")]
    pub node_desired_size: u32,
    #[serde(default = "default_max_size")]
    pub node_max_size: u32,
    #[serde(default = "default_instance_types")]
    pub node_instance_types: Vec<String>,
    #[serde(default = "default_capacity_type")]
    pub capacity_type: String,
    #[serde(default = "default_disk_size")]
    pub node_disk_size: u32,
    #[serde(default = "default_true")]
    pub enable_nat_gateway: bool,
    #[serde(default = "default_true")]
    pub single_nat_gateway: bool,
}

fn default_project_name() -> String {
    "eks-cluster".to_string()
}
fn default_region() -> String {
    "us-west-2".to_string()
}
fn default_vpc_cidr() -> String {
    "10.0.0.0/16".to_string()
}
fn default_public_subnets() -> Vec<String> {
    vec!["10.0.1.0/24".to_string(), "10.0.2.0/24".to_string()]
}
fn default_private_subnets() -> Vec<String> {
    vec!["10.0.10.0/24".to_string(), "10.0.11.0/24".to_string()]
}
fn default_kubernetes_version() -> String {
    "1.31".to_string()
}
fn default_min_size() -> u32 {
    1
}
fn default_desired_size() -> u32 {
    2
}
fn default_max_size() -> u32 {
    4
}
fn default_instance_types() -> Vec<String> {
    vec!["t3.medium".to_string()]
}
fn default_capacity_type() -> String {
    "ON_DEMAND".to_string()
}
fn default_disk_size() -> u32 {
    50
}
fn default_true() -> bool {
    true
}

impl Default for DeployVars {
    fn default() -> Self {
        Self {
            project_name: default_project_name(),
            region: default_region(),
            vpc_cidr: default_vpc_cidr(),
            public_subnet_cidrs: default_public_subnets(),
            private_subnet_cidrs: default_private_subnets(),
            kubernetes_version: default_kubernetes_version(),
            node_min_size: default_min_size(),
            node_desired_size: default_desired_size(),
            node_max_size: default_max_size(),
            node_instance_types: default_instance_types(),
            capacity_type: default_capacity_type(),
            node_disk_size: default_disk_size(),
            enable_nat_gateway: default_true(),
            single_nat_gateway: default_true(),
        }
    }
}

impl DeployVars {
    /// Load the variable set from a tfvars JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file is missing, unreadable, or not valid
    /// JSON for this shape. Unknown keys are ignored (the file may carry
    /// variables this tool does not validate).
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read vars file {}", path.display()))?;
        let vars: DeployVars = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse vars file {}", path.display()))?;
        Ok(vars)
    }

    /// The VPC block, once `vpc_cidr` has passed validation.
    ///
    /// # Errors
    ///
    /// Returns the parse error for a malformed `vpc_cidr`.
    pub fn vpc_block(&self) -> Result<Cidr, CidrError> {
        self.vpc_cidr.parse()
    }

    /// Run every predicate and collect the violations. Empty means valid.
    #[must_use]
    pub fn violations(&self) -> Vec<VarsError> {
        let mut violations = Vec::new();

        let name_re = Regex::new(r"^[a-z][a-z0-9-]{1,27}$").unwrap();
        if !name_re.is_match(&self.project_name) {
            violations.push(VarsError::ProjectName(self.project_name.clone()));
        }

        let region_re = Regex::new(r"^[a-z]{2}(-gov)?-[a-z]+-[0-9]$").unwrap();
        if !region_re.is_match(&self.region) {
            violations.push(VarsError::RegionShape(self.region.clone()));
        }

        let vpc = match self.vpc_cidr.parse::<Cidr>() {
            Ok(block) => {
                if !(16..=24).contains(&block.prefix_len()) {
                    violations.push(VarsError::VpcPrefix {
                        cidr: self.vpc_cidr.clone(),
                        prefix: block.prefix_len(),
                    });
                }
                Some(block)
            }
            Err(source) => {
                violations.push(VarsError::BadCidr {
                    field: "vpc_cidr".to_string(),
                    source,
                });
                None
            }
        };

        let mut subnets: Vec<(String, Cidr)> = Vec::new();
        for (field, list) in [
            ("public_subnet_cidrs", &self.public_subnet_cidrs),
            ("private_subnet_cidrs", &self.private_subnet_cidrs),
        ] {
            if list.len() < 2 {
                violations.push(VarsError::SubnetCount {
                    field,
                    count: list.len(),
                });
            }
            for raw in list {
                match raw.parse::<Cidr>() {
                    Ok(block) => {
                        if let Some(vpc) = vpc {
                            if !vpc.contains(&block) {
                                violations.push(VarsError::SubnetOutsideVpc {
                                    subnet: raw.clone(),
                                    vpc: self.vpc_cidr.clone(),
                                });
                            }
                        }
                        subnets.push((raw.clone(), block));
                    }
                    Err(source) => violations.push(VarsError::BadCidr {
                        field: format!("{field} entry `{raw}`"),
                        source,
                    }),
                }
            }
        }
        for (i, (name_a, a)) in subnets.iter().enumerate() {
            for (name_b, b) in &subnets[i + 1..] {
                if a.overlaps(b) {
                    violations.push(VarsError::SubnetOverlap {
                        a: name_a.clone(),
                        b: name_b.clone(),
                    });
                }
            }
        }

        let version_re = Regex::new(r"^1\.[0-9]{2}$").unwrap();
        if !version_re.is_match(&self.kubernetes_version) {
            violations.push(VarsError::KubernetesVersion(self.kubernetes_version.clone()));
        }

        if !(1 <= self.node_min_size
            && self.node_min_size <= self.node_desired_size
            && self.node_desired_size <= self.node_max_size)
        {
            violations.push(VarsError::NodeBounds {
                min: self.node_min_size,
                desired: self.node_desired_size,
                max: self.node_max_size,
            });
        }

        if self.node_instance_types.is_empty() {
            violations.push(VarsError::InstanceTypes);
        }

        if self.capacity_type != "ON_DEMAND" && self.capacity_type != "SPOT" {
            violations.push(VarsError::CapacityType(self.capacity_type.clone()));
        }

        if !(20..=1000).contains(&self.node_disk_size) {
            violations.push(VarsError::DiskSize(self.node_disk_size));
        }

        if self.single_nat_gateway && !self.enable_nat_gateway {
            violations.push(VarsError::NatConfig);
        }

        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        assert!(DeployVars::default().violations().is_empty());
    }

    #[test]
    fn rejects_bad_project_name() {
        let too_long = "a".repeat(29);
        for name in ["", "X", "Has-Caps", "-leading", too_long.as_str()] {
            let vars = DeployVars {
                project_name: name.to_string(),
                ..DeployVars::default()
            };
            assert!(
                vars.violations()
                    .iter()
                    .any(|v| matches!(v, VarsError::ProjectName(_))),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_bad_region_shape() {
        let vars = DeployVars {
            region: "uswest2".to_string(),
            ..DeployVars::default()
        };
        assert_eq!(
            vars.violations(),
            vec![VarsError::RegionShape("uswest2".to_string())]
        );
        let gov = DeployVars {
            region: "us-gov-west-1".to_string(),
            ..DeployVars::default()
        };
        assert!(gov.violations().is_empty());
    }

    #[test]
    fn rejects_invalid_vpc_cidr_before_provisioning() {
        let vars = DeployVars {
            vpc_cidr: "10.0.0.0/33".to_string(),
            ..DeployVars::default()
        };
        let violations = vars.violations();
        assert!(violations
            .iter()
            .any(|v| matches!(v, VarsError::BadCidr { field, .. } if field == "vpc_cidr")));
    }

    #[test]
    fn rejects_vpc_prefix_outside_range() {
        for (cidr, prefix) in [("10.0.0.0/8", 8u8), ("10.0.0.0/25", 25u8)] {
            let vars = DeployVars {
                vpc_cidr: cidr.to_string(),
                public_subnet_cidrs: vec!["10.0.0.0/28".into(), "10.0.0.16/28".into()],
                private_subnet_cidrs: vec!["10.0.0.32/28".into(), "10.0.0.48/28".into()],
                ..DeployVars::default()
            };
            assert!(vars.violations().contains(&VarsError::VpcPrefix {
                cidr: cidr.to_string(),
                prefix,
            }));
        }
    }

    #[test]
    fn rejects_subnets_outside_vpc_and_overlapping() {
        let vars = DeployVars {
            public_subnet_cidrs: vec!["10.1.0.0/24".into(), "10.0.1.0/24".into()],
            private_subnet_cidrs: vec!["10.0.1.0/24".into(), "10.0.11.0/24".into()],
            ..DeployVars::default()
        };
        let violations = vars.violations();
        assert!(violations.contains(&VarsError::SubnetOutsideVpc {
            subnet: "10.1.0.0/24".to_string(),
            vpc: "10.0.0.0/16".to_string(),
        }));
        assert!(violations.contains(&VarsError::SubnetOverlap {
            a: "10.0.1.0/24".to_string(),
            b: "10.0.1.0/24".to_string(),
        }));
    }

    #[test]
    fn requires_two_subnets_per_tier() {
        let vars = DeployVars {
            public_subnet_cidrs: vec!["10.0.1.0/24".into()],
            ..DeployVars::default()
        };
        assert!(vars.violations().contains(&VarsError::SubnetCount {
            field: "public_subnet_cidrs",
            count: 1,
        }));
    }

    #[test]
    fn rejects_node_bounds_out_of_order() {
        for (min, desired, max) in [(3, 2, 4), (1, 5, 4), (0, 0, 0), (2, 1, 1)] {
            let vars = DeployVars {
                node_min_size: min,
                node_desired_size: desired,
                node_max_size: max,
                ..DeployVars::default()
            };
            assert!(
                vars.violations()
                    .contains(&VarsError::NodeBounds { min, desired, max }),
                "min={min} desired={desired} max={max} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_remaining_predicates() {
        let vars = DeployVars {
            kubernetes_version: "1.9".to_string(),
            node_instance_types: vec![],
            capacity_type: "on_demand".to_string(),
            node_disk_size: 10,
            enable_nat_gateway: false,
            single_nat_gateway: true,
            ..DeployVars::default()
        };
        let violations = vars.violations();
        assert!(violations.contains(&VarsError::KubernetesVersion("1.9".to_string())));
        assert!(violations.contains(&VarsError::InstanceTypes));
        assert!(violations.contains(&VarsError::CapacityType("on_demand".to_string())));
        assert!(violations.contains(&VarsError::DiskSize(10)));
        assert!(violations.contains(&VarsError::NatConfig));
        assert_eq!(violations.len(), 5, "violations are collected, not first-only");
    }

    #[test]
    fn loads_tfvars_json_with_aliases_and_unknown_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "project_name": "demo-eks",
                "aws_region": "eu-central-1",
                "node_desired_size": 3,
                "node_max_size": 6,
                "tags": {{"team": "platform"}}
            }}"#
        )
        .unwrap();
        let vars = DeployVars::load(file.path()).unwrap();
        assert_eq!(vars.project_name, "demo-eks");
        assert_eq!(vars.region, "eu-central-1");
        assert_eq!(vars.node_desired_size, 3);
        assert_eq!(vars.vpc_cidr, "10.0.0.0/16");
        assert!(vars.violations().is_empty());
    }

    #[test]
    fn load_missing_file_is_an_error() {
        let err = DeployVars::load(Path::new("/nonexistent/terraform.tfvars.json")).unwrap_err();
        assert!(err.to_string().contains("failed to read vars file"));
    }
}
