//! Shared environment surface resolved once per subcommand.
//!
//! Every flag has an environment fallback so running a bare subcommand
//! behaves like the original parameterless scripts.

use std::env;
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Args;

/// Flags shared by every subcommand, each with an env fallback.
#[derive(Debug, Clone, Args)]
pub struct EnvOpts {
    /// AWS region to operate in
    #[arg(long, env = "AWS_REGION")]
    pub region: Option<String>,

    /// Project name used as the resource prefix (defaults to the vars file value)
    #[arg(long, env = "PROJECT_NAME")]
    pub project: Option<String>,

    /// Remote state bucket; must be set together with the lock table
    #[arg(long, env = "TF_STATE_BUCKET")]
    pub state_bucket: Option<String>,

    /// Remote state lock table; must be set together with the bucket
    #[arg(long, env = "TF_STATE_LOCK_TABLE")]
    pub state_lock_table: Option<String>,

    /// Terraform working directory
    #[arg(long, env = "EKSOPS_TF_DIR", default_value = ".")]
    pub tf_dir: PathBuf,

    /// Terraform variables file, resolved relative to the working directory
    #[arg(long, env = "EKSOPS_VARS_FILE", default_value = "terraform.tfvars.json")]
    pub vars_file: PathBuf,
}

/// Remote-state backend coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateBackend {
    pub bucket: String,
    pub lock_table: String,
}

/// Resolved settings handed to the workflow modules.
#[derive(Debug, Clone)]
pub struct Settings {
    pub region: String,
    pub project: Option<String>,
    pub backend: Option<StateBackend>,
    pub tf_dir: PathBuf,
    pub vars_file: PathBuf,
}

impl EnvOpts {
    /// Resolve flags and environment into `Settings`.
    ///
    /// # Errors
    ///
    /// Fails when no region can be determined or when only one half of the
    /// remote-state backend pair is configured.
    pub fn resolve(&self) -> Result<Settings> {
        let region = match &self.region {
            Some(region) if !region.is_empty() => region.clone(),
            _ => match env::var("AWS_DEFAULT_REGION") {
                Ok(region) if !region.is_empty() => region,
                _ => bail!("no AWS region configured; pass --region or export AWS_REGION"),
            },
        };

        let backend = match (&self.state_bucket, &self.state_lock_table) {
            (Some(bucket), Some(lock_table)) => Some(StateBackend {
                bucket: bucket.clone(),
                lock_table: lock_table.clone(),
            }),
            (None, None) => None,
            _ => bail!(
                "remote state backend is half-configured; \
                 set both TF_STATE_BUCKET and TF_STATE_LOCK_TABLE or neither"
            ),
        };

        let vars_file = if self.vars_file.is_absolute() {
            self.vars_file.clone()
        } else {
            self.tf_dir.join(&self.vars_file)
        };

        Ok(Settings {
            region,
            project: self.project.clone().filter(|p| !p.is_empty()),
            backend,
            tf_dir: self.tf_dir.clone(),
            vars_file,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn opts() -> EnvOpts {
        EnvOpts {
            region: Some("eu-west-1".to_string()),
            project: None,
            state_bucket: None,
            state_lock_table: None,
            tf_dir: PathBuf::from("infra"),
            vars_file: PathBuf::from("terraform.tfvars.json"),
        }
    }

    #[test]
    #[serial]
    fn resolves_region_from_flag() {
        env::remove_var("AWS_DEFAULT_REGION");
        let settings = opts().resolve().unwrap();
        assert_eq!(settings.region, "eu-west-1");
        assert_eq!(settings.vars_file, PathBuf::from("infra/terraform.tfvars.json"));
    }

    #[test]
    #[serial]
    fn falls_back_to_default_region_env() {
        env::set_var("AWS_DEFAULT_REGION", "ap-southeast-2");
        let mut opts = opts();
        opts.region = None;
        let settings = opts.resolve().unwrap();
        assert_eq!(settings.region, "ap-southeast-2");
        env::remove_var("AWS_DEFAULT_REGION");
    }

    #[test]
    #[serial]
    fn missing_region_is_a_hard_error() {
        env::remove_var("AWS_DEFAULT_REGION");
        let mut opts = opts();
        opts.region = None;
        let err = opts.resolve().unwrap_err();
        assert!(err.to_string().contains("no AWS region configured"));
    }

    #[test]
    #[serial]
    fn half_configured_backend_is_rejected() {
        env::remove_var("AWS_DEFAULT_REGION");
        let mut opts = opts();
        opts.state_bucket = Some("tf-state".to_string());
        let err = opts.resolve().unwrap_err();
        assert!(err.to_string().contains("half-configured"));

        opts.state_lock_table = Some("tf-locks".to_string());
        let settings = opts.resolve().unwrap();
        assert_eq!(
            settings.backend,
            Some(StateBackend {
                bucket: "tf-state".to_string(),
                lock_table: "tf-locks".to_string(),
            })
        );
    }

    #[test]
    #[serial]
    fn absolute_vars_file_is_kept() {
        let mut opts = opts();
        opts.vars_file = PathBuf::from("/etc/eks/vars.json");
        let settings = opts.resolve().unwrap();
        assert_eq!(settings.vars_file, PathBuf::from("/etc/eks/vars.json"));
    }
}
