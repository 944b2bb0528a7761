//! EKS deployment operations library.
//!
//! Programmatic access to the preflight validator, deploy pipeline, cluster
//! verifier, and add-on installer, for driving the workflows from other
//! crates or test harnesses.
//!
//! # Example
//!
//! ```ignore
//! use eksops::{Pipeline, PipelineOptions, Settings};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings {
//!         region: "us-west-2".into(),
//!         project: None,
//!         backend: None,
//!         tf_dir: "infra".into(),
//!         vars_file: "infra/terraform.tfvars.json".into(),
//!     };
//!     let options = PipelineOptions {
//!         auto_approve: true,
//!         ..PipelineOptions::default()
//!     };
//!     Pipeline::new(settings, options).run().await
//! }
//! ```

// Allow product names without backticks in doc comments
#![allow(clippy::doc_markdown)]

pub mod addons;
pub mod aws;
pub mod cidr;
pub mod k8s;
pub mod notify;
pub mod pipeline;
pub mod preflight;
pub mod settings;
pub mod terraform;
pub mod ui;
pub mod vars;
pub mod verifier;

// Re-export commonly used types at the crate root
pub use addons::{AddonInstaller, AddonOptions, AddonReport};
pub use pipeline::{Pipeline, PipelineOptions, PipelineStage};
pub use preflight::{Preflight, PreflightReport};
pub use settings::{EnvOpts, Settings, StateBackend};
pub use terraform::{ClusterOutputs, PlanOutcome, Terraform};
pub use vars::DeployVars;
pub use verifier::{ClusterVerifier, VerifyOptions, VerifyReport};
