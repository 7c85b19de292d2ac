//! vMX appliance provisioning.
//!
//! Stands up a Cisco Meraki vMX security appliance end to end: resolves the
//! dashboard organization, picks an unassigned vMX license, creates and
//! claims a network, issues a bootstrap token and launches an EC2 instance
//! that carries the token as user data.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use vmx::pipeline::{Pipeline, PipelineConfig, ProvisionRequest};
//! use vmx::providers::aws::{Credentials, Ec2};
//! use vmx::providers::Meraki;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let dashboard = Arc::new(Meraki::from_env()?);
//!     let compute = Arc::new(Ec2::new(Credentials::new("AKID", "secret", None), "eu-west-3")?);
//!     let config = PipelineConfig {
//!         image_id: "ami-0abc".into(),
//!         ..PipelineConfig::default()
//!     };
//!
//!     let pipeline = Pipeline::new(dashboard, compute, config);
//!     let report = pipeline
//!         .provision(&ProvisionRequest::new("Acme", "Branch-12"))
//!         .await?;
//!     println!("instance {}", report.instance_id);
//!     Ok(())
//! }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod pipeline;
pub mod providers;
pub mod state;

pub use config::VmxConfig;
pub use pipeline::{
    CleanupOutcome, DecommissionReport, Pipeline, PipelineConfig, PipelineError, PipelineStage,
    ProvisionOutcome, ProvisionReport, ProvisionRequest,
};
pub use providers::{ComputeProvider, DashboardProvider, ProviderError};
pub use state::{RunState, RunStatus, Stage};
