//! AWS EC2 compute provider.
//!
//! Implements the [`ComputeProvider`](crate::providers::ComputeProvider) trait
//! against the EC2 Query API (version `2016-11-15`).
//!
//! ## vMX sizing
//!
//! - **c5.large**: 2 vCPU, 4GB RAM - suits vMX-S and vMX-M
//! - **c5.xlarge**: 4 vCPU, 8GB RAM - suits vMX-L
//!
//! The instance type is configuration, not derived from the device model.

mod client;
mod models;
pub mod sigv4;

pub use client::Ec2;
pub use models::API_VERSION;
pub use sigv4::Credentials;
