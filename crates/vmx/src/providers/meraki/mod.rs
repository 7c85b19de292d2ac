//! Meraki Dashboard provider.
//!
//! Implements the [`DashboardProvider`](crate::providers::DashboardProvider)
//! trait for the Dashboard API v1: organization lookup, inventory listing,
//! network creation, device claim/removal and vMX token issuance.
//!
//! Listings are paginated by the API through `Link` headers; the client
//! follows them and returns the complete set.

mod client;
mod models;

pub use client::Meraki;
pub use models::next_link;
