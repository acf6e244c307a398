//! stakeindex-node — access to the chain node.
//!
//! [`NodeClient`] is the seam the engine and observer depend on;
//! [`HttpNodeClient`] is the production implementation and the testkit
//! provides an in-process mock.

pub mod client;
pub mod http;
pub mod retry;

pub use client::{HeadStream, NodeClient, RightsScope};
pub use http::{HttpClientConfig, HttpNodeClient};
pub use retry::{RetryConfig, RetryPolicy};
