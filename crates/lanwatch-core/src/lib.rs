//! lanwatch-core: Shared types and error handling for the lanwatch scan engine.
//!
//! This crate provides the foundational types used across all lanwatch components:
//! - `Device`, the normalized record of one discovered host, and its merge rule
//! - `ScanRequest`, the immutable description of what to scan and how
//! - `Job`, the lifecycle object for asynchronous scans
//! - MAC address normalization
//! - Common error types

pub mod error;
pub mod mac;
pub mod types;

pub use error::CoreError;
pub use types::{
    Device, DeviceStatus, Job, JobId, JobStatus, ScanMethod, ScanRequest, Source, SubnetSelector,
};
