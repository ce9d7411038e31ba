//! Remedy agent: runs one remediation against the cluster and serves
//! health and metrics while it is in progress

pub mod api;
pub mod config;
pub mod report;
