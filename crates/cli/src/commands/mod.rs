//! Command handlers

pub mod diagnose;
pub mod probe;
pub mod remediate;
pub mod report;
pub mod status;
