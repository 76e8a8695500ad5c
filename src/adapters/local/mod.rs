//! Local adapters for development deployments.

pub mod fs;
