//! hlsforge - HLS transcode-and-publish pipeline
//!
//! Hexagonal Architecture:
//! - domain/: Pure business logic (jobs, media, plan, hls, segments)
//! - ports/: Trait definitions (process runner, storage)
//! - adapters/: Concrete implementations (tokio process, S3, local fs, HTTP fetch)
//! - application/: Pipeline stages and the per-job pipeline
//! - config: Environment configuration

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod ports;

// Re-exports for convenience
pub use application::pipeline::Pipeline;
pub use config::WorkerConfig;
pub use domain::jobs::{Job, JobRequest, JobResult};
pub use error::JobError;
