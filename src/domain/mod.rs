//! Domain layer - Pure business logic.

pub mod hls;
pub mod jobs;
pub mod media;
pub mod obfuscate;
pub mod plan;
pub mod progress;
pub mod segments;
