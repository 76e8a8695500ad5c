//! Application layer - Services that drive the ports.

pub mod capability;
pub mod encoder;
pub mod health;
pub mod pipeline;
pub mod probe;
pub mod publisher;
pub mod workspace;
