//! Ports - traits at the I/O seams.

pub mod process;
pub mod storage;
