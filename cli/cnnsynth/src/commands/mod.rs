//! CLI command implementations.

pub mod device;
pub mod generate;
pub mod init;
