//! CLI subcommand implementations.

pub mod addons;
pub mod deploy;
pub mod preflight;
pub mod verify;
