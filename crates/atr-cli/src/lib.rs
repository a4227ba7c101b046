//! CLI for the attendance register.

pub mod cli;
pub mod commands;
pub mod config;

pub use cli::{Cli, Commands, IngestEvent, OfflineAction, RegisterAction, RegisterOptions};
pub use config::Config;
