//! CLI module for critloop - command-line interface and subcommands.

pub mod commands;

pub use commands::Cli;
