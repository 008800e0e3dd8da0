//! CLI module for floodnel - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for single-file runs,
//! glob batches, and status reports on existing outputs.

pub mod commands;

pub use commands::Cli;
