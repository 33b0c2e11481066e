//! CLI module for the driftstack tool.
//!
//! This module provides the command-line interface for resolving,
//! previewing, and inspecting deployment stacks.

mod commands;
mod output;
mod stackfile;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;
pub use stackfile::{find_stack_file, RootSection, StackFile, StackSection, STACK_FILE_NAME};
