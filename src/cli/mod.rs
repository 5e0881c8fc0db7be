//! Command line interface: project scaffolding and config checking.

mod cli;
mod commands;

pub use cli::{Cli, Commands, HandlerKindArg};
pub use commands::run;
