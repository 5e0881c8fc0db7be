use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "grackle", version, about = "Handler-oriented web framework tooling")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scaffold a new application directory
    New {
        /// Application name, also used as the directory name
        name: String,
        /// Parent directory to create the application in
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
    /// Generate a handler skeleton
    Handler {
        /// Handler type name, e.g. UserHandler
        name: String,
        #[arg(long, value_enum, default_value_t = HandlerKindArg::Http)]
        kind: HandlerKindArg,
        /// Write to this file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Parse and validate a configuration file
    CheckConfig {
        path: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerKindArg {
    Http,
    WsServe,
    WsJson,
    WsText,
    Error,
}
