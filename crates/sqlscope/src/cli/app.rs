use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use super::commands::{
    ask::AskArgs, history::HistoryArgs, init::InitArgs, schema::SchemaArgs,
    validate::ValidateArgs,
};

#[derive(Debug, Parser)]
#[command(
    name = "sqlscope",
    version,
    about = "Answer natural-language questions with read-only, role-scoped SQL"
)]
pub struct Cli {
    #[command(flatten)]
    pub runtime: RuntimeArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Args)]
pub struct RuntimeArgs {
    #[arg(long, global = true, value_name = "PATH")]
    pub home_dir: Option<PathBuf>,

    #[arg(long, global = true, value_name = "PATH")]
    pub cwd: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "Settings file; defaults to ~/.sqlscope/config.toml."
    )]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    #[command(about = "Create the application store tables and each database's grant catalog.")]
    Init(InitArgs),
    #[command(about = "Generate, check and run a query for one natural-language request.")]
    Ask(AskArgs),
    #[command(about = "Run the security gates over a query without executing it.")]
    Validate(ValidateArgs),
    #[command(about = "Show the scope and permitted schema an identity resolves to.")]
    Schema(SchemaArgs),
    #[command(about = "List an identity's recorded requests, newest first.")]
    History(HistoryArgs),
    #[command(about = "Print the JSON Schema of stored object descriptions.")]
    DescriptionSchema,
}

impl Command {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init(_) => "init",
            Self::Ask(_) => "ask",
            Self::Validate(_) => "validate",
            Self::Schema(_) => "schema",
            Self::History(_) => "history",
            Self::DescriptionSchema => "description-schema",
        }
    }
}
