use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "persona-bench",
    version,
    about = "Persona-conditioned benchmark harness for recommendation agents"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Run(RunArgs),
    Personas(PersonasArgs),
    Status(StatusArgs),
}

pub const LOCAL_TARGET: &str = "local";

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[arg(long, default_value = "data/personas")]
    pub persona_dir: PathBuf,

    #[arg(long, default_value = "data/prompts")]
    pub prompts_dir: PathBuf,

    #[arg(long, default_value = "results")]
    pub results_dir: PathBuf,

    #[arg(long)]
    pub ledger_path: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub no_ledger: bool,

    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, env = "PURPLE_AGENT_URL", default_value = "http://127.0.0.1:9010")]
    pub target: String,

    #[arg(long = "persona")]
    pub personas: Vec<String>,

    #[arg(long)]
    pub task_count: Option<usize>,

    #[arg(long)]
    pub trial_count: Option<usize>,

    #[arg(long, default_value_t = 1)]
    pub jobs: usize,
}

#[derive(Args, Debug, Clone)]
pub struct PersonasArgs {
    #[arg(long, default_value = "data/personas")]
    pub persona_dir: PathBuf,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = "results")]
    pub results_dir: PathBuf,

    #[arg(long)]
    pub ledger_path: Option<PathBuf>,

    #[arg(long)]
    pub run_id: Option<String>,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

pub fn default_ledger_path(results_dir: &std::path::Path) -> PathBuf {
    results_dir.join("ledger.sqlite")
}
