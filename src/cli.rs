use clap::Parser;
use std::path::PathBuf;

/// Parley - conversational action orchestrator
#[derive(Parser, Debug, Clone)]
#[command(name = "parley", version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "PARLEY_CONFIG", default_value = "parley.toml")]
    pub config: PathBuf,

    /// Server host address
    #[arg(long, env = "PARLEY_HOST")]
    pub host: Option<String>,

    /// Server port
    #[arg(long, env = "PARLEY_PORT")]
    pub port: Option<u16>,
}
