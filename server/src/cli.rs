use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "core-server")]
#[command(version = "0.1.0")]
#[command(author = "rust-us")]
#[command(about = "Binary protocol core for a database server front-end")]
pub struct CliArgs {
    /// Path to a TOML `ServerConfig` file; falls back to built-in defaults.
    #[arg(short, long, help = "Path to loaded configuration file", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Overrides `config.bind.{host,port}`, e.g. `127.0.0.1:5656`.
    #[arg(long, help = "Bind address, overrides the config file", value_name = "HOST:PORT")]
    pub bind: Option<String>,

    #[arg(short, long, help = "enable debug logging", default_value_t = false)]
    pub debug: bool,
}
