use clap::Parser;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file to use
    #[arg(short = 'f', long = "file", default_value = "cascade.toml")]
    pub file: String,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Override the dev server port
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Show the task execution order without running anything
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// Task to run (sass, build, serve, default); runs `default` if not specified
    pub task: Option<String>,
}
