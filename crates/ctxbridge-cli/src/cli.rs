use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ctxbridge")]
#[command(
    about = "Run scripts through the context bridge",
    long_about = "Run scripts through the context bridge.\n\n\
                  Snippets given with --eval run first, then files in order. \
                  All inputs share one context unless --isolated is set."
)]
pub struct Cli {
    #[arg(help = "Script files to run", required_unless_present = "eval")]
    pub files: Vec<PathBuf>,

    #[arg(short, long, value_name = "SOURCE", help = "Script source to run before any file")]
    pub eval: Vec<String>,

    #[arg(long, help = "Run every input in a fresh context and isolate")]
    pub isolated: bool,

    #[arg(short, long, help = "Do not print script results")]
    pub quiet: bool,

    #[arg(short, long, value_name = "FILE", help = "TOML configuration file")]
    pub config: Option<PathBuf>,
}
