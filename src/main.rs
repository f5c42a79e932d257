mod cli;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志系统
    netmon::logger::init_logger();

    let cli = Cli::parse();
    match cli.command {
        Commands::Probe(args) => cli::probe(args).await?,
        Commands::Inspect(args) => cli::inspect(args)?,
    }
    Ok(())
}
