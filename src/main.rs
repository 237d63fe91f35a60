use std::process;

use anyhow::Result;
use clap::Parser;
use tracing_log::AsTrace;

use kdave::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  tracing_subscriber::fmt()
    .with_max_level(cli.verbose.log_level_filter().as_trace())
    .init();

  match &cli.commands {
    Commands::Check(args) => {
      let exit_code = kdave::check(args).await?;
      if exit_code != 0 {
        process::exit(exit_code.into());
      }
    }
    Commands::Serve(args) => kdave::serve(args).await?,
  }

  Ok(())
}
