use clap::Parser;
use viewsdk::cli::{commands, Cli, Commands};
use viewsdk::native::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Commands::Cache(args) => {
            let config = commands::load_config(cli.config.as_deref())?;
            commands::execute_cache(args, &config)?
        }
        Commands::Track(args) => {
            let config = commands::load_config(cli.config.as_deref())?;
            commands::execute_track(args, &config).await?
        }
        Commands::Collector(args) => commands::execute_collector(args).await?,
    }

    Ok(())
}
