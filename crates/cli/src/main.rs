use clap::{Parser, Subcommand};

mod config_loader;
mod run;
mod scenario;

#[derive(Parser)]
#[command(name = "crossvault")]
#[command(about = "Cross-venue settlement and portfolio-margin engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine against simulated venues with a drifting mark price
    Run {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
    },
    /// Replay the settlement scenarios (credit, waterfall, breaker, netting)
    /// and print the resulting ledger state
    Scenario {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            let config = config_loader::load(&config)?;
            run::run_engine(config).await?;
        }
        Commands::Scenario { config } => {
            let config = config_loader::load(&config)?;
            scenario::run_scenarios(config).await?;
        }
    }

    Ok(())
}
