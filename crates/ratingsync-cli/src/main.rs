use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod sync;

#[derive(Debug, Parser)]
#[command(name = "ratingsync-cli")]
#[command(about = "Analyst rating feed synchronizer")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch the rating feed and write new or changed events
    Sync {
        /// Print the run result as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Database management
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
    /// List recent sync runs
    Runs {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommands {
    /// Check database connectivity
    Ping,
    /// Apply pending migrations
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        println!("ratingsync-cli: run with --help to list commands");
        return Ok(());
    };

    let config = ratingsync_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let pool_config = ratingsync_db::PoolConfig::from_app_config(&config);
    let pool = ratingsync_db::connect_pool(&config.database_url, pool_config).await?;

    match command {
        Commands::Sync { json } => sync::run_sync(&pool, &config, json).await?,
        Commands::Db {
            command: DbCommands::Ping,
        } => {
            ratingsync_db::ping(&pool).await?;
            let events = ratingsync_db::count_rating_events(&pool).await?;
            println!("database ok ({events} rating events stored)");
        }
        Commands::Db {
            command: DbCommands::Migrate,
        } => {
            let applied = ratingsync_db::run_migrations(&pool).await?;
            println!("applied {applied} migration(s)");
        }
        Commands::Runs { limit } => sync::list_runs(&pool, limit).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests;
