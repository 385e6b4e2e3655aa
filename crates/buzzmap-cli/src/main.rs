mod query;
mod run;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "buzzmap-cli")]
#[command(about = "buzzmap command line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Database maintenance
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
    /// Run the pipeline once: collect, score, extract, geocode, commit
    Run {
        /// Keep results in memory and print them instead of writing to the database
        #[arg(long)]
        dry_run: bool,
    },
    /// Search the stored dataset around a point
    Search {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Search radius in kilometres (defaults to BUZZMAP_QUERY_DEFAULT_RADIUS_KM)
        #[arg(long)]
        radius: Option<f64>,

        /// Print the results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show recent pipeline runs
    Runs {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommands {
    /// Apply pending migrations
    Migrate,
    /// Check that the database is reachable
    Ping,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        println!("buzzmap-cli: no command given, see --help");
        return Ok(());
    };

    let config = buzzmap_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match command {
        Commands::Db { command } => {
            let pool = connect(&config).await?;
            match command {
                DbCommands::Migrate => {
                    let applied = buzzmap_db::run_migrations(&pool).await?;
                    println!("applied {applied} migration(s)");
                }
                DbCommands::Ping => {
                    buzzmap_db::ping(&pool).await?;
                    println!("database ok");
                }
            }
        }
        Commands::Run { dry_run } => run::run_once(&config, dry_run).await?,
        Commands::Search {
            lat,
            lon,
            radius,
            json,
        } => {
            let pool = connect(&config).await?;
            query::search(&pool, &config, lat, lon, radius, json).await?;
        }
        Commands::Runs { limit } => {
            let pool = connect(&config).await?;
            query::list_runs(&pool, limit).await?;
        }
    }

    Ok(())
}

async fn connect(config: &buzzmap_core::AppConfig) -> anyhow::Result<sqlx::PgPool> {
    let pool_config = buzzmap_db::PoolConfig::from_app_config(config);
    Ok(buzzmap_db::connect_pool(&config.database_url, pool_config).await?)
}
