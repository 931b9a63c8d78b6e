pub mod commands;
pub mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use crate::scrape::task::{Task, TaskType};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a scraping task
    Run {
        /// Task identifier assigned by the submitting side
        #[arg(long)]
        id: String,

        /// Task type: search_products, asin_page or keyword_appear
        #[arg(short = 't', long = "type")]
        task_type: TaskType,

        /// Search keyword (search_products, keyword_appear)
        #[arg(short, long, default_value = "")]
        keyword: String,

        /// Product ASIN (asin_page, keyword_appear)
        #[arg(short, long, default_value = "")]
        asin: String,

        /// Search category filter, the storefront `i=` parameter
        #[arg(short, long, default_value = "")]
        category: String,

        /// Last page to fetch, inclusive
        #[arg(long = "max", default_value_t = 1)]
        max_page: i32,

        /// First page to fetch
        #[arg(long = "min", default_value_t = 1)]
        min_page: i32,

        /// Marketplace country code (US, DE, UK, CA, JP, FR, IT, ES, AU, MX, AE)
        #[arg(long, default_value = "US")]
        code: String,

        /// Delivery postal code override
        #[arg(long, default_value = "")]
        zipcode: String,
    },

    /// Probe the proxy pool and print per-proxy delays
    Probe,

    /// Refresh the proxy engine configuration from the stored subscription
    RefreshConfig,

    /// Show the current configuration
    Config,
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Process the command
pub async fn process_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run {
            id,
            task_type,
            keyword,
            asin,
            category,
            max_page,
            min_page,
            code,
            zipcode,
        } => {
            info!("Running {} task {}", task_type, id);
            let task = Task {
                task_id: id,
                task_type,
                keyword,
                asin,
                category,
                max_page,
                min_page,
                country: code,
                zip_code: zipcode,
                ..Default::default()
            };
            commands::run(task).await
        }
        Commands::Probe => {
            info!("Probing the proxy pool");
            commands::probe().await
        }
        Commands::RefreshConfig => {
            info!("Refreshing the proxy engine configuration");
            commands::refresh_config().await
        }
        Commands::Config => {
            info!("Showing current configuration");
            commands::show_config().await
        }
    }
}
