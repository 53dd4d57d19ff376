//! Flow Aggregator CLI
//!
//! A command-line tool for querying aggregated flows, following the live
//! flow stream and checking on the aggregator.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{flows, hints, status, FilterArgs};

/// Flow Aggregator CLI
#[derive(Parser)]
#[command(name = "flowctl")]
#[command(author, version, about = "CLI for the Flow Aggregator", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via FLOWCTL_API_URL env var)
    #[arg(long, env = "FLOWCTL_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Query aggregated flows
    #[command(subcommand)]
    Flows(FlowsCommands),

    /// List observed values for a filter field
    Hints {
        /// Field to list values for
        #[arg(value_enum)]
        field: hints::HintField,

        #[command(flatten)]
        filter: FilterArgs,

        /// How far back to look (e.g. 15m, 1h)
        #[arg(long, default_value = "1h")]
        since: String,

        /// Maximum values to show (0 for all)
        #[arg(long, default_value_t = 0)]
        limit: i64,
    },

    /// Show aggregator health and readiness
    Status,
}

#[derive(Subcommand)]
pub enum FlowsCommands {
    /// List flows rolled up into windows
    List {
        #[command(flatten)]
        filter: FilterArgs,

        /// How far back to look (e.g. 15m, 1h)
        #[arg(long, default_value = "15m")]
        since: String,

        /// Window width in seconds, a multiple of 15
        #[arg(long, default_value_t = 15)]
        interval: i64,

        /// Sort keys in priority order (time, dest_name, dest_namespace, dest_type,
        /// source_name, source_namespace, source_type)
        #[arg(long, value_delimiter = ',')]
        sort: Vec<String>,

        /// Page number, starting at 1
        #[arg(long, default_value_t = 1)]
        page: i64,

        #[arg(long, default_value_t = 100)]
        page_size: i64,
    },

    /// Follow flows as 15 second windows complete
    Watch {
        #[command(flatten)]
        filter: FilterArgs,

        /// Start this far back instead of at the newest completed window
        #[arg(long)]
        since: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::Config::load()?;
    let api_url = cli
        .api_url
        .clone()
        .unwrap_or_else(|| config.api_url().to_string());
    let format = cli.format.or(config.default_format).unwrap_or_default();

    let client = client::ApiClient::new(&api_url)?;

    match cli.command {
        Commands::Flows(flows_cmd) => match flows_cmd {
            FlowsCommands::List {
                filter,
                since,
                interval,
                sort,
                page,
                page_size,
            } => {
                let options = flows::ListOptions {
                    filter,
                    since,
                    interval,
                    sort,
                    page,
                    page_size,
                };
                flows::list_flows(&client, options, format).await?;
            }
            FlowsCommands::Watch { filter, since } => {
                flows::watch_flows(&client, filter, since, format).await?;
            }
        },
        Commands::Hints {
            field,
            filter,
            since,
            limit,
        } => {
            hints::show_hints(&client, field, filter, &since, limit, format).await?;
        }
        Commands::Status => {
            status::show_status(&client, format).await?;
        }
    }

    Ok(())
}
