//! Order Broker CLI - Database migrations and a sample order producer.
//!
//! # Usage
//!
//! ```bash
//! # Run broker database migrations
//! ob-cli migrate
//!
//! # Publish four generated orders
//! ob-cli produce --count 4
//!
//! # Publish three generated orders and one without an order_uid
//! ob-cli produce --count 3 --with-invalid
//!
//! # Publish the orders in a JSON array file
//! ob-cli produce --file orders.json
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `produce` - Publish sample orders to Kafka

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

use commands::produce::Source;

#[derive(Parser)]
#[command(name = "ob-cli")]
#[command(author, version, about = "Order broker CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Publish sample orders to the order topic
    Produce {
        /// Number of generated orders
        #[arg(short, long, default_value_t = 4, conflicts_with = "file")]
        count: usize,

        /// Also send one order without an `order_uid`
        #[arg(long, conflicts_with = "file")]
        with_invalid: bool,

        /// Send the payloads in this JSON array file instead
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Produce {
            count,
            with_invalid,
            file,
        } => {
            let source = match &file {
                Some(path) => Source::File(path),
                None => Source::Generated {
                    count,
                    with_invalid,
                },
            };
            commands::produce::run(source).await?;
        }
    }
    Ok(())
}
