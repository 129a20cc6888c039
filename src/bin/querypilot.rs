//! Offline CLI for the SQL safety gate.
//!
//! Run with: cargo run --bin querypilot -- validate "SELECT 1"

use anyhow::Result;
use clap::{Parser, Subcommand};
use querypilot::extraction::SqlExtractor;
use querypilot::sql_guard;
use std::io::Read;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "querypilot",
    about = "Validate, extract and inspect SQL with the assistant's safety gate"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the safety validator over a SQL string and print the verdict
    Validate {
        /// SQL text; omit to read from --file or stdin
        sql: Option<String>,

        /// Read the SQL from a file instead
        #[arg(long)]
        file: Option<PathBuf>,

        /// Comma-separated dataset scope, e.g. "proj.analytics"
        #[arg(long)]
        dataset: Option<String>,
    },

    /// Run the pattern extraction strategies over free-form text
    Extract {
        /// Text; omit to read from --file or stdin
        text: Option<String>,

        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Print the tables, columns and joins referenced by a SQL string
    Tables {
        /// SQL text; omit to read from --file or stdin
        sql: Option<String>,

        #[arg(long)]
        file: Option<PathBuf>,
    },
}

fn read_input(inline: Option<String>, file: Option<PathBuf>) -> Result<String> {
    if let Some(text) = inline {
        return Ok(text);
    }
    if let Some(path) = file {
        return Ok(std::fs::read_to_string(path)?);
    }
    let mut buffer = String::new();
    std::io::stdin().read_to_string(&mut buffer)?;
    Ok(buffer)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Validate { sql, file, dataset } => {
            let sql = read_input(sql, file)?;
            let scope: Option<Vec<String>> = dataset.map(|d| {
                d.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            });
            let verdict = sql_guard::validate(&sql, scope.as_deref());
            println!("{}", serde_json::to_string_pretty(&verdict)?);
            if !verdict.is_valid {
                std::process::exit(1);
            }
        }
        Command::Extract { text, file } => {
            let text = read_input(text, file)?;
            let extractor = SqlExtractor::new();
            let (extracted, _) = extractor.extract_sql(&text, false).await;
            match extracted {
                Some(sql) => println!("{}", serde_json::to_string_pretty(&sql)?),
                None => {
                    println!("No SQL found");
                    std::process::exit(1);
                }
            }
        }
        Command::Tables { sql, file } => {
            let sql = read_input(sql, file)?;
            let references = sql_guard::extract(&sql);
            println!("{}", serde_json::to_string_pretty(&references)?);
        }
    }

    Ok(())
}
