mod certificate;
mod client;
mod crawler;
mod parser;
mod sink;
mod state;

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};

use crate::client::HttpRegistry;
use crate::crawler::{CrawlOutcome, Crawler};
use crate::sink::CsvSink;
use crate::state::StateFile;

#[derive(Parser)]
#[command(name = "rera_scraper", about = "MahaRERA registered-project scraper")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl all districts, resuming from the saved checkpoint
    Crawl {
        /// Checkpoint file path
        #[arg(long, default_value = "scraping_state.json")]
        state: PathBuf,
        /// Output CSV path
        #[arg(short, long, default_value = "maharera_projects.csv")]
        output: PathBuf,
    },
    /// List the districts the registry reports for Maharashtra
    Districts,
    /// Show crawl progress from the checkpoint and output files
    Stats {
        #[arg(long, default_value = "scraping_state.json")]
        state: PathBuf,
        #[arg(short, long, default_value = "maharera_projects.csv")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Crawl { state, output } => {
            let registry = HttpRegistry::connect().await?;
            let mut crawler =
                Crawler::new(registry, StateFile::new(state), CsvSink::new(&output));
            match crawler.run().await? {
                CrawlOutcome::Completed => {
                    println!("Crawl complete. Records written to {}", output.display());
                }
                CrawlOutcome::RetriesExhausted => {
                    println!(
                        "Crawl stopped after exhausting retries. Re-run to resume from the checkpoint."
                    );
                }
            }
            Ok(())
        }
        Commands::Districts => {
            use crate::client::RegistrySource;
            let registry = HttpRegistry::connect().await?;
            let mut districts = registry.districts().await?;
            districts.sort_by_key(|d| d.name.to_uppercase());
            println!("{:>4} | District", "ID");
            println!("{}", "-".repeat(30));
            for d in &districts {
                println!("{:>4} | {}", d.id, d.name);
            }
            println!("\n{} districts", districts.len());
            Ok(())
        }
        Commands::Stats { state, output } => {
            let checkpoint = StateFile::new(state).load();
            if checkpoint.is_sentinel() {
                println!("No checkpoint: crawl starts from the first district.");
            } else if checkpoint.current_page < 0 {
                println!(
                    "District:  {} (complete)",
                    checkpoint.current_district
                );
            } else {
                println!("District:  {}", checkpoint.current_district);
                println!(
                    "Page:      {} of {}",
                    checkpoint.current_page + 1,
                    checkpoint.total_pages
                );
            }

            match std::fs::read_to_string(&output) {
                Ok(contents) => println!("Records:   {}", csv_record_count(&contents)),
                Err(_) => println!("Records:   0 (no output file yet)"),
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

/// Data-row count of a CSV file, excluding the header. Newlines inside
/// quoted cells do not end a record, so rows are counted with a
/// quote-aware scan rather than by line.
fn csv_record_count(contents: &str) -> usize {
    let mut rows: usize = 0;
    let mut in_quotes = false;
    let mut row_has_content = false;
    for c in contents.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                row_has_content = true;
            }
            '\n' if !in_quotes => {
                if row_has_content {
                    rows += 1;
                }
                row_has_content = false;
            }
            '\r' if !in_quotes => {}
            _ => row_has_content = true,
        }
    }
    if row_has_content {
        rows += 1;
    }
    rows.saturating_sub(1)
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_count_ignores_newlines_inside_quoted_cells() {
        let contents = "name,notes\nGreen Acres,\"line one\nline two\"\nBlue Heights,plain\n";
        assert_eq!(csv_record_count(contents), 2);
    }

    #[test]
    fn record_count_of_header_only_or_empty_file_is_zero() {
        assert_eq!(csv_record_count("name,notes\n"), 0);
        assert_eq!(csv_record_count("name,notes"), 0);
        assert_eq!(csv_record_count(""), 0);
    }
}
