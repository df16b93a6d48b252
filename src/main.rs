/// Subgraph TVL Fetcher
///
/// An ETL pipeline that snapshots per-user token balances from protocol
/// subgraphs for a list of blocks and writes them as normalized CSV rows.
mod adapters;
mod cli;
mod error;
mod etl;
mod graphql;
mod models;
mod oracle;
mod pipeline;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use etl::load::{read_blocks, CsvSink};
use graphql::SubgraphClient;
use oracle::FixedPriceOracle;
use pipeline::Pipeline;
use std::env;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    cli.validate().context("Invalid arguments")?;

    println!("🚀 Starting Subgraph TVL Fetcher ({:?})...", cli.adapter);

    let endpoint = cli.resolve_endpoint(env::var("SUBGRAPH_URL").ok())?;
    let client = SubgraphClient::new(cli.subgraph_config(endpoint)).context("Failed to create subgraph client")?;
    println!("✅ Subgraph endpoint: {}", client.endpoint());

    let mut oracle = FixedPriceOracle::new();
    match cli.resolve_llp_price(env::var("LOGX_LLP_PRICE").ok())? {
        Some(price) => oracle = oracle.with_price(adapters::logx::LLP, price),
        None if cli.adapter == adapters::AdapterKind::Logx => {
            println!("⚠️  No LLP price configured, every logx block will fail. Set --llp-price or LOGX_LLP_PRICE");
        }
        None => {}
    }

    let adapter = cli.adapter.build(Arc::new(client), Arc::new(oracle), cli.page_size);

    println!("\n📚 Reading block list from {}...", cli.input.display());
    let blocks = read_blocks(&cli.input).context("Failed to read block list")?;
    if let (Some(first), Some(last)) = (blocks.first(), blocks.last()) {
        println!("✅ Loaded {} blocks (#{} to #{})", blocks.len(), format_number(first.number), format_number(last.number));
    } else {
        println!("⚠️  Block list is empty, only the CSV header will be written");
    }

    let sink = CsvSink::new(cli.output.clone(), cli.write_mode());

    tracing::info!("Subgraph TVL Fetcher initialized successfully");

    let mut pipeline = Pipeline::new(adapter, sink, cli.pipeline_config());
    let stats = pipeline.run(&blocks).await.context("Pipeline execution failed")?;

    println!(
        "\n✨ Wrote {} rows to {} ({} of {} blocks succeeded)",
        format_number(stats.rows_written as u64),
        pipeline.sink().path().display(),
        stats.blocks_succeeded,
        stats.blocks_attempted
    );

    Ok(())
}

/// Format a number with thousand separators
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();

    for (count, c) in s.chars().rev().enumerate() {
        if count > 0 && count % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }

    result.chars().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(7), "7");
        assert_eq!(format_number(1234), "1,234");
        assert_eq!(format_number(19000000), "19,000,000");
    }
}
