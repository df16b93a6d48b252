/// CLI Module
///
/// Command-line interface configuration using clap.
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;

use crate::adapters::AdapterKind;
use crate::etl::extract::DEFAULT_PAGE_SIZE;
use crate::etl::load::WriteMode;
use crate::graphql::{RateLimitPolicy, SubgraphConfig};
use crate::pipeline::PipelineConfig;

/// Subgraph TVL Fetcher
///
/// Snapshot per-user token balances from a protocol subgraph for every block
/// in a block list, and write them as normalized CSV rows
#[derive(Parser, Debug)]
#[command(name = "subgraph-tvl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Protocol adapter to run
    #[arg(value_enum)]
    pub adapter: AdapterKind,

    /// Block list CSV with `number` and `timestamp` columns
    #[arg(short = 'i', long, value_name = "FILE", default_value = "hourly_blocks.csv")]
    pub input: PathBuf,

    /// Output CSV file
    #[arg(short = 'o', long, value_name = "FILE", default_value = "outputData.csv")]
    pub output: PathBuf,

    /// Subgraph endpoint URL (overrides SUBGRAPH_URL env var and the adapter default)
    #[arg(short = 'e', long, value_name = "URL")]
    pub endpoint: Option<String>,

    /// Flush rows to the output file after this many blocks
    #[arg(short = 'b', long, value_name = "SIZE", default_value = "10")]
    pub batch_size: usize,

    /// Records requested per subgraph page
    #[arg(long, value_name = "SIZE", default_value_t = DEFAULT_PAGE_SIZE)]
    pub page_size: usize,

    /// Truncate the output file instead of appending to it
    #[arg(long)]
    pub overwrite: bool,

    /// Retries on HTTP 429 (defaults to the adapter's own policy)
    #[arg(long, value_name = "COUNT")]
    pub rate_limit_retries: Option<u32>,

    /// LLP price in USD for the logx adapter (overrides LOGX_LLP_PRICE env var)
    #[arg(long, value_name = "USD")]
    pub llp_price: Option<f64>,
}

impl Cli {
    /// Validate CLI arguments
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 {
            anyhow::bail!("Batch size must be greater than 0");
        }

        if self.page_size == 0 {
            anyhow::bail!("Page size must be greater than 0");
        }

        if let Some(price) = self.llp_price {
            check_price(price)?;
        }

        Ok(())
    }

    /// CLI flag, then environment, then the adapter's built-in endpoint
    pub fn resolve_endpoint(&self, env_endpoint: Option<String>) -> anyhow::Result<String> {
        self.endpoint
            .clone()
            .or(env_endpoint)
            .or_else(|| self.adapter.default_endpoint().map(str::to_string))
            .with_context(|| {
                format!("No endpoint known for {:?}. Pass --endpoint or set SUBGRAPH_URL", self.adapter)
            })
    }

    /// CLI flag, then LOGX_LLP_PRICE
    pub fn resolve_llp_price(&self, env_price: Option<String>) -> anyhow::Result<Option<f64>> {
        if self.llp_price.is_some() {
            return Ok(self.llp_price);
        }

        let Some(raw) = env_price else {
            return Ok(None);
        };
        let price = raw.trim().parse::<f64>().context(format!("LOGX_LLP_PRICE is not a number: {}", raw))?;
        check_price(price).context("Invalid LOGX_LLP_PRICE")?;
        Ok(Some(price))
    }

    pub fn subgraph_config(&self, endpoint: String) -> SubgraphConfig {
        let retries = self.rate_limit_retries.unwrap_or_else(|| self.adapter.default_rate_limit_retries());
        SubgraphConfig { endpoint, rate_limit: RateLimitPolicy::with_retries(retries) }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig { batch_size: self.batch_size }
    }

    pub fn write_mode(&self) -> WriteMode {
        if self.overwrite {
            WriteMode::Overwrite
        } else {
            WriteMode::Append
        }
    }
}

fn check_price(price: f64) -> anyhow::Result<()> {
    if !price.is_finite() || price < 0.0 {
        anyhow::bail!("LLP price must be a non-negative number, got {}", price);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(adapter: AdapterKind) -> Cli {
        Cli {
            adapter,
            input: PathBuf::from("hourly_blocks.csv"),
            output: PathBuf::from("outputData.csv"),
            endpoint: None,
            batch_size: 10,
            page_size: 1000,
            overwrite: false,
            rate_limit_retries: None,
            llp_price: None,
        }
    }

    #[test]
    fn test_parse_defaults() {
        let cli = Cli::try_parse_from(["subgraph-tvl", "logx"]).unwrap();

        assert_eq!(cli.adapter, AdapterKind::Logx);
        assert_eq!(cli.input, PathBuf::from("hourly_blocks.csv"));
        assert_eq!(cli.output, PathBuf::from("outputData.csv"));
        assert_eq!(cli.batch_size, 10);
        assert_eq!(cli.page_size, 1000);
        assert_eq!(cli.write_mode(), WriteMode::Append);
    }

    #[test]
    fn test_validation() {
        let mut bad_batch = cli(AdapterKind::Kelp);
        bad_batch.batch_size = 0;
        assert!(bad_batch.validate().is_err());

        let mut bad_price = cli(AdapterKind::Logx);
        bad_price.llp_price = Some(f64::NAN);
        assert!(bad_price.validate().is_err());

        assert!(cli(AdapterKind::Qidao).validate().is_ok());
    }

    #[test]
    fn test_endpoint_precedence() {
        let mut flagged = cli(AdapterKind::Kelp);
        flagged.endpoint = Some("http://flag".to_string());
        assert_eq!(flagged.resolve_endpoint(Some("http://env".to_string())).unwrap(), "http://flag");

        let kelp = cli(AdapterKind::Kelp);
        assert_eq!(kelp.resolve_endpoint(Some("http://env".to_string())).unwrap(), "http://env");
        assert_eq!(kelp.resolve_endpoint(None).unwrap(), crate::adapters::kelp::ENDPOINT);

        assert!(cli(AdapterKind::Connext).resolve_endpoint(None).is_err());
    }

    #[test]
    fn test_rate_limit_defaults_per_adapter() {
        assert_eq!(cli(AdapterKind::Logx).subgraph_config("x".into()).rate_limit.max_retries, 5);
        assert_eq!(cli(AdapterKind::Qidao).subgraph_config("x".into()).rate_limit.max_retries, 0);

        let mut overridden = cli(AdapterKind::Qidao);
        overridden.rate_limit_retries = Some(2);
        assert_eq!(overridden.subgraph_config("x".into()).rate_limit.max_retries, 2);
    }

    #[test]
    fn test_llp_price_from_env() {
        let logx = cli(AdapterKind::Logx);
        assert_eq!(logx.resolve_llp_price(Some("1.25".to_string())).unwrap(), Some(1.25));
        assert_eq!(logx.resolve_llp_price(None).unwrap(), None);
        assert!(logx.resolve_llp_price(Some("abc".to_string())).is_err());
        assert!(logx.resolve_llp_price(Some("-1".to_string())).is_err());
        assert!(logx.resolve_llp_price(Some("inf".to_string())).is_err());
    }
}
