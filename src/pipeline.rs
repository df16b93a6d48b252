/// Pipeline Module
///
/// Orchestrates a run: for every block in the list (strictly one at a time),
/// ask the adapter for its rows, buffer them, and flush to the sink in batches.
/// A failed block is recorded and skipped; it never aborts the run.
use crate::adapters::Adapter;
use crate::etl::load::RowSink;
use crate::models::{BlockRef, OutputRow};
use anyhow::Result;
use std::time::{Duration, Instant};

/// What happened to one block
#[derive(Debug, Clone, PartialEq)]
pub enum BlockStatus {
    Succeeded { rows: usize },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockOutcome {
    pub block: BlockRef,
    pub status: BlockStatus,
}

/// Pipeline execution statistics
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub blocks_attempted: usize,
    pub blocks_succeeded: usize,
    pub blocks_failed: usize,
    pub rows_written: usize,
    pub flushes: usize,
    pub elapsed_time: Duration,
    pub outcomes: Vec<BlockOutcome>,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn success_rate(&self) -> f64 {
        if self.blocks_attempted == 0 {
            0.0
        } else {
            (self.blocks_succeeded as f64 / self.blocks_attempted as f64) * 100.0
        }
    }

    pub fn blocks_per_second(&self) -> f64 {
        let secs = self.elapsed_time.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.blocks_attempted as f64 / secs
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &BlockOutcome> {
        self.outcomes.iter().filter(|o| matches!(o.status, BlockStatus::Failed { .. }))
    }

    fn record(&mut self, block: BlockRef, status: BlockStatus) {
        self.blocks_attempted += 1;
        match status {
            BlockStatus::Succeeded { .. } => self.blocks_succeeded += 1,
            BlockStatus::Failed { .. } => self.blocks_failed += 1,
        }
        self.outcomes.push(BlockOutcome { block, status });
    }
}

/// Configuration for pipeline execution
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Flush buffered rows after this many processed blocks
    pub batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { batch_size: 10 }
    }
}

/// Block batch runner
pub struct Pipeline<S> {
    adapter: Box<dyn Adapter>,
    sink: S,
    config: PipelineConfig,
}

impl<S: RowSink> Pipeline<S> {
    /// Create a new pipeline instance
    pub fn new(adapter: Box<dyn Adapter>, sink: S, config: PipelineConfig) -> Self {
        Self { adapter, sink, config }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Run every block. Only a sink failure makes this return an error.
    pub async fn run(&mut self, blocks: &[BlockRef]) -> Result<PipelineStats> {
        let start_time = Instant::now();
        let mut stats = PipelineStats::new();
        let mut buffer: Vec<OutputRow> = Vec::new();
        let batch_size = self.config.batch_size.max(1);

        tracing::info!("Starting {} pipeline for {} blocks", self.adapter.name(), blocks.len());

        println!("\n🚀 Starting {} pipeline...", self.adapter.name());
        println!("   📍 Blocks: {}", blocks.len());
        println!("   📦 Batch size: {}", batch_size);

        for (index, block) in blocks.iter().enumerate() {
            match self.adapter.rows_for_block(block).await {
                Ok(rows) => {
                    tracing::info!("Block {}: {} rows", block, rows.len());
                    stats.record(*block, BlockStatus::Succeeded { rows: rows.len() });
                    buffer.extend(rows);
                }
                Err(e) => {
                    tracing::error!("An error occurred for block {}: {}", block.number, e);
                    stats.record(*block, BlockStatus::Failed { error: e.to_string() });
                }
            }

            let processed = index + 1;
            if processed % batch_size == 0 || processed == blocks.len() {
                self.flush(&mut buffer, &mut stats)?;
                println!(
                    "   📊 Progress: {}/{} blocks | ✅ {} succeeded | ❌ {} failed",
                    processed,
                    blocks.len(),
                    stats.blocks_succeeded,
                    stats.blocks_failed
                );
            }
        }

        // Leave a header-only file behind rather than nothing
        if stats.flushes == 0 {
            self.flush(&mut buffer, &mut stats)?;
        }

        stats.elapsed_time = start_time.elapsed();

        println!("\n✅ Pipeline complete!");
        self.print_final_stats(&stats);

        Ok(stats)
    }

    fn flush(&mut self, buffer: &mut Vec<OutputRow>, stats: &mut PipelineStats) -> Result<()> {
        if !buffer.is_empty() || stats.flushes == 0 {
            self.sink.write_rows(buffer)?;
            stats.rows_written += buffer.len();
            stats.flushes += 1;
        }
        buffer.clear();
        Ok(())
    }

    /// Print final statistics
    fn print_final_stats(&self, stats: &PipelineStats) {
        println!("\n📊 Pipeline Statistics:");
        println!("   ⏱️  Total time: {:.2}s", stats.elapsed_time.as_secs_f64());
        println!(
            "   📦 Blocks: {} attempted, {} succeeded, {} failed",
            stats.blocks_attempted, stats.blocks_succeeded, stats.blocks_failed
        );
        println!("   ✅ Success rate: {:.1}%", stats.success_rate());
        println!("   💾 Rows written: {} in {} flushes", stats.rows_written, stats.flushes);
        println!("   ⚡ Speed: {:.2} blocks/sec", stats.blocks_per_second());

        let failures: Vec<&BlockOutcome> = stats.failures().collect();
        if !failures.is_empty() {
            println!("\n❌ Errors encountered: {}", failures.len());
            for (i, outcome) in failures.iter().take(5).enumerate() {
                if let BlockStatus::Failed { error } = &outcome.status {
                    println!("   {}. Block {}: {}", i + 1, outcome.block.number, error);
                }
            }
            if failures.len() > 5 {
                println!("   ... and {} more errors", failures.len() - 5);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FetchError, FetchResult};
    use crate::etl::load::parse_blocks;
    use crate::models::TokenAmount;
    use async_trait::async_trait;
    use reqwest::StatusCode;

    /// One row per block; blocks listed in `failing` fail with a transport error
    struct FakeAdapter {
        failing: Vec<u64>,
    }

    #[async_trait]
    impl Adapter for FakeAdapter {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn rows_for_block(&self, block: &BlockRef) -> FetchResult<Vec<OutputRow>> {
            if self.failing.contains(&block.number) {
                return Err(FetchError::Status { status: StatusCode::BAD_GATEWAY, body: String::new() });
            }
            Ok(vec![OutputRow {
                block_number: block.number,
                timestamp: block.timestamp,
                user_address: "0xuser".to_string(),
                token_address: "0xtoken".to_string(),
                token_balance: TokenAmount::from(block.number),
                token_symbol: String::new(),
                usd_price: 0.0,
            }])
        }
    }

    #[derive(Default)]
    struct MemorySink {
        writes: Vec<Vec<OutputRow>>,
    }

    impl RowSink for MemorySink {
        fn write_rows(&mut self, rows: &[OutputRow]) -> Result<()> {
            self.writes.push(rows.to_vec());
            Ok(())
        }
    }

    struct BrokenSink;

    impl RowSink for BrokenSink {
        fn write_rows(&mut self, _rows: &[OutputRow]) -> Result<()> {
            anyhow::bail!("disk full")
        }
    }

    fn blocks(numbers: &[u64]) -> Vec<BlockRef> {
        numbers.iter().map(|n| BlockRef::new(*n, 1700000000 + n)).collect()
    }

    fn written_blocks(sink: &MemorySink) -> Vec<u64> {
        sink.writes.iter().flatten().map(|row| row.block_number).collect()
    }

    #[tokio::test]
    async fn test_failed_block_is_skipped() {
        let mut pipeline =
            Pipeline::new(Box::new(FakeAdapter { failing: vec![2] }), MemorySink::default(), PipelineConfig::default());

        let stats = pipeline.run(&blocks(&[1, 2, 3])).await.unwrap();

        assert_eq!(written_blocks(pipeline.sink()), vec![1, 3]);
        assert_eq!(stats.blocks_attempted, 3);
        assert_eq!(stats.blocks_succeeded, 2);
        assert_eq!(stats.blocks_failed, 1);
        assert_eq!(stats.rows_written, 2);

        let failures: Vec<&BlockOutcome> = stats.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].block.number, 2);
        assert!(matches!(&failures[0].status, BlockStatus::Failed { error } if error.contains("502")));
    }

    #[tokio::test]
    async fn test_flushes_every_batch() {
        let mut pipeline =
            Pipeline::new(Box::new(FakeAdapter { failing: vec![] }), MemorySink::default(), PipelineConfig { batch_size: 2 });

        let stats = pipeline.run(&blocks(&[1, 2, 3, 4, 5])).await.unwrap();

        let batch_sizes: Vec<usize> = pipeline.sink().writes.iter().map(Vec::len).collect();
        assert_eq!(batch_sizes, vec![2, 2, 1]);
        assert_eq!(stats.flushes, 3);
        assert_eq!(written_blocks(pipeline.sink()), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_empty_run_still_flushes_once() {
        let mut pipeline =
            Pipeline::new(Box::new(FakeAdapter { failing: vec![1] }), MemorySink::default(), PipelineConfig::default());

        let stats = pipeline.run(&blocks(&[1])).await.unwrap();

        assert_eq!(pipeline.sink().writes, vec![Vec::<OutputRow>::new()]);
        assert_eq!(stats.flushes, 1);
        assert_eq!(stats.success_rate(), 0.0);
    }

    #[tokio::test]
    async fn test_sink_failure_aborts() {
        let mut pipeline = Pipeline::new(Box::new(FakeAdapter { failing: vec![] }), BrokenSink, PipelineConfig::default());

        assert!(pipeline.run(&blocks(&[1])).await.is_err());
    }

    #[tokio::test]
    async fn test_malformed_block_row_is_not_processed() {
        let input = "number,timestamp\n100,1700000000\nabc,1700000001\n";
        let block_list = parse_blocks(input.as_bytes()).unwrap();
        let mut pipeline =
            Pipeline::new(Box::new(FakeAdapter { failing: vec![] }), MemorySink::default(), PipelineConfig::default());

        let stats = pipeline.run(&block_list).await.unwrap();

        assert_eq!(stats.blocks_attempted, 1);
        assert_eq!(written_blocks(pipeline.sink()), vec![100]);
    }
}
