/// Load Module
///
/// Handles the flat files at both ends of a run: the input block list and the
/// output CSV that rows are flushed into.
use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::models::{BlockRef, OutputRow};

/// Read the block list (`number`, `timestamp` columns) from a CSV file
pub fn read_blocks(path: &Path) -> Result<Vec<BlockRef>> {
    let file = File::open(path).context(format!("Failed to open block list {}", path.display()))?;
    let blocks = parse_blocks(file).context(format!("Failed to read block list {}", path.display()))?;

    tracing::info!("Read {} blocks from {}", blocks.len(), path.display());
    Ok(blocks)
}

/// Parse a block list. Rows with an unparseable number or a missing/zero
/// timestamp are dropped without error.
pub fn parse_blocks<R: Read>(reader: R) -> Result<Vec<BlockRef>> {
    let mut csv_reader = csv::ReaderBuilder::new().flexible(true).trim(csv::Trim::All).from_reader(reader);

    let headers = csv_reader.headers().context("Failed to read CSV header")?.clone();
    let column = |name: &str| headers.iter().position(|h| h == name);
    let (Some(number_idx), Some(timestamp_idx)) = (column("number"), column("timestamp")) else {
        anyhow::bail!("Block list must have `number` and `timestamp` columns, found: {:?}", headers);
    };

    let mut blocks = Vec::new();
    let mut skipped = 0;

    for result in csv_reader.records() {
        let parsed = result.ok().and_then(|record| {
            let number = leading_integer(record.get(number_idx)?)?;
            let timestamp = leading_integer(record.get(timestamp_idx)?).filter(|ts| *ts > 0)?;
            Some(BlockRef::new(number, timestamp))
        });

        match parsed {
            Some(block) => blocks.push(block),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        tracing::debug!("Skipped {} unparseable block rows", skipped);
    }

    Ok(blocks)
}

/// Integer value of the leading digits, so `100.0` reads as 100 and
/// `1700000000.5` as 1700000000. None when the field does not start with a digit.
fn leading_integer(field: &str) -> Option<u64> {
    let digits = field.find(|c: char| !c.is_ascii_digit()).map_or(field, |end| &field[..end]);
    digits.parse().ok()
}

/// Destination for flushed output rows
pub trait RowSink {
    fn write_rows(&mut self, rows: &[OutputRow]) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Append to an existing file, writing the header only if it is empty
    Append,
    /// Truncate on the first flush of the run, append afterwards
    Overwrite,
}

pub struct CsvSink {
    path: PathBuf,
    mode: WriteMode,
    flushes: usize,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>, mode: WriteMode) -> Self {
        Self { path: path.into(), mode, flushes: 0 }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RowSink for CsvSink {
    fn write_rows(&mut self, rows: &[OutputRow]) -> Result<()> {
        let truncate = self.mode == WriteMode::Overwrite && self.flushes == 0;

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(!truncate)
            .truncate(truncate)
            .open(&self.path)
            .context(format!("Failed to open output file {}", self.path.display()))?;

        let empty = file.metadata().map(|m| m.len() == 0).unwrap_or(true);

        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if truncate || empty {
            writer.write_record(OutputRow::HEADER).context("Failed to write CSV header")?;
        }
        for row in rows {
            writer.serialize(row).context("Failed to write CSV row")?;
        }
        writer.flush().context("Failed to flush output file")?;

        self.flushes += 1;
        tracing::info!("Wrote {} rows to {}", rows.len(), self.path.display());
        Ok(())
    }
}
