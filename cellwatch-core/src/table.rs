//! Raw tabular input
//!
//! Monitoring devices export comma-separated text with a header row. This
//! module only splits that text into named string cells; interpreting the
//! cells (timestamps, numbers, placeholder states) is the job of
//! [`crate::ingest`].
//!
//! ## Accepted Shape
//!
//! ```csv
//! Date,Time,Min,Max,Temperature
//! 26/12/2025,14:00,13.28,13.31,7.5
//! "26/12/2025","15:00","13.27","13.30","unavailable"
//! ```
//!
//! - Surrounding quotes and whitespace are trimmed from every cell
//! - Commas inside a quoted cell belong to the cell; escaped quotes (`""`)
//!   are not unescaped
//! - Blank lines are skipped
//! - A row with a different number of cells than the header is kept as-is;
//!   ingestion reports it as structurally broken

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{AnalysisError, AnalysisResult};

/// Statistics for table reading
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableStats {
    /// Data rows kept (header excluded)
    pub rows_read: usize,
    /// Total lines processed, including header and blank lines
    pub lines_processed: usize,
    /// Blank lines skipped
    pub blank_lines: usize,
    /// Bytes read from the source
    pub bytes_read: usize,
}

/// Header plus string rows
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    stats: TableStats,
}

impl RawTable {
    /// Read a table from any buffered source
    ///
    /// The first non-blank line is the header. An input with no header is
    /// a `ParseFailure` at row 0.
    pub fn from_reader<R: BufRead>(reader: R) -> AnalysisResult<Self> {
        let mut stats = TableStats::default();
        let mut headers: Option<Vec<String>> = None;
        let mut rows = Vec::new();

        for line in reader.lines() {
            let line = line?;
            stats.lines_processed += 1;
            stats.bytes_read += line.len() + 1;

            if line.trim().is_empty() {
                stats.blank_lines += 1;
                continue;
            }

            let cells = split_cells(&line);
            if headers.is_none() {
                headers = Some(cells);
            } else {
                rows.push(cells);
                stats.rows_read += 1;
            }
        }

        let headers = headers.ok_or_else(|| AnalysisError::ParseFailure {
            row: 0,
            reason: "input has no header row".into(),
        })?;

        log::debug!(
            "read table: {} columns, {} rows, {} blank lines",
            headers.len(),
            stats.rows_read,
            stats.blank_lines
        );

        Ok(Self { headers, rows, stats })
    }

    /// Read a table from a file
    pub fn from_path(path: impl AsRef<Path>) -> AnalysisResult<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    /// Build a table directly from cells
    pub fn from_rows(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let stats = TableStats {
            rows_read: rows.len(),
            lines_processed: rows.len() + 1,
            ..TableStats::default()
        };
        Self { headers, rows, stats }
    }

    /// Column names
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Index of a named column
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Data rows
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Number of data rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the table has no data rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Get statistics
    pub fn stats(&self) -> &TableStats {
        &self.stats
    }
}

fn split_cells(line: &str) -> Vec<String> {
    let line = line.trim_end_matches('\r');
    let mut cells = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                cells.push(clean_cell(&line[start..i]));
                start = i + 1;
            }
            _ => {}
        }
    }
    cells.push(clean_cell(&line[start..]));
    cells
}

fn clean_cell(cell: &str) -> String {
    cell.trim().trim_matches('"').trim().to_string()
}
