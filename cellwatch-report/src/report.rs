//! Structured report
//!
//! The output boundary of a run. Everything is plain data: tables of JSON
//! values, named scalar findings with units, the flagged anomaly events, and
//! an explicit entry for every quantity that could not be computed. No
//! internal core type other than [`AnomalyEvent`] crosses this boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use cellwatch_core::{AnalysisError, AnalysisResult, AnomalyEvent};

use crate::ReportResult;

/// Named table with a fixed column list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryTable {
    /// Table name
    pub name: String,
    /// Column names, in order
    pub columns: Vec<String>,
    /// Rows, each as long as `columns`
    pub rows: Vec<Vec<Value>>,
}

impl SummaryTable {
    /// Empty table
    pub fn new(name: impl Into<String>, columns: &[&str]) -> Self {
        Self { name: name.into(), columns: columns.iter().map(|c| c.to_string()).collect(), rows: Vec::new() }
    }

    /// Table from prepared rows
    pub fn from_rows(name: impl Into<String>, columns: &[&str], rows: Vec<Vec<Value>>) -> AnalysisResult<Self> {
        let mut table = Self::new(name, columns);
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    /// Append a row; its width must match the columns
    pub fn push_row(&mut self, row: Vec<Value>) -> AnalysisResult<()> {
        if row.len() != self.columns.len() {
            return Err(AnalysisError::LengthMismatch { left: row.len(), right: self.columns.len() });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Values of one column
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().filter_map(|r| r.get(idx)).collect())
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when the table has no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// One scalar result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Quantity name
    pub name: String,
    /// Value
    pub value: f64,
    /// Unit, e.g. `mV/day`
    pub unit: String,
}

/// A quantity that could not be computed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unavailable {
    /// Quantity name
    pub quantity: String,
    /// Machine-readable error kind
    pub kind: String,
    /// Human-readable reason
    pub reason: String,
}

impl Unavailable {
    /// Entry for a failed computation
    pub fn from_error(quantity: impl Into<String>, error: &AnalysisError) -> Self {
        Self { quantity: quantity.into(), kind: error.kind().to_string(), reason: error.to_string() }
    }

    /// Entry for an input that was never supplied
    pub fn not_configured(quantity: impl Into<String>, what: &str) -> Self {
        Self {
            quantity: quantity.into(),
            kind: "not_configured".to_string(),
            reason: format!("{what} not configured"),
        }
    }
}

/// Everything one run produced
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Summary tables in production order
    pub tables: Vec<SummaryTable>,
    /// Scalar results
    pub findings: Vec<Finding>,
    /// Flagged samples
    pub anomalies: Vec<AnomalyEvent>,
    /// Quantities that could not be computed, and why
    pub unavailable: Vec<Unavailable>,
}

impl Report {
    /// Empty report
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a table
    pub fn add_table(&mut self, table: SummaryTable) {
        self.tables.push(table);
    }

    /// Append a scalar finding
    pub fn add_finding(&mut self, name: impl Into<String>, value: f64, unit: &str) {
        self.findings.push(Finding { name: name.into(), value, unit: unit.to_string() });
    }

    /// Record a failed quantity
    pub fn mark_unavailable(&mut self, quantity: impl Into<String>, error: &AnalysisError) {
        let entry = Unavailable::from_error(quantity, error);
        log::warn!("{} unavailable: {}", entry.quantity, entry.reason);
        self.unavailable.push(entry);
    }

    /// Record a quantity whose inputs were never supplied
    pub fn mark_not_configured(&mut self, quantity: impl Into<String>, what: &str) {
        let entry = Unavailable::not_configured(quantity, what);
        log::warn!("{} unavailable: {}", entry.quantity, entry.reason);
        self.unavailable.push(entry);
    }

    /// Record a quantity whose input channel is absent from the dataset
    pub fn mark_missing_channel(&mut self, quantity: impl Into<String>, channel: &str) {
        let entry = Unavailable {
            quantity: quantity.into(),
            kind: "missing_channel".to_string(),
            reason: format!("channel '{channel}' not in dataset"),
        };
        log::warn!("{} unavailable: {}", entry.quantity, entry.reason);
        self.unavailable.push(entry);
    }

    /// Keep the value, or record the failure and yield `None`
    pub fn record<T>(&mut self, quantity: &str, result: AnalysisResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.mark_unavailable(quantity, &e);
                None
            }
        }
    }

    /// Look up a table by name
    pub fn table(&self, name: &str) -> Option<&SummaryTable> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Look up a finding by name
    pub fn finding(&self, name: &str) -> Option<&Finding> {
        self.findings.iter().find(|f| f.name == name)
    }

    /// Unavailable entry for a quantity
    pub fn unavailable(&self, quantity: &str) -> Option<&Unavailable> {
        self.unavailable.iter().find(|u| u.quantity == quantity)
    }

    /// Compact JSON
    pub fn to_json(&self) -> ReportResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Indented JSON
    pub fn to_json_pretty(&self) -> ReportResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
