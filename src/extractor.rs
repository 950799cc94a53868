use std::collections::HashMap;
use std::path::Path;

use crate::error::{PayrelayError, Result};
use crate::models::{Cell, PaymentCandidate, Row, Table, SENTINEL_ID};
use crate::payment_id::infer_transaction_id;
use crate::settings::{ColumnMapping, ProcessingSettings};

/// Tried in order; the second only when the first fails to parse.
pub const DELIMITERS: [u8; 2] = [b';', b','];

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Trim text, fold empty and "null"/"none"/"n/a" to `Null`, pass the rest through.
pub fn clean_value(cell: &Cell) -> Cell {
    match cell {
        Cell::Text(s) => {
            let s = s.trim();
            let lower = s.to_lowercase();
            if s.is_empty() || matches!(lower.as_str(), "null" | "none" | "n/a") {
                Cell::Null
            } else {
                Cell::Text(s.to_string())
            }
        }
        other => other.clone(),
    }
}

// Repeated header names get a ".1", ".2" suffix so no column is lost.
fn dedupe_headers(raw: &csv::StringRecord) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    raw.iter()
        .map(|h| {
            let h = h.trim().to_string();
            let count = seen.entry(h.clone()).or_insert(0);
            let name = if *count == 0 {
                h.clone()
            } else {
                format!("{h}.{count}")
            };
            *count += 1;
            name
        })
        .collect()
}

/// Parse delimited text with a fixed delimiter. Ragged rows are an error.
pub fn parse_table(content: &[u8], delimiter: u8) -> Result<Table> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(false)
        .from_reader(content);
    let headers = dedupe_headers(rdr.headers()?);
    if headers.iter().all(|h| h.is_empty()) {
        return Err(PayrelayError::Other("no header row".to_string()));
    }
    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let row: Row = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.clone(), Cell::infer(v)))
            .collect();
        rows.push(row);
    }
    Ok(Table { headers, rows })
}

/// Read a statement file, trying `;` first and falling back to `,`.
pub fn read_table(file_path: &Path) -> Result<Table> {
    let content = std::fs::read(file_path)?;
    let mut last_error = String::new();
    for delimiter in DELIMITERS {
        match parse_table(&content, delimiter) {
            Ok(table) => {
                log::debug!(
                    "Parsed {} with delimiter '{}'",
                    file_path.display(),
                    delimiter as char
                );
                return Ok(table);
            }
            Err(e) => {
                log::debug!(
                    "Delimiter '{}' failed for {}: {e}",
                    delimiter as char,
                    file_path.display()
                );
                last_error = e.to_string();
            }
        }
    }
    Err(PayrelayError::UnreadableTable {
        path: file_path.display().to_string(),
        reason: last_error,
    })
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

pub struct Extractor {
    columns: ColumnMapping,
    filter_column: String,
    filter_value: String,
}

impl Extractor {
    pub fn new(settings: &ProcessingSettings) -> Self {
        Self {
            columns: settings.columns.clone(),
            filter_column: settings.filter_column.clone(),
            filter_value: settings.filter_value.clone(),
        }
    }

    /// Rows whose filter column equals the filter value are dropped.
    fn keeps(&self, row: &Row) -> bool {
        match row.get(&self.filter_column) {
            Some(cell) => !self.matches_filter(&clean_value(cell)),
            None => true,
        }
    }

    // Numeric cells have lost their source spelling ("1.0" reads back as
    // "1"), so they also match a filter value with the same number.
    fn matches_filter(&self, cell: &Cell) -> bool {
        let wanted = self.filter_value.trim();
        if cell.as_text().as_deref() == Some(wanted) {
            return true;
        }
        let number = match cell {
            Cell::Int(i) => *i as f64,
            Cell::Float(f) => *f,
            _ => return false,
        };
        wanted.parse::<f64>().map_or(false, |v| v == number)
    }

    fn field(&self, table: &Table, row: &Row, column: &str) -> Cell {
        if !table.has_column(column) {
            return Cell::Null;
        }
        row.get(column).map(clean_value).unwrap_or(Cell::Null)
    }

    fn transaction_id(&self, table: &Table, row: &Row) -> String {
        match self.field(table, row, &self.columns.transaction_id).as_text() {
            Some(text) => infer_transaction_id(&text),
            None => SENTINEL_ID.to_string(),
        }
    }

    /// Turn one parsed table into payment candidates, in row order.
    pub fn extract(&self, table: &Table, source_file: &str) -> Vec<PaymentCandidate> {
        let rows: Vec<&Row> = if table.has_column(&self.filter_column) {
            let kept: Vec<&Row> = table.rows.iter().filter(|r| self.keeps(r)).collect();
            log::info!(
                "Kept {} of {} rows where {} != {}",
                kept.len(),
                table.rows.len(),
                self.filter_column,
                self.filter_value
            );
            kept
        } else {
            log::warn!(
                "Filter column '{}' not found in {source_file}. Processing all rows.",
                self.filter_column
            );
            table.rows.iter().collect()
        };

        for (role, column) in [
            ("amount", &self.columns.amount),
            ("date", &self.columns.date),
            ("transaction_id", &self.columns.transaction_id),
            ("customer_id", &self.columns.customer_id),
        ] {
            if !table.has_column(column) {
                log::warn!("Column '{column}' not found for field '{role}' in {source_file}");
            }
        }

        rows.into_iter()
            .map(|row| PaymentCandidate {
                amount: self.field(table, row, &self.columns.amount),
                date: self.field(table, row, &self.columns.date),
                transaction_id: self.transaction_id(table, row),
                customer_id: self.field(table, row, &self.columns.customer_id),
                raw_row: row.clone(),
                source_file: source_file.to_string(),
            })
            .collect()
    }

    pub fn extract_file(&self, file_path: &Path) -> Result<Vec<PaymentCandidate>> {
        log::info!("Processing CSV file: {}", file_path.display());
        let table = read_table(file_path)?;
        log::info!("Loaded CSV with {} rows", table.rows.len());
        Ok(self.extract(&table, &file_path.to_string_lossy()))
    }
}
