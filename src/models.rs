use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Placeholder transaction id used when nothing better can be inferred.
pub const SENTINEL_ID: &str = "-";

/// Spellings a statement export uses for "no value" in a cell.
const MISSING_MARKERS: &[&str] = &[
    "", "#N/A", "#NA", "N/A", "NA", "NULL", "NaN", "-NaN", "nan", "null", "n/a", "<NA>", "None",
];

/// One scalar cell of a statement table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    /// Type a raw field the way a statement export is usually read: missing
    /// markers become `Null`, plain numbers become numbers, the rest stays text.
    pub fn infer(raw: &str) -> Cell {
        let trimmed = raw.trim();
        if MISSING_MARKERS.contains(&trimmed) {
            return Cell::Null;
        }
        if looks_numeric(trimmed) {
            if !has_leading_zero(trimmed) {
                if let Ok(i) = trimmed.parse::<i64>() {
                    return Cell::Int(i);
                }
            }
            if trimmed.contains(|c: char| matches!(c, '.' | 'e' | 'E')) {
                if let Ok(f) = trimmed.parse::<f64>() {
                    return Cell::Float(f);
                }
            }
        }
        Cell::Text(raw.to_string())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// True for `Null` and for text that is empty.
    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Null => true,
            Cell::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Text rendering of the cell, `None` for `Null`.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Null => None,
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => Ok(()),
            Cell::Int(i) => write!(f, "{i}"),
            Cell::Float(v) => write!(f, "{v}"),
            Cell::Text(s) => f.write_str(s),
        }
    }
}

fn looks_numeric(s: &str) -> bool {
    s.chars().any(|c| c.is_ascii_digit())
        && s.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
}

// "00123" is an identifier, not the number 123.
fn has_leading_zero(s: &str) -> bool {
    let digits = s.trim_start_matches(|c: char| c == '-' || c == '+');
    digits.len() > 1 && digits.starts_with('0') && !digits.starts_with("0.")
}

/// One source row keyed by column name.
pub type Row = BTreeMap<String, Cell>;

/// A parsed statement table: header order plus rows.
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn has_column(&self, name: &str) -> bool {
        self.headers.iter().any(|h| h == name)
    }
}

/// A payment pulled out of one statement row, not yet validated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentCandidate {
    pub amount: Cell,
    pub date: Cell,
    /// Inferred id or [`SENTINEL_ID`]; never empty.
    pub transaction_id: String,
    pub customer_id: Cell,
    pub raw_row: Row,
    pub source_file: String,
}
