//! Row parsing for spreadsheet-backed bulk datasets.
//!
//! Both datasets arrive as a `values` grid whose first row is a header.
//! Cells may be strings or numbers depending on the sheet formatting.

use serde::Deserialize;
use serde_json::Value;

use crate::models::{ForeignFlowEntry, ImpactEntry};

/// Body of a spreadsheet range read.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetValues {
    /// Range that was read, as echoed by the service.
    #[serde(default)]
    pub range: Option<String>,
    /// Row-major cells. Absent when the range is empty.
    #[serde(default)]
    pub values: Option<Vec<Vec<Value>>>,
}

/// Parse impact-index rows: symbol, then the impact value.
///
/// A comma is accepted as the decimal separator; unparseable values become
/// `0`. Rows with fewer than two cells or an empty symbol are skipped.
#[must_use]
pub fn parse_impact_rows(rows: &[Vec<Value>]) -> Vec<ImpactEntry> {
    rows.iter()
        .skip(1)
        .filter(|row| row.len() >= 2)
        .filter_map(|row| {
            let symbol = symbol_cell(&row[0])?;
            let raw = cell_text(&row[1]);
            Some(ImpactEntry {
                symbol,
                impact_index: leading_float(&raw.trim().replacen(',', ".", 1)),
            })
        })
        .collect()
}

/// Parse foreign-flow rows: symbol, buy volume, buy value, sell volume,
/// sell value.
///
/// Thousands separators are stripped and values are read as whole numbers;
/// unparseable values become `0`. Rows with fewer than five cells are
/// skipped.
#[must_use]
pub fn parse_foreign_flow_rows(rows: &[Vec<Value>]) -> Vec<ForeignFlowEntry> {
    rows.iter()
        .skip(1)
        .filter(|row| row.len() >= 5)
        .filter_map(|row| {
            let symbol = symbol_cell(&row[0])?;
            Some(ForeignFlowEntry {
                symbol,
                buy_volume: whole_number(&row[1]),
                buy_value: whole_number(&row[2]),
                sell_volume: whole_number(&row[3]),
                sell_value: whole_number(&row[4]),
            })
        })
        .collect()
}

fn cell_text(cell: &Value) -> String {
    match cell {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => String::new(),
    }
}

fn symbol_cell(cell: &Value) -> Option<String> {
    let symbol = cell_text(cell).trim().to_uppercase();
    (!symbol.is_empty()).then_some(symbol)
}

/// Longest numeric prefix of `text` as a float, `0` if there is none.
fn leading_float(text: &str) -> f64 {
    let mut end = 0;
    let mut seen_digit = false;
    let mut seen_dot = false;
    for (i, c) in text.char_indices() {
        match c {
            '+' | '-' if i == 0 => {}
            '0'..='9' => seen_digit = true,
            '.' if !seen_dot => seen_dot = true,
            _ => break,
        }
        end = i + c.len_utf8();
    }

    if !seen_digit {
        return 0.0;
    }
    text[..end]
        .trim_end_matches('.')
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

#[allow(clippy::cast_precision_loss)]
fn whole_number(cell: &Value) -> f64 {
    let cleaned: String = cell_text(cell).trim().chars().filter(|c| *c != ',').collect();
    let digits_end = cleaned
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+'))))
        .map_or(cleaned.len(), |(i, _)| i);
    cleaned[..digits_end].parse::<i64>().map_or(0.0, |v| v as f64)
}
