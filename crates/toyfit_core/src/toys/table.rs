//! In-memory tables of toy results

use std::fmt;
use std::io;

use indexmap::IndexMap;

use crate::error::StoreError;
use crate::fit::{FlatRecord, FlatValue};

/// A typed table cell
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(v) => Some(*v as f64),
            Cell::Float(v) => Some(*v),
            Cell::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Inverse of the `Display` form: integers, then floats, then text
    pub fn parse(field: &str) -> Cell {
        if let Ok(v) = field.parse::<i64>() {
            Cell::Int(v)
        } else if let Ok(v) = field.parse::<f64>() {
            Cell::Float(v)
        } else {
            Cell::Text(field.to_string())
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Int(v) => write!(f, "{v}"),
            // Debug keeps the decimal point so floats read back as floats
            Cell::Float(v) => write!(f, "{v:?}"),
            Cell::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Cell {
    fn from(v: i64) -> Self {
        Cell::Int(v)
    }
}

impl From<f64> for Cell {
    fn from(v: f64) -> Self {
        Cell::Float(v)
    }
}

impl From<&str> for Cell {
    fn from(v: &str) -> Self {
        Cell::Text(v.to_string())
    }
}

impl From<String> for Cell {
    fn from(v: String) -> Self {
        Cell::Text(v)
    }
}

/// Scalar cells of a flat fit record; sequences are skipped
pub fn record_cells(record: &FlatRecord) -> impl Iterator<Item = (&String, Cell)> {
    record.iter().filter_map(|(name, value)| match value {
        FlatValue::Float(v) => Some((name, Cell::Float(*v))),
        FlatValue::Int(v) => Some((name, Cell::Int(*v))),
        FlatValue::Sequence(_) => None,
    })
}

/// Named columns and rows of cells
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToyTable {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl ToyTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append a row given as column -> cell.
    ///
    /// The first row fixes the columns of an empty table; later rows must have
    /// exactly the same columns, in any order.
    pub fn push_record(&mut self, record: IndexMap<String, Cell>) -> Result<(), StoreError> {
        if self.columns.is_empty() && self.rows.is_empty() {
            self.columns = record.keys().cloned().collect();
        }
        let mismatch = || StoreError::IncompatibleColumns {
            table: "row".to_string(),
            expected: self.columns.clone(),
            found: record.keys().cloned().collect(),
        };
        if record.len() != self.columns.len() {
            return Err(mismatch());
        }
        let row = self
            .columns
            .iter()
            .map(|c| record.get(c).cloned())
            .collect::<Option<Vec<_>>>()
            .ok_or_else(mismatch)?;
        self.rows.push(row);
        Ok(())
    }

    /// Append a row in column order
    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<(), StoreError> {
        if row.len() != self.columns.len() {
            return Err(StoreError::IncompatibleColumns {
                table: "row".to_string(),
                expected: self.columns.clone(),
                found: vec![format!("{} cells", row.len())],
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Append the rows of a table with the same header
    pub fn append(&mut self, other: ToyTable) -> Result<(), StoreError> {
        if self.columns != other.columns {
            return Err(StoreError::IncompatibleColumns {
                table: "table".to_string(),
                expected: self.columns.clone(),
                found: other.columns,
            });
        }
        self.rows.extend(other.rows);
        Ok(())
    }

    /// Stack tables over the union of their columns; absent cells are NaN
    pub fn concat(tables: Vec<ToyTable>) -> ToyTable {
        let mut columns: Vec<String> = Vec::new();
        for table in &tables {
            for column in &table.columns {
                if !columns.contains(column) {
                    columns.push(column.clone());
                }
            }
        }
        let mut output = ToyTable::new(columns);
        for table in tables {
            let positions: Vec<Option<usize>> = output
                .columns
                .iter()
                .map(|c| table.columns.iter().position(|t| t == c))
                .collect();
            for row in table.rows {
                output.rows.push(
                    positions
                        .iter()
                        .map(|p| p.map_or(Cell::Float(f64::NAN), |i| row[i].clone()))
                        .collect(),
                );
            }
        }
        output
    }

    /// Write as CSV, with the header line when `header` is set
    pub fn write_csv<W: io::Write>(&self, writer: W, header: bool) -> Result<(), StoreError> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(writer);
        if header {
            writer.write_record(&self.columns)?;
        }
        for row in &self.rows {
            writer.write_record(row.iter().map(Cell::to_string))?;
        }
        writer.flush().map_err(|source| StoreError::Io {
            path: "<csv writer>".into(),
            source,
        })?;
        Ok(())
    }

    pub fn column(&self, name: &str) -> Option<Vec<&Cell>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(|row| &row[idx]).collect())
    }

    /// Numeric column; text cells become NaN
    pub fn float_column(&self, name: &str) -> Option<Vec<f64>> {
        Some(
            self.column(name)?
                .into_iter()
                .map(|c| c.as_f64().unwrap_or(f64::NAN))
                .collect(),
        )
    }
}
