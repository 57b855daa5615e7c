//! Reference dataset loaded from the training spreadsheet.
//!
//! The first sheet of an `.xlsx`/`.xls`/`.ods` workbook is read with its
//! first row as the header; a CSV export is accepted as an alternative.
//! The table is immutable once loaded. It supplies the category universe of
//! every categorical column and the rows used by "random fill".

use crate::types::FeatureValue;
use anyhow::{bail, Context, Result};
use calamine::{open_workbook_auto, Data, Reader};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{BTreeSet, HashMap};
use std::io::Read;
use std::path::Path;

/// One historical record (feature cells plus the observed target)
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Feature cells in column order; `None` for an empty cell
    pub values: Vec<Option<FeatureValue>>,
    /// Observed removal efficiency, if recorded
    pub target: Option<f64>,
}

/// Ordered set of values observed for each categorical column.
///
/// Values are sorted lexicographically, matching the category order the
/// model was fit with.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryUniverse {
    categories: HashMap<String, Vec<String>>,
}

impl CategoryUniverse {
    pub fn new(categories: HashMap<String, Vec<String>>) -> Self {
        Self { categories }
    }

    /// Categories of a column, in encoding order
    pub fn categories(&self, feature: &str) -> Option<&[String]> {
        self.categories.get(feature).map(Vec::as_slice)
    }

    /// Category code of `value`, or `None` when it was never observed
    pub fn code(&self, feature: &str, value: &str) -> Option<usize> {
        self.categories
            .get(feature)?
            .binary_search_by(|c| c.as_str().cmp(value))
            .ok()
    }
}

/// Untyped cell as read from the file
#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Empty,
    Number(f64),
    Text(String),
}

impl From<&Data> for Cell {
    fn from(data: &Data) -> Self {
        match data {
            Data::Empty | Data::Error(_) => Cell::Empty,
            Data::Int(v) => Cell::Number(*v as f64),
            Data::Float(v) => Cell::Number(*v),
            Data::Bool(b) => Cell::Number(if *b { 1.0 } else { 0.0 }),
            Data::String(s) => Cell::Text(s.clone()),
            other => Cell::Text(other.to_string()),
        }
    }
}

/// Immutable table of historical records
#[derive(Debug, Clone)]
pub struct Dataset {
    columns: Vec<String>,
    categorical: Vec<bool>,
    target_column: String,
    rows: Vec<Row>,
}

impl Dataset {
    /// Load the dataset, choosing the reader by file extension
    pub fn load<P: AsRef<Path>>(
        path: P,
        target_column: &str,
        categorical_columns: &[&str],
    ) -> Result<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        let dataset = match extension.as_deref() {
            Some("xlsx" | "xlsm" | "xlsb" | "xls" | "ods") => {
                Self::from_workbook(path, target_column, categorical_columns)
            }
            _ => {
                let file = std::fs::File::open(path)
                    .with_context(|| format!("Failed to open dataset {}", path.display()))?;
                Self::from_reader(file, target_column, categorical_columns)
            }
        };
        dataset.with_context(|| format!("Failed to parse dataset {}", path.display()))
    }

    /// Read the first sheet of a workbook, header in its first row
    pub fn from_workbook<P: AsRef<Path>>(
        path: P,
        target_column: &str,
        categorical_columns: &[&str],
    ) -> Result<Self> {
        let mut workbook = open_workbook_auto(path.as_ref())?;
        let range = workbook
            .worksheet_range_at(0)
            .context("workbook has no sheets")?
            .context("Failed to read the first sheet")?;

        let mut sheet_rows = range.rows();
        let Some(header_row) = sheet_rows.next() else {
            bail!("first sheet is empty");
        };
        let headers: Vec<String> = header_row
            .iter()
            .map(|c| match c {
                Data::String(s) => s.trim().to_string(),
                other => other.to_string(),
            })
            .collect();

        let records = sheet_rows
            .map(|row| row.iter().map(Cell::from).collect::<Vec<_>>())
            .filter(|cells| cells.iter().any(|c| *c != Cell::Empty))
            .collect();

        Self::from_cells(headers, records, target_column, categorical_columns)
    }

    /// Parse a dataset from any CSV reader.
    ///
    /// Headers are trimmed; cells are not, so categorical tokens keep any
    /// surrounding whitespace.
    pub fn from_reader<R: Read>(
        reader: R,
        target_column: &str,
        categorical_columns: &[&str],
    ) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::Headers)
            .from_reader(reader);

        let headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
        let mut records = Vec::new();
        for result in rdr.records() {
            let record = result?;
            records.push(
                record
                    .iter()
                    .map(|cell| {
                        if cell.is_empty() {
                            Cell::Empty
                        } else {
                            Cell::Text(cell.to_string())
                        }
                    })
                    .collect(),
            );
        }

        Self::from_cells(headers, records, target_column, categorical_columns)
    }

    /// Type the raw cells.
    ///
    /// Every column named in `categorical_columns` must be present. Other
    /// non-target cells must be empty or numeric.
    fn from_cells(
        headers: Vec<String>,
        records: Vec<Vec<Cell>>,
        target_column: &str,
        categorical_columns: &[&str],
    ) -> Result<Self> {
        let Some(target_idx) = headers.iter().position(|h| h == target_column) else {
            bail!("target column {:?} not found", target_column);
        };
        for name in categorical_columns {
            if !headers.iter().any(|h| h == name) {
                bail!("categorical column {:?} not found", name);
            }
        }

        let columns: Vec<String> = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != target_idx)
            .map(|(_, h)| h.clone())
            .collect();
        let categorical: Vec<bool> = columns
            .iter()
            .map(|c| categorical_columns.contains(&c.as_str()))
            .collect();

        let mut rows = Vec::with_capacity(records.len());
        for (line, cells) in records.into_iter().enumerate() {
            let mut values = Vec::with_capacity(columns.len());
            let mut target = None;
            let mut col = 0;

            for (idx, cell) in cells.into_iter().enumerate() {
                if idx == target_idx {
                    target = numeric_cell(&cell).with_context(|| {
                        format!("row {}: bad {:?} value {:?}", line + 1, target_column, cell)
                    })?;
                    continue;
                }
                if col >= columns.len() {
                    bail!("row {} has more cells than the header", line + 1);
                }
                let value = if categorical[col] {
                    match cell {
                        Cell::Empty => None,
                        Cell::Text(s) => Some(FeatureValue::Categorical(s)),
                        Cell::Number(v) => Some(FeatureValue::Categorical(v.to_string())),
                    }
                } else {
                    numeric_cell(&cell)
                        .with_context(|| {
                            format!("row {}: bad {:?} value {:?}", line + 1, columns[col], cell)
                        })?
                        .map(FeatureValue::Numeric)
                };
                values.push(value);
                col += 1;
            }

            rows.push(Row { values, target });
        }

        if rows.is_empty() {
            bail!("dataset has no rows");
        }

        Ok(Self {
            columns,
            categorical,
            target_column: target_column.to_string(),
            rows,
        })
    }

    /// Feature column names (target excluded), in file order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn is_categorical(&self, column: usize) -> bool {
        self.categorical.get(column).copied().unwrap_or(false)
    }

    pub fn target_column(&self) -> &str {
        &self.target_column
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Draw one row uniformly at random
    pub fn sample_row<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&Row> {
        self.rows.choose(rng)
    }

    /// Derive the category universe of every categorical column
    pub fn category_universe(&self) -> CategoryUniverse {
        let mut categories = HashMap::new();
        for (idx, name) in self.columns.iter().enumerate() {
            if !self.categorical[idx] {
                continue;
            }
            let observed: BTreeSet<&str> = self
                .rows
                .iter()
                .filter_map(|row| row.values[idx].as_ref())
                .filter_map(FeatureValue::as_categorical)
                .collect();
            categories.insert(
                name.clone(),
                observed.into_iter().map(str::to_string).collect(),
            );
        }
        CategoryUniverse::new(categories)
    }
}

fn numeric_cell(cell: &Cell) -> Result<Option<f64>> {
    match cell {
        Cell::Empty => Ok(None),
        Cell::Number(v) if v.is_nan() => Ok(None),
        Cell::Number(v) => Ok(Some(*v)),
        Cell::Text(text) => {
            let text = text.trim();
            if text.is_empty() || text.eq_ignore_ascii_case("nan") {
                return Ok(None);
            }
            Ok(Some(text.parse::<f64>()?))
        }
    }
}
