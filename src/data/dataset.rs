use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::{Error, IoContext, Result};

/// One cell of a tabular dataset.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
    Missing,
}

impl Value {
    /// Parses a raw CSV cell: numbers become `Number`, blanks `Missing`.
    pub fn parse(cell: &str) -> Value {
        let t = cell.trim();
        if t.is_empty() {
            return Value::Missing;
        }
        match t.parse::<f64>() {
            Ok(v) => Value::Number(v),
            Err(_) => Value::Text(t.to_owned()),
        }
    }

    /// Numeric view of the cell. Text that parses as a finite number is
    /// accepted; NaN and infinities are not.
    pub fn as_f64(&self) -> Option<f64> {
        let v = match self {
            Value::Number(v) => *v,
            Value::Text(s) => s.trim().parse::<f64>().ok()?,
            Value::Missing => return None,
        };
        v.is_finite().then_some(v)
    }
}

/// Ordered rows of named columns, as read from CSV.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    columns: Vec<String>,
    index: HashMap<String, usize>,
    rows: Vec<Vec<Value>>,
}

impl Dataset {
    pub fn new(columns: Vec<String>) -> Dataset {
        let index = columns.iter().enumerate().map(|(i, c)| (c.clone(), i)).collect();
        Dataset { columns, index, rows: Vec::new() }
    }

    /// Builds a dataset from numeric columns of equal length.
    pub fn from_columns(columns: &[(&str, Vec<f64>)]) -> Dataset {
        let mut ds = Dataset::new(columns.iter().map(|(n, _)| n.to_string()).collect());
        let n = columns.iter().map(|(_, v)| v.len()).max().unwrap_or(0);
        for i in 0..n {
            let row = columns
                .iter()
                .map(|(_, v)| v.get(i).map_or(Value::Missing, |&x| Value::Number(x)))
                .collect();
            ds.rows.push(row);
        }
        ds
    }

    /// Reads a CSV file with a header row.
    pub fn load_csv(path: impl AsRef<Path>) -> Result<Dataset> {
        let path = path.as_ref();
        let file = File::open(path).at(path)?;
        Dataset::from_reader(file).map_err(|e| match e {
            Error::Format { detail, .. } => Error::format(path, detail),
            other => other,
        })
    }

    /// Reads every `*.csv` file in `dir`, in file-name order, and
    /// concatenates them. All files must share the first file's header.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Dataset> {
        let dir = dir.as_ref();
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .at(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().map_or(false, |ext| ext.eq_ignore_ascii_case("csv")))
            .collect();
        files.sort();

        let mut iter = files.into_iter();
        let first = iter
            .next()
            .ok_or_else(|| Error::Data(format!("no CSV files found in {}", dir.display())))?;
        let mut combined = Dataset::load_csv(&first)?;
        for path in iter {
            let next = Dataset::load_csv(&path)?;
            if next.columns != combined.columns {
                return Err(Error::format(&path, "header does not match the other CSV files"));
            }
            combined.rows.extend(next.rows);
        }
        Ok(combined)
    }

    /// Parses CSV text from any reader. The first record is the header.
    pub fn from_reader<R: Read>(reader: R) -> Result<Dataset> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = rdr
            .headers()
            .map_err(|e| Error::format("<csv>", e.to_string()))?
            .iter()
            .map(|h| h.to_owned())
            .collect::<Vec<_>>();
        let mut ds = Dataset::new(headers);

        for record in rdr.records() {
            let record = record.map_err(|e| Error::format("<csv>", e.to_string()))?;
            let mut row: Vec<Value> = record.iter().map(Value::parse).collect();
            row.resize(ds.columns.len(), Value::Missing);
            ds.rows.push(row);
        }
        Ok(ds)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let col = *self.index.get(column)?;
        self.rows.get(row).and_then(|r| r.get(col))
    }

    /// Numeric view of a column; non-numeric cells become `None`.
    pub fn numeric_column(&self, column: &str) -> Option<Vec<Option<f64>>> {
        let col = *self.index.get(column)?;
        Some(self.rows.iter().map(|r| r[col].as_f64()).collect())
    }

    /// Appends a column, or replaces it when the name already exists.
    pub fn set_column(&mut self, name: &str, values: Vec<Value>) {
        let col = match self.index.get(name) {
            Some(&c) => c,
            None => {
                self.columns.push(name.to_owned());
                self.index.insert(name.to_owned(), self.columns.len() - 1);
                for row in &mut self.rows {
                    row.push(Value::Missing);
                }
                self.columns.len() - 1
            }
        };
        for (row, v) in self.rows.iter_mut().zip(values) {
            row[col] = v;
        }
    }

    pub fn push_row(&mut self, row: Vec<Value>) {
        let mut row = row;
        row.resize(self.columns.len(), Value::Missing);
        self.rows.push(row);
    }
}
