//! table::csv_io — CSV load/save for [`GeoTable`].
//!
//! Purpose
//! -------
//! Move tables between disk and memory. The imputation engine itself never
//! touches the filesystem; this module is the boundary used by callers that
//! keep their datasets as CSV exports.
//!
//! Conventions
//! -----------
//! - The first header field names the key column unless a key column is given
//!   explicitly; every other column must be numeric.
//! - Empty fields and the tokens `NA`, `NaN`, `nan`, `null`, `NULL` read as
//!   missing (`NaN`). Missing values are written back as empty fields.
//! - Integral values are written without a decimal point so count tables
//!   round-trip as integers.
use std::{
    fs::File,
    io::{Read, Write},
    path::Path,
};

use csv::{ReaderBuilder, WriterBuilder};
use ndarray::Array2;

use crate::table::{
    errors::{TableError, TableResult},
    geo_table::GeoTable,
};

const MISSING_TOKENS: [&str; 6] = ["", "NA", "NaN", "nan", "null", "NULL"];

/// Read a CSV file whose first column is the key.
pub fn read_csv<P: AsRef<Path>>(path: P) -> TableResult<GeoTable> {
    let file = File::open(path)?;
    read_csv_from(file, None)
}

/// Read a CSV file keyed by the named column.
pub fn read_csv_keyed<P: AsRef<Path>>(path: P, key_column: &str) -> TableResult<GeoTable> {
    let file = File::open(path)?;
    read_csv_from(file, Some(key_column))
}

/// Read a table from any reader.
///
/// # Errors
/// - [`TableError::EmptyHeader`] when the header has no value columns.
/// - [`TableError::MissingColumn`] when `key_column` is not in the header.
/// - [`TableError::InvalidNumber`] when a value field is not numeric.
/// - [`TableError::DuplicateKey`] / [`TableError::DuplicateColumn`] from
///   [`GeoTable::new`].
pub fn read_csv_from<R: Read>(reader: R, key_column: Option<&str>) -> TableResult<GeoTable> {
    let mut rdr = ReaderBuilder::new().has_headers(true).trim(csv::Trim::All).from_reader(reader);
    let header: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
    if header.len() < 2 {
        return Err(TableError::EmptyHeader);
    }

    let key_pos = match key_column {
        Some(name) => header
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| TableError::MissingColumn { column: name.to_string() })?,
        None => 0,
    };
    let columns: Vec<String> =
        header.iter().enumerate().filter(|(i, _)| *i != key_pos).map(|(_, h)| h.clone()).collect();

    let mut keys = Vec::new();
    let mut flat = Vec::new();
    for (row, record) in rdr.records().enumerate() {
        let record = record?;
        if record.len() != header.len() {
            return Err(TableError::RowLength { row, expected: header.len(), actual: record.len() });
        }
        for (pos, field) in record.iter().enumerate() {
            if pos == key_pos {
                keys.push(field.to_string());
                continue;
            }
            flat.push(parse_field(field).ok_or_else(|| TableError::InvalidNumber {
                row,
                column: header[pos].clone(),
                field: field.to_string(),
            })?);
        }
    }

    let values = Array2::from_shape_vec((keys.len(), columns.len()), flat)
        .map_err(|e| TableError::Csv(e.to_string()))?;
    GeoTable::new(header[key_pos].clone(), keys, columns, values)
}

/// Write a table to a CSV file (key column first).
pub fn write_csv<P: AsRef<Path>>(table: &GeoTable, path: P) -> TableResult<()> {
    let file = File::create(path)?;
    write_csv_to(table, file)
}

/// Write a table to any writer (key column first).
pub fn write_csv_to<W: Write>(table: &GeoTable, writer: W) -> TableResult<()> {
    let mut wtr = WriterBuilder::new().from_writer(writer);

    let mut header = Vec::with_capacity(table.n_cols() + 1);
    header.push(table.key_column().to_string());
    header.extend(table.columns().iter().cloned());
    wtr.write_record(&header)?;

    let values = table.values();
    for (key, row) in table.keys().iter().zip(values.rows()) {
        let mut record = Vec::with_capacity(row.len() + 1);
        record.push(key.clone());
        record.extend(row.iter().map(|&v| format_field(v)));
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

// ---- Helper methods ----

fn parse_field(field: &str) -> Option<f64> {
    if MISSING_TOKENS.contains(&field) {
        return Some(f64::NAN);
    }
    field.parse::<f64>().ok()
}

fn format_field(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}
