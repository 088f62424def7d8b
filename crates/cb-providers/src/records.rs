//! Header-keyed CSV record parsing.
//!
//! [`read_records`] opens a flat export file and yields one `Result<T>` per
//! row. A row that fails to deserialize is a [`Error::Parse`] for that row
//! only; iteration continues with the next row.

use std::fs::File;
use std::marker::PhantomData;
use std::path::Path;

use serde::de::DeserializeOwned;

use cb_core::{Error, Result};

/// A record type with an activation rule deciding whether it is imported.
pub trait ActivationPredicate {
    fn is_active(&self) -> bool;
}

/// Case-insensitive boolean flag as exported by providers (`TRUE`, `True`,
/// `1`).
pub fn flag(value: &str) -> bool {
    let v = value.trim();
    v.eq_ignore_ascii_case("true") || v == "1"
}

/// Row iterator over a CSV file.
pub struct RecordReader<T> {
    rows: csv::StringRecordsIntoIter<File>,
    headers: csv::StringRecord,
    file: String,
    _marker: PhantomData<T>,
}

impl<T: DeserializeOwned> Iterator for RecordReader<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = match self.rows.next()? {
            Ok(r) => r,
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or_default();
                return Some(Err(Error::Parse(format!("{}: line {line}: {e}", self.file))));
            }
        };
        let line = record.position().map(|p| p.line()).unwrap_or_default();
        Some(
            record
                .deserialize(Some(&self.headers))
                .map_err(|e| Error::Parse(format!("{}: line {line}: {e}", self.file))),
        )
    }
}

/// Open `path` and read its header row.
pub fn read_records<T: DeserializeOwned>(path: &Path) -> Result<RecordReader<T>> {
    let file = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|e| Error::Transfer(format!("failed to open {file}: {e}")))?;

    let headers = reader
        .headers()
        .map_err(|e| Error::Parse(format!("{file}: unreadable header row: {e}")))?
        .clone();

    Ok(RecordReader {
        rows: reader.into_records(),
        headers,
        file,
        _marker: PhantomData,
    })
}
