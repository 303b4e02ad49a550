//! Pluggable table encoding. The concrete columnar on-disk format is
//! treated as an external-collaborator concern; `csv` is the default,
//! swappable [`TableCodec`] instance used for tests and small runs.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

pub trait TableCodec: Send + Sync {
    fn extension(&self) -> &'static str;
    fn write_rows<T: Serialize>(&self, path: &Path, rows: &[T]) -> Result<()>;
    fn read_rows<T: DeserializeOwned>(&self, path: &Path) -> Result<Vec<T>>;
}

#[derive(Default)]
pub struct CsvCodec;

impl TableCodec for CsvCodec {
    fn extension(&self) -> &'static str {
        "csv"
    }

    fn write_rows<T: Serialize>(&self, path: &Path, rows: &[T]) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(true)
            .from_writer(Vec::<u8>::new());
        for row in rows {
            writer
                .serialize(row)
                .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        atomic_write(path, &bytes)
    }

    fn read_rows<T: DeserializeOwned>(&self, path: &Path) -> Result<Vec<T>> {
        with_retry(|| read_rows_once(path))
    }
}

fn read_rows_once<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut out = Vec::new();
    for record in reader.deserialize() {
        let row: T = record.map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        out.push(row);
    }
    Ok(out)
}

/// Retries a fallible filesystem operation once after a short backoff,
/// per the transient-I/O-fault policy: a second failure is fatal.
pub(crate) fn with_retry<T>(f: impl Fn() -> Result<T>) -> Result<T> {
    match f() {
        Ok(v) => Ok(v),
        Err(_) => {
            std::thread::sleep(std::time::Duration::from_millis(50));
            f()
        }
    }
}

/// Writes to a temporary sibling file and renames over the target so
/// concurrent readers in the same slot never observe a partial write.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    with_retry(|| atomic_write_once(path, bytes))
}

fn atomic_write_once(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension(format!(
        "{}.tmp-{}",
        path.extension().and_then(|e| e.to_str()).unwrap_or("dat"),
        std::process::id()
    ));
    let mut file = std::fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Row {
        a: i32,
        b: String,
    }

    #[test]
    fn round_trips_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");
        let codec = CsvCodec;
        let rows = vec![Row { a: 1, b: "x".into() }, Row { a: 2, b: "y".into() }];
        codec.write_rows(&path, &rows).unwrap();
        let back: Vec<Row> = codec.read_rows(&path).unwrap();
        assert_eq!(rows, back);
    }
}
