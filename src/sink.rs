//! Append-only CSV sink. The column set is fixed by the first record written
//! in the process lifetime; the header row is written only when the file is
//! empty, so interrupted runs keep appending to the same table.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::Result;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Int(i64),
    Float(f64),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Int(i) => write!(f, "{i}"),
            FieldValue::Float(v) => write!(f, "{v}"),
        }
    }
}

/// One flat record: ordered field name → value pairs.
pub type Record = Vec<(String, FieldValue)>;

pub struct CsvSink {
    path: PathBuf,
    schema: Option<Vec<String>>,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            schema: None,
        }
    }

    /// Append a batch of records, flushing before returning. Records that
    /// diverge from the first-seen schema are reconciled: missing columns
    /// become empty cells, unknown columns are dropped, both logged.
    pub fn append(&mut self, records: &[Record]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }

        let schema = self
            .schema
            .get_or_insert_with(|| records[0].iter().map(|(name, _)| name.clone()).collect())
            .clone();

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let write_header = file.metadata()?.len() == 0;
        let mut out = BufWriter::new(file);

        if write_header {
            let header: Vec<String> = schema.iter().map(|name| escape(name)).collect();
            writeln!(out, "{}", header.join(","))?;
        }

        for record in records {
            for (name, _) in record {
                if !schema.contains(name) {
                    warn!("dropping field '{name}' not in the output schema");
                }
            }
            let row: Vec<String> = schema
                .iter()
                .map(|col| {
                    record
                        .iter()
                        .find(|(name, _)| name == col)
                        .map(|(_, value)| escape(&value.to_string()))
                        .unwrap_or_default()
                })
                .collect();
            writeln!(out, "{}", row.join(","))?;
        }

        out.flush()?;
        Ok(())
    }
}

fn escape(cell: &str) -> String {
    if cell.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> FieldValue {
        FieldValue::Text(s.to_string())
    }

    #[test]
    fn header_written_once_for_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let mut sink = CsvSink::new(&path);

        sink.append(&[vec![
            ("Project Name".to_string(), text("Green Acres")),
            ("Floors".to_string(), FieldValue::Int(12)),
        ]])
        .unwrap();
        sink.append(&[vec![
            ("Project Name".to_string(), text("Blue Heights")),
            ("Floors".to_string(), FieldValue::Int(8)),
        ]])
        .unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "Project Name,Floors");
        assert_eq!(lines[1], "Green Acres,12");
        assert_eq!(lines[2], "Blue Heights,8");
    }

    #[test]
    fn no_header_when_appending_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        fs::write(&path, "Project Name\nOld Row\n").unwrap();

        let mut sink = CsvSink::new(&path);
        sink.append(&[vec![("Project Name".to_string(), text("New Row"))]])
            .unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "Project Name\nOld Row\nNew Row\n");
    }

    #[test]
    fn later_records_reconciled_against_first_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let mut sink = CsvSink::new(&path);

        sink.append(&[
            vec![
                ("a".to_string(), FieldValue::Int(1)),
                ("b".to_string(), FieldValue::Int(2)),
            ],
            // missing "b", extra "c"
            vec![
                ("a".to_string(), FieldValue::Int(3)),
                ("c".to_string(), FieldValue::Int(4)),
            ],
        ])
        .unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "a,b\n1,2\n3,\n");
    }

    #[test]
    fn cells_with_delimiters_are_quoted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let mut sink = CsvSink::new(&path);

        sink.append(&[vec![
            ("name".to_string(), text("Towers, Phase \"II\"")),
            ("area".to_string(), FieldValue::Float(95.5)),
        ]])
        .unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "name,area\n\"Towers, Phase \"\"II\"\"\",95.5\n");
    }
}
