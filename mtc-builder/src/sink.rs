//! Corpus Output
//!
//! [`CorpusRecord`] is the finished row for one identifier; a [`RecordSink`]
//! receives each record exactly once. The orchestrator owns the sink from a
//! single writer task, so implementations never see concurrent calls.

use crate::classify::{CategoryMap, ClassificationResult};
use mtc_common::{Error, Result};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Column headings of the consolidated CSV
pub const CSV_HEADER: [&str; 9] = [
    "Keywords",
    "PMID",
    "Title",
    "Abstract",
    "Authors",
    "Mesh Terms",
    "Level 1",
    "Level 2",
    "Level 3",
];

/// One fully retrieved and classified identifier
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorpusRecord {
    /// Queries that returned this identifier (sorted)
    pub matched_queries: Vec<String>,
    pub id: String,
    pub title: String,
    pub abstract_text: String,
    pub authors: Vec<String>,
    /// Every retrieved annotation, including names unknown to the taxonomy
    pub annotation_names: Vec<String>,
    pub classification: ClassificationResult,
}

impl CorpusRecord {
    /// Cells in [`CSV_HEADER`] order
    pub fn to_row(&self) -> [String; 9] {
        [
            self.matched_queries.join(", "),
            self.id.clone(),
            self.title.clone(),
            self.abstract_text.clone(),
            self.authors.join(", "),
            self.annotation_names.join(", "),
            render_summary(&self.classification.level1),
            render_summary(&self.classification.level2),
            render_summary(&self.classification.level3),
        ]
    }
}

/// Render one level as `"category: name1, name2 ; category2: name3"`
pub fn render_summary(level: &CategoryMap) -> String {
    level
        .iter()
        .map(|(category, names)| format!("{}: {}", category, names.join(", ")))
        .collect::<Vec<_>>()
        .join(" ; ")
}

/// Destination for finished records
pub trait RecordSink: Send {
    /// Append one record
    fn append(&mut self, record: &CorpusRecord) -> Result<()>;

    /// Flush buffered output; called once after the last append
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: RecordSink + ?Sized> RecordSink for Box<S> {
    fn append(&mut self, record: &CorpusRecord) -> Result<()> {
        (**self).append(record)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}

/// CSV sink writing the header on creation
pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
}

impl CsvSink<File> {
    /// Create (truncate) `path` and write the header row
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Self::new(file)
    }
}

impl<W: Write> CsvSink<W> {
    pub fn new(inner: W) -> Result<Self> {
        let mut writer = csv::Writer::from_writer(inner);
        writer.write_record(CSV_HEADER).map_err(csv_error)?;
        Ok(Self { writer })
    }

    /// Flush and hand back the underlying writer
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))
    }
}

impl<W: Write + Send> RecordSink for CsvSink<W> {
    fn append(&mut self, record: &CorpusRecord) -> Result<()> {
        self.writer.write_record(record.to_row()).map_err(csv_error)
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

fn csv_error(err: csv::Error) -> Error {
    match err.into_kind() {
        csv::ErrorKind::Io(io) => Error::Io(io),
        other => Error::Internal(format!("CSV write failed: {:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn level(entries: Vec<(&str, Vec<&str>)>) -> CategoryMap {
        entries
            .into_iter()
            .map(|(c, names)| (c.to_string(), names.into_iter().map(String::from).collect()))
            .collect::<IndexMap<_, _>>()
    }

    fn record() -> CorpusRecord {
        CorpusRecord {
            matched_queries: vec!["Lung Neoplasms".to_string(), "Lung cancer".to_string()],
            id: "26000001".to_string(),
            title: "Outcomes, \"quoted\"".to_string(),
            abstract_text: "Line one\nline two".to_string(),
            authors: vec!["Smith JA".to_string(), "Doe J".to_string()],
            annotation_names: vec!["Humans".to_string(), "Lung Neoplasms".to_string()],
            classification: ClassificationResult {
                level1: level(vec![("Diseases", vec!["Lung Neoplasms", "Lung Neoplasms"])]),
                level2: level(vec![
                    ("Neoplasms", vec!["Lung Neoplasms"]),
                    ("Respiratory Tract Diseases", vec!["Lung Neoplasms"]),
                ]),
                level3: CategoryMap::new(),
            },
        }
    }

    #[test]
    fn test_render_summary_keeps_insertion_order() {
        let rendered = render_summary(&record().classification.level2);
        assert_eq!(rendered, "Neoplasms: Lung Neoplasms ; Respiratory Tract Diseases: Lung Neoplasms");
        assert_eq!(render_summary(&CategoryMap::new()), "");
    }

    #[test]
    fn test_row_layout() {
        let row = record().to_row();
        assert_eq!(row[0], "Lung Neoplasms, Lung cancer");
        assert_eq!(row[1], "26000001");
        assert_eq!(row[4], "Smith JA, Doe J");
        assert_eq!(row[5], "Humans, Lung Neoplasms");
        assert_eq!(row[6], "Diseases: Lung Neoplasms, Lung Neoplasms");
        assert_eq!(row[8], "");
    }

    #[test]
    fn test_csv_sink_writes_header_and_quoted_rows() {
        let mut sink = CsvSink::new(Vec::new()).unwrap();
        sink.append(&record()).unwrap();
        sink.finish().unwrap();

        let output = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        let mut lines = output.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Keywords,PMID,Title,Abstract,Authors,Mesh Terms,Level 1,Level 2,Level 3"
        );

        let mut reader = csv::Reader::from_reader(output.as_bytes());
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][2], "Outcomes, \"quoted\"");
        assert_eq!(&rows[0][3], "Line one\nline two");
    }
}
