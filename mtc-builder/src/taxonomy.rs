//! MeSH Descriptor Taxonomy
//!
//! Parses the NLM descriptor document (`desc2024.xml`) into descriptor
//! records and a tree-number index.
//!
//! # Document Shape
//! ```text
//! DescriptorRecordSet
//! └── DescriptorRecord
//!     ├── DescriptorName/String            → name
//!     ├── ConceptList/Concept/ScopeNote    → definition (first found)
//!     ├── ConceptList/Concept[/TermList]/Term[@Type="Synonym"] → synonyms
//!     └── TreeNumberList/TreeNumber        → tree numbers
//! ```
//!
//! # Error Handling
//! Any malformed input aborts the load. There is no partial-taxonomy mode:
//! the caller is expected to stop before retrieval begins.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Tree number (dotted path) → descriptor name
pub type TreeNumberIndex = HashMap<String, String>;

/// A named controlled-vocabulary concept
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Descriptor {
    /// Preferred descriptor name (unique key)
    pub name: String,
    /// Scope note of the first concept carrying one, empty if none
    pub definition: String,
    /// Terms marked `Type="Synonym"`
    pub synonyms: Vec<String>,
    /// Dotted hierarchy paths, in document order
    pub tree_numbers: Vec<String>,
}

impl Descriptor {
    /// Descriptor with tree numbers only (no definition or synonyms)
    pub fn new<I, S>(name: impl Into<String>, tree_numbers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            tree_numbers: tree_numbers.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

/// Taxonomy load failure
#[derive(Debug, Error)]
pub enum TaxonomyError {
    #[error("Failed to read taxonomy {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed taxonomy XML at byte {position}: {message}")]
    Malformed { position: u64, message: String },

    #[error("DescriptorRecord ending at byte {position} has no DescriptorName")]
    MissingName { position: u64 },

    #[error("Taxonomy document has no root element")]
    Empty,
}

impl From<TaxonomyError> for mtc_common::Error {
    fn from(err: TaxonomyError) -> Self {
        match err {
            TaxonomyError::Io { source, .. } => mtc_common::Error::Io(source),
            other => mtc_common::Error::Parse(other.to_string()),
        }
    }
}

/// Immutable descriptor set plus tree-number index
///
/// Built once at startup, then shared read-only (`Arc<Taxonomy>`) by every
/// concurrent classification call.
#[derive(Debug, Clone, Default)]
pub struct Taxonomy {
    descriptors: HashMap<String, Descriptor>,
    tree_index: TreeNumberIndex,
}

impl Taxonomy {
    /// Build a taxonomy from descriptors in registration order
    ///
    /// A tree number declared by more than one descriptor resolves to the
    /// one registered last; likewise for duplicate descriptor names.
    pub fn from_descriptors<I>(descriptors: I) -> Self
    where
        I: IntoIterator<Item = Descriptor>,
    {
        let mut taxonomy = Self::default();
        for descriptor in descriptors {
            taxonomy.register(descriptor);
        }
        taxonomy
    }

    fn register(&mut self, descriptor: Descriptor) {
        for tree_number in &descriptor.tree_numbers {
            self.tree_index
                .insert(tree_number.clone(), descriptor.name.clone());
        }
        self.descriptors.insert(descriptor.name.clone(), descriptor);
    }

    /// Parse a descriptor document from any buffered reader
    pub fn load<R: BufRead>(source: R) -> Result<Self, TaxonomyError> {
        TaxonomyParser::new(source).parse()
    }

    /// Open and parse a descriptor document from disk
    pub fn load_file(path: &Path) -> Result<Self, TaxonomyError> {
        let file = File::open(path).map_err(|source| TaxonomyError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let started = std::time::Instant::now();
        let taxonomy = Self::load(BufReader::new(file))?;
        info!(
            path = %path.display(),
            descriptors = taxonomy.len(),
            tree_numbers = taxonomy.tree_number_count(),
            elapsed_ms = started.elapsed().as_millis(),
            "Taxonomy loaded"
        );
        Ok(taxonomy)
    }

    pub fn descriptor(&self, name: &str) -> Option<&Descriptor> {
        self.descriptors.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.descriptors.contains_key(name)
    }

    /// Descriptor name registered for a tree number
    pub fn name_for_tree_number(&self, tree_number: &str) -> Option<&str> {
        self.tree_index.get(tree_number).map(String::as_str)
    }

    pub fn tree_index(&self) -> &TreeNumberIndex {
        &self.tree_index
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn tree_number_count(&self) -> usize {
        self.tree_index.len()
    }
}

// ============================================================================
// Streaming parser
// ============================================================================

/// Element whose text is being collected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capture {
    Name,
    ScopeNote,
    Synonym,
    TreeNumber,
}

/// Fields gathered for the record currently open
#[derive(Debug, Default)]
struct RecordBuilder {
    name: Option<String>,
    definition: Option<String>,
    synonyms: Vec<String>,
    tree_numbers: Vec<String>,
}

struct TaxonomyParser<R: BufRead> {
    reader: Reader<R>,
    path: Vec<String>,
    record: Option<RecordBuilder>,
    capture: Option<(Capture, usize)>,
    text: String,
    taxonomy: Taxonomy,
}

impl<R: BufRead> TaxonomyParser<R> {
    fn new(source: R) -> Self {
        let mut reader = Reader::from_reader(source);
        reader.config_mut().trim_text(true);
        Self {
            reader,
            path: Vec::new(),
            record: None,
            capture: None,
            text: String::new(),
            taxonomy: Taxonomy::default(),
        }
    }

    fn parse(mut self) -> Result<Taxonomy, TaxonomyError> {
        let mut buf = Vec::new();
        let mut saw_root = false;

        loop {
            let event = self
                .reader
                .read_event_into(&mut buf)
                .map_err(|e| self.malformed(e.to_string()))?;

            match event {
                Event::Start(start) => {
                    saw_root = true;
                    let name = local_name(&start);
                    self.open(&name, &start)?;
                }
                Event::Empty(start) => {
                    saw_root = true;
                    if local_name(&start) == "DescriptorRecord" {
                        return Err(TaxonomyError::MissingName {
                            position: self.position(),
                        });
                    }
                }
                Event::Text(text) => {
                    if self.accepts_text() {
                        let unescaped = text.unescape().map_err(|e| self.malformed(e.to_string()))?;
                        self.text.push_str(&unescaped);
                    }
                }
                Event::CData(data) => {
                    if self.accepts_text() {
                        self.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                    }
                }
                Event::End(_) => self.close()?,
                Event::Eof => {
                    if let Some(open) = self.path.last() {
                        return Err(self.malformed(format!(
                            "document ended inside <{}>",
                            open
                        )));
                    }
                    if !saw_root {
                        return Err(TaxonomyError::Empty);
                    }
                    break;
                }
                _ => {}
            }
            buf.clear();
        }

        debug!(descriptors = self.taxonomy.len(), "Taxonomy parse complete");
        Ok(self.taxonomy)
    }

    fn open(&mut self, name: &str, start: &BytesStart<'_>) -> Result<(), TaxonomyError> {
        if name == "DescriptorRecord" && self.record.is_none() {
            self.record = Some(RecordBuilder::default());
        }

        if self.record.is_some() && self.capture.is_none() {
            let parent = self.ancestor(0);
            let grandparent = self.ancestor(1);

            let capture = match name {
                "String" if parent == Some("DescriptorName") && grandparent == Some("DescriptorRecord") => {
                    Some(Capture::Name)
                }
                "ScopeNote" if parent == Some("Concept") && grandparent == Some("ConceptList") => {
                    Some(Capture::ScopeNote)
                }
                "Term" if parent == Some("Concept")
                    || (parent == Some("TermList") && grandparent == Some("Concept")) =>
                {
                    is_synonym(start)
                        .map_err(|message| self.malformed(message))?
                        .then_some(Capture::Synonym)
                }
                "TreeNumber" if parent == Some("TreeNumberList") => Some(Capture::TreeNumber),
                _ => None,
            };

            if let Some(capture) = capture {
                self.capture = Some((capture, self.path.len()));
                self.text.clear();
            }
        }

        self.path.push(name.to_string());
        Ok(())
    }

    fn close(&mut self) -> Result<(), TaxonomyError> {
        let closed = self.path.pop().unwrap_or_default();

        if let Some((capture, depth)) = self.capture {
            if depth == self.path.len() {
                self.capture = None;
                let value = self.text.trim().to_string();
                self.text.clear();
                if let Some(record) = self.record.as_mut() {
                    match capture {
                        Capture::Name => {
                            if record.name.is_none() {
                                record.name = Some(value);
                            }
                        }
                        Capture::ScopeNote => {
                            if record.definition.is_none() {
                                record.definition = Some(value);
                            }
                        }
                        Capture::Synonym => {
                            if !value.is_empty() {
                                record.synonyms.push(value);
                            }
                        }
                        Capture::TreeNumber => {
                            if !value.is_empty() {
                                record.tree_numbers.push(value);
                            }
                        }
                    }
                }
            }
        }

        if closed == "DescriptorRecord" && !self.path.iter().any(|p| p == "DescriptorRecord") {
            if let Some(record) = self.record.take() {
                let name = record
                    .name
                    .filter(|n| !n.is_empty())
                    .ok_or(TaxonomyError::MissingName {
                        position: self.position(),
                    })?;
                self.taxonomy.register(Descriptor {
                    name,
                    definition: record.definition.unwrap_or_default(),
                    synonyms: record.synonyms,
                    tree_numbers: record.tree_numbers,
                });
            }
        }

        Ok(())
    }

    /// Synonym terms may carry their text directly or in a `String` child
    fn accepts_text(&self) -> bool {
        match self.capture {
            Some((Capture::Synonym, depth)) => {
                let inner = &self.path[depth..];
                inner.len() == 1 || (inner.len() == 2 && inner[1] == "String")
            }
            Some(_) => true,
            None => false,
        }
    }

    fn ancestor(&self, n: usize) -> Option<&str> {
        self.path.iter().rev().nth(n).map(String::as_str)
    }

    fn position(&self) -> u64 {
        self.reader.buffer_position() as u64
    }

    fn malformed(&self, message: String) -> TaxonomyError {
        TaxonomyError::Malformed {
            position: self.position(),
            message,
        }
    }
}

fn local_name(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.local_name().as_ref()).into_owned()
}

fn is_synonym(start: &BytesStart<'_>) -> Result<bool, String> {
    let attr = start
        .try_get_attribute("Type")
        .map_err(|e| e.to_string())?;
    match attr {
        Some(attr) => {
            let value = attr.unescape_value().map_err(|e| e.to_string())?;
            Ok(value == "Synonym")
        }
        None => Ok(false),
    }
}
