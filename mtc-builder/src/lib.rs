//! mtc-builder library interface
//!
//! Builds a MeSH-tagged literature corpus:
//! 1. [`taxonomy`] loads the descriptor document once
//! 2. [`collector`] expands queries × years into an identifier set
//! 3. [`orchestrator`] retrieves, classifies ([`classify`]) and writes
//!    ([`sink`]) one record per identifier

pub mod classify;
pub mod collector;
pub mod orchestrator;
pub mod retry;
pub mod sink;
pub mod sources;
pub mod taxonomy;

pub use classify::{classify, ClassificationResult};
pub use collector::{collect, QueryMatches};
pub use orchestrator::{OrchestratorConfig, RetrievalOrchestrator, RetrievalReport, RetrievalState};
pub use retry::RetryPolicy;
pub use sink::{CorpusRecord, CsvSink, RecordSink};
pub use taxonomy::{Descriptor, Taxonomy, TaxonomyError};
