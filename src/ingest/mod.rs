//! MBOX ingestion: chunked parsing, queueing, materialization, and
//! per-source progress tracking (SPEC_FULL.md §4.1-§4.4).

pub mod chunker;
pub mod consumer;
pub mod materializer;
pub mod parser;
pub mod progress;
pub mod queue;

pub use consumer::Consumer;
pub use parser::{ParseEmailError, ParsedEmail, parse_email};
pub use queue::{Queue, QueueMessage};
