//! In-memory repositories for tests and single-process deployments.
//!
//! Each repository keeps its state behind one Tokio mutex, which gives the
//! same per-document serialization the PostgreSQL row lock provides.

pub mod document;
pub mod job;
pub mod node;

pub use document::MemoryDocumentRepository;
pub use job::MemoryJobRepository;
pub use node::MemoryNodeDirectory;
