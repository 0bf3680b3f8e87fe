/// Mailgraph Core - ingestion and extraction library
///
/// This crate contains the shared domain logic for the Mailgraph system:
/// credential storage, mail provider adapters, the sync coordinator, the
/// qualification engine, the job queue, the extraction pipeline, and the
/// entity store. The worker and API binaries compose these pieces.
pub mod constants;
pub mod credentials;
pub mod error;
pub mod extract;
pub mod models;
pub mod pipeline;
pub mod providers;
pub mod qualify;
pub mod queue;
pub mod storage;
pub mod store;
pub mod sync;
pub mod utils;

// Re-export commonly used types
pub use error::MailgraphError;
pub use models::MailgraphConfig;
pub use store::GraphStore;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
