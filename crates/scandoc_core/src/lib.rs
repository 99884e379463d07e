//! Persistence core for scanned documents.
//! Owns the schema, the atomic multi-table write and the nested read path.

pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use logging::{default_log_level, init_logging, logging_status, LogLevel, LoggingError};
pub use model::document::{
    Document, DocumentId, DocumentImage, DocumentValidationError, OverallSummary, ScanResponse,
    TarmedPosition, TarmedSummary,
};
pub use repo::document_repo::{DocumentRepository, RepoError, RepoResult, SqliteDocumentRepository};
pub use service::document_service::DocumentService;

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
