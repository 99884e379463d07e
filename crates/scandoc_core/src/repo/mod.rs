//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts for documents.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Repository writes must enforce `Document::validate()` before persistence.
//! - Multi-table writes happen inside exactly one transaction.

pub mod document_repo;
