//! Document use-case service.
//!
//! # Responsibility
//! - Provide the insert/fetch entry points used by FFI and CLI callers.
//! - Emit metadata-only diagnostics for every persistence call.
//!
//! # Invariants
//! - Service APIs never bypass repository validation or transactions.
//! - Service layer remains storage-agnostic.
//! - Logs never contain document content (names, uris, amounts).

use crate::model::document::Document;
use crate::repo::document_repo::{DocumentRepository, RepoResult};
use log::{error, info};
use std::time::Instant;

/// Use-case service wrapper for document persistence.
pub struct DocumentService<R: DocumentRepository> {
    repo: R,
}

impl<R: DocumentRepository> DocumentService<R> {
    /// Creates a service using the provided repository implementation.
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Persists one document with all of its children.
    ///
    /// # Contract
    /// - Either everything is committed or nothing is.
    /// - Returns the document with its generated `id`.
    /// - No retry is attempted on failure.
    pub fn insert_document(&mut self, document: &Document) -> RepoResult<Document> {
        let started_at = Instant::now();
        match self.repo.insert_document(document) {
            Ok(stored) => {
                info!(
                    "event=document_insert module=service status=ok document_id={} images={} scanned={} duration_ms={}",
                    stored.id.as_deref().unwrap_or("-"),
                    stored.document_images.len(),
                    stored.is_scanned(),
                    started_at.elapsed().as_millis()
                );
                Ok(stored)
            }
            Err(err) => {
                error!(
                    "event=document_insert module=service status=error duration_ms={} error_code={} error={}",
                    started_at.elapsed().as_millis(),
                    err.error_code(),
                    err
                );
                Err(err)
            }
        }
    }

    /// Loads all stored documents.
    pub fn list_documents(&self) -> RepoResult<Vec<Document>> {
        let started_at = Instant::now();
        let result = self.repo.list_documents();
        match &result {
            Ok(documents) => info!(
                "event=document_fetch module=service status=ok count={} duration_ms={}",
                documents.len(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=document_fetch module=service status=error duration_ms={} error_code={} error={}",
                started_at.elapsed().as_millis(),
                err.error_code(),
                err
            ),
        }
        result
    }

    /// Loads one document by id; `Ok(None)` when it does not exist.
    pub fn get_document(&self, id: &str) -> RepoResult<Option<Document>> {
        let result = self.repo.get_document(id);
        if let Err(err) = &result {
            error!(
                "event=document_get module=service status=error error_code={} error={}",
                err.error_code(),
                err
            );
        }
        result
    }
}
