//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `scandoc_core` linkage without the Flutter runtime.
//! - With a database path argument, print one line per stored document.

use scandoc_core::db::open_db;
use scandoc_core::{Document, DocumentService, SqliteDocumentRepository};
use std::process::ExitCode;

fn main() -> ExitCode {
    println!("scandoc_core ping={}", scandoc_core::ping());
    println!("scandoc_core version={}", scandoc_core::core_version());

    let Some(db_path) = std::env::args().nth(1) else {
        return ExitCode::SUCCESS;
    };

    match list_documents(&db_path) {
        Ok(documents) => {
            println!("documents={}", documents.len());
            for document in &documents {
                println!("{}", describe(document));
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn list_documents(db_path: &str) -> Result<Vec<Document>, Box<dyn std::error::Error>> {
    let mut conn = open_db(db_path)?;
    let repo = SqliteDocumentRepository::try_new(&mut conn)?;
    let service = DocumentService::new(repo);
    let documents = service.list_documents()?;
    Ok(documents)
}

fn describe(document: &Document) -> String {
    let total = document
        .scan_response
        .as_ref()
        .map(|scan| format!("{:.2}", scan.overall_summary.total_amount))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "id={} name={:?} images={} scanned={} total={}",
        document.id.as_deref().unwrap_or("-"),
        document.name,
        document.document_images.len(),
        document.is_scanned(),
        total
    )
}
