use rusqlite::Connection;
use scandoc_core::db::{open_db, open_db_in_memory, DbError};
use scandoc_core::{
    Document, DocumentImage, DocumentRepository, OverallSummary, RepoError, ScanResponse,
    SqliteDocumentRepository, TarmedPosition, TarmedSummary,
};
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;

const POISONED_RELEVANT_ID: i64 = 999;

fn document(name: &str, relevant_ids: Vec<i64>) -> Document {
    let mut document = Document::new(name);
    document.document_images = vec![DocumentImage {
        uri: format!("file:///scans/{name}.jpg"),
        width: 800,
        height: 600,
        exif: None,
    }];
    document.scan_response = Some(ScanResponse {
        original: vec![TarmedPosition {
            date: "2024-05-02".to_string(),
            tariff: "001".to_string(),
            tariff_code: format!("{name}-code"),
            reference_code: None,
            description: "Besuch".to_string(),
            quantity: 2.0,
            amount: 30.0,
        }],
        summaries: vec![TarmedSummary {
            date: "2024-05-02".to_string(),
            emoji: "💊".to_string(),
            title: format!("{name} summary"),
            description: "Medikamente".to_string(),
            operation: "sum".to_string(),
            reasoning: Some("listed twice".to_string()),
            relevant_ids,
            amount: 60.0,
        }],
        overall_summary: OverallSummary {
            date: "2024-05-02".to_string(),
            title: format!("{name} total"),
            total_amount: 60.0,
        },
    });
    document
}

fn install_failing_relevant_id_trigger(conn: &Connection) {
    conn.execute_batch(&format!(
        "CREATE TRIGGER fail_poisoned_relevant_id
         BEFORE INSERT ON tarmed_summary_relevant_ids
         WHEN NEW.relevant_id = {POISONED_RELEVANT_ID}
         BEGIN
             SELECT RAISE(ABORT, 'injected relevant id failure');
         END;"
    ))
    .unwrap();
}

fn row_counts(conn: &Connection) -> [i64; 6] {
    let mut counts = [0; 6];
    for (slot, table) in counts.iter_mut().zip([
        "documents",
        "document_images",
        "tarmed_positions",
        "tarmed_summaries",
        "tarmed_summary_relevant_ids",
        "overall_summaries",
    ]) {
        *slot = conn
            .query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| {
                row.get(0)
            })
            .unwrap();
    }
    counts
}

#[test]
fn failure_on_last_relevant_id_rolls_back_every_table() {
    let mut conn = open_db_in_memory().unwrap();
    install_failing_relevant_id_trigger(&conn);

    {
        let mut repo = SqliteDocumentRepository::try_new(&mut conn).unwrap();
        let err = repo
            .insert_document(&document("poisoned", vec![1, 2, POISONED_RELEVANT_ID]))
            .unwrap_err();
        assert_eq!(err.error_code(), "db_constraint_violation");
        match err {
            RepoError::Db(DbError::Sqlite(cause)) => {
                assert!(cause.to_string().contains("injected relevant id failure"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(repo.list_documents().unwrap().is_empty());
    }

    assert_eq!(row_counts(&conn), [0; 6]);
}

#[test]
fn failed_write_does_not_affect_previously_committed_documents() {
    let mut conn = open_db_in_memory().unwrap();
    install_failing_relevant_id_trigger(&conn);

    let mut repo = SqliteDocumentRepository::try_new(&mut conn).unwrap();
    let kept = repo.insert_document(&document("kept", vec![1])).unwrap();
    repo.insert_document(&document("poisoned", vec![POISONED_RELEVANT_ID]))
        .unwrap_err();
    let after = repo.insert_document(&document("after", vec![2])).unwrap();

    let documents = repo.list_documents().unwrap();
    assert_eq!(documents, vec![kept, after]);
}

#[test]
fn validation_failure_writes_nothing() {
    let mut conn = open_db_in_memory().unwrap();
    {
        let mut repo = SqliteDocumentRepository::try_new(&mut conn).unwrap();
        let mut invalid = document("invalid", vec![1]);
        invalid
            .scan_response
            .as_mut()
            .unwrap()
            .overall_summary
            .total_amount = f64::INFINITY;

        let err = repo.insert_document(&invalid).unwrap_err();
        assert!(matches!(err, RepoError::Validation(_)));
    }
    assert_eq!(row_counts(&conn), [0; 6]);
}

#[test]
fn deleting_a_document_cascades_to_all_children() {
    let mut conn = open_db_in_memory().unwrap();
    let (doomed, survivor) = {
        let mut repo = SqliteDocumentRepository::try_new(&mut conn).unwrap();
        (
            repo.insert_document(&document("doomed", vec![1, 2])).unwrap(),
            repo.insert_document(&document("survivor", vec![3])).unwrap(),
        )
    };

    conn.execute(
        "DELETE FROM documents WHERE id = ?1;",
        [doomed.id.as_deref().unwrap()],
    )
    .unwrap();

    assert_eq!(row_counts(&conn), [1, 1, 1, 1, 1, 1]);
    let repo = SqliteDocumentRepository::try_new(&mut conn).unwrap();
    assert_eq!(repo.list_documents().unwrap(), vec![survivor]);
}

#[test]
fn child_rows_reject_unknown_parent_ids() {
    let conn = open_db_in_memory().unwrap();
    let err = conn
        .execute(
            "INSERT INTO document_images (document_id, uri, width, height)
             VALUES (4242, 'file:///orphan.jpg', 1, 1);",
            [],
        )
        .unwrap_err();
    assert!(err.to_string().contains("FOREIGN KEY"));
}

#[test]
fn concurrent_writers_never_mix_child_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("concurrent.db");
    drop(open_db(&path).unwrap());

    const WRITERS: usize = 4;
    const DOCUMENTS_PER_WRITER: usize = 5;
    let barrier = Arc::new(Barrier::new(WRITERS));

    let handles: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || write_batch(&path, writer, DOCUMENTS_PER_WRITER, &barrier))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut conn = open_db(&path).unwrap();
    let repo = SqliteDocumentRepository::try_new(&mut conn).unwrap();
    let documents = repo.list_documents().unwrap();
    assert_eq!(documents.len(), WRITERS * DOCUMENTS_PER_WRITER);

    for loaded in documents {
        let name = loaded.name.as_str();
        assert_eq!(loaded.document_images[0].uri, format!("file:///scans/{name}.jpg"));
        let scan = loaded.scan_response.expect("every writer stores scanned documents");
        assert_eq!(scan.original.len(), 1);
        assert_eq!(scan.original[0].tariff_code, format!("{name}-code"));
        assert_eq!(scan.summaries.len(), 1);
        assert_eq!(scan.summaries[0].title, format!("{name} summary"));
        assert_eq!(scan.overall_summary.title, format!("{name} total"));
    }
}

fn write_batch(path: &Path, writer: usize, count: usize, barrier: &Barrier) {
    let mut conn = open_db(path).unwrap();
    let mut repo = SqliteDocumentRepository::try_new(&mut conn).unwrap();
    barrier.wait();
    for index in 0..count {
        let name = format!("writer{writer}-doc{index}");
        repo.insert_document(&document(&name, vec![writer as i64, index as i64]))
            .unwrap();
    }
}
