//! FFI use-case API for Flutter-facing calls.
//!
//! # Responsibility
//! - Expose the document insert/fetch entry points to Dart via FRB.
//! - Own the process-wide database handle.
//! - Convert every core error into a response envelope.
//!
//! # Invariants
//! - Exported functions must not panic across FFI boundary.
//! - The database handle is opened at most once per process.
//! - Documents cross the boundary as JSON text (image metadata is free-form JSON).

use log::warn;
use rusqlite::Connection;
use scandoc_core::db::open_db;
use scandoc_core::{
    core_version as core_version_inner, init_logging as init_logging_inner, ping as ping_inner,
    Document, DocumentService, SqliteDocumentRepository,
};
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

const DB_FILE_NAME: &str = "scandoc.sqlite3";
const DB_PATH_ENV: &str = "SCANDOC_DB_PATH";

struct DatabaseHandle {
    path: PathBuf,
    conn: Mutex<Connection>,
}

static DATABASE: OnceLock<DatabaseHandle> = OnceLock::new();

/// Minimal health-check API for FRB smoke integration.
///
/// # FFI contract
/// - Sync call, non-blocking.
/// - Never throws; always returns a UTF-8 string.
#[flutter_rust_bridge::frb(sync)]
pub fn ping() -> String {
    ping_inner().to_owned()
}

/// Expose core crate version through FFI.
#[flutter_rust_bridge::frb(sync)]
pub fn core_version() -> String {
    core_version_inner().to_owned()
}

/// Initializes Rust core logging once per process.
///
/// Input semantics:
/// - `level`: one of `trace|debug|info|warn|error` (case-insensitive).
/// - `log_dir`: absolute directory path where rolling logs are written.
///
/// # FFI contract
/// - Safe to call repeatedly with the same `level + log_dir` (idempotent).
/// - Returns empty string on success and error message on failure.
#[flutter_rust_bridge::frb(sync)]
pub fn init_logging(level: String, log_dir: String) -> String {
    match init_logging_inner(level.as_str(), log_dir.as_str()) {
        Ok(()) => String::new(),
        Err(err) => err.to_string(),
    }
}

/// Opens the process-wide document database at `db_path`.
///
/// # FFI contract
/// - Must be called before any document call to pick a custom location;
///   otherwise the first document call opens the default location.
/// - Repeated calls with the same path are idempotent.
/// - Returns empty string on success and error message on failure.
#[flutter_rust_bridge::frb(sync)]
pub fn init_database(db_path: String) -> String {
    let requested = PathBuf::from(db_path.trim());
    if requested.as_os_str().is_empty() {
        return "db_path cannot be empty".to_string();
    }

    match database_at(requested.clone()) {
        Ok(handle) if handle.path == requested => String::new(),
        Ok(handle) => format!(
            "database already open at `{}`; refusing to switch to `{}`",
            handle.path.display(),
            requested.display()
        ),
        Err(err) => err,
    }
}

/// Response envelope for `documents_insert`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInsertResponse {
    /// Whether the document was committed.
    pub ok: bool,
    /// Stored document JSON including its generated `id`.
    pub document_json: Option<String>,
    /// Human-readable response message for diagnostics/UI.
    pub message: String,
}

/// Response envelope for `documents_fetch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentListResponse {
    pub ok: bool,
    /// JSON array of documents; `None` on failure, never a partial list.
    pub documents_json: Option<String>,
    pub message: String,
}

/// Response envelope for `document_get`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentGetResponse {
    pub ok: bool,
    /// Document JSON; `None` when missing or on failure.
    pub document_json: Option<String>,
    pub message: String,
}

/// Persists one document with all of its images and scan data.
///
/// # FFI contract
/// - Sync call, DB-backed execution.
/// - All-or-nothing: on failure no row of this document is stored.
/// - Never panics.
#[flutter_rust_bridge::frb(sync)]
pub fn documents_insert(document_json: String) -> DocumentInsertResponse {
    let result = serde_json::from_str::<Document>(&document_json)
        .map_err(|err| format!("invalid document json: {err}"))
        .and_then(|document| {
            with_document_service(|service| {
                service
                    .insert_document(&document)
                    .map_err(|err| err.to_string())
            })
        })
        .and_then(|stored| serde_json::to_string(&stored).map_err(|err| err.to_string()));

    match result {
        Ok(json) => DocumentInsertResponse {
            ok: true,
            document_json: Some(json),
            message: "Document saved.".to_string(),
        },
        Err(err) => DocumentInsertResponse {
            ok: false,
            document_json: None,
            message: format!("documents_insert failed: {err}"),
        },
    }
}

/// Loads all stored documents.
///
/// # FFI contract
/// - Sync call, DB-backed execution, read only.
/// - Never panics.
#[flutter_rust_bridge::frb(sync)]
pub fn documents_fetch() -> DocumentListResponse {
    let result = with_document_service(|service| {
        service.list_documents().map_err(|err| err.to_string())
    })
    .and_then(|documents| {
        let count = documents.len();
        serde_json::to_string(&documents)
            .map(|json| (json, count))
            .map_err(|err| err.to_string())
    });

    match result {
        Ok((json, count)) => DocumentListResponse {
            ok: true,
            documents_json: Some(json),
            message: format!("Loaded {count} document(s)."),
        },
        Err(err) => DocumentListResponse {
            ok: false,
            documents_json: None,
            message: format!("documents_fetch failed: {err}"),
        },
    }
}

/// Loads one document by id.
///
/// # FFI contract
/// - `ok = true` with `document_json = None` means the id does not exist.
/// - Never panics.
#[flutter_rust_bridge::frb(sync)]
pub fn document_get(id: String) -> DocumentGetResponse {
    let result = with_document_service(|service| {
        service
            .get_document(id.as_str())
            .map_err(|err| err.to_string())
    })
    .and_then(|document| {
        document
            .map(|document| serde_json::to_string(&document))
            .transpose()
            .map_err(|err| err.to_string())
    });

    match result {
        Ok(Some(json)) => DocumentGetResponse {
            ok: true,
            document_json: Some(json),
            message: "Document found.".to_string(),
        },
        Ok(None) => DocumentGetResponse {
            ok: true,
            document_json: None,
            message: format!("Document {} not found.", id.trim()),
        },
        Err(err) => DocumentGetResponse {
            ok: false,
            document_json: None,
            message: format!("document_get failed: {err}"),
        },
    }
}

fn default_db_path() -> PathBuf {
    if let Ok(raw) = std::env::var(DB_PATH_ENV) {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    std::env::temp_dir().join(DB_FILE_NAME)
}

fn database_at(path: PathBuf) -> Result<&'static DatabaseHandle, String> {
    if let Some(handle) = DATABASE.get() {
        return Ok(handle);
    }

    let conn = open_db(&path).map_err(|err| format!("database open failed: {err}"))?;
    // A racing caller may have won; its handle is kept and ours is dropped.
    Ok(DATABASE.get_or_init(|| DatabaseHandle {
        path,
        conn: Mutex::new(conn),
    }))
}

fn with_document_service<T>(
    f: impl FnOnce(&mut DocumentService<SqliteDocumentRepository<'_>>) -> Result<T, String>,
) -> Result<T, String> {
    let handle = match DATABASE.get() {
        Some(handle) => handle,
        None => database_at(default_db_path())?,
    };

    let mut conn = match handle.conn.lock() {
        Ok(conn) => conn,
        Err(poisoned) => {
            warn!("event=db_lock module=ffi status=recovered reason=poisoned");
            poisoned.into_inner()
        }
    };
    let repo = SqliteDocumentRepository::try_new(&mut conn)
        .map_err(|err| format!("document repo init failed: {err}"))?;
    let mut service = DocumentService::new(repo);
    f(&mut service)
}

#[cfg(test)]
mod tests {
    use super::{
        core_version, document_get, documents_fetch, documents_insert, init_database,
        init_logging, ping,
    };
    use serde_json::{json, Value};
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }

    #[test]
    fn init_logging_rejects_empty_log_dir() {
        let error = init_logging("info".to_string(), String::new());
        assert!(!error.is_empty());
    }

    #[test]
    fn init_logging_rejects_unsupported_level() {
        let error = init_logging("verbose".to_string(), "/tmp/logs".to_string());
        assert!(error.contains("unsupported log level"));
    }

    #[test]
    fn init_database_rejects_empty_path() {
        assert!(!init_database("  ".to_string()).is_empty());
    }

    #[test]
    fn insert_then_fetch_and_get_roundtrip() {
        let name = unique_token("ffi-roundtrip");
        let payload = json!({
            "name": name,
            "documentImages": [
                {"uri": "file:///ffi.jpg", "width": 10, "height": 20, "exif": {"Make": "Pixel"}}
            ],
            "scanResponse": {
                "original": [],
                "summaries": [{
                    "datum": "2024-02-02",
                    "emoji": "🧾",
                    "titel": "Labor",
                    "beschreibung": "Blutbild",
                    "operation": "sum",
                    "relevant_ids": [3, 7, 9],
                    "betrag": 12.0
                }],
                "overallSummary": {"datum": "2024-02-02", "titel": "Total", "gesamtbetrag": 12.0}
            }
        });

        let inserted = documents_insert(payload.to_string());
        assert!(inserted.ok, "{}", inserted.message);
        let stored: Value = serde_json::from_str(&inserted.document_json.unwrap()).unwrap();
        let id = stored["id"].as_str().unwrap().to_string();

        let fetched = documents_fetch();
        assert!(fetched.ok, "{}", fetched.message);
        let documents: Value = serde_json::from_str(&fetched.documents_json.unwrap()).unwrap();
        let found = documents
            .as_array()
            .unwrap()
            .iter()
            .find(|document| document["id"] == id.as_str())
            .expect("inserted document is listed");
        assert_eq!(found["name"], name.as_str());
        assert_eq!(
            found["scanResponse"]["summaries"][0]["relevant_ids"],
            json!([3, 7, 9])
        );
        assert!(found["scanResponse"]["summaries"][0]
            .get("reasoning")
            .is_none());

        let single = document_get(id.clone());
        assert!(single.ok, "{}", single.message);
        let single: Value = serde_json::from_str(&single.document_json.unwrap()).unwrap();
        assert_eq!(single, *found);
    }

    #[test]
    fn insert_rejects_malformed_json() {
        let response = documents_insert("{\"name\": ".to_string());
        assert!(!response.ok);
        assert!(response.document_json.is_none());
        assert!(response.message.contains("invalid document json"));
    }

    #[test]
    fn get_reports_invalid_and_missing_ids() {
        let invalid = document_get("abc".to_string());
        assert!(!invalid.ok);
        assert!(invalid.message.contains("invalid document id"));

        let missing = document_get(i64::MAX.to_string());
        assert!(missing.ok, "{}", missing.message);
        assert!(missing.document_json.is_none());
    }

    fn unique_token(prefix: &str) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time went backwards")
            .as_nanos();
        format!("{prefix}-{nanos}")
    }
}
