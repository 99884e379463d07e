//! Document repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Commit one document aggregate across all five tables in one transaction.
//! - Fold the relational rows back into nested `Document` values.
//!
//! # Invariants
//! - Child rows only ever reference the id generated by the same transaction.
//! - A failed write leaves no row behind in any table.
//! - `scan_response` is rebuilt iff an `overall_summaries` row exists.
//! - Every collection is read back in insertion order (`id ASC`).
//! - SQL NULL is the only stored value mapped to `None`.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::document::{
    Document, DocumentImage, DocumentValidationError, OverallSummary, ScanResponse,
    TarmedPosition, TarmedSummary,
};
use rusqlite::types::FromSql;
use rusqlite::{params, Connection, Row, Transaction, TransactionBehavior};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for document persistence and reconstruction.
#[derive(Debug)]
pub enum RepoError {
    /// Document rejected before any SQL was issued.
    Validation(DocumentValidationError),
    /// Storage engine failure; the surrounding transaction was rolled back.
    Db(DbError),
    /// Image metadata could not be encoded as JSON text.
    Serialization(serde_json::Error),
    /// External document id is not a numeric key.
    InvalidId(String),
    /// Persisted rows cannot be converted back into a document.
    InvalidData(String),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Connection was opened without `PRAGMA foreign_keys = ON`.
    ForeignKeysDisabled,
}

impl RepoError {
    /// Stable code used in `error_code=` log fields.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "document_invalid",
            Self::Db(err) => err.error_code(),
            Self::Serialization(_) => "exif_encode_failed",
            Self::InvalidId(_) => "document_id_invalid",
            Self::InvalidData(_) => "document_data_invalid",
            Self::UninitializedConnection { .. } => "db_uninitialized",
            Self::ForeignKeysDisabled => "db_foreign_keys_disabled",
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Serialization(err) => write!(f, "failed to encode image metadata: {err}"),
            Self::InvalidId(id) => write!(f, "invalid document id `{id}`"),
            Self::InvalidData(message) => write!(f, "invalid persisted document data: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "document repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::ForeignKeysDisabled => {
                write!(f, "document repository requires foreign_keys=ON")
            }
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Serialization(err) => Some(err),
            Self::InvalidId(_) => None,
            Self::InvalidData(_) => None,
            Self::UninitializedConnection { .. } => None,
            Self::ForeignKeysDisabled => None,
        }
    }
}

impl From<DocumentValidationError> for RepoError {
    fn from(value: DocumentValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

/// Repository interface for document aggregates.
pub trait DocumentRepository {
    /// Writes the document and all children atomically.
    ///
    /// Returns the input document with `id` set to the generated key.
    fn insert_document(&mut self, document: &Document) -> RepoResult<Document>;
    /// Loads every stored document, ordered by id.
    fn list_documents(&self) -> RepoResult<Vec<Document>>;
    /// Loads one document by its external id.
    fn get_document(&self, id: &str) -> RepoResult<Option<Document>>;
}

/// SQLite-backed document repository.
pub struct SqliteDocumentRepository<'conn> {
    conn: &'conn mut Connection,
}

impl<'conn> SqliteDocumentRepository<'conn> {
    /// Constructs a repository from a migrated connection with foreign keys on.
    pub fn try_new(conn: &'conn mut Connection) -> RepoResult<Self> {
        ensure_document_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl DocumentRepository for SqliteDocumentRepository<'_> {
    fn insert_document(&mut self, document: &Document) -> RepoResult<Document> {
        document.validate()?;

        // Dropping `tx` on any early return rolls the whole write back.
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let document_id = insert_document_rows(&tx, document)?;
        tx.commit()?;

        let mut stored = document.clone();
        stored.id = Some(document_id.to_string());
        Ok(stored)
    }

    fn list_documents(&self) -> RepoResult<Vec<Document>> {
        load_documents(self.conn, None)
    }

    fn get_document(&self, id: &str) -> RepoResult<Option<Document>> {
        let key = parse_document_id(id)?;
        Ok(load_documents(self.conn, Some(key))?.into_iter().next())
    }
}

/// Parses the external string id back into the numeric key.
pub fn parse_document_id(id: &str) -> RepoResult<i64> {
    id.trim()
        .parse::<i64>()
        .map_err(|_| RepoError::InvalidId(id.to_string()))
}

fn insert_document_rows(tx: &Transaction<'_>, document: &Document) -> RepoResult<i64> {
    let document_id: i64 = tx.query_row(
        "INSERT INTO documents (name) VALUES (?1) RETURNING id;",
        [document.name.as_str()],
        |row| row.get(0),
    )?;

    {
        let mut insert_image = tx.prepare_cached(
            "INSERT INTO document_images (document_id, uri, width, height, exif)
             VALUES (?1, ?2, ?3, ?4, ?5);",
        )?;
        for image in &document.document_images {
            let exif = image.exif.as_ref().map(serde_json::to_string).transpose()?;
            insert_image.execute(params![
                document_id,
                image.uri.as_str(),
                image.width,
                image.height,
                exif,
            ])?;
        }
    }

    if let Some(scan) = document.scan_response.as_ref() {
        insert_scan_response(tx, document_id, scan)?;
    }

    Ok(document_id)
}

fn insert_scan_response(
    tx: &Transaction<'_>,
    document_id: i64,
    scan: &ScanResponse,
) -> RepoResult<()> {
    let mut insert_position = tx.prepare_cached(
        "INSERT INTO tarmed_positions (
            document_id,
            date,
            tariff,
            tariff_code,
            reference_code,
            description,
            quantity,
            amount
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
    )?;
    for position in &scan.original {
        insert_position.execute(params![
            document_id,
            position.date.as_str(),
            position.tariff.as_str(),
            position.tariff_code.as_str(),
            position.reference_code.as_deref(),
            position.description.as_str(),
            position.quantity,
            position.amount,
        ])?;
    }

    let mut insert_summary = tx.prepare_cached(
        "INSERT INTO tarmed_summaries (
            document_id,
            date,
            emoji,
            title,
            description,
            operation,
            reasoning,
            amount
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        RETURNING id;",
    )?;
    let mut insert_relevant_id = tx.prepare_cached(
        "INSERT INTO tarmed_summary_relevant_ids (summary_id, relevant_id)
         VALUES (?1, ?2);",
    )?;
    for summary in &scan.summaries {
        let summary_id: i64 = insert_summary.query_row(
            params![
                document_id,
                summary.date.as_str(),
                summary.emoji.as_str(),
                summary.title.as_str(),
                summary.description.as_str(),
                summary.operation.as_str(),
                summary.reasoning.as_deref(),
                summary.amount,
            ],
            |row| row.get(0),
        )?;
        for relevant_id in &summary.relevant_ids {
            insert_relevant_id.execute(params![summary_id, relevant_id])?;
        }
    }

    let overall = &scan.overall_summary;
    tx.execute(
        "INSERT INTO overall_summaries (document_id, date, title, total_amount)
         VALUES (?1, ?2, ?3, ?4);",
        params![
            document_id,
            overall.date.as_str(),
            overall.title.as_str(),
            overall.total_amount,
        ],
    )?;

    Ok(())
}

/// Loads documents and their relations with one statement per table.
///
/// `only` restricts the load to one document key. All statements run inside
/// one read transaction so the fold sees a single committed snapshot.
fn load_documents(conn: &Connection, only: Option<i64>) -> RepoResult<Vec<Document>> {
    let tx = conn.unchecked_transaction()?;

    let mut heads: Vec<(i64, String)> = Vec::new();
    {
        let mut stmt = tx.prepare(
            "SELECT id, name
             FROM documents
             WHERE (?1 IS NULL OR id = ?1)
             ORDER BY id ASC;",
        )?;
        let mut rows = stmt.query([only])?;
        while let Some(row) = rows.next()? {
            heads.push((row.get("id")?, row.get("name")?));
        }
    }

    let mut images = load_images(&tx, only)?;
    let mut positions = load_positions(&tx, only)?;
    let mut summaries = load_summaries(&tx, only)?;
    let mut overall = load_overall_summaries(&tx, only)?;

    // Read-only; finishing the transaction just releases the snapshot.
    tx.finish()?;

    let documents = heads
        .into_iter()
        .map(|(id, name)| {
            let scan_response = overall.remove(&id).map(|overall_summary| ScanResponse {
                original: positions.remove(&id).unwrap_or_default(),
                summaries: summaries.remove(&id).unwrap_or_default(),
                overall_summary,
            });
            Document {
                id: Some(id.to_string()),
                name,
                document_images: images.remove(&id).unwrap_or_default(),
                scan_response,
            }
        })
        .collect();

    Ok(documents)
}

fn load_images(
    conn: &Connection,
    only: Option<i64>,
) -> RepoResult<HashMap<i64, Vec<DocumentImage>>> {
    let mut stmt = conn.prepare(
        "SELECT id, document_id, uri, width, height, exif
         FROM document_images
         WHERE (?1 IS NULL OR document_id = ?1)
         ORDER BY id ASC;",
    )?;
    let mut rows = stmt.query([only])?;
    let mut grouped: HashMap<i64, Vec<DocumentImage>> = HashMap::new();
    while let Some(row) = rows.next()? {
        let image = parse_image_row(row)?;
        grouped
            .entry(row.get("document_id")?)
            .or_default()
            .push(image);
    }
    Ok(grouped)
}

fn load_positions(
    conn: &Connection,
    only: Option<i64>,
) -> RepoResult<HashMap<i64, Vec<TarmedPosition>>> {
    let mut stmt = conn.prepare(
        "SELECT
            document_id,
            date,
            tariff,
            tariff_code,
            reference_code,
            description,
            quantity,
            amount
         FROM tarmed_positions
         WHERE (?1 IS NULL OR document_id = ?1)
         ORDER BY id ASC;",
    )?;
    let mut rows = stmt.query([only])?;
    let mut grouped: HashMap<i64, Vec<TarmedPosition>> = HashMap::new();
    while let Some(row) = rows.next()? {
        let position = TarmedPosition {
            date: row.get("date")?,
            tariff: row.get("tariff")?,
            tariff_code: row.get("tariff_code")?,
            reference_code: optional_column(row, "reference_code")?,
            description: row.get("description")?,
            quantity: row.get("quantity")?,
            amount: row.get("amount")?,
        };
        grouped
            .entry(row.get("document_id")?)
            .or_default()
            .push(position);
    }
    Ok(grouped)
}

fn load_summaries(
    conn: &Connection,
    only: Option<i64>,
) -> RepoResult<HashMap<i64, Vec<TarmedSummary>>> {
    let mut relevant_ids: HashMap<i64, Vec<i64>> = HashMap::new();
    {
        let mut stmt = conn.prepare(
            "SELECT r.summary_id, r.relevant_id
             FROM tarmed_summary_relevant_ids r
             INNER JOIN tarmed_summaries s ON s.id = r.summary_id
             WHERE (?1 IS NULL OR s.document_id = ?1)
             ORDER BY r.id ASC;",
        )?;
        let mut rows = stmt.query([only])?;
        while let Some(row) = rows.next()? {
            relevant_ids
                .entry(row.get("summary_id")?)
                .or_default()
                .push(row.get("relevant_id")?);
        }
    }

    let mut stmt = conn.prepare(
        "SELECT
            id,
            document_id,
            date,
            emoji,
            title,
            description,
            operation,
            reasoning,
            amount
         FROM tarmed_summaries
         WHERE (?1 IS NULL OR document_id = ?1)
         ORDER BY id ASC;",
    )?;
    let mut rows = stmt.query([only])?;
    let mut grouped: HashMap<i64, Vec<TarmedSummary>> = HashMap::new();
    while let Some(row) = rows.next()? {
        let summary_id: i64 = row.get("id")?;
        let summary = TarmedSummary {
            date: row.get("date")?,
            emoji: row.get("emoji")?,
            title: row.get("title")?,
            description: row.get("description")?,
            operation: row.get("operation")?,
            reasoning: optional_column(row, "reasoning")?,
            relevant_ids: relevant_ids.remove(&summary_id).unwrap_or_default(),
            amount: row.get("amount")?,
        };
        grouped
            .entry(row.get("document_id")?)
            .or_default()
            .push(summary);
    }
    Ok(grouped)
}

fn load_overall_summaries(
    conn: &Connection,
    only: Option<i64>,
) -> RepoResult<HashMap<i64, OverallSummary>> {
    let mut stmt = conn.prepare(
        "SELECT document_id, date, title, total_amount
         FROM overall_summaries
         WHERE (?1 IS NULL OR document_id = ?1);",
    )?;
    let mut rows = stmt.query([only])?;
    let mut by_document = HashMap::new();
    while let Some(row) = rows.next()? {
        by_document.insert(
            row.get::<_, i64>("document_id")?,
            OverallSummary {
                date: row.get("date")?,
                title: row.get("title")?,
                total_amount: row.get("total_amount")?,
            },
        );
    }
    Ok(by_document)
}

fn parse_image_row(row: &Row<'_>) -> RepoResult<DocumentImage> {
    let exif = match optional_column::<String>(row, "exif")? {
        Some(text) => Some(serde_json::from_str(&text).map_err(|err| {
            let image_id = row.get::<_, i64>("id").unwrap_or_default();
            RepoError::InvalidData(format!(
                "invalid json in document_images.exif for image {image_id}: {err}"
            ))
        })?),
        None => None,
    };

    Ok(DocumentImage {
        uri: row.get("uri")?,
        width: row.get("width")?,
        height: row.get("height")?,
        exif,
    })
}

/// Reads a nullable column; SQL NULL becomes `None`.
///
/// Every optional field of the aggregate goes through here so the rule
/// stays the same as columns are added.
fn optional_column<T: FromSql>(row: &Row<'_>, column: &str) -> rusqlite::Result<Option<T>> {
    row.get::<_, Option<T>>(column)
}

fn ensure_document_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    let foreign_keys: i64 = conn.query_row("PRAGMA foreign_keys;", [], |row| row.get(0))?;
    if foreign_keys != 1 {
        return Err(RepoError::ForeignKeysDisabled);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{parse_document_id, RepoError};

    #[test]
    fn parse_document_id_accepts_numeric_keys() {
        assert_eq!(parse_document_id("42").unwrap(), 42);
        assert_eq!(parse_document_id(" 7 ").unwrap(), 7);
    }

    #[test]
    fn parse_document_id_rejects_non_numeric() {
        let err = parse_document_id("abc").unwrap_err();
        assert!(matches!(err, RepoError::InvalidId(ref id) if id == "abc"));
        assert_eq!(err.error_code(), "document_id_invalid");
    }
}
