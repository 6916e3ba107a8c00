//! Storage engine binding: opens encrypted SQLite handles and runs statements.
//!
//! Every handle the pool owns is opened here with the same [`EngineConfig`].
//! SQLx applies pragmas in a fixed order with the SQLCipher `key` first, so
//! the passphrase is always in place before the first page is read.
//!
//! Above this module nothing talks to SQLx directly except through the raw
//! handle a transaction's unit of work receives.

use std::path::Path;
use std::time::Duration;

use futures::TryStreamExt;
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{ConnectOptions, FromRow, SqliteConnection};
use tracing::debug;

use crate::config::EngineConfig;
use crate::param::{SqlParam, to_arguments};
use crate::{Error, Result};

/// Which side of the pool a handle serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
   ReadOnly,
   ReadWrite,
}

/// Result returned from write operations (e.g. INSERT, UPDATE, DELETE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResult {
   /// The number of rows affected by the write operation.
   pub rows_affected: u64,
   /// The last inserted row ID (SQLite ROWID).
   ///
   /// Only meaningful after an INSERT into a table with a ROWID; otherwise
   /// it carries whatever the handle last inserted (0 for a fresh handle).
   pub last_insert_id: i64,
}

/// Builds the connect options for one handle.
pub(crate) fn connect_options(
   path: &Path,
   access: Access,
   config: &EngineConfig,
   slow_statement: Duration,
) -> SqliteConnectOptions {
   let mut options = SqliteConnectOptions::new()
      .filename(path)
      .busy_timeout(config.busy_timeout)
      .synchronous(config.synchronous)
      .foreign_keys(config.foreign_keys);

   if let Some(passphrase) = &config.passphrase {
      options = options
         .pragma("key", passphrase.as_sql_literal())
         .pragma("kdf_iter", config.kdf_iter.to_string())
         .pragma("cipher_page_size", config.cipher_page_size.to_string());
   }

   options = match access {
      // The journal mode is persistent in the file, and a read-only handle
      // cannot switch it, so only the writer sets it.
      Access::ReadWrite => options
         .create_if_missing(true)
         .page_size(config.page_size)
         .journal_mode(config.journal_mode),
      Access::ReadOnly => options.read_only(true),
   };

   options
      .pragma("cache_size", format!("-{}", config.cache_size_kib))
      .pragma("mmap_size", config.mmap_size.to_string())
      .pragma("temp_store", "MEMORY")
      .log_statements(LevelFilter::Trace)
      .log_slow_statements(LevelFilter::Warn, slow_statement)
}

/// Opens one handle against the store file.
pub async fn open(
   path: &Path,
   access: Access,
   config: &EngineConfig,
   slow_statement: Duration,
) -> Result<SqliteConnection> {
   let conn = connect_options(path, access, config, slow_statement)
      .connect()
      .await?;

   debug!(
      path = %path.display(),
      ?access,
      encrypted = config.passphrase.is_some(),
      "Opened SQLite handle"
   );

   Ok(conn)
}

/// Runs a mutating statement.
pub async fn run(conn: &mut SqliteConnection, sql: &str, params: &[SqlParam]) -> Result<WriteResult> {
   let args = to_arguments(params).map_err(|e| Error::execution(sql, e))?;
   let result = sqlx::query_with(sql, args)
      .execute(&mut *conn)
      .await
      .map_err(|e| Error::execution(sql, e))?;

   Ok(WriteResult {
      rows_affected: result.rows_affected(),
      last_insert_id: result.last_insert_rowid(),
   })
}

/// Runs a non-mutating statement and maps every row to `T`.
pub async fn all<T>(conn: &mut SqliteConnection, sql: &str, params: &[SqlParam]) -> Result<Vec<T>>
where
   T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
{
   let args = to_arguments(params).map_err(|e| Error::execution(sql, e))?;
   sqlx::query_as_with::<_, T, _>(sql, args)
      .fetch_all(&mut *conn)
      .await
      .map_err(|e| Error::execution(sql, e))
}

/// Runs a non-mutating statement and returns the raw rows.
pub async fn all_rows(
   conn: &mut SqliteConnection,
   sql: &str,
   params: &[SqlParam],
) -> Result<Vec<SqliteRow>> {
   let args = to_arguments(params).map_err(|e| Error::execution(sql, e))?;
   sqlx::query_with(sql, args)
      .fetch_all(&mut *conn)
      .await
      .map_err(|e| Error::execution(sql, e))
}

/// Runs a non-mutating statement and returns at most `max_rows` rows.
///
/// Rows are streamed and the statement is abandoned once the limit is hit,
/// so the SQL is passed to the engine exactly as given.
pub async fn first_rows(
   conn: &mut SqliteConnection,
   sql: &str,
   params: &[SqlParam],
   max_rows: usize,
) -> Result<Vec<SqliteRow>> {
   let args = to_arguments(params).map_err(|e| Error::execution(sql, e))?;
   let mut rows = Vec::with_capacity(max_rows);
   let mut stream = sqlx::query_with(sql, args).fetch(&mut *conn);

   while rows.len() < max_rows {
      match stream.try_next().await.map_err(|e| Error::execution(sql, e))? {
         Some(row) => rows.push(row),
         None => break,
      }
   }

   Ok(rows)
}

/// Returns the SQLCipher version, or `None` when SQLite has no cipher support.
pub async fn cipher_version(conn: &mut SqliteConnection) -> Result<Option<String>> {
   const SQL: &str = "PRAGMA cipher_version";

   sqlx::query_scalar::<_, String>(SQL)
      .fetch_optional(&mut *conn)
      .await
      .map_err(|e| Error::execution(SQL, e))
}

/// Checks that a configured passphrase is actually protecting the file.
///
/// Plain SQLite ignores the cipher pragmas, so without this a missing
/// SQLCipher build would quietly produce an unencrypted store.
pub(crate) async fn verify_encryption(
   conn: &mut SqliteConnection,
   config: &EngineConfig,
) -> Result<Option<String>> {
   let version = cipher_version(conn).await?;

   if config.passphrase.is_some() && version.is_none() {
      return Err(Error::EncryptionUnavailable);
   }

   // Reading the schema decrypts the first page; a wrong key fails here
   const PROBE: &str = "SELECT count(*) FROM sqlite_master";
   sqlx::query(PROBE)
      .execute(&mut *conn)
      .await
      .map_err(|e| Error::execution(PROBE, e))?;

   Ok(version)
}
