//! Error types for sqlx-sqlcipher-pool

use std::time::Duration;

use thiserror::Error;

/// Statements longer than this are cut before they land in errors or logs.
pub(crate) const MAX_LOGGED_SQL: usize = 120;

/// Errors that may occur when working with sqlx-sqlcipher-pool
#[derive(Error, Debug)]
pub enum Error {
   /// No read connection became available within the configured
   /// `acquire_timeout`. The pool never retries on the caller's behalf.
   #[error("timed out after {waited:?} waiting for a database connection")]
   AcquisitionTimeout { waited: Duration },

   /// The engine rejected a statement. `sql` is truncated for logging.
   #[error("statement failed ({sql}): {source}")]
   Execution {
      sql: String,
      #[source]
      source: sqlx::Error,
   },

   /// The write connection could not be opened when the pool was created.
   /// A pool without its writer is never handed out.
   #[error("write connection could not be opened: {0}")]
   WriterUnavailable(#[source] Box<Error>),

   /// A passphrase was configured but the linked SQLite has no cipher support
   #[error("a passphrase was configured but SQLite was built without SQLCipher support")]
   EncryptionUnavailable,

   /// Transaction failed and rollback also failed.
   #[error("transaction failed: {transaction_error}; rollback also failed: {rollback_error}")]
   TransactionRollbackFailed {
      transaction_error: String,
      rollback_error: String,
   },

   /// Pool has been closed and cannot be used
   #[error("connection pool has been closed")]
   PoolClosed,

   /// Rejected pool configuration
   #[error("invalid pool configuration: {0}")]
   InvalidConfig(String),

   /// Error from the sqlx library outside of statement execution (connect,
   /// close). Standard sqlx errors are converted to this variant
   #[error("Sqlx error: {0}")]
   Sqlx(#[from] sqlx::Error),
}

impl Error {
   pub(crate) fn execution(sql: &str, source: sqlx::Error) -> Self {
      Error::Execution {
         sql: truncate_sql(sql),
         source,
      }
   }

   /// Returns the SQLite result code of the underlying engine error, if any.
   pub fn sqlite_code(&self) -> Option<String> {
      let source = match self {
         Error::Execution { source, .. } | Error::Sqlx(source) => source,
         Error::WriterUnavailable(inner) => return inner.sqlite_code(),
         _ => return None,
      };

      source
         .as_database_error()
         .and_then(|db_err| db_err.code())
         .map(|code| code.into_owned())
   }

   /// `true` when the engine refused a COMMIT or ROLLBACK because it had
   /// already ended the transaction on its own (`INSERT OR ROLLBACK`,
   /// `RAISE(ROLLBACK)`, disk full).
   pub(crate) fn is_no_active_transaction(&self) -> bool {
      let Error::Execution { source, .. } = self else {
         return false;
      };

      source
         .as_database_error()
         .is_some_and(|db_err| db_err.message().contains("no transaction is active"))
   }
}

/// A type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Collapses whitespace and cuts a statement to [`MAX_LOGGED_SQL`] characters.
pub(crate) fn truncate_sql(sql: &str) -> String {
   let collapsed = sql.split_whitespace().collect::<Vec<_>>().join(" ");

   match collapsed.char_indices().nth(MAX_LOGGED_SQL) {
      Some((cut, _)) => format!("{}...", &collapsed[..cut]),
      None => collapsed,
   }
}
