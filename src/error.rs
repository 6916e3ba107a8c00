/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Error from the connection pool.
   #[error(transparent)]
   Pool(#[from] sqlx_sqlcipher_pool::Error),

   /// Error from SQLx outside the pool (row decoding).
   #[error(transparent)]
   Sqlx(#[from] sqlx::Error),

   /// SQLite type that cannot be mapped to JSON.
   #[error("unsupported datatype: {0}")]
   UnsupportedDatatype(String),

   /// Multiple rows returned from fetch_one query.
   #[error("fetch_one() query returned {0} rows, expected 0 or 1")]
   MultipleRowsReturned(usize),

   /// A statement inside `execute_transaction` failed; the transaction was
   /// rolled back.
   #[error("transaction statement {statement_index} failed: {source}")]
   TransactionFailed {
      statement_index: usize,
      #[source]
      source: sqlx_sqlcipher_pool::Error,
   },

   /// Required setting is not present in the environment.
   #[error("missing setting {0}")]
   MissingSetting(&'static str),

   /// Setting is present but cannot be parsed.
   #[error("invalid setting {name}: {reason}")]
   InvalidSetting { name: &'static str, reason: String },

   /// I/O error when accessing database files.
   #[error("io error: {0}")]
   Io(#[from] std::io::Error),
}

impl Error {
   /// Extract a structured error code from the error type.
   ///
   /// This provides machine-readable error codes for callers deciding
   /// whether to retry or to surface a failure.
   pub fn error_code(&self) -> String {
      use sqlx_sqlcipher_pool::Error as PoolError;

      match self {
         Error::Pool(e) | Error::TransactionFailed { source: e, .. } => match e {
            PoolError::AcquisitionTimeout { .. } => "ACQUISITION_TIMEOUT".to_string(),
            PoolError::Execution { .. } => match e.sqlite_code() {
               Some(code) => format!("SQLITE_{}", code),
               None => "EXECUTION_ERROR".to_string(),
            },
            PoolError::WriterUnavailable(_) => "WRITER_UNAVAILABLE".to_string(),
            PoolError::EncryptionUnavailable => "ENCRYPTION_UNAVAILABLE".to_string(),
            PoolError::TransactionRollbackFailed { .. } => {
               "TRANSACTION_ROLLBACK_FAILED".to_string()
            }
            PoolError::PoolClosed => "DATABASE_CLOSED".to_string(),
            PoolError::InvalidConfig(_) => "INVALID_CONFIG".to_string(),
            PoolError::Sqlx(_) => "SQLX_ERROR".to_string(),
         },
         Error::Sqlx(e) => {
            if let Some(code) = e.as_database_error().and_then(|db_err| db_err.code()) {
               return format!("SQLITE_{}", code);
            }
            "SQLX_ERROR".to_string()
         }
         Error::UnsupportedDatatype(_) => "UNSUPPORTED_DATATYPE".to_string(),
         Error::MultipleRowsReturned(_) => "MULTIPLE_ROWS_RETURNED".to_string(),
         Error::MissingSetting(_) | Error::InvalidSetting { .. } => "INVALID_SETTING".to_string(),
         Error::Io(_) => "IO_ERROR".to_string(),
      }
   }

   /// `true` for failures worth retrying later without changing the request.
   pub fn is_transient(&self) -> bool {
      match self {
         Error::Pool(e) | Error::TransactionFailed { source: e, .. } => {
            matches!(e, sqlx_sqlcipher_pool::Error::AcquisitionTimeout { .. })
               || matches!(e.sqlite_code().as_deref(), Some("5" | "6"))
         }
         _ => false,
      }
   }
}
