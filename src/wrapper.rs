use std::fs::create_dir_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx_sqlcipher_pool::{
   FromRow, PoolConfig, PoolStats, SqlCipherPool, SqlParam, SqliteConnection, SqliteRow,
   WriteResult, engine,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::Error;
use crate::decode::{JsonRow, row_to_json};
use crate::settings::StoreSettings;

/// Result returned from write operations (e.g. INSERT, UPDATE, DELETE).
///
/// `last_insert_id` is only meaningful for INSERTs into ROWID tables.
pub type WriteQueryResult = WriteResult;

/// One statement of an [`DatabaseWrapper::execute_transaction`] batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statement {
   pub query: String,
   #[serde(default)]
   pub values: Vec<JsonValue>,
}

impl Statement {
   pub fn new(query: impl Into<String>, values: Vec<JsonValue>) -> Self {
      Self {
         query: query.into(),
         values,
      }
   }
}

/// Outcome of [`DatabaseWrapper::health_check`].
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
   /// The pool is open and answered a probe query
   pub ready: bool,
   /// Round trip of the probe, including reader acquisition
   pub latency: Duration,
   /// Present when the store runs on SQLCipher
   pub cipher_version: Option<String>,
   pub stats: PoolStats,
   /// Why the probe failed, if it did
   pub error: Option<String>,
}

/// Store handle used by request handlers. Cloning shares the pool.
#[derive(Debug, Clone)]
pub struct DatabaseWrapper {
   inner: Arc<SqlCipherPool>,
}

impl DatabaseWrapper {
   /// Opens the store described by `settings`, creating its directory first.
   pub async fn connect(settings: &StoreSettings) -> Result<Self, Error> {
      if let Some(parent) = settings.path.parent().filter(|p| !p.as_os_str().is_empty()) {
         create_dir_all(parent)?;
      }

      Self::connect_with_path(&settings.path, Some(settings.pool_config())).await
   }

   /// Opens the store at an exact path. `None` uses the pool defaults.
   pub async fn connect_with_path(
      path: &Path,
      custom_config: Option<PoolConfig>,
   ) -> Result<Self, Error> {
      let pool = SqlCipherPool::open(path, custom_config.unwrap_or_default()).await?;

      info!(
         path = %path.display(),
         encrypted = pool.cipher_version().is_some(),
         "Store opened"
      );

      Ok(Self { inner: pool })
   }

   /// The underlying pool, for typed access through [`engine`].
   pub fn pool(&self) -> &Arc<SqlCipherPool> {
      &self.inner
   }

   /// Execute a write query (INSERT/UPDATE/DELETE/DDL)
   pub async fn execute(
      &self,
      query: String,
      values: Vec<JsonValue>,
   ) -> Result<WriteQueryResult, Error> {
      let params = to_params(values);
      Ok(self.inner.execute(&query, &params).await?)
   }

   /// Execute multiple write statements atomically within a transaction.
   ///
   /// All statements run on the write connection between `BEGIN IMMEDIATE`
   /// and `COMMIT`. The first failing statement rolls the whole batch back and
   /// is reported as [`Error::TransactionFailed`] with its position.
   /// Returns the result of each statement in order.
   pub async fn execute_transaction(
      &self,
      statements: Vec<Statement>,
   ) -> Result<Vec<WriteQueryResult>, Error> {
      let tx_id = Uuid::new_v4();
      let batch: Vec<(String, Vec<SqlParam>)> = statements
         .into_iter()
         .map(|s| (s.query, to_params(s.values)))
         .collect();

      debug!(%tx_id, statements = batch.len(), "Starting transaction batch");

      let result: Result<Vec<WriteQueryResult>, Error> = self
         .inner
         .transaction(move |conn| {
            Box::pin(async move {
               let mut results = Vec::with_capacity(batch.len());
               for (statement_index, (query, params)) in batch.iter().enumerate() {
                  let result = engine::run(conn, query, params)
                     .await
                     .map_err(|source| Error::TransactionFailed {
                        statement_index,
                        source,
                     })?;
                  results.push(result);
               }
               Ok(results)
            })
         })
         .await;

      match &result {
         Ok(results) => debug!(%tx_id, statements = results.len(), "Transaction batch committed"),
         Err(e) => warn!(%tx_id, error = %e, "Transaction batch rolled back"),
      }
      result
   }

   /// Runs `unit_of_work` inside one transaction on the write connection.
   ///
   /// Commits on `Ok`, rolls back on `Err` and returns the error unchanged.
   pub async fn transaction<T, F>(&self, unit_of_work: F) -> Result<T, Error>
   where
      F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T, Error>>,
   {
      self.inner.transaction(unit_of_work).await
   }

   /// Execute a SELECT query, possibly returning multiple rows
   pub async fn fetch_all(
      &self,
      query: String,
      values: Vec<JsonValue>,
   ) -> Result<Vec<JsonRow>, Error> {
      let params = to_params(values);
      let rows = self.inner.query(&query, &params).await?;
      rows_to_json(&rows)
   }

   /// Execute a SELECT query expecting zero or one result
   pub async fn fetch_one(
      &self,
      query: String,
      values: Vec<JsonValue>,
   ) -> Result<Option<JsonRow>, Error> {
      let params = to_params(values);
      // Two rows are enough to tell "one" from "more than one"
      let rows = self.inner.query_limited(&query, &params, 2).await?;

      match rows.len() {
         0 => Ok(None),
         1 => Ok(Some(row_to_json(&rows[0])?)),
         count => Err(Error::MultipleRowsReturned(count)),
      }
   }

   /// Execute a SELECT query and map each row onto `T`
   pub async fn fetch_as<T>(&self, query: String, values: Vec<JsonValue>) -> Result<Vec<T>, Error>
   where
      T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
   {
      let params = to_params(values);
      Ok(self.inner.query_as(&query, &params).await?)
   }

   pub fn stats(&self) -> PoolStats {
      self.inner.stats()
   }

   /// Probes the store with a trivial read.
   ///
   /// Never fails: an unreachable store is reported as `ready: false`.
   pub async fn health_check(&self) -> HealthReport {
      let started = Instant::now();
      let probe = if self.inner.is_ready() {
         self.inner.query("SELECT 1", &[]).await.map(|_| ())
      } else {
         Err(sqlx_sqlcipher_pool::Error::PoolClosed)
      };
      let latency = started.elapsed();

      if let Err(e) = &probe {
         warn!(error = %e, "Store health check failed");
      }

      HealthReport {
         ready: probe.is_ok(),
         latency,
         cipher_version: self.inner.cipher_version().map(str::to_owned),
         stats: self.inner.stats(),
         error: probe.err().map(|e| e.to_string()),
      }
   }

   /// Close the store. Clones of this wrapper see it closed too.
   pub async fn close(self) -> Result<(), Error> {
      self.inner.close().await?;
      Ok(())
   }

   /// Close the store and remove the database file with its WAL and SHM files
   pub async fn remove(self) -> Result<(), Error> {
      self.inner.close().await?;

      let path = self.inner.path();
      for file in [path.to_path_buf(), sidecar(path, "-wal"), sidecar(path, "-shm")] {
         match std::fs::remove_file(&file) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
         }
      }

      info!(path = %path.display(), "Store removed");
      Ok(())
   }
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
   let mut name = path.as_os_str().to_owned();
   name.push(suffix);
   PathBuf::from(name)
}

fn rows_to_json(rows: &[SqliteRow]) -> Result<Vec<JsonRow>, Error> {
   rows.iter().map(row_to_json).collect()
}

fn to_params(values: Vec<JsonValue>) -> Vec<SqlParam> {
   values.into_iter().map(json_to_param).collect()
}

/// Maps a JSON value onto the SQLite storage class it binds as
fn json_to_param(value: JsonValue) -> SqlParam {
   match value {
      JsonValue::Null => SqlParam::Null,
      JsonValue::String(s) => SqlParam::Text(s),
      JsonValue::Bool(b) => SqlParam::from(b),
      JsonValue::Number(number) => {
         // Preserve integer precision by binding as i64 when possible
         if let Some(int_val) = number.as_i64() {
            SqlParam::Integer(int_val)
         } else if let Some(uint_val) = number.as_u64() {
            // Too large for i64, which is all SQLite's INTEGER holds
            SqlParam::Real(uint_val as f64)
         } else {
            SqlParam::Real(number.as_f64().unwrap_or_default())
         }
      }
      // Arrays and objects are stored as their JSON text
      other @ (JsonValue::Array(_) | JsonValue::Object(_)) => SqlParam::Text(other.to_string()),
   }
}
