//! Single-writer, multi-reader pool over one encrypted SQLite file

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sqlx::FromRow;
use sqlx::sqlite::SqliteRow;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, Semaphore};
use tokio::task::AbortHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::config::PoolConfig;
use crate::connection::Connection;
use crate::engine::{self, Access, WriteResult};
use crate::error::truncate_sql;
use crate::guard::{ReadGuard, WriteGuard};
use crate::param::SqlParam;
use crate::reaper;
use crate::stats::{PoolStats, QueryStats};
use crate::{Error, Result};

const WRITER_ID: u64 = 0;

/// Connection pool for one encrypted SQLite file.
///
/// ## Architecture
///
/// - **`writer`**: the only read-write handle. Holding it is what serializes
///   writes, so two writes can never interleave.
/// - **`readers`**: read-only handles, grown lazily up to
///   `max_read_connections` and reaped down to `min_read_connections` when
///   idle. Each handle sees a WAL snapshot, so reads proceed while the writer
///   commits.
/// - **`read_permits`**: one permit per possible reader. A caller that cannot
///   get a permit within `acquire_timeout` fails with
///   [`Error::AcquisitionTimeout`].
///
/// ## Usage Pattern
///
/// ```text
/// 1. open() once at startup and share the Arc with every consumer
/// 2. query()/query_as() for reads, execute() for single writes
/// 3. transaction() for multi-statement writes
/// 4. close() on shutdown
/// ```
pub struct SqlCipherPool {
   shared: Arc<Shared>,
   reaper: AbortHandle,
}

pub(crate) struct Shared {
   path: PathBuf,
   config: PoolConfig,
   readers: Mutex<ReaderSet>,
   read_permits: Arc<Semaphore>,
   /// `None` once the pool is closed
   writer: Arc<AsyncMutex<Option<Connection>>>,
   writer_active: AtomicBool,
   next_id: AtomicU64,
   stats: QueryStats,
   closed: AtomicBool,
   cipher_version: Option<String>,
}

#[derive(Default)]
pub(crate) struct ReaderSet {
   /// Most recently released last
   idle: Vec<Connection>,
   /// Open read connections, idle or checked out
   open: usize,
}

impl SqlCipherPool {
   /// Opens the pool: the write connection first, then the floor of read
   /// connections, then the idle reaper.
   ///
   /// Failing to open the write connection is fatal and reported as
   /// [`Error::WriterUnavailable`]; no pool is returned, so no write can ever
   /// be attempted against a store without its writer.
   pub async fn open(path: impl AsRef<Path>, config: PoolConfig) -> Result<Arc<Self>> {
      config.validate()?;
      let path = path.as_ref().to_path_buf();

      let (writer, cipher_version) = match open_writer(&path, &config).await {
         Ok(opened) => opened,
         Err(e) => {
            error!(path = %path.display(), error = %e, "Failed to open write connection");
            return Err(Error::WriterUnavailable(Box::new(e)));
         }
      };

      let shared = Arc::new(Shared {
         read_permits: Arc::new(Semaphore::new(config.max_read_connections as usize)),
         readers: Mutex::new(ReaderSet::default()),
         writer: Arc::new(AsyncMutex::new(Some(writer))),
         writer_active: AtomicBool::new(false),
         next_id: AtomicU64::new(WRITER_ID + 1),
         stats: QueryStats::new(config.stats_window, config.slow_query_threshold),
         closed: AtomicBool::new(false),
         cipher_version,
         path,
         config,
      });

      for _ in 0..shared.config.read_floor() {
         let conn = shared.open_reader().await?;
         let mut readers = shared.readers.lock();
         readers.idle.push(conn);
         readers.open += 1;
      }

      let reaper = reaper::spawn(Arc::downgrade(&shared), shared.config.reap_interval);

      info!(
         path = %shared.path.display(),
         encrypted = shared.cipher_version.is_some(),
         read_connections = shared.config.read_floor(),
         max_read_connections = shared.config.max_read_connections,
         "Connection pool ready"
      );

      Ok(Arc::new(Self { shared, reaper }))
   }

   /// Checks out a read-only connection.
   ///
   /// Reuses the most recently released idle connection, opens a new one
   /// while below `max_read_connections`, and otherwise waits for a release
   /// until `acquire_timeout` elapses.
   pub async fn acquire_reader(&self) -> Result<ReadGuard> {
      Shared::acquire_reader(&self.shared).await
   }

   /// Checks out the write connection, waiting at most `acquire_timeout`
   /// for the current holder to release it.
   pub async fn acquire_writer(&self) -> Result<WriteGuard> {
      Shared::acquire_writer(&self.shared).await
   }

   /// Runs a read statement and returns the raw rows.
   pub async fn query(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<SqliteRow>> {
      let mut reader = self.reader_for("query", sql).await?;
      let started = Instant::now();
      let result = engine::all_rows(&mut reader, sql, params).await;
      self.shared.observe("query", sql, started.elapsed(), result.as_ref().err());
      result
   }

   /// Runs a read statement and returns at most `max_rows` raw rows. Rows
   /// past the limit are never read.
   pub async fn query_limited(
      &self,
      sql: &str,
      params: &[SqlParam],
      max_rows: usize,
   ) -> Result<Vec<SqliteRow>> {
      let mut reader = self.reader_for("query", sql).await?;
      let started = Instant::now();
      let result = engine::first_rows(&mut reader, sql, params, max_rows).await;
      self.shared.observe("query", sql, started.elapsed(), result.as_ref().err());
      result
   }

   /// Runs a read statement and maps each row to `T`.
   pub async fn query_as<T>(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<T>>
   where
      T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
   {
      let mut reader = self.reader_for("query", sql).await?;
      let started = Instant::now();
      let result = engine::all::<T>(&mut reader, sql, params).await;
      self.shared.observe("query", sql, started.elapsed(), result.as_ref().err());
      result
   }

   /// Like [`query_as`](Self::query_as) for the first row only; `None` when
   /// the statement returns nothing.
   pub async fn fetch_optional_as<T>(&self, sql: &str, params: &[SqlParam]) -> Result<Option<T>>
   where
      T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
   {
      let rows = self.query_limited(sql, params, 1).await?;
      rows
         .first()
         .map(T::from_row)
         .transpose()
         .map_err(|e| Error::execution(sql, e))
   }

   /// Runs a write statement on the write connection.
   pub async fn execute(&self, sql: &str, params: &[SqlParam]) -> Result<WriteResult> {
      let mut writer = self.writer_for("execute", sql).await?;
      let started = Instant::now();
      let result = engine::run(&mut writer, sql, params).await;
      self.shared.observe("execute", sql, started.elapsed(), result.as_ref().err());
      result
   }

   /// [`acquire_reader`](Self::acquire_reader) on behalf of a statement, so a
   /// timeout is logged with the statement it held up.
   async fn reader_for(&self, operation: &'static str, sql: &str) -> Result<ReadGuard> {
      self
         .acquire_reader()
         .await
         .inspect_err(|e| self.shared.acquire_failed(operation, sql, e))
   }

   pub(crate) async fn writer_for(&self, operation: &'static str, sql: &str) -> Result<WriteGuard> {
      self
         .acquire_writer()
         .await
         .inspect_err(|e| self.shared.acquire_failed(operation, sql, e))
   }

   /// Aggregated connection and timing statistics. Has no side effects.
   pub fn stats(&self) -> PoolStats {
      self.shared.stats()
   }

   /// `true` while the write connection is open and the pool accepts work.
   pub fn is_ready(&self) -> bool {
      !self.shared.is_closed()
   }

   /// SQLCipher version reported by the write connection at startup, or
   /// `None` for a plaintext build.
   pub fn cipher_version(&self) -> Option<&str> {
      self.shared.cipher_version.as_deref()
   }

   pub fn path(&self) -> &Path {
      &self.shared.path
   }

   pub fn config(&self) -> &PoolConfig {
      &self.shared.config
   }

   /// Closes idle read connections past their idle timeout, never going
   /// below the floor. Returns how many were closed.
   ///
   /// The background reaper calls this on every tick.
   pub async fn sweep_idle(&self) -> usize {
      self.shared.sweep_idle().await
   }

   /// Closes the pool.
   ///
   /// Idle readers and the writer are closed here; readers still checked out
   /// are closed when their guard is dropped. Waits for an in-flight write
   /// to finish. Closing twice is a no-op.
   pub async fn close(&self) -> Result<()> {
      if self.shared.closed.swap(true, Ordering::SeqCst) {
         return Ok(());
      }

      self.reaper.abort();
      self.shared.read_permits.close();

      let idle = {
         let mut readers = self.shared.readers.lock();
         let idle = std::mem::take(&mut readers.idle);
         readers.open -= idle.len();
         idle
      };

      for conn in idle {
         let id = conn.id();
         if let Err(e) = conn.close().await {
            warn!(connection_id = id, error = %e, "Failed to close read connection");
         }
      }

      let writer = self.shared.writer.lock().await.take();
      if let Some(conn) = writer {
         conn.close().await?;
      }

      debug!(path = %self.shared.path.display(), "Connection pool closed");
      Ok(())
   }
}

impl Drop for SqlCipherPool {
   fn drop(&mut self) {
      self.reaper.abort();
   }
}

impl fmt::Debug for SqlCipherPool {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("SqlCipherPool")
         .field("path", &self.shared.path)
         .field("closed", &self.shared.is_closed())
         .field("stats", &self.shared.stats())
         .finish()
   }
}

async fn open_writer(path: &Path, config: &PoolConfig) -> Result<(Connection, Option<String>)> {
   let mut handle = engine::open(
      path,
      Access::ReadWrite,
      &config.engine,
      config.slow_query_threshold,
   )
   .await?;

   let cipher_version = engine::verify_encryption(&mut handle, &config.engine).await?;
   if cipher_version.is_none() {
      debug!(path = %path.display(), "Store is not encrypted");
   }

   Ok((Connection::new(WRITER_ID, Access::ReadWrite, handle), cipher_version))
}

/// Undoes a reader slot reservation if opening the connection fails or the
/// acquiring future is dropped.
struct Reservation<'a> {
   readers: &'a Mutex<ReaderSet>,
   armed: bool,
}

impl Reservation<'_> {
   fn keep(mut self) {
      self.armed = false;
   }
}

impl Drop for Reservation<'_> {
   fn drop(&mut self) {
      if self.armed {
         self.readers.lock().open -= 1;
      }
   }
}

impl Shared {
   pub(crate) fn is_closed(&self) -> bool {
      self.closed.load(Ordering::SeqCst)
   }

   fn ensure_open(&self) -> Result<()> {
      if self.is_closed() {
         return Err(Error::PoolClosed);
      }
      Ok(())
   }

   async fn open_reader(&self) -> Result<Connection> {
      let handle = engine::open(
         &self.path,
         Access::ReadOnly,
         &self.config.engine,
         self.config.slow_query_threshold,
      )
      .await?;
      let id = self.next_id.fetch_add(1, Ordering::Relaxed);
      debug!(connection_id = id, "Opened read connection");
      Ok(Connection::new(id, Access::ReadOnly, handle))
   }

   async fn acquire_reader(this: &Arc<Self>) -> Result<ReadGuard> {
      this.ensure_open()?;

      let started = Instant::now();
      let acquire = Arc::clone(&this.read_permits).acquire_owned();
      let permit = match timeout(this.config.acquire_timeout, acquire).await {
         Ok(Ok(permit)) => permit,
         Ok(Err(_)) => return Err(Error::PoolClosed),
         Err(_) => {
            let waited = started.elapsed();
            debug!(
               waited_ms = waited.as_millis() as u64,
               max_read_connections = this.config.max_read_connections,
               "Timed out waiting for a read connection"
            );
            return Err(Error::AcquisitionTimeout { waited });
         }
      };

      // Holding a permit guarantees an idle reader or room to open one
      let reused = {
         let mut readers = this.readers.lock();
         let reused = readers.idle.pop();
         if reused.is_none() {
            readers.open += 1;
         }
         reused
      };

      let mut conn = match reused {
         Some(conn) => conn,
         None => {
            let reservation = Reservation {
               readers: &this.readers,
               armed: true,
            };
            let conn = this.open_reader().await?;
            reservation.keep();
            conn
         }
      };

      conn.mark_acquired();
      trace!(
         connection_id = conn.id(),
         waited_ms = started.elapsed().as_millis() as u64,
         "Read connection checked out"
      );

      Ok(ReadGuard::new(conn, Arc::clone(this), permit))
   }

   async fn acquire_writer(this: &Arc<Self>) -> Result<WriteGuard> {
      this.ensure_open()?;

      let started = Instant::now();
      let lock = Arc::clone(&this.writer).lock_owned();
      let guard = match timeout(this.config.acquire_timeout, lock).await {
         Ok(guard) => guard,
         Err(_) => {
            let waited = started.elapsed();
            debug!(
               waited_ms = waited.as_millis() as u64,
               "Timed out waiting for the write connection"
            );
            return Err(Error::AcquisitionTimeout { waited });
         }
      };

      let mut conn = OwnedMutexGuard::try_map(guard, Option::as_mut).map_err(|_| Error::PoolClosed)?;

      if conn.has_open_transaction() {
         warn!(
            connection_id = conn.id(),
            "Rolling back a transaction left open by an abandoned unit of work"
         );
         match engine::run(conn.handle(), "ROLLBACK", &[]).await {
            Ok(_) => {}
            Err(e) if e.is_no_active_transaction() => {
               debug!(connection_id = conn.id(), "Abandoned transaction had already ended");
            }
            Err(e) => {
               warn!(connection_id = conn.id(), error = %e, "Rollback of abandoned transaction failed");
            }
         }
         conn.set_open_transaction(false);
      }

      conn.mark_acquired();
      this.writer_active.store(true, Ordering::SeqCst);

      Ok(WriteGuard::new(conn, Arc::clone(this)))
   }

   /// Returns a checked-out reader to the idle list, or drops it if the pool
   /// closed in the meantime.
   pub(crate) fn release_reader(&self, mut conn: Connection) {
      conn.mark_released();

      let mut readers = self.readers.lock();
      if self.is_closed() {
         readers.open -= 1;
         drop(readers);
         trace!(connection_id = conn.id(), "Dropping reader released after close");
         return;
      }
      readers.idle.push(conn);
   }

   pub(crate) fn release_writer(&self) {
      self.writer_active.store(false, Ordering::SeqCst);
   }

   /// Logs an acquisition timeout with the statement that was waiting.
   pub(crate) fn acquire_failed(&self, operation: &'static str, sql: &str, error: &Error) {
      if let Error::AcquisitionTimeout { waited } = error {
         warn!(
            operation,
            sql = %truncate_sql(sql),
            waited_ms = waited.as_millis() as u64,
            max_read_connections = self.config.max_read_connections,
            "Timed out waiting for a database connection"
         );
      }
   }

   /// Records an operation's duration and logs failures and slow operations.
   pub(crate) fn observe<E: fmt::Display>(
      &self,
      operation: &'static str,
      sql: &str,
      elapsed: Duration,
      failure: Option<&E>,
   ) {
      let slow = self.stats.record(elapsed);
      let elapsed_ms = elapsed.as_millis() as u64;

      if let Some(error) = failure {
         warn!(
            operation,
            sql = %truncate_sql(sql),
            elapsed_ms,
            error = %error,
            "Database operation failed"
         );
      } else if slow {
         warn!(
            operation,
            sql = %truncate_sql(sql),
            elapsed_ms,
            threshold_ms = self.stats.slow_threshold().as_millis() as u64,
            "Slow database operation"
         );
      }
   }

   pub(crate) fn stats(&self) -> PoolStats {
      let (read_connections, idle_readers) = {
         let readers = self.readers.lock();
         (readers.open, readers.idle.len())
      };

      let writer_open = usize::from(!self.is_closed());
      let writer_active = usize::from(writer_open == 1 && self.writer_active.load(Ordering::SeqCst));

      PoolStats {
         active_connections: read_connections - idle_readers + writer_active,
         idle_connections: idle_readers + writer_open - writer_active,
         read_connections,
         max_read_connections: self.config.max_read_connections as usize,
         total_queries: self.stats.total_queries(),
         slow_queries: self.stats.slow_queries(),
         sampled_queries: self.stats.window_len(),
         avg_query_time: self.stats.average(),
      }
   }

   pub(crate) async fn sweep_idle(&self) -> usize {
      let now = Instant::now();
      let floor = self.config.read_floor();
      let idle_timeout = self.config.idle_timeout;

      let expired = {
         let mut readers = self.readers.lock();
         let mut expired = Vec::new();
         let mut i = 0;
         // Oldest releases sit at the front
         while i < readers.idle.len() && readers.open > floor {
            let stale = readers.idle[i]
               .idle_for(now)
               .is_some_and(|idle| idle > idle_timeout);
            if stale {
               expired.push(readers.idle.remove(i));
               readers.open -= 1;
            } else {
               i += 1;
            }
         }
         expired
      };

      let reaped = expired.len();
      for conn in expired {
         let id = conn.id();
         match conn.close().await {
            Ok(()) => debug!(connection_id = id, "Reaped idle read connection"),
            Err(e) => warn!(connection_id = id, error = %e, "Failed to close idle read connection"),
         }
      }

      reaped
   }
}

#[cfg(test)]
impl SqlCipherPool {
   /// Whether the idle writer still carries an unfinished transaction.
   pub(crate) fn writer_flagged(&self) -> bool {
      self
         .shared
         .writer
         .try_lock()
         .map(|writer| writer.as_ref().is_some_and(Connection::has_open_transaction))
         .unwrap_or(false)
   }
}
