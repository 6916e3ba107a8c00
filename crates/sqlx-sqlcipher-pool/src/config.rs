//! Configuration for the encrypted SQLite connection pool

use std::fmt;
use std::time::Duration;

use sqlx::sqlite::{SqliteJournalMode, SqliteSynchronous};

use crate::{Error, Result};

/// Configuration for SqlCipherPool
///
/// # Examples
///
/// ```
/// use sqlx_sqlcipher_pool::PoolConfig;
/// use std::time::Duration;
///
/// // Use defaults
/// let config = PoolConfig::default();
///
/// // Override just the fields you care about
/// let config = PoolConfig {
///     max_read_connections: 3,
///     acquire_timeout: Duration::from_secs(5),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfig {
   /// Maximum number of concurrent read connections
   ///
   /// This bounds the read-only side of the pool. The single write
   /// connection is not counted.
   ///
   /// Default: 6
   pub max_read_connections: u32,

   /// Read connections opened at startup and never reaped
   ///
   /// Must be at least 1. Capped at `max_read_connections`.
   ///
   /// Default: 2
   pub min_read_connections: u32,

   /// How long a caller waits for a connection before failing with
   /// [`Error::AcquisitionTimeout`]
   ///
   /// Default: 30 seconds
   pub acquire_timeout: Duration,

   /// Read connections idle for longer than this are closed by the reaper,
   /// down to `min_read_connections`
   ///
   /// Default: 30 seconds
   pub idle_timeout: Duration,

   /// Period of the idle reaper
   ///
   /// Default: 10 seconds
   pub reap_interval: Duration,

   /// Operations slower than this count as slow queries
   ///
   /// Default: 1 second
   pub slow_query_threshold: Duration,

   /// Number of recent durations kept for the rolling average
   ///
   /// Default: 100
   pub stats_window: usize,

   /// Settings applied to every handle the pool opens
   pub engine: EngineConfig,
}

impl Default for PoolConfig {
   fn default() -> Self {
      Self {
         max_read_connections: 6,
         min_read_connections: 2,
         acquire_timeout: Duration::from_secs(30),
         idle_timeout: Duration::from_secs(30),
         reap_interval: Duration::from_secs(10),
         slow_query_threshold: Duration::from_secs(1),
         stats_window: 100,
         engine: EngineConfig::default(),
      }
   }
}

impl PoolConfig {
   /// Rejects configurations the pool cannot honor.
   pub fn validate(&self) -> Result<()> {
      if self.max_read_connections == 0 {
         return Err(Error::InvalidConfig(
            "max_read_connections must be at least 1".into(),
         ));
      }
      if self.min_read_connections == 0 {
         return Err(Error::InvalidConfig(
            "min_read_connections must be at least 1".into(),
         ));
      }
      if self.stats_window == 0 {
         return Err(Error::InvalidConfig(
            "stats_window must be at least 1".into(),
         ));
      }
      if self.reap_interval.is_zero() {
         return Err(Error::InvalidConfig(
            "reap_interval must be greater than zero".into(),
         ));
      }
      Ok(())
   }

   /// The number of read connections the pool keeps open no matter how idle.
   pub fn read_floor(&self) -> usize {
      self.min_read_connections.min(self.max_read_connections) as usize
   }
}

/// A store passphrase. Never shown by `Debug`.
#[derive(Clone)]
pub struct Passphrase(String);

impl Passphrase {
   pub fn new(secret: impl Into<String>) -> Self {
      Self(secret.into())
   }

   /// The passphrase as a SQL string literal, ready for `PRAGMA key`.
   pub(crate) fn as_sql_literal(&self) -> String {
      format!("'{}'", self.0.replace('\'', "''"))
   }
}

impl fmt::Debug for Passphrase {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str("Passphrase(<redacted>)")
   }
}

impl From<&str> for Passphrase {
   fn from(secret: &str) -> Self {
      Self::new(secret)
   }
}

impl From<String> for Passphrase {
   fn from(secret: String) -> Self {
      Self::new(secret)
   }
}

/// Engine settings passed once to [`crate::engine::open`]
///
/// The defaults are the store's production settings: SQLCipher 4 key
/// derivation, WAL journaling so readers keep a snapshot while the writer
/// commits, `synchronous = NORMAL`, and a generous page cache.
#[derive(Debug, Clone)]
pub struct EngineConfig {
   /// Encryption passphrase. `None` opens a plaintext store.
   pub passphrase: Option<Passphrase>,

   /// PBKDF2 iterations used to derive the key from the passphrase
   ///
   /// Default: 256000
   pub kdf_iter: u32,

   /// Page size of the encrypted file
   ///
   /// Default: 4096
   pub cipher_page_size: u32,

   /// SQLite page size, only honored when the file is created
   ///
   /// Default: 4096
   pub page_size: u32,

   /// Set on the write handle; read handles inherit it from the file
   ///
   /// Default: WAL
   pub journal_mode: SqliteJournalMode,

   /// Default: NORMAL
   pub synchronous: SqliteSynchronous,

   /// Page cache per handle in KiB
   ///
   /// Default: 64000 (about 64MB)
   pub cache_size_kib: u32,

   /// Memory-mapped I/O size in bytes
   ///
   /// Default: 268435456 (256MB)
   pub mmap_size: u64,

   /// How long the engine retries on a locked file before returning BUSY
   ///
   /// Default: 5 seconds
   pub busy_timeout: Duration,

   /// Default: true
   pub foreign_keys: bool,
}

impl Default for EngineConfig {
   fn default() -> Self {
      Self {
         passphrase: None,
         kdf_iter: 256_000,
         cipher_page_size: 4096,
         page_size: 4096,
         journal_mode: SqliteJournalMode::Wal,
         synchronous: SqliteSynchronous::Normal,
         cache_size_kib: 64_000,
         mmap_size: 268_435_456,
         busy_timeout: Duration::from_secs(5),
         foreign_keys: true,
      }
   }
}
