//! # sqlx-sqlcipher-pool
//!
//! A connection pool for a single encrypted SQLite file shared by many
//! concurrent request handlers.
//!
//! ## Core Types
//!
//! - **[`SqlCipherPool`]**: One write connection plus a bounded, growable set of read connections
//! - **[`PoolConfig`]** / **[`EngineConfig`]**: Pool sizing and the fixed engine settings
//! - **[`ReadGuard`]** / **[`WriteGuard`]**: RAII guards for checked-out connections
//! - **[`PoolStats`]**: Connection counts and rolling query timings
//! - **[`Error`]**: Error type for pool operations
//!
//! ## Architecture
//!
//! - **Single writer**: exactly one read-write handle exists, so writes are serialized by construction
//! - **Concurrent reads**: read-only handles see WAL snapshots while the writer commits
//! - **Bounded waits**: a reader that cannot be served within `acquire_timeout` fails instead of blocking
//! - **Idle reaping**: a background task closes readers idle past `idle_timeout`, never below the floor
//!
//! ## Usage
//!
//! ```no_run
//! use sqlx_sqlcipher_pool::{EngineConfig, Passphrase, PoolConfig, SqlCipherPool};
//!
//! #[tokio::main]
//! async fn main() -> sqlx_sqlcipher_pool::Result<()> {
//!     let config = PoolConfig {
//!         engine: EngineConfig {
//!             passphrase: Some(Passphrase::new("from the environment")),
//!             ..Default::default()
//!         },
//!         ..Default::default()
//!     };
//!     let pool = SqlCipherPool::open("carebook.db", config).await?;
//!
//!     pool.execute("INSERT INTO audit_log (action) VALUES (?1)", &["login".into()])
//!         .await?;
//!
//!     let rows: Vec<(i64, String)> = pool
//!         .query_as("SELECT id, action FROM audit_log", &[])
//!         .await?;
//!
//!     println!("{} audit rows, {:?}", rows.len(), pool.stats());
//!     pool.close().await
//! }
//! ```

mod config;
mod connection;
pub mod engine;
mod error;
mod guard;
mod param;
mod pool;
mod reaper;
mod stats;
mod transaction;

// Re-export public types
pub use config::{EngineConfig, Passphrase, PoolConfig};
pub use connection::ConnectionInfo;
pub use engine::{Access, WriteResult};
pub use error::{Error, Result};
pub use guard::{ReadGuard, WriteGuard};
pub use param::SqlParam;
pub use pool::SqlCipherPool;
pub use stats::{PoolStats, QueryStats};
pub use transaction::TransactionState;

// Re-exported so callers can name row and connection types without
// depending on sqlx directly
pub use sqlx::sqlite::{SqliteConnection, SqliteRow};
pub use sqlx::{FromRow, Row};
