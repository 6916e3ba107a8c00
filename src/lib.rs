//! # carebook-store
//!
//! Storage access for care-worker shift reports, user accounts and the audit
//! trail, kept in a single (optionally SQLCipher-encrypted) SQLite file.
//!
//! Request handlers share one [`DatabaseWrapper`]. It sits on top of
//! [`sqlx_sqlcipher_pool::SqlCipherPool`], which serializes every write
//! through one connection while reads run concurrently on a bounded set of
//! read-only connections.
//!
//! Values cross this boundary as JSON: parameters are bound from
//! [`serde_json::Value`] and rows come back as column-ordered maps, with
//! BLOBs encoded as base64. Typed access is available through
//! [`DatabaseWrapper::fetch_as`] and [`DatabaseWrapper::transaction`].
//!
//! ```no_run
//! use carebook_store::{DatabaseWrapper, Statement, StoreSettings};
//! use serde_json::json;
//!
//! # async fn demo() -> carebook_store::Result<()> {
//! let db = DatabaseWrapper::connect(&StoreSettings::from_env()?).await?;
//!
//! db.execute_transaction(vec![
//!    Statement::new("INSERT INTO shift_reports (worker) VALUES (?1)", vec![json!("amara")]),
//!    Statement::new("INSERT INTO audit_log (action) VALUES ('create')", vec![]),
//! ])
//! .await?;
//!
//! let report = db.health_check().await;
//! println!("ready: {}, {:?}", report.ready, report.stats);
//! # Ok(())
//! # }
//! ```

mod decode;
mod error;
mod settings;
mod wrapper;

pub use decode::JsonRow;
pub use error::{Error, Result};
pub use settings::{
   DB_ACQUIRE_TIMEOUT_MS, DB_IDLE_TIMEOUT_MS, DB_KEY, DB_MAX_READ_CONNECTIONS, DB_PATH,
   StoreSettings,
};
pub use wrapper::{DatabaseWrapper, HealthReport, Statement, WriteQueryResult};

pub use sqlx_sqlcipher_pool::{PoolConfig, PoolStats, engine};
