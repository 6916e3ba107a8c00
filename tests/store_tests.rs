//! Integration tests for the store boundary: settings, startup, and many
//! request handlers sharing one wrapper.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use carebook_store::{
   DB_ACQUIRE_TIMEOUT_MS, DB_KEY, DB_MAX_READ_CONNECTIONS, DB_PATH, DatabaseWrapper, Error,
   Statement, StoreSettings,
};
use serde_json::json;
use tempfile::TempDir;

fn settings_for(path: &Path, extra: &[(&str, &str)]) -> StoreSettings {
   let mut vars: HashMap<String, String> = extra
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect();
   vars.insert(DB_PATH.to_string(), path.display().to_string());

   StoreSettings::from_lookup(|name| vars.get(name).cloned()).unwrap()
}

async fn setup_store(extra: &[(&str, &str)]) -> (DatabaseWrapper, TempDir) {
   let dir = TempDir::new().unwrap();
   let settings = settings_for(&dir.path().join("data").join("carebook.db"), extra);
   let db = DatabaseWrapper::connect(&settings).await.unwrap();

   db.execute_transaction(vec![
      Statement::new(
         "CREATE TABLE shift_reports (id INTEGER PRIMARY KEY, worker TEXT NOT NULL, notes TEXT)",
         vec![],
      ),
      Statement::new(
         "CREATE TABLE audit_log (id INTEGER PRIMARY KEY, action TEXT NOT NULL, report_id INTEGER)",
         vec![],
      ),
   ])
   .await
   .unwrap();

   (db, dir)
}

// ============================================================================
// Shared handlers
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_handlers_share_one_store() {
   let (db, _dir) = setup_store(&[]).await;

   let mut handlers = Vec::new();
   for i in 0..10 {
      let db = db.clone();
      handlers.push(tokio::spawn(async move {
         // Writer handler: report plus its audit entry, atomically
         db.execute_transaction(vec![
            Statement::new(
               "INSERT INTO shift_reports (worker, notes) VALUES (?1, ?2)",
               vec![json!(format!("worker-{i}")), json!("handover done")],
            ),
            Statement::new(
               "INSERT INTO audit_log (action, report_id) VALUES ('create', last_insert_rowid())",
               vec![],
            ),
         ])
         .await?;

         // Reader handler
         let rows = db
            .fetch_all("SELECT id FROM shift_reports".into(), vec![])
            .await?;
         Ok::<_, Error>(rows.len())
      }));
   }

   for handler in handlers {
      let seen = handler.await.unwrap().unwrap();
      assert!((1..=10).contains(&seen));
   }

   let row = db
      .fetch_one(
         "SELECT (SELECT count(*) FROM shift_reports) AS reports, (SELECT count(*) FROM audit_log) AS audits"
            .into(),
         vec![],
      )
      .await
      .unwrap()
      .unwrap();

   assert_eq!(row.get("reports"), Some(&json!(10)));
   assert_eq!(row.get("audits"), Some(&json!(10)));

   // Every audit row points at a report
   let orphans = db
      .fetch_all(
         "SELECT a.id FROM audit_log a LEFT JOIN shift_reports r ON r.id = a.report_id WHERE r.id IS NULL"
            .into(),
         vec![],
      )
      .await
      .unwrap();
   assert!(orphans.is_empty());

   db.close().await.unwrap();
}

#[tokio::test]
async fn test_busy_store_reports_a_transient_timeout() {
   let (db, _dir) = setup_store(&[
      (DB_MAX_READ_CONNECTIONS, "1"),
      (DB_ACQUIRE_TIMEOUT_MS, "200"),
   ])
   .await;

   let held = db.pool().acquire_reader().await.unwrap();

   let err = db
      .fetch_all("SELECT * FROM shift_reports".into(), vec![])
      .await
      .unwrap_err();
   assert_eq!(err.error_code(), "ACQUISITION_TIMEOUT");
   assert!(err.is_transient());

   // Writes do not need a reader
   db.execute(
      "INSERT INTO shift_reports (worker) VALUES (?1)".into(),
      vec![json!("amara")],
   )
   .await
   .unwrap();

   drop(held);
   let rows = db
      .fetch_all("SELECT worker FROM shift_reports".into(), vec![])
      .await
      .unwrap();
   assert_eq!(rows.len(), 1);
}

// ============================================================================
// Health and statistics
// ============================================================================

#[tokio::test]
async fn test_health_check_reflects_activity() {
   let (db, _dir) = setup_store(&[]).await;

   db.execute(
      "INSERT INTO shift_reports (worker) VALUES (?1)".into(),
      vec![json!("jonas")],
   )
   .await
   .unwrap();

   let report = db.health_check().await;
   assert!(report.ready);
   assert!(report.latency < Duration::from_secs(5));
   // Setup transaction, insert, and the probe itself
   assert_eq!(report.stats.total_queries, 3);
   assert_eq!(report.stats.active_connections, 0);

   let serialized = serde_json::to_value(&report).unwrap();
   assert_eq!(serialized["ready"], json!(true));
   assert!(serialized["stats"]["total_queries"].is_number());
}

// ============================================================================
// Startup failures
// ============================================================================

#[tokio::test]
async fn test_unusable_location_fails_at_startup() {
   let dir = TempDir::new().unwrap();
   let blocker = dir.path().join("not-a-directory");
   std::fs::write(&blocker, b"").unwrap();

   let settings = settings_for(&blocker.join("carebook.db"), &[]);
   let err = DatabaseWrapper::connect(&settings).await.unwrap_err();

   assert_eq!(err.error_code(), "IO_ERROR");
}

#[cfg(not(feature = "sqlcipher"))]
#[tokio::test]
async fn test_key_without_cipher_support_refuses_to_start() {
   let dir = TempDir::new().unwrap();
   let settings = settings_for(&dir.path().join("carebook.db"), &[(DB_KEY, "s3cret")]);

   let err = DatabaseWrapper::connect(&settings).await.unwrap_err();

   match err {
      Error::Pool(sqlx_sqlcipher_pool::Error::WriterUnavailable(inner)) => {
         assert!(matches!(*inner, sqlx_sqlcipher_pool::Error::EncryptionUnavailable));
      }
      other => panic!("expected the writer to be unavailable, got {other}"),
   }
}
