//! Integration tests for SqlCipherPool: acquisition, write serialization,
//! transactions, statistics, and idle reaping.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sqlx_sqlcipher_pool::{Error, PoolConfig, SqlCipherPool, engine};
use tempfile::TempDir;

struct TestPool {
   pool: Arc<SqlCipherPool>,
   _dir: TempDir,
}

fn init_tracing() {
   let _ = tracing_subscriber::fmt()
      .with_test_writer()
      .with_max_level(tracing::Level::DEBUG)
      .try_init();
}

async fn setup_pool(config: PoolConfig) -> TestPool {
   init_tracing();

   let dir = TempDir::new().unwrap();
   let pool = SqlCipherPool::open(dir.path().join("carebook.db"), config)
      .await
      .unwrap();

   pool
      .execute(
         r#"
         CREATE TABLE shift_reports (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            worker TEXT NOT NULL,
            notes TEXT
         )
         "#,
         &[],
      )
      .await
      .unwrap();

   TestPool { pool, _dir: dir }
}

fn short_timeouts() -> PoolConfig {
   PoolConfig {
      acquire_timeout: Duration::from_millis(300),
      idle_timeout: Duration::from_millis(50),
      reap_interval: Duration::from_millis(20),
      ..Default::default()
   }
}

// ============================================================================
// Read acquisition
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reads_within_capacity_all_succeed() {
   let config = PoolConfig {
      max_read_connections: 4,
      ..short_timeouts()
   };
   let test_pool = setup_pool(config).await;

   let mut tasks = Vec::new();
   for _ in 0..4 {
      let pool = Arc::clone(&test_pool.pool);
      tasks.push(tokio::spawn(async move {
         // Hold the reader long enough for all four to overlap
         let mut reader = pool.acquire_reader().await?;
         let rows: Vec<(i64,)> =
            engine::all(&mut reader, "SELECT count(*) FROM shift_reports", &[]).await?;
         tokio::time::sleep(Duration::from_millis(50)).await;
         Ok::<_, Error>(rows)
      }));
   }

   for task in tasks {
      let rows = task.await.unwrap().unwrap();
      assert_eq!(rows, vec![(0,)]);
   }

   assert!(test_pool.pool.stats().read_connections <= 4);
}

#[tokio::test]
async fn test_third_reader_times_out_when_two_are_held() {
   let config = PoolConfig {
      max_read_connections: 2,
      ..short_timeouts()
   };
   let test_pool = setup_pool(config).await;
   let pool = &test_pool.pool;

   let _first = pool.acquire_reader().await.unwrap();
   let _second = pool.acquire_reader().await.unwrap();

   let started = Instant::now();
   let err = pool
      .query("SELECT * FROM shift_reports", &[])
      .await
      .err().unwrap();
   let elapsed = started.elapsed();

   match err {
      Error::AcquisitionTimeout { waited } => assert!(waited >= Duration::from_millis(300)),
      other => panic!("expected acquisition timeout, got {other}"),
   }
   assert!(elapsed >= Duration::from_millis(300), "failed too early: {elapsed:?}");
   assert!(elapsed < Duration::from_secs(3), "waited too long: {elapsed:?}");

   // Timeouts never reach the engine, so they are not counted
   assert_eq!(pool.stats().total_queries, 1);
}

#[tokio::test]
async fn test_waiting_reader_gets_released_connection() {
   let config = PoolConfig {
      max_read_connections: 1,
      min_read_connections: 1,
      acquire_timeout: Duration::from_secs(2),
      ..Default::default()
   };
   let test_pool = setup_pool(config).await;
   let pool = Arc::clone(&test_pool.pool);

   let held = pool.acquire_reader().await.unwrap();
   let held_id = held.info().id;

   let waiter = {
      let pool = Arc::clone(&pool);
      tokio::spawn(async move { pool.acquire_reader().await.map(|r| r.info().id) })
   };

   tokio::time::sleep(Duration::from_millis(100)).await;
   drop(held);

   assert_eq!(waiter.await.unwrap().unwrap(), held_id);
}

// ============================================================================
// Write serialization
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writes_are_serialized() {
   let test_pool = setup_pool(PoolConfig::default()).await;

   let mut tasks = Vec::new();
   for i in 0..20 {
      let pool = Arc::clone(&test_pool.pool);
      tasks.push(tokio::spawn(async move {
         pool
            .execute(
               "INSERT INTO shift_reports (worker) VALUES (?1)",
               &[format!("worker-{i}").into()],
            )
            .await
      }));
   }

   let mut ids = HashSet::new();
   for task in tasks {
      let result = task.await.unwrap().unwrap();
      assert_eq!(result.rows_affected, 1);
      ids.insert(result.last_insert_id);
   }

   // Some serial order assigned every id exactly once
   assert_eq!(ids, (1..=20).collect::<HashSet<i64>>());

   let rows: Vec<(i64,)> = test_pool
      .pool
      .query_as("SELECT count(*) FROM shift_reports", &[])
      .await
      .unwrap();
   assert_eq!(rows, vec![(20,)]);
}

#[tokio::test]
async fn test_readers_see_committed_snapshot_during_write() {
   let test_pool = setup_pool(PoolConfig::default()).await;
   let pool = &test_pool.pool;

   pool
      .execute("INSERT INTO shift_reports (worker) VALUES ('before')", &[])
      .await
      .unwrap();

   let mut writer = pool.acquire_writer().await.unwrap();
   engine::run(&mut writer, "BEGIN IMMEDIATE", &[]).await.unwrap();
   engine::run(
      &mut writer,
      "INSERT INTO shift_reports (worker) VALUES ('uncommitted')",
      &[],
   )
   .await
   .unwrap();

   // The reader is not blocked by the open write transaction
   let rows: Vec<(String,)> = pool
      .query_as("SELECT worker FROM shift_reports", &[])
      .await
      .unwrap();
   assert_eq!(rows, vec![("before".to_string(),)]);

   engine::run(&mut writer, "COMMIT", &[]).await.unwrap();
   drop(writer);

   let rows: Vec<(String,)> = pool
      .query_as("SELECT worker FROM shift_reports ORDER BY id", &[])
      .await
      .unwrap();
   assert_eq!(rows.len(), 2);
}

// ============================================================================
// Transactions
// ============================================================================

#[tokio::test]
async fn test_failed_transaction_leaves_rows_unchanged() {
   let test_pool = setup_pool(PoolConfig::default()).await;
   let pool = &test_pool.pool;

   pool
      .execute(
         "INSERT INTO shift_reports (worker, notes) VALUES ('amara', 'handover done')",
         &[],
      )
      .await
      .unwrap();

   let result = pool
      .transaction(|conn| {
         Box::pin(async move {
            engine::run(conn, "UPDATE shift_reports SET notes = 'edited'", &[]).await?;
            engine::run(conn, "DELETE FROM shift_reports", &[]).await?;
            engine::run(conn, "INSERT INTO shift_reports (worker) VALUES (NULL)", &[]).await?;
            Ok::<_, Error>(())
         })
      })
      .await;

   assert!(matches!(result, Err(Error::Execution { .. })));

   let rows: Vec<(String, String)> = pool
      .query_as("SELECT worker, notes FROM shift_reports", &[])
      .await
      .unwrap();
   assert_eq!(
      rows,
      vec![("amara".to_string(), "handover done".to_string())]
   );
   assert_eq!(pool.stats().active_connections, 0);
}

// ============================================================================
// Statistics
// ============================================================================

#[tokio::test]
async fn test_every_operation_is_counted_and_window_is_bounded() {
   let config = PoolConfig {
      stats_window: 5,
      ..Default::default()
   };
   let test_pool = setup_pool(config).await;
   let pool = &test_pool.pool;

   // setup_pool already issued one execute
   for _ in 0..6 {
      pool
         .execute("INSERT INTO shift_reports (worker) VALUES ('x')", &[])
         .await
         .unwrap();
   }
   for _ in 0..4 {
      pool.query("SELECT * FROM shift_reports", &[]).await.unwrap();
   }
   pool
      .transaction(|conn| {
         Box::pin(async move {
            engine::run(conn, "DELETE FROM shift_reports", &[]).await?;
            Ok::<_, Error>(())
         })
      })
      .await
      .unwrap();

   // Failed statements still count
   assert!(pool.query("SELECT * FROM missing", &[]).await.is_err());

   let stats = pool.stats();
   assert_eq!(stats.total_queries, 13);
   assert_eq!(stats.sampled_queries, 5);
   assert!(stats.slow_queries <= stats.total_queries);
}

#[tokio::test]
async fn test_delayed_operation_counts_as_slow_once() {
   let config = PoolConfig {
      slow_query_threshold: Duration::from_millis(50),
      ..Default::default()
   };
   let test_pool = setup_pool(config).await;
   let pool = &test_pool.pool;

   let before = pool.stats();

   pool
      .transaction(|conn| {
         Box::pin(async move {
            engine::run(conn, "INSERT INTO shift_reports (worker) VALUES ('late')", &[]).await?;
            tokio::time::sleep(Duration::from_millis(120)).await;
            Ok::<_, Error>(())
         })
      })
      .await
      .unwrap();

   let after = pool.stats();
   assert_eq!(after.slow_queries, before.slow_queries + 1);
   assert_eq!(after.total_queries, before.total_queries + 1);
   assert!(after.slow_queries <= after.total_queries);
   assert!(after.avg_query_time > Duration::ZERO);
}

// ============================================================================
// Idle reaping
// ============================================================================

#[tokio::test]
async fn test_reaper_shrinks_to_floor_and_no_further() {
   let config = PoolConfig {
      max_read_connections: 4,
      ..short_timeouts()
   };
   let test_pool = setup_pool(config).await;
   let pool = &test_pool.pool;

   let held = vec![
      pool.acquire_reader().await.unwrap(),
      pool.acquire_reader().await.unwrap(),
      pool.acquire_reader().await.unwrap(),
      pool.acquire_reader().await.unwrap(),
   ];
   assert_eq!(pool.stats().read_connections, 4);
   drop(held);

   tokio::time::sleep(Duration::from_millis(300)).await;
   assert_eq!(pool.stats().read_connections, 2);

   tokio::time::sleep(Duration::from_millis(200)).await;
   let stats = pool.stats();
   assert_eq!(stats.read_connections, 2);
   assert_eq!(stats.idle_connections, 3);

   // The survivors still serve reads
   pool.query("SELECT 1", &[]).await.unwrap();
}

// ============================================================================
// Startup and shutdown
// ============================================================================

#[tokio::test]
async fn test_writer_failure_prevents_startup() {
   init_tracing();
   let dir = TempDir::new().unwrap();
   let path = dir.path().join("missing-dir").join("carebook.db");

   let err = SqlCipherPool::open(&path, PoolConfig::default())
      .await
      .unwrap_err();

   assert!(matches!(err, Error::WriterUnavailable(_)));
   assert!(!path.exists());
}

#[tokio::test]
async fn test_invalid_config_is_rejected_before_opening() {
   let dir = TempDir::new().unwrap();
   let path = dir.path().join("carebook.db");
   let config = PoolConfig {
      max_read_connections: 0,
      ..Default::default()
   };

   let err = SqlCipherPool::open(&path, config).await.unwrap_err();

   assert!(matches!(err, Error::InvalidConfig(_)));
   assert!(!path.exists());
}

#[tokio::test]
async fn test_close_releases_everything() {
   let test_pool = setup_pool(PoolConfig::default()).await;
   let pool = &test_pool.pool;

   pool.close().await.unwrap();

   assert!(!pool.is_ready());
   assert!(matches!(pool.acquire_writer().await, Err(Error::PoolClosed)));
   assert!(matches!(pool.acquire_reader().await, Err(Error::PoolClosed)));

   let stats = pool.stats();
   assert_eq!(stats.read_connections, 0);
   assert_eq!(stats.active_connections + stats.idle_connections, 0);
}
