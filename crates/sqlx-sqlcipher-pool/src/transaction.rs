//! Explicit BEGIN/COMMIT/ROLLBACK around a caller's unit of work

use std::fmt;
use std::time::Instant;

use futures::future::BoxFuture;
use sqlx::SqliteConnection;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::engine;
use crate::guard::WriteGuard;
use crate::pool::SqlCipherPool;
use crate::Error;

const BEGIN: &str = "BEGIN IMMEDIATE";
const COMMIT: &str = "COMMIT";
const ROLLBACK: &str = "ROLLBACK";

/// Lifecycle of one transaction on the write connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
   Idle,
   Begun,
   Committed,
   RolledBack,
}

impl SqlCipherPool {
   /// Runs `unit_of_work` inside a transaction on the write connection.
   ///
   /// Commits if the unit returns `Ok`. If it returns `Err`, issues a
   /// `ROLLBACK` and hands the unit's error back unchanged; when the rollback
   /// fails too, both are reported as [`Error::TransactionRollbackFailed`].
   /// The writer is held for the whole unit and released afterwards in every
   /// case. Transactions do not nest.
   ///
   /// ```no_run
   /// # async fn demo(pool: &sqlx_sqlcipher_pool::SqlCipherPool) -> sqlx_sqlcipher_pool::Result<()> {
   /// use sqlx_sqlcipher_pool::engine;
   ///
   /// let report_id = pool
   ///    .transaction(|conn| {
   ///       Box::pin(async move {
   ///          let report = engine::run(
   ///             conn,
   ///             "INSERT INTO shift_reports (worker) VALUES (?1)",
   ///             &["amara".into()],
   ///          )
   ///          .await?;
   ///          engine::run(
   ///             conn,
   ///             "INSERT INTO audit_log (action, report_id) VALUES ('create', ?1)",
   ///             &[report.last_insert_id.into()],
   ///          )
   ///          .await?;
   ///          Ok::<_, sqlx_sqlcipher_pool::Error>(report.last_insert_id)
   ///       })
   ///    })
   ///    .await?;
   /// # Ok(())
   /// # }
   /// ```
   pub async fn transaction<T, E, F>(&self, unit_of_work: F) -> Result<T, E>
   where
      F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T, E>>,
      E: From<Error> + fmt::Display,
   {
      let mut writer = self.writer_for("transaction", BEGIN).await?;
      let started = Instant::now();

      let result = run_transaction(&mut writer, unit_of_work).await;

      writer
         .shared()
         .observe("transaction", BEGIN, started.elapsed(), result.as_ref().err());
      result
   }
}

async fn run_transaction<T, E, F>(writer: &mut WriteGuard, unit_of_work: F) -> Result<T, E>
where
   F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T, E>>,
   E: From<Error> + fmt::Display,
{
   let connection_id = writer.info().id;
   let mut state = TransactionState::Idle;

   engine::run(&mut **writer, BEGIN, &[]).await?;
   writer.connection_mut().set_open_transaction(true);
   state = advance(connection_id, state, TransactionState::Begun);

   match unit_of_work(&mut **writer).await {
      Ok(value) => match engine::run(&mut **writer, COMMIT, &[]).await {
         Ok(_) => {
            writer.connection_mut().set_open_transaction(false);
            advance(connection_id, state, TransactionState::Committed);
            Ok(value)
         }
         Err(commit_err) => {
            rollback(writer, connection_id, state, commit_err.to_string())
               .await
               .map_err(E::from)?;
            Err(E::from(commit_err))
         }
      },
      Err(err) => {
         rollback(writer, connection_id, state, err.to_string())
            .await
            .map_err(E::from)?;
         Err(err)
      }
   }
}

/// Issues a ROLLBACK and settles the writer's open-transaction flag.
async fn rollback(
   writer: &mut WriteGuard,
   connection_id: u64,
   state: TransactionState,
   transaction_error: String,
) -> Result<(), Error> {
   let outcome = engine::run(&mut **writer, ROLLBACK, &[]).await.map(|_| ());
   settle_rollback(
      writer.connection_mut(),
      connection_id,
      state,
      transaction_error,
      outcome,
   )
}

/// A ROLLBACK refused because the engine already ended the transaction
/// counts as rolled back. Any other failure is reported as
/// [`Error::TransactionRollbackFailed`] and leaves the writer flagged, so its
/// next checkout retries the rollback.
fn settle_rollback(
   conn: &mut Connection,
   connection_id: u64,
   state: TransactionState,
   transaction_error: String,
   outcome: Result<(), Error>,
) -> Result<(), Error> {
   match outcome {
      Ok(()) => {
         conn.set_open_transaction(false);
         advance(connection_id, state, TransactionState::RolledBack);
         Ok(())
      }
      Err(e) if e.is_no_active_transaction() => {
         debug!(connection_id, "Engine already rolled the transaction back");
         conn.set_open_transaction(false);
         advance(connection_id, state, TransactionState::RolledBack);
         Ok(())
      }
      Err(rollback_err) => {
         warn!(
            connection_id,
            transaction_error = %transaction_error,
            rollback_error = %rollback_err,
            "Rollback failed"
         );
         Err(Error::TransactionRollbackFailed {
            transaction_error,
            rollback_error: rollback_err.to_string(),
         })
      }
   }
}

fn advance(connection_id: u64, from: TransactionState, to: TransactionState) -> TransactionState {
   debug!(connection_id, ?from, ?to, "Transaction state changed");
   to
}
