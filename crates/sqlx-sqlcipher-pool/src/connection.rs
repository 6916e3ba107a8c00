//! Pooled connection: one engine handle plus its bookkeeping

use std::time::{Duration, Instant};

use serde::Serialize;
use sqlx::{Connection as _, SqliteConnection};
use tracing::trace;

use crate::engine::Access;
use crate::Result;

/// Snapshot of a connection's bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
   pub id: u64,
   pub access: Access,
   pub is_active: bool,
   #[serde(skip)]
   pub created_at: Instant,
   #[serde(skip)]
   pub last_used_at: Instant,
   /// Number of times this connection has been handed out
   pub query_count: u64,
}

/// An engine handle owned by the pool.
///
/// A connection is only ever reachable through the pool's idle list or
/// through the single guard that checked it out, so it can never be used by
/// two callers at once.
#[derive(Debug)]
pub(crate) struct Connection {
   handle: SqliteConnection,
   info: ConnectionInfo,
   /// Set while a `BEGIN` is outstanding on the write handle
   open_transaction: bool,
}

impl Connection {
   pub(crate) fn new(id: u64, access: Access, handle: SqliteConnection) -> Self {
      let now = Instant::now();
      Self {
         handle,
         info: ConnectionInfo {
            id,
            access,
            is_active: false,
            created_at: now,
            last_used_at: now,
            query_count: 0,
         },
         open_transaction: false,
      }
   }

   pub(crate) fn id(&self) -> u64 {
      self.info.id
   }

   pub(crate) fn info(&self) -> &ConnectionInfo {
      &self.info
   }

   pub(crate) fn handle(&mut self) -> &mut SqliteConnection {
      &mut self.handle
   }

   pub(crate) fn handle_ref(&self) -> &SqliteConnection {
      &self.handle
   }

   pub(crate) fn mark_acquired(&mut self) {
      self.info.is_active = true;
      self.info.last_used_at = Instant::now();
      self.info.query_count += 1;
      trace!(
         connection_id = self.info.id,
         access = ?self.info.access,
         query_count = self.info.query_count,
         "Connection acquired"
      );
   }

   pub(crate) fn mark_released(&mut self) {
      self.info.is_active = false;
      self.info.last_used_at = Instant::now();
      trace!(connection_id = self.info.id, "Connection released");
   }

   /// How long the connection has been idle, or `None` while checked out.
   pub(crate) fn idle_for(&self, now: Instant) -> Option<Duration> {
      if self.info.is_active {
         return None;
      }
      Some(now.saturating_duration_since(self.info.last_used_at))
   }

   pub(crate) fn has_open_transaction(&self) -> bool {
      self.open_transaction
   }

   pub(crate) fn set_open_transaction(&mut self, open: bool) {
      self.open_transaction = open;
   }

   /// Closes the engine handle.
   pub(crate) async fn close(self) -> Result<()> {
      let id = self.info.id;
      self.handle.close().await?;
      trace!(connection_id = id, "Connection closed");
      Ok(())
   }
}
