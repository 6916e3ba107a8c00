//! RAII guards for checked-out connections

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use sqlx::SqliteConnection;
use tokio::sync::{OwnedMappedMutexGuard, OwnedSemaphorePermit};

use crate::connection::{Connection, ConnectionInfo};
use crate::pool::Shared;

/// RAII guard for a read-only connection.
///
/// Dereferences to the underlying `SqliteConnection`. Dropping the guard
/// marks the connection idle and returns it to the pool before the read
/// permit is released, so the next waiter always finds it.
#[must_use = "if unused, the connection is immediately returned to the pool"]
pub struct ReadGuard {
   conn: Option<Connection>,
   shared: Arc<Shared>,
   // Released after `conn` is back in the idle list
   _permit: OwnedSemaphorePermit,
}

impl ReadGuard {
   pub(crate) fn new(conn: Connection, shared: Arc<Shared>, permit: OwnedSemaphorePermit) -> Self {
      Self {
         conn: Some(conn),
         shared,
         _permit: permit,
      }
   }

   fn conn(&self) -> &Connection {
      self.conn.as_ref().expect("connection already released")
   }

   /// Bookkeeping for the checked-out connection
   pub fn info(&self) -> &ConnectionInfo {
      self.conn().info()
   }
}

impl Deref for ReadGuard {
   type Target = SqliteConnection;

   fn deref(&self) -> &Self::Target {
      self.conn().handle_ref()
   }
}

impl DerefMut for ReadGuard {
   fn deref_mut(&mut self) -> &mut Self::Target {
      self
         .conn
         .as_mut()
         .expect("connection already released")
         .handle()
   }
}

impl Drop for ReadGuard {
   fn drop(&mut self) {
      if let Some(conn) = self.conn.take() {
         self.shared.release_reader(conn);
      }
   }
}

/// RAII guard ensuring exclusive write access.
///
/// Only one `WriteGuard` can exist at a time. Dereferences to the write
/// `SqliteConnection`; dropping it releases the writer to the next caller.
#[must_use = "if unused, the write lock is immediately released"]
pub struct WriteGuard {
   conn: OwnedMappedMutexGuard<Option<Connection>, Connection>,
   shared: Arc<Shared>,
}

impl WriteGuard {
   pub(crate) fn new(
      conn: OwnedMappedMutexGuard<Option<Connection>, Connection>,
      shared: Arc<Shared>,
   ) -> Self {
      Self { conn, shared }
   }

   /// Bookkeeping for the write connection
   pub fn info(&self) -> &ConnectionInfo {
      self.conn.info()
   }

   pub(crate) fn connection_mut(&mut self) -> &mut Connection {
      &mut *self.conn
   }

   pub(crate) fn shared(&self) -> &Shared {
      &self.shared
   }
}

impl Deref for WriteGuard {
   type Target = SqliteConnection;

   fn deref(&self) -> &Self::Target {
      self.conn.handle_ref()
   }
}

impl DerefMut for WriteGuard {
   fn deref_mut(&mut self) -> &mut Self::Target {
      self.conn.handle()
   }
}

impl Drop for WriteGuard {
   fn drop(&mut self) {
      self.conn.mark_released();
      self.shared.release_writer();
   }
}
