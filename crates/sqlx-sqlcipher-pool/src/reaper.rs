//! Background task that closes idle read connections

use std::sync::Weak;
use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, trace};

use crate::pool::Shared;

/// Spawns the reaper on the current runtime.
///
/// The task only holds a weak reference, so it never keeps a dropped pool
/// alive, and it exits on its own once the pool is closed.
pub(crate) fn spawn(pool: Weak<Shared>, period: Duration) -> AbortHandle {
   let task = tokio::spawn(async move {
      let mut ticker = interval(period);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      // The first tick completes immediately
      ticker.tick().await;

      loop {
         ticker.tick().await;

         let Some(shared) = pool.upgrade() else {
            break;
         };
         if shared.is_closed() {
            break;
         }

         let reaped = shared.sweep_idle().await;
         if reaped > 0 {
            debug!(reaped, "Idle reaper closed read connections");
         } else {
            trace!("Idle reaper found nothing to close");
         }
      }

      trace!("Idle reaper stopped");
   });

   task.abort_handle()
}
