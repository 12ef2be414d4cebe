//! Notification Poll Task
//!
//! Background task that periodically fetches a user's notification feed.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::sync::NotificationCenter;

/// Spawns a background task that polls `user_id`'s feed every `interval`.
///
/// The first fetch happens immediately. Failed fetches are logged and the
/// loop keeps going; the center's own minimum interval still applies.
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// when polling stops or during shutdown.
///
/// # Example
/// ```ignore
/// let handle = spawn_poll_task(center.clone(), "u1".to_string(), Duration::from_secs(10));
/// // Later, during shutdown:
/// handle.abort();
/// ```
pub fn spawn_poll_task(
    center: Arc<NotificationCenter>,
    user_id: String,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            user_id = %user_id,
            interval_ms = interval.as_millis() as u64,
            "Starting notification poll task"
        );

        loop {
            match center.fetch(&user_id).await {
                Ok(Some(feed)) => debug!(user_id = %user_id, retained = feed.len(), "notification poll complete"),
                Ok(None) => debug!(user_id = %user_id, "notification poll skipped, nothing cached"),
                Err(e) => debug!(user_id = %user_id, error = %e, "notification poll failed"),
            }

            tokio::time::sleep(interval).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::Reply;
    use crate::sync::testing::harness;
    use crate::sync::LogNotifier;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_poll_task_fetches_each_interval() {
        let h = harness();
        h.transport.set("u1/notifications", Reply::json(json!([])));
        let center = NotificationCenter::new(h.ctx.clone(), Arc::new(LogNotifier));
        let interval = h.ctx.config.poll_period;

        let handle = spawn_poll_task(center, "u1".to_string(), interval);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(h.transport.call_count("u1/notifications"), 1);

        h.clock.advance(interval);
        tokio::time::sleep(interval).await;
        assert_eq!(h.transport.call_count("u1/notifications"), 2);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_fetch_does_not_wedge_user() {
        let h = harness();
        h.transport.set(
            "u1/notifications",
            Reply::json(json!([])).delayed(Duration::from_millis(100)),
        );
        let center = NotificationCenter::new(h.ctx.clone(), Arc::new(LogNotifier));

        center.start_polling("u1");
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(h.transport.call_count("u1/notifications"), 1);
        center.stop_polling("u1");
        tokio::time::sleep(Duration::from_millis(1)).await;

        h.clock.advance(Duration::from_secs(60));
        assert_eq!(center.fetch("u1").await.unwrap(), Some(Vec::new()));
        assert_eq!(h.transport.call_count("u1/notifications"), 2);

        h.clock.advance(Duration::from_secs(60));
        center.start_polling("u1");
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(h.transport.call_count("u1/notifications"), 3);
        center.stop_polling("u1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop_polling() {
        let h = harness();
        h.transport.set("u1/notifications", Reply::json(json!([])));
        let center = NotificationCenter::new(h.ctx.clone(), Arc::new(LogNotifier));

        center.start_polling("u1");
        center.start_polling("u1");
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(center.is_polling("u1"));
        assert_eq!(h.transport.call_count("u1/notifications"), 1);

        center.stop_polling("u1");
        assert!(!center.is_polling("u1"));
    }
}
