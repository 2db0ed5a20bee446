//! Subscription lifecycle: creation, periodic renewal and deletion.

use crate::coordinator::Internal;
use chrono::{DateTime, Utc};
use ngsi_source_adapter_ngsi::{ContextBroker, SubscriptionRequest};
use ngsi_source_core::AttrsFormat;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// How often a live subscription is renewed.
pub const RENEWAL_INTERVAL: Duration = Duration::from_secs(2 * 60 * 60);

/// Lifetime granted on creation and on every renewal.
pub const SUBSCRIPTION_TTL_HOURS: i64 = 3;

/// Expiry for a subscription created or renewed at `now`.
#[must_use]
pub fn expiry_from(now: DateTime<Utc>) -> DateTime<Utc> {
    now + chrono::Duration::hours(SUBSCRIPTION_TTL_HOURS)
}

/// The subscription owned by the current cycle.
#[derive(Debug)]
pub struct ActiveSubscription {
    /// Broker-assigned id
    pub id: String,
    /// Format requested for notifications
    pub attrs_format: AttrsFormat,
    /// Current expiry
    pub expires: DateTime<Utc>,
    renewal: CancellationToken,
}

impl ActiveSubscription {
    /// Track a freshly created subscription and its renewal timer.
    #[must_use]
    pub fn new(
        id: String,
        attrs_format: AttrsFormat,
        expires: DateTime<Utc>,
        renewal: CancellationToken,
    ) -> Self {
        Self {
            id,
            attrs_format,
            expires,
            renewal,
        }
    }

    /// Stop the renewal timer.
    pub fn stop_renewal(&self) {
        self.renewal.cancel();
    }
}

/// Create `request` and report the result to the coordinator.
pub(crate) fn spawn_create(
    broker: Arc<dyn ContextBroker>,
    request: SubscriptionRequest,
    generation: u64,
    tx: mpsc::UnboundedSender<Internal>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let result = broker.create_subscription(&request).await;
        let _ = tx.send(Internal::SubscriptionCreated {
            generation,
            broker,
            attrs_format: request.attrs_format,
            expires: request.expires,
            result,
        });
    })
}

/// Send a renewal tick every `period` until `token` is cancelled.
pub(crate) fn spawn_renewal_timer(
    period: Duration,
    generation: u64,
    token: CancellationToken,
    tx: mpsc::UnboundedSender<Internal>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticks = interval_at(Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticks.tick() => {
                    if tx.send(Internal::RenewTick { generation }).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

/// Extend the expiry of `subscription_id`; failures are logged and left for the next tick.
pub(crate) fn spawn_renew(
    broker: Arc<dyn ContextBroker>,
    subscription_id: String,
    generation: u64,
    tx: mpsc::UnboundedSender<Internal>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let expires = expiry_from(Utc::now());
        match broker.update_subscription(&subscription_id, expires).await {
            Ok(()) => {
                tracing::info!(subscription_id, %expires, "Subscription refreshed successfully");
                let _ = tx.send(Internal::SubscriptionRenewed {
                    generation,
                    subscription_id,
                    expires,
                });
            }
            Err(e) => {
                tracing::warn!(
                    subscription_id,
                    error = %e,
                    "Error refreshing current context broker subscription"
                );
            }
        }
    })
}

/// Delete `subscription_id`, logging the outcome. The caller has already forgotten the id.
pub(crate) fn spawn_delete(
    broker: Arc<dyn ContextBroker>,
    subscription_id: String,
    reason: &'static str,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match broker.delete_subscription(&subscription_id).await {
            Ok(()) => {
                tracing::info!(subscription_id, reason, "Subscription cancelled successfully");
            }
            Err(e) => {
                tracing::warn!(
                    subscription_id,
                    reason,
                    error = %e,
                    "Error cancelling context broker subscription"
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn expiry_is_three_hours_ahead() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 22, 30, 0).unwrap();
        assert_eq!(
            expiry_from(now),
            Utc.with_ymd_and_hms(2024, 5, 2, 1, 30, 0).unwrap()
        );
    }

    #[test]
    fn renewal_precedes_expiry() {
        let ttl = std::time::Duration::from_secs(
            u64::try_from(SUBSCRIPTION_TTL_HOURS).unwrap() * 60 * 60,
        );
        assert!(RENEWAL_INTERVAL < ttl);
    }

    #[tokio::test]
    async fn renewal_timer_stops_on_cancel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let handle = spawn_renewal_timer(Duration::from_millis(10), 7, token.clone(), tx);

        let tick = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert!(matches!(tick, Some(Internal::RenewTick { generation: 7 })));

        token.cancel();
        handle.await.unwrap();
    }
}
