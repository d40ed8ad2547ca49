use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use parking_lot::Mutex;
use xconn_domain::error::{ClockSyncError, ConnectionError, CoreError};
use xconn_domain::exchange_id::ExchangeId;

use crate::config::ClockSyncSettings;

/// Supplies exchange-reported server time, in milliseconds since the Unix epoch.
/// Implemented by each driver over its `server_time` REST call.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ServerTimeProvider: Send + Sync {
    async fn server_time_ms(&self) -> anyhow::Result<i64>;
}

fn local_now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_millis() as i64
}

struct SyncState {
    last_sync_local_ms: i64,
}

/// Tracks `server_ms - local_ms` for one exchange account and keeps it fresh
/// with a periodic round-trip resync against the exchange's time endpoint.
pub struct ClockSync {
    exchange: ExchangeId,
    offset_ms: AtomicI64,
    state: Mutex<SyncState>,
    max_offset: Duration,
}

impl ClockSync {
    pub fn new(exchange: ExchangeId, settings: ClockSyncSettings) -> Self {
        Self {
            exchange,
            offset_ms: AtomicI64::new(0),
            state: Mutex::new(SyncState { last_sync_local_ms: 0 }),
            max_offset: settings.max_offset,
        }
    }

    /// Samples local time before and after the provider call, attributing the
    /// offset to the midpoint of the round trip.
    pub async fn sync(&self, provider: &dyn ServerTimeProvider) -> Result<(), CoreError> {
        let t0 = local_now_ms();
        let server_ms = provider.server_time_ms().await.map_err(|e| {
            CoreError::Connection(ConnectionError {
                exchange: self.exchange.clone(),
                endpoint: "server_time".to_owned(),
                reason: e.to_string(),
                retriable: true,
            })
        })?;
        let t1 = local_now_ms();
        let mid = (t0 + t1) / 2;
        let new_offset = server_ms - mid;

        self.offset_ms.store(new_offset, Ordering::Release);
        self.state.lock().last_sync_local_ms = t1;

        let drift = new_offset.abs();
        if drift as u128 > self.max_offset.as_millis() {
            return Err(CoreError::ClockSync(ClockSyncError {
                exchange: self.exchange.clone(),
                local_ms: mid,
                server_ms,
                drift_ms: new_offset,
            }));
        }

        Ok(())
    }

    pub fn offset_ms(&self) -> i64 {
        self.offset_ms.load(Ordering::Acquire)
    }

    pub fn now_ms(&self) -> i64 {
        local_now_ms() + self.offset_ms()
    }

    /// Synchronous check of the last-committed offset against `max_offset`,
    /// without a fresh provider round trip.
    pub fn validate_offset(&self) -> Result<(), ClockSyncError> {
        let offset = self.offset_ms();
        if offset.unsigned_abs() as u128 > self.max_offset.as_millis() {
            return Err(ClockSyncError {
                exchange: self.exchange.clone(),
                local_ms: local_now_ms(),
                server_ms: local_now_ms() + offset,
                drift_ms: offset,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_offset_passes_within_bound() {
        let clock = ClockSync::new(ExchangeId::new("binance"), ClockSyncSettings::default());
        clock.offset_ms.store(100, Ordering::Release);
        assert!(clock.validate_offset().is_ok());
    }

    #[test]
    fn validate_offset_flags_drift_past_bound() {
        let clock = ClockSync::new(
            ExchangeId::new("binance"),
            ClockSyncSettings { max_offset: Duration::from_millis(100), sync_interval: Duration::from_secs(300) },
        );
        clock.offset_ms.store(5_000, Ordering::Release);
        assert!(clock.validate_offset().is_err());
    }

    struct FixedProvider(i64);

    #[async_trait]
    impl ServerTimeProvider for FixedProvider {
        async fn server_time_ms(&self) -> anyhow::Result<i64> {
            Ok(self.0)
        }
    }

    #[tokio::test]
    async fn sync_commits_offset_from_provider() {
        let clock = ClockSync::new(ExchangeId::new("binance"), ClockSyncSettings::default());
        let local_before = local_now_ms();
        let provider = FixedProvider(local_before + 250);

        clock.sync(&provider).await.expect("within bound");

        assert!((clock.offset_ms() - 250).abs() < 50);
        assert!(clock.now_ms() >= local_before + 200);
    }

    #[tokio::test]
    async fn sync_flags_drift_past_bound_but_still_commits() {
        let clock = ClockSync::new(
            ExchangeId::new("binance"),
            ClockSyncSettings {
                max_offset: Duration::from_millis(100),
                sync_interval: Duration::from_secs(300),
            },
        );
        let provider = FixedProvider(local_now_ms() + 10_000);

        let result = clock.sync(&provider).await;
        assert!(result.is_err());
        assert!(clock.offset_ms() > 9000);
    }

    #[tokio::test]
    async fn provider_error_surfaces_retriable_connection_error_and_leaves_offset_untouched() {
        let clock = ClockSync::new(ExchangeId::new("binance"), ClockSyncSettings::default());
        clock.offset_ms.store(42, Ordering::Release);

        struct FailingProvider;
        #[async_trait]
        impl ServerTimeProvider for FailingProvider {
            async fn server_time_ms(&self) -> anyhow::Result<i64> {
                anyhow::bail!("connection reset")
            }
        }

        let err = clock.sync(&FailingProvider).await.expect_err("provider failure must surface");
        assert!(err.is_retriable());
        assert!(matches!(err, CoreError::Connection(_)));
        assert_eq!(clock.offset_ms(), 42);
    }
}
