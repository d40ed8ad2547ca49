use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;
use xconn_utils::cancellation_token::CancellationToken;

struct BucketState {
    /// Tokens currently available, clamped to `[0, max_weight]`.
    tokens: f64,
    max_weight: f64,
    last_refill: Instant,
    /// FIFO arrival order for tie-breaking concurrent `wait` callers.
    queue: VecDeque<u64>,
    next_ticket: u64,
}

impl BucketState {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill);
        if elapsed.is_zero() {
            return;
        }
        let per_ms = self.max_weight / 60_000.0;
        self.tokens = (self.tokens + per_ms * elapsed.as_millis() as f64).min(self.max_weight);
        self.last_refill = now;
    }
}

/// Token bucket over a per-minute weight budget with a secondary channel for
/// server-reported consumption overrides (`UpdateWeight`).
///
/// Concurrent `wait` callers are served in FIFO order of arrival: a ticket is
/// drawn on entry and a caller only attempts to take tokens once it is at the
/// front of the queue.
pub struct WeightedLimiter {
    state: Mutex<BucketState>,
    notify: Notify,
}

impl WeightedLimiter {
    pub fn new(max_weight_per_minute: u32) -> Self {
        let max_weight = max_weight_per_minute as f64;
        Self {
            state: Mutex::new(BucketState {
                tokens: max_weight,
                max_weight,
                last_refill: Instant::now(),
                queue: VecDeque::new(),
                next_ticket: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Blocks until `weight` tokens are available or `cancel` fires. Returns
    /// an error only on cancellation; `weight <= 0` returns immediately.
    pub async fn wait(&self, weight: u32, cancel: &CancellationToken) -> anyhow::Result<()> {
        if weight == 0 {
            return Ok(());
        }
        let weight = weight as f64;

        let ticket = {
            let mut state = self.state.lock();
            let ticket = state.next_ticket;
            state.next_ticket += 1;
            state.queue.push_back(ticket);
            ticket
        };

        loop {
            {
                let mut state = self.state.lock();
                state.refill();
                let at_front = state.queue.front().copied() == Some(ticket);
                if at_front && state.tokens >= weight {
                    state.tokens -= weight;
                    state.queue.pop_front();
                    drop(state);
                    self.notify.notify_waiters();
                    return Ok(());
                }
            }

            if cancel.is_cancellation_requested() {
                self.state.lock().queue.retain(|t| *t != ticket);
                anyhow::bail!("weighted limiter wait cancelled");
            }

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(Duration::from_millis(25)) => {}
                _ = cancel.when_cancelled() => {
                    self.state.lock().queue.retain(|t| *t != ticket);
                    anyhow::bail!("weighted limiter wait cancelled");
                }
            }
        }
    }

    /// Authoritative override from a server-reported header. Drains or
    /// credits the bucket so that `remaining = max - used`; never blocks.
    pub fn update_weight(&self, used: u32) {
        let mut state = self.state.lock();
        state.refill();
        let remaining = (state.max_weight - used as f64).max(0.0);
        state.tokens = remaining.min(state.max_weight);
        drop(state);
        self.notify.notify_waiters();
    }

    pub fn available_tokens(&self) -> f64 {
        let mut state = self.state.lock();
        state.refill();
        state.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_weight_returns_immediately() {
        let limiter = WeightedLimiter::new(1200);
        let cancel = CancellationToken::new();
        limiter.wait(0, &cancel).await.expect("zero weight is free");
    }

    #[tokio::test]
    async fn wait_within_budget_does_not_block() {
        let limiter = WeightedLimiter::new(1200);
        let cancel = CancellationToken::new();
        limiter.wait(100, &cancel).await.expect("within burst");
        assert!((limiter.available_tokens() - 1100.0).abs() < 1.0);
    }

    #[tokio::test]
    async fn update_weight_credits_bucket_after_server_reports_usage() {
        let limiter = WeightedLimiter::new(1200);
        limiter.update_weight(1190);
        assert!(limiter.available_tokens() < 15.0);

        let cancel = CancellationToken::new();
        limiter.wait(5, &cancel).await.expect("small request fits in the remainder");
    }

    #[tokio::test]
    async fn wait_blocks_until_weight_is_credited_back() {
        let limiter = WeightedLimiter::new(1200);
        limiter.update_weight(1190);
        let cancel = CancellationToken::new();

        let waited = tokio::time::timeout(Duration::from_millis(50), limiter.wait(20, &cancel)).await;
        assert!(waited.is_err(), "20 > 10 remaining tokens must block");
    }

    #[tokio::test]
    async fn cancellation_is_observed_quickly() {
        let limiter = WeightedLimiter::new(1200);
        limiter.update_weight(1200);
        let cancel = CancellationToken::new();

        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            cancel_clone.cancel();
        });

        let start = Instant::now();
        let result = limiter.wait(500, &cancel).await;
        assert!(result.is_err());
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn fifo_order_serves_earliest_waiter_first() {
        let limiter = std::sync::Arc::new(WeightedLimiter::new(1200));
        limiter.update_weight(1199);

        let order = std::sync::Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for id in 0..3u32 {
            let limiter = limiter.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let cancel = CancellationToken::new();
                tokio::time::sleep(Duration::from_millis(id as u64 * 5)).await;
                limiter.wait(1, &cancel).await.expect("eventually granted");
                order.lock().push(id);
            }));
        }

        for handle in handles {
            handle.await.expect("task completed");
        }

        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }
}
