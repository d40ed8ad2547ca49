use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use xconn_domain::error::WebSocketReconnectError;
use xconn_domain::exchange_id::ExchangeId;
use xconn_domain::symbol::Symbol;
use xconn_utils::cancellation_token::CancellationToken;
use xconn_utils::infrastructure::{spawn_future, SpawnFutureFlags};

use crate::clock_sync::{ClockSync, ServerTimeProvider};
use crate::config::ExchangeSettings;
use crate::driver::Driver;
use crate::limiter::WeightedLimiter;
use crate::order_book_assembler::OrderBookAssembler;
use crate::rest_pipeline::RestPipeline;
use crate::ws_client::{LifecycleState, WsClient};

/// Adapts a [`Driver`] to the `ServerTimeProvider` the clock-sync loop needs,
/// so `ClockSync` stays driver-agnostic.
struct DriverTimeProvider<D: Driver>(Arc<D>);

#[async_trait]
impl<D: Driver> ServerTimeProvider for DriverTimeProvider<D> {
    async fn server_time_ms(&self) -> anyhow::Result<i64> {
        self.0.server_time_ms().await
    }
}

/// Tracks restart events in a sliding window; `record()` returns `false` once
/// more than `intensity` restarts have landed inside `period`, at which point
/// the owning supervisor must stop and fail upward.
struct RestartTracker {
    intensity: u32,
    period: Duration,
    events: Mutex<VecDeque<Instant>>,
}

impl RestartTracker {
    fn new(intensity: u32, period: Duration) -> Self {
        Self {
            intensity,
            period,
            events: Mutex::new(VecDeque::new()),
        }
    }

    fn record(&self) -> bool {
        let now = Instant::now();
        let mut events = self.events.lock();
        while matches!(events.front(), Some(t) if now.duration_since(*t) > self.period) {
            events.pop_front();
        }
        events.push_back(now);
        events.len() as u32 <= self.intensity
    }
}

/// Root-of-exchange supervision node. Owns `ClockSync`, `WeightedLimiter`,
/// `RestPipeline`, one or more `WsClient`s (one per logical stream group),
/// and one `OrderBookAssembler` per subscribed symbol.
///
/// Strategy: `OneForOne`. A child is restarted in place on crash; the node
/// itself fails once restarts exceed `intensity` within `period`.
pub struct ExchangeSupervisor<D: Driver> {
    exchange: ExchangeId,
    driver: Arc<D>,
    clock: Arc<ClockSync>,
    limiter: Arc<WeightedLimiter>,
    rest: Arc<RestPipeline<D>>,
    ws_clients: Mutex<Vec<Arc<WsClient<D>>>>,
    assemblers: DashMap<Symbol, Arc<OrderBookAssembler>>,
    settings: ExchangeSettings,
    restarts: RestartTracker,
    failed: AtomicBool,
    cancel: CancellationToken,
}

impl<D: Driver> ExchangeSupervisor<D> {
    pub fn new(exchange: ExchangeId, driver: Arc<D>, settings: ExchangeSettings) -> Arc<Self> {
        let clock = Arc::new(ClockSync::new(exchange.clone(), settings.clock_sync));
        let limiter = Arc::new(WeightedLimiter::new(settings.rest.max_weight));
        let rest = Arc::new(RestPipeline::new(exchange.clone(), driver.clone(), limiter.clone(), clock.clone(), &settings.rest));

        Arc::new(Self {
            exchange,
            driver,
            clock,
            limiter,
            rest,
            ws_clients: Mutex::new(Vec::new()),
            assemblers: DashMap::new(),
            restarts: RestartTracker::new(settings.supervisor.intensity, settings.supervisor.period),
            settings,
            failed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        })
    }

    pub fn rest(&self) -> &Arc<RestPipeline<D>> {
        &self.rest
    }

    pub fn clock(&self) -> &Arc<ClockSync> {
        &self.clock
    }

    pub fn limiter(&self) -> &Arc<WeightedLimiter> {
        &self.limiter
    }

    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Adds a new `WsClient` for one logical stream group (e.g. market-data
    /// vs user-data) and starts its supervised lifecycle.
    pub fn add_ws_client(self: &Arc<Self>) -> Arc<WsClient<D>> {
        let client = WsClient::new(self.exchange.clone(), self.driver.clone(), self.settings.ws.clone());
        self.ws_clients.lock().push(client.clone());
        client
    }

    /// Returns the assembler for `symbol`, creating it on first access.
    pub fn order_book_assembler(&self, symbol: Symbol) -> Arc<OrderBookAssembler> {
        self.assemblers
            .entry(symbol.clone())
            .or_insert_with(|| Arc::new(OrderBookAssembler::new(self.exchange.clone(), symbol)))
            .clone()
    }

    /// Forces the assembler for `symbol` back into buffering mode. Used when
    /// a caller outside the normal diff path detects an integrity violation.
    pub fn restart_order_book_assembler(&self, symbol: &Symbol) {
        if let Some(assembler) = self.assemblers.get(symbol) {
            assembler.force_resync();
        }
        self.restarts.record();
    }

    /// Starts the clock-sync resync loop and the liveness watchdog for every
    /// registered `WsClient`. Intended to run once, after all children have
    /// been constructed via `add_ws_client`.
    pub fn start(self: &Arc<Self>) {
        self.spawn_clock_sync_loop();
        self.spawn_ws_watchdog();
    }

    /// Stops all children in reverse-start order: WS clients first, then the
    /// REST pipeline. Marks the supervisor failed so callers can observe it
    /// and restart the whole node from scratch, per `OneForOne` escalation.
    pub async fn stop_and_fail(self: &Arc<Self>) {
        self.failed.store(true, Ordering::SeqCst);
        self.cancel.cancel();
        for client in self.ws_clients.lock().iter().rev() {
            client.close().await;
        }
        self.rest.close();
        log::error!(
            "{}: restart intensity {} exceeded within {:?}, supervisor failed",
            self.exchange,
            self.settings.supervisor.intensity,
            self.settings.supervisor.period
        );
    }

    fn spawn_clock_sync_loop(self: &Arc<Self>) {
        let this = self.clone();
        let provider = DriverTimeProvider(self.driver.clone());
        let cancel = self.cancel.clone();
        spawn_future(
            "clock sync loop",
            SpawnFutureFlags::STOP_BY_TOKEN,
            async move {
                loop {
                    tokio::time::sleep(this.settings.clock_sync.sync_interval).await;
                    if let Err(e) = this.clock.sync(&provider).await {
                        log::warn!("{}: clock sync drifted: {e}", this.exchange);
                    }
                }
            },
            |_, _| {},
            cancel,
        );
    }

    fn spawn_ws_watchdog(self: &Arc<Self>) {
        let this = self.clone();
        let cancel = self.cancel.clone();
        spawn_future(
            "ws watchdog",
            SpawnFutureFlags::STOP_BY_TOKEN,
            async move {
                loop {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    if this.has_failed() {
                        return Ok(());
                    }

                    let clients: Vec<_> = this.ws_clients.lock().clone();
                    for client in clients {
                        if client.take_reconnect_exhausted() {
                            let error = WebSocketReconnectError {
                                exchange: this.exchange.clone(),
                                attempts: client.attempt_count(),
                                max: this.settings.ws.reconnect.max_attempts,
                                reason: "reconnect schedule exhausted".to_owned(),
                            };
                            log::error!("{}: {error}", this.exchange);

                            if this.restarts.record() {
                                let _ = client.connect().await;
                            } else {
                                this.stop_and_fail().await;
                                return Ok(());
                            }
                        } else if client.state() == LifecycleState::Disconnected {
                            if this.restarts.record() {
                                let _ = client.connect().await;
                            } else {
                                this.stop_and_fail().await;
                                return Ok(());
                            }
                        }
                    }
                }
            },
            |_, _| {},
            cancel,
        );
    }
}
