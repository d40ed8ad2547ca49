use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex as SyncMutex;
use rand::Rng;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use xconn_domain::exchange_id::ExchangeId;
use xconn_domain::order::Order;
use xconn_domain::order_book::OrderBookLevel;
use xconn_domain::symbol::Symbol;
use xconn_domain::market_data::{Balance, Kline, Ticker, Trade};
use xconn_utils::cancellation_token::CancellationToken;

use crate::config::WsSettings;
use crate::driver::{BookDiffEvent, DecodedEvent, Driver};
use crate::subscription_registry::SubscriptionRegistry;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum LifecycleState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
    Closed,
}

/// Unified order-book event handed to `on_order_book`: either a full-depth
/// snapshot from a WS stream, or a diff destined for an `OrderBookAssembler`.
#[derive(Debug, Clone)]
pub enum OrderBookEvent {
    Snapshot {
        symbol: Symbol,
        bids: Vec<OrderBookLevel>,
        asks: Vec<OrderBookLevel>,
        last_update_id: u64,
    },
    Diff(BookDiffEvent),
}

type Sink<T> = SyncMutex<Option<Box<dyn Fn(T) + Send + Sync>>>;

#[derive(Default)]
struct Sinks {
    ticker: Sink<Ticker>,
    order_book: Sink<OrderBookEvent>,
    trade: Sink<Trade>,
    kline: Sink<Kline>,
    order: Sink<Order>,
    balance: Sink<Balance>,
    connect: Sink<()>,
    disconnect: Sink<()>,
}

/// Invokes a registered sink, catching a panic so a misbehaving callback
/// can never terminate the read loop or the reconnect loop.
fn invoke<T>(sink: &Sink<T>, value: T) {
    let guard = sink.lock();
    if let Some(f) = guard.as_ref() {
        if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| f(value))) {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_owned());
            log::error!("sink callback panicked, continuing: {msg}");
        }
    }
}

/// Connection lifecycle, liveness, subscription recovery, and decoded-message
/// routing for one exchange's WS surface.
pub struct WsClient<D: Driver> {
    exchange: ExchangeId,
    driver: Arc<D>,
    settings: WsSettings,
    registry: Arc<SubscriptionRegistry>,
    state: SyncMutex<LifecycleState>,
    writer: AsyncMutex<Option<mpsc::UnboundedSender<Message>>>,
    reconnecting: AtomicBool,
    attempt: AtomicU32,
    last_activity_ms: AtomicI64,
    reconnect_exhausted: AtomicBool,
    cancel: CancellationToken,
    sinks: Sinks,
}

impl<D: Driver> WsClient<D> {
    pub fn new(exchange: ExchangeId, driver: Arc<D>, settings: WsSettings) -> Arc<Self> {
        Arc::new(Self {
            exchange,
            driver,
            settings,
            registry: Arc::new(SubscriptionRegistry::new()),
            state: SyncMutex::new(LifecycleState::Idle),
            writer: AsyncMutex::new(None),
            reconnecting: AtomicBool::new(false),
            attempt: AtomicU32::new(0),
            last_activity_ms: AtomicI64::new(0),
            reconnect_exhausted: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            sinks: Sinks::default(),
        })
    }

    /// `true` once, right after a bounded reconnect schedule (`max_attempts
    /// > 0`) was exhausted; clears on read so a supervisor can poll it.
    pub fn take_reconnect_exhausted(&self) -> bool {
        self.reconnect_exhausted.swap(false, Ordering::SeqCst)
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn on_ticker(&self, f: impl Fn(Ticker) + Send + Sync + 'static) {
        *self.sinks.ticker.lock() = Some(Box::new(f));
    }

    pub fn on_order_book(&self, f: impl Fn(OrderBookEvent) + Send + Sync + 'static) {
        *self.sinks.order_book.lock() = Some(Box::new(f));
    }

    pub fn on_trade(&self, f: impl Fn(Trade) + Send + Sync + 'static) {
        *self.sinks.trade.lock() = Some(Box::new(f));
    }

    pub fn on_kline(&self, f: impl Fn(Kline) + Send + Sync + 'static) {
        *self.sinks.kline.lock() = Some(Box::new(f));
    }

    pub fn on_order(&self, f: impl Fn(Order) + Send + Sync + 'static) {
        *self.sinks.order.lock() = Some(Box::new(f));
    }

    pub fn on_balance(&self, f: impl Fn(Balance) + Send + Sync + 'static) {
        *self.sinks.balance.lock() = Some(Box::new(f));
    }

    pub fn on_connect(&self, f: impl Fn() + Send + Sync + 'static) {
        *self.sinks.connect.lock() = Some(Box::new(f));
    }

    pub fn on_disconnect(&self, f: impl Fn() + Send + Sync + 'static) {
        *self.sinks.disconnect.lock() = Some(Box::new(f));
    }

    /// `Idle`/`Disconnected` -> `Connecting`; success -> `Connected`; failure
    /// -> `Disconnected` followed by the reconnect loop.
    pub async fn connect(self: &Arc<Self>) -> anyhow::Result<()> {
        {
            let mut state = self.state.lock();
            if *state == LifecycleState::Closed {
                anyhow::bail!("cannot connect a closed WsClient");
            }
            *state = LifecycleState::Connecting;
        }

        match self.dial().await {
            Ok(()) => {
                *self.state.lock() = LifecycleState::Connected;
                self.attempt.store(0, Ordering::SeqCst);
                invoke(&self.sinks.connect, ());
                Ok(())
            }
            Err(e) => {
                *self.state.lock() = LifecycleState::Disconnected;
                self.spawn_reconnect_loop();
                Err(e)
            }
        }
    }

    /// `Connected` -> `Disconnected`, no reconnect attempted.
    pub async fn disconnect(&self) {
        let mut state = self.state.lock();
        if *state != LifecycleState::Connected {
            return;
        }
        *state = LifecycleState::Disconnected;
        drop(state);
        self.close_socket().await;
    }

    /// Any non-`Closed` state -> `Closed`, terminal. Sends a status-1000
    /// close frame if a socket exists and forbids further use.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock();
            if *state == LifecycleState::Closed {
                return;
            }
            *state = LifecycleState::Closed;
        }
        self.cancel.cancel();
        if let Some(sender) = self.writer.lock().await.take() {
            let _ = sender.send(Message::Close(None));
        }
    }

    /// Updates the registry; if `Connected` and the set changed, forces a
    /// reconnect since subscription changes aren't admissible on a live
    /// socket.
    pub async fn subscribe(self: &Arc<Self>, id: &str) {
        if self.registry.subscribe(id) && self.state() == LifecycleState::Connected {
            self.force_reconnect().await;
        }
    }

    pub async fn unsubscribe(self: &Arc<Self>, id: &str) {
        if self.registry.unsubscribe(id) && self.state() == LifecycleState::Connected {
            self.force_reconnect().await;
        }
    }

    async fn force_reconnect(self: &Arc<Self>) {
        self.close_socket().await;
        *self.state.lock() = LifecycleState::Disconnected;
        invoke(&self.sinks.disconnect, ());
        match self.dial().await {
            Ok(()) => {
                *self.state.lock() = LifecycleState::Connected;
                invoke(&self.sinks.connect, ());
            }
            Err(e) => {
                log::warn!("{}: reconnect dial after subscription change failed: {e:#}", self.exchange);
                self.spawn_reconnect_loop();
            }
        }
    }

    fn assemble_url(&self) -> String {
        let streams = self.registry.streams();
        if streams.is_empty() {
            self.driver.ws_base_url().to_owned()
        } else {
            format!("{}/stream?streams={}", self.driver.ws_base_url(), streams.join("/"))
        }
    }

    async fn dial(self: &Arc<Self>) -> anyhow::Result<()> {
        let url = self.assemble_url();
        let (stream, _response) = connect_async(&url).await?;
        let (writer, reader) = stream.split();

        let (tx, rx) = mpsc::unbounded_channel::<Message>();
        *self.writer.lock().await = Some(tx);
        self.last_activity_ms.store(now_ms(), Ordering::SeqCst);

        tokio::spawn(Self::write_loop(writer, rx));
        tokio::spawn(self.clone().read_loop(reader));
        tokio::spawn(self.clone().ping_loop());

        Ok(())
    }

    async fn write_loop(mut writer: futures::stream::SplitSink<WsStream, Message>, mut rx: mpsc::UnboundedReceiver<Message>) {
        while let Some(msg) = rx.recv().await {
            if writer.send(msg).await.is_err() {
                break;
            }
        }
        let _ = writer.close().await;
    }

    async fn ping_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.settings.ping_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.cancel.when_cancelled() => return,
            }
            if self.state() != LifecycleState::Connected {
                return;
            }
            let deadline = 2 * self.settings.ping_interval;
            let elapsed = Duration::from_millis((now_ms() - self.last_activity_ms.load(Ordering::SeqCst)).max(0) as u64);
            if elapsed > deadline {
                log::warn!("{}: read deadline exceeded, forcing disconnect", self.exchange);
                self.on_socket_closed().await;
                return;
            }
            if let Some(sender) = self.writer.lock().await.as_ref() {
                let _ = sender.send(Message::Ping(Vec::new()));
            }
        }
    }

    async fn read_loop(self: Arc<Self>, mut reader: futures::stream::SplitStream<WsStream>) {
        while let Some(msg) = reader.next().await {
            self.last_activity_ms.store(now_ms(), Ordering::SeqCst);
            match msg {
                Ok(Message::Text(text)) => self.route_message(text.as_bytes()),
                Ok(Message::Binary(bytes)) => self.route_message(&bytes),
                Ok(Message::Ping(payload)) => {
                    if let Some(sender) = self.writer.lock().await.as_ref() {
                        let _ = sender.send(Message::Pong(payload));
                    }
                }
                Ok(Message::Pong(_)) => {}
                Ok(Message::Close(_)) => break,
                Ok(Message::Frame(_)) => {}
                Err(e) => {
                    log::warn!("{}: websocket read error: {e}", self.exchange);
                    break;
                }
            }
        }
        self.on_socket_closed().await;
    }

    async fn on_socket_closed(self: &Arc<Self>) {
        let mut state = self.state.lock();
        if *state == LifecycleState::Closed {
            return;
        }
        *state = LifecycleState::Reconnecting;
        drop(state);
        invoke(&self.sinks.disconnect, ());
        self.spawn_reconnect_loop();
    }

    /// At most one reconnect worker runs at a time, guarded by `reconnecting`.
    fn spawn_reconnect_loop(self: &Arc<Self>) {
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            this.reconnect_loop().await;
            this.reconnecting.store(false, Ordering::SeqCst);
        });
    }

    async fn reconnect_loop(self: &Arc<Self>) {
        let reconnect = self.settings.reconnect;
        loop {
            if self.state() == LifecycleState::Closed {
                return;
            }
            let attempt_number = self.attempt.fetch_add(1, Ordering::SeqCst) + 1;

            if reconnect.max_attempts > 0 && attempt_number > reconnect.max_attempts {
                log::error!(
                    "{}: websocket reconnect exhausted after {}/{} attempts",
                    self.exchange,
                    attempt_number - 1,
                    reconnect.max_attempts
                );
                *self.state.lock() = LifecycleState::Disconnected;
                self.reconnect_exhausted.store(true, Ordering::SeqCst);
                return;
            }

            let delay = reconnect_delay(reconnect.initial_delay, reconnect.max_delay, reconnect.jitter, attempt_number);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.when_cancelled() => return,
            }

            if self.state() == LifecycleState::Closed {
                return;
            }

            match self.dial().await {
                Ok(()) => {
                    *self.state.lock() = LifecycleState::Connected;
                    self.attempt.store(0, Ordering::SeqCst);
                    invoke(&self.sinks.connect, ());
                    return;
                }
                Err(e) => {
                    log::warn!("{}: reconnect attempt {attempt_number} failed: {e:#}", self.exchange);
                }
            }
        }
    }

    async fn close_socket(&self) {
        if let Some(sender) = self.writer.lock().await.take() {
            let _ = sender.send(Message::Close(None));
        }
    }

    /// Parses `{stream, data}`; on failure, treats the frame as a direct
    /// (user-data) event with an empty stream id.
    fn route_message(self: &Arc<Self>, bytes: &[u8]) {
        let parsed: Option<serde_json::Value> = serde_json::from_slice(bytes).ok();
        let wrapped = parsed.as_ref().and_then(|v| {
            let stream = v.get("stream")?.as_str()?.to_owned();
            let data = v.get("data")?.clone();
            Some((stream, data))
        });

        let (stream_id, decode_bytes) = match wrapped {
            Some((stream, data)) => (stream, serde_json::to_vec(&data).unwrap_or_else(|_| bytes.to_vec())),
            None => (String::new(), bytes.to_vec()),
        };

        match self.driver.decode_frame(&stream_id, &decode_bytes) {
            Ok(event) => self.dispatch(event),
            Err(e) => log::warn!("{}: failed to decode frame on '{stream_id}': {e:#}", self.exchange),
        }
    }

    fn dispatch(&self, event: DecodedEvent) {
        match event {
            DecodedEvent::Ticker(t) => invoke(&self.sinks.ticker, t),
            DecodedEvent::BookSnapshot { symbol, bids, asks, last_update_id } => {
                invoke(&self.sinks.order_book, OrderBookEvent::Snapshot { symbol, bids, asks, last_update_id })
            }
            DecodedEvent::BookDiff(diff) => invoke(&self.sinks.order_book, OrderBookEvent::Diff(diff)),
            DecodedEvent::Trade(t) => invoke(&self.sinks.trade, t),
            DecodedEvent::Kline(k) => invoke(&self.sinks.kline, k),
            DecodedEvent::Order(o) => invoke(&self.sinks.order, o),
            DecodedEvent::Balance(b) => invoke(&self.sinks.balance, b),
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// `delay_n = min(initial * 2^(n-1), max) * (1 +/- jitter)`.
fn reconnect_delay(initial: Duration, max: Duration, jitter: f64, attempt: u32) -> Duration {
    let exp = 2f64.powi((attempt - 1) as i32);
    let base = (initial.as_secs_f64() * exp).min(max.as_secs_f64());
    let jitter_factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
    Duration::from_secs_f64((base * jitter_factor).max(0.0))
}
