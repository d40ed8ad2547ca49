use async_trait::async_trait;
use hyper::HeaderMap;
use xconn_domain::market_data::{Kline, Ticker, Trade};
use xconn_domain::order::{Order, OrderSide, OrderStatus};
use xconn_domain::order_book::{OrderBook, OrderBookLevel};
use xconn_domain::symbol::Symbol;
use xconn_domain::DateTime;

/// One decoded domain event, produced by [`Driver::decode_frame`] and routed
/// by `WsClient` to the matching typed sink.
#[derive(Debug, Clone)]
pub enum DecodedEvent {
    Ticker(Ticker),
    /// Full-depth snapshot levels carried on a WS `@depthN` stream, bound to a
    /// symbol at subscription time (see the open question on WS snapshots).
    BookSnapshot {
        symbol: Symbol,
        bids: Vec<OrderBookLevel>,
        asks: Vec<OrderBookLevel>,
        last_update_id: u64,
    },
    /// A diff-depth event, forwarded verbatim to the matching `OrderBookAssembler`.
    BookDiff(BookDiffEvent),
    Trade(Trade),
    Kline(Kline),
    Order(Order),
    Balance(xconn_domain::market_data::Balance),
}

/// Monotonic-ID-ranged order-book delta, the unit the assembler operates on.
#[derive(Debug, Clone)]
pub struct BookDiffEvent {
    pub symbol: Symbol,
    pub first_update_id: u64,
    pub final_update_id: u64,
    pub bids: Vec<OrderBookLevel>,
    pub asks: Vec<OrderBookLevel>,
    pub timestamp: DateTime,
}

/// Sole polymorphism point of the core: one implementation per exchange.
///
/// The core is driven entirely through this trait — `ExchangeSupervisor`,
/// `RestPipeline` and `WsClient` never know which venue they're talking to.
/// Implementations are tagged variants selected at supervisor construction;
/// there is no runtime registration.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// Exchange-reported server time in milliseconds since the Unix epoch.
    async fn server_time_ms(&self) -> anyhow::Result<i64>;

    /// Fetches a REST order-book snapshot for `symbol` at the requested depth.
    async fn snapshot_order_book(&self, symbol: &Symbol, depth: u32) -> anyhow::Result<OrderBook>;

    /// Static per-endpoint weight; unknown endpoints default to weight 1.
    fn endpoint_weight(&self, path: &str) -> u32;

    /// Whether `path` may be dispatched unsigned.
    fn is_public(&self, path: &str) -> bool;

    /// Builds a lowercase canonical stream identifier, e.g. `btcusdt@ticker`.
    fn build_stream_id(&self, symbol: &Symbol, channel: &str, params: &[&str]) -> String;

    /// Decodes one inbound WS frame already resolved to a single logical stream.
    fn decode_frame(&self, stream_id: &str, bytes: &[u8]) -> anyhow::Result<DecodedEvent>;

    fn normalize_symbol(&self, native: &str) -> anyhow::Result<Symbol>;
    fn denormalize_symbol(&self, symbol: &Symbol) -> String;

    /// Extracts the server-reported used-weight from response headers, if the
    /// venue reports one. Binance uses `X-MBX-USED-WEIGHT-1m`; others may not.
    fn extract_used_weight(&self, headers: &HeaderMap) -> Option<u32>;

    /// Base REST URL for this driver instance (mainnet or testnet).
    fn rest_base_url(&self) -> &str;

    /// Base WS URL for this driver instance (mainnet or testnet).
    fn ws_base_url(&self) -> &str;
}

/// Applies an `executionReport`-style update to an existing order, honoring
/// the `OrderStatus` admission test. Shared by every driver's order decoding
/// path so state-machine enforcement lives in one place.
pub fn apply_order_update(order: &mut Order, new_status: OrderStatus, updated_at: DateTime) -> bool {
    order.apply_status(new_status, updated_at)
}

pub fn side_from_str(raw: &str) -> Option<OrderSide> {
    match raw.to_ascii_uppercase().as_str() {
        "BUY" => Some(OrderSide::Buy),
        "SELL" => Some(OrderSide::Sell),
        _ => None,
    }
}
