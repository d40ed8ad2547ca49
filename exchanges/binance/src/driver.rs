use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::{Body, Client, Method, Request};
use hyper_rustls::HttpsConnector;
use parking_lot::RwLock;
use xconn_core::driver::{DecodedEvent, Driver};
use xconn_domain::exchange_id::ExchangeId;
use xconn_domain::order_book::{OrderBook, OrderBookLevel, SortedLevels};
use xconn_domain::symbol::Symbol;

use crate::{decode, symbols, weights};

const MAINNET_REST: &str = "https://api.binance.com";
const MAINNET_WS: &str = "wss://stream.binance.com:9443";
const TESTNET_REST: &str = "https://testnet.binance.vision";
const TESTNET_WS: &str = "wss://testnet.binance.vision";

type HttpsClient = Client<HttpsConnector<HttpConnector>>;

fn build_https_client() -> HttpsClient {
    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_native_roots()
        .https_only()
        .enable_http1()
        .enable_http2()
        .build();
    Client::builder().build(https)
}

/// Authoritative base-to-quote asset map, refreshed from `exchangeInfo`.
/// Empty until [`BinanceDriver::refresh_symbols`] runs once; until then
/// [`symbols::normalize`]'s suffix heuristic is the fallback.
type SymbolTable = RwLock<BTreeMap<String, (String, String)>>;

/// Binance spot [`Driver`] implementation. Owns a private HTTPS client for
/// the handful of calls it issues outside the signed pipeline (`server_time_ms`,
/// `snapshot_order_book`) so it never depends on `RestPipeline<Self>`, which
/// itself depends on `Driver` — routing through it would be circular.
pub struct BinanceDriver {
    exchange: ExchangeId,
    client: HttpsClient,
    rest_base_url: String,
    ws_base_url: String,
    symbol_table: SymbolTable,
}

impl BinanceDriver {
    pub fn new(testnet: bool) -> Self {
        let (rest_base_url, ws_base_url) = if testnet {
            (TESTNET_REST.to_owned(), TESTNET_WS.to_owned())
        } else {
            (MAINNET_REST.to_owned(), MAINNET_WS.to_owned())
        };
        Self {
            exchange: ExchangeId::new("binance"),
            client: build_https_client(),
            rest_base_url,
            ws_base_url,
            symbol_table: RwLock::new(BTreeMap::new()),
        }
    }

    /// Populates the authoritative symbol table from a prefetched
    /// `exchangeInfo` response, superseding the cold-start suffix heuristic.
    pub fn load_symbols(&self, exchange_info: &serde_json::Value) -> Result<()> {
        let symbols = exchange_info["symbols"].as_array().context("exchangeInfo missing 'symbols'")?;
        let mut table = self.symbol_table.write();
        table.clear();
        for entry in symbols {
            let native = entry["symbol"].as_str().context("symbol entry missing 'symbol'")?;
            let base = entry["baseAsset"].as_str().context("symbol entry missing 'baseAsset'")?;
            let quote = entry["quoteAsset"].as_str().context("symbol entry missing 'quoteAsset'")?;
            table.insert(native.to_owned(), (base.to_owned(), quote.to_owned()));
        }
        Ok(())
    }

    async fn get_json(&self, path: &str) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.rest_base_url, path);
        let req = Request::builder().method(Method::GET).uri(url).body(Body::empty())?;
        let response = self.client.request(req).await.with_context(|| format!("request to '{path}' failed"))?;
        let body = hyper::body::to_bytes(response.into_body()).await?;
        serde_json::from_slice(&body).with_context(|| format!("'{path}' returned invalid JSON"))
    }
}

#[async_trait]
impl Driver for BinanceDriver {
    async fn server_time_ms(&self) -> Result<i64> {
        let body = self.get_json("/api/v3/time").await?;
        body["serverTime"].as_i64().context("missing 'serverTime' in response")
    }

    async fn snapshot_order_book(&self, symbol: &Symbol, depth: u32) -> Result<OrderBook> {
        let native = symbols::denormalize(symbol);
        let path = format!("/api/v3/depth?symbol={native}&limit={depth}");
        let body = self.get_json(&path).await?;

        let last_update_id = body["lastUpdateId"].as_u64().context("missing 'lastUpdateId'")?;
        let bids = parse_levels(&body["bids"])?;
        let asks = parse_levels(&body["asks"])?;

        let mut book = OrderBook::new(self.exchange.clone(), symbol.clone(), SortedLevels::new(), SortedLevels::new(), last_update_id);
        book.apply_levels(&asks, &bids);
        Ok(book)
    }

    fn endpoint_weight(&self, path: &str) -> u32 {
        weights::endpoint_weight(strip_query(path))
    }

    fn is_public(&self, path: &str) -> bool {
        weights::is_public(strip_query(path))
    }

    fn build_stream_id(&self, symbol: &Symbol, channel: &str, params: &[&str]) -> String {
        symbols::stream_id(symbol, channel, params)
    }

    fn decode_frame(&self, stream_id: &str, bytes: &[u8]) -> Result<DecodedEvent> {
        decode::decode_frame(&self.exchange, stream_id, bytes, |native| self.normalize_symbol(native))
    }

    fn normalize_symbol(&self, native: &str) -> Result<Symbol> {
        let upper = native.to_ascii_uppercase();
        if let Some((base, quote)) = self.symbol_table.read().get(&upper) {
            return Ok(Symbol::new(base, quote));
        }
        symbols::normalize(native)
    }

    fn denormalize_symbol(&self, symbol: &Symbol) -> String {
        symbols::denormalize(symbol)
    }

    fn extract_used_weight(&self, headers: &hyper::HeaderMap) -> Option<u32> {
        headers.get("X-MBX-USED-WEIGHT-1M").and_then(|v| v.to_str().ok()).and_then(|v| v.parse().ok())
    }

    fn rest_base_url(&self) -> &str {
        &self.rest_base_url
    }

    fn ws_base_url(&self) -> &str {
        &self.ws_base_url
    }
}

fn strip_query(path: &str) -> &str {
    path.split('?').next().unwrap_or(path)
}

fn parse_levels(value: &serde_json::Value) -> Result<Vec<OrderBookLevel>> {
    value
        .as_array()
        .context("expected level array")?
        .iter()
        .map(|level| {
            let price = level[0].as_str().context("level price")?.parse()?;
            let quantity = level[1].as_str().context("level quantity")?.parse()?;
            Ok(OrderBookLevel { price, quantity })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_query_string_for_weight_lookup() {
        assert_eq!(strip_query("/api/v3/depth?symbol=BTCUSDT&limit=100"), "/api/v3/depth");
        assert_eq!(strip_query("/api/v3/ping"), "/api/v3/ping");
    }

    #[test]
    fn normalize_falls_back_to_suffix_heuristic_before_refresh() {
        let driver = BinanceDriver::new(false);
        let symbol = driver.normalize_symbol("btcusdt").unwrap();
        assert_eq!(symbol, Symbol::new("BTC", "USDT"));
    }

    #[test]
    fn normalize_prefers_authoritative_table_once_loaded() {
        let driver = BinanceDriver::new(false);
        let info = serde_json::json!({
            "symbols": [{"symbol": "ETHBTC", "baseAsset": "ETH", "quoteAsset": "BTC"}]
        });
        driver.load_symbols(&info).unwrap();
        let symbol = driver.normalize_symbol("ethbtc").unwrap();
        assert_eq!(symbol, Symbol::new("ETH", "BTC"));
    }

    #[test]
    fn mainnet_and_testnet_hosts_differ() {
        let mainnet = BinanceDriver::new(false);
        let testnet = BinanceDriver::new(true);
        assert_ne!(mainnet.rest_base_url(), testnet.rest_base_url());
        assert_ne!(mainnet.ws_base_url(), testnet.ws_base_url());
    }
}
