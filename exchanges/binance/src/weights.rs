use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;

/// Static per-endpoint weight table, built once via `Lazy`. Unknown paths
/// default to weight 1 at the call site, matching the exchange's own
/// documented default for unlisted endpoints.
static ENDPOINT_WEIGHTS: Lazy<HashMap<&'static str, u32>> = Lazy::new(|| {
    HashMap::from([
        ("/api/v3/ping", 1),
        ("/api/v3/time", 1),
        ("/api/v3/exchangeInfo", 10),
        ("/api/v3/depth", 1),
        ("/api/v3/trades", 1),
        ("/api/v3/klines", 1),
        ("/api/v3/ticker/24hr", 1),
        ("/api/v3/account", 10),
        ("/api/v3/order", 1),
        ("/api/v3/openOrders", 3),
        ("/api/v3/myTrades", 10),
        ("/api/v3/userDataStream", 1),
    ])
});

/// Endpoints dispatched unsigned. Everything else requires the signer.
static PUBLIC_ENDPOINTS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "/api/v3/ping",
        "/api/v3/time",
        "/api/v3/exchangeInfo",
        "/api/v3/depth",
        "/api/v3/trades",
        "/api/v3/klines",
        "/api/v3/ticker/24hr",
    ])
});

pub fn endpoint_weight(path: &str) -> u32 {
    ENDPOINT_WEIGHTS.get(path).copied().unwrap_or(1)
}

pub fn is_public(path: &str) -> bool {
    PUBLIC_ENDPOINTS.contains(path)
}
