use anyhow::{anyhow, Context, Result};
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use xconn_core::driver::{BookDiffEvent, DecodedEvent};
use xconn_domain::exchange_id::ExchangeId;
use xconn_domain::market_data::{Balance, Kline, Ticker, Trade};
use xconn_domain::order::{Order, OrderStatus, OrderType};
use xconn_domain::order_book::OrderBookLevel;
use xconn_domain::symbol::Symbol;
use xconn_domain::DateTime;

use crate::symbols;

fn ms_to_datetime(ms: i64) -> DateTime {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

fn decimal_field(data: &Value, key: &str) -> Result<Decimal> {
    data[key]
        .as_str()
        .with_context(|| format!("missing string field '{key}'"))?
        .parse()
        .with_context(|| format!("field '{key}' is not a decimal"))
}

fn i64_field(data: &Value, key: &str) -> Result<i64> {
    data[key].as_i64().with_context(|| format!("missing integer field '{key}'"))
}

fn str_field<'a>(data: &'a Value, key: &str) -> Result<&'a str> {
    data[key].as_str().with_context(|| format!("missing string field '{key}'"))
}

fn parse_levels(value: &Value) -> Result<Vec<OrderBookLevel>> {
    value
        .as_array()
        .context("expected an array of [price, quantity] levels")?
        .iter()
        .map(|level| {
            let price: Decimal = level[0].as_str().context("level price")?.parse()?;
            let quantity: Decimal = level[1].as_str().context("level quantity")?.parse()?;
            Ok(OrderBookLevel { price, quantity })
        })
        .collect()
}

fn order_status_from_raw(status: &str) -> Result<OrderStatus> {
    Ok(match status {
        "NEW" => OrderStatus::New,
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "FILLED" => OrderStatus::Filled,
        "PENDING_CANCEL" => OrderStatus::Canceling,
        "CANCELED" => OrderStatus::Canceled,
        "REJECTED" => OrderStatus::Rejected,
        "EXPIRED" => OrderStatus::Expired,
        other => return Err(anyhow!("unrecognized order status '{other}'")),
    })
}

fn order_type_from_raw(raw: &str) -> OrderType {
    match raw {
        "LIMIT" | "LIMIT_MAKER" => OrderType::Limit,
        "MARKET" => OrderType::Market,
        "STOP_LOSS" => OrderType::StopLoss,
        "STOP_LOSS_LIMIT" => OrderType::StopLossLimit,
        _ => OrderType::Unknown,
    }
}

/// Splits a stream identifier (`btcusdt@depth@100ms`) into the native symbol
/// and the channel + params portion.
fn split_stream_id(stream_id: &str) -> Option<(&str, &str, Vec<&str>)> {
    let mut parts = stream_id.split('@');
    let native = parts.next()?;
    let channel = parts.next()?;
    Some((native, channel, parts.collect()))
}

/// Decodes one already-unwrapped inbound frame. `stream_id` is empty for
/// direct (user-data) frames, which are instead dispatched on the `"e"`
/// event-type field.
pub fn decode_frame(
    exchange: &ExchangeId,
    stream_id: &str,
    bytes: &[u8],
    normalize: impl Fn(&str) -> Result<Symbol>,
) -> Result<DecodedEvent> {
    let data: Value = serde_json::from_slice(bytes).context("frame is not valid JSON")?;

    if stream_id.is_empty() {
        return decode_user_data_event(exchange, &data);
    }

    let (native, channel, params) = split_stream_id(stream_id).ok_or_else(|| anyhow!("malformed stream id '{stream_id}'"))?;
    let symbol = normalize(native)?;

    match channel {
        "ticker" => decode_ticker(exchange, symbol, &data),
        "bookTicker" => decode_book_ticker(exchange, symbol, &data),
        "trade" => decode_trade(exchange, symbol, &data, "t"),
        "aggTrade" => decode_trade(exchange, symbol, &data, "a"),
        c if c.starts_with("kline") => decode_kline(exchange, symbol, &data),
        c if c.starts_with("depth") && depth_channel_is_partial(c) => decode_book_snapshot(symbol, &data),
        c if c.starts_with("depth") => decode_book_diff(symbol, &data, &params),
        other => Err(anyhow!("unsupported stream channel '{other}' on '{stream_id}'")),
    }
}

/// `depth5`/`depth10`/`depth20` are partial-book snapshot streams; bare
/// `depth`/`depth@100ms` is the diff stream.
fn depth_channel_is_partial(channel: &str) -> bool {
    channel.len() > "depth".len() && channel[5..].chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false)
}

fn decode_ticker(exchange: &ExchangeId, symbol: Symbol, data: &Value) -> Result<DecodedEvent> {
    Ok(DecodedEvent::Ticker(Ticker {
        exchange: exchange.clone(),
        symbol,
        bid_price: decimal_field(data, "b")?,
        bid_qty: decimal_field(data, "B")?,
        ask_price: decimal_field(data, "a")?,
        ask_qty: decimal_field(data, "A")?,
        last_price: decimal_field(data, "c").ok(),
        high: decimal_field(data, "h").ok(),
        low: decimal_field(data, "l").ok(),
        open_price: decimal_field(data, "o").ok(),
        volume: decimal_field(data, "v").ok(),
        quote_volume: decimal_field(data, "q").ok(),
        price_change: decimal_field(data, "p").ok(),
        price_change_pct: decimal_field(data, "P").ok(),
        timestamp: ms_to_datetime(i64_field(data, "E").unwrap_or_default()),
    }))
}

/// `bookTicker` carries only best bid/ask, no 24h statistics.
fn decode_book_ticker(exchange: &ExchangeId, symbol: Symbol, data: &Value) -> Result<DecodedEvent> {
    Ok(DecodedEvent::Ticker(Ticker {
        exchange: exchange.clone(),
        symbol,
        bid_price: decimal_field(data, "b")?,
        bid_qty: decimal_field(data, "B")?,
        ask_price: decimal_field(data, "a")?,
        ask_qty: decimal_field(data, "A")?,
        last_price: None,
        high: None,
        low: None,
        open_price: None,
        volume: None,
        quote_volume: None,
        price_change: None,
        price_change_pct: None,
        timestamp: Utc::now(),
    }))
}

fn decode_trade(exchange: &ExchangeId, symbol: Symbol, data: &Value, id_field: &str) -> Result<DecodedEvent> {
    let id = i64_field(data, id_field)? as u64;
    let price = decimal_field(data, "p")?;
    let quantity = decimal_field(data, "q")?;
    let is_maker = data["m"].as_bool().context("missing 'm' (buyer-is-maker) field")?;
    let side = if is_maker { xconn_domain::order::OrderSide::Sell } else { xconn_domain::order::OrderSide::Buy };
    let timestamp = ms_to_datetime(i64_field(data, "T")?);

    Ok(DecodedEvent::Trade(Trade::new(exchange.clone(), symbol, id, price, quantity, side, is_maker, timestamp)))
}

fn decode_kline(exchange: &ExchangeId, symbol: Symbol, data: &Value) -> Result<DecodedEvent> {
    let k = &data["k"];
    if k.is_null() {
        return Err(anyhow!("kline frame missing 'k' payload"));
    }
    Ok(DecodedEvent::Kline(Kline {
        exchange: exchange.clone(),
        symbol,
        interval: str_field(k, "i")?.to_owned(),
        open_time: ms_to_datetime(i64_field(k, "t")?),
        close_time: ms_to_datetime(i64_field(k, "T")?),
        open: decimal_field(k, "o")?,
        high: decimal_field(k, "h")?,
        low: decimal_field(k, "l")?,
        close: decimal_field(k, "c")?,
        volume: decimal_field(k, "v")?,
        quote_volume: decimal_field(k, "q")?,
        trade_count: k["n"].as_u64().unwrap_or_default(),
        taker_buy_volume: decimal_field(k, "V")?,
        taker_buy_quote_volume: decimal_field(k, "Q")?,
        is_closed: k["x"].as_bool().unwrap_or(false),
    }))
}

fn decode_book_snapshot(symbol: Symbol, data: &Value) -> Result<DecodedEvent> {
    let last_update_id = data["lastUpdateId"].as_u64().context("missing 'lastUpdateId'")?;
    let bids = parse_levels(&data["bids"])?;
    let asks = parse_levels(&data["asks"])?;
    Ok(DecodedEvent::BookSnapshot { symbol, bids, asks, last_update_id })
}

fn decode_book_diff(symbol: Symbol, data: &Value, _params: &[&str]) -> Result<DecodedEvent> {
    let first_update_id = data["U"].as_u64().context("missing 'U'")?;
    let final_update_id = data["u"].as_u64().context("missing 'u'")?;
    let bids = parse_levels(&data["b"])?;
    let asks = parse_levels(&data["a"])?;
    let timestamp = ms_to_datetime(data["E"].as_i64().unwrap_or_default());

    Ok(DecodedEvent::BookDiff(BookDiffEvent { symbol, first_update_id, final_update_id, bids, asks, timestamp }))
}

fn decode_user_data_event(exchange: &ExchangeId, data: &Value) -> Result<DecodedEvent> {
    let event_type = str_field(data, "e")?;
    match event_type {
        "executionReport" => decode_execution_report(exchange, data),
        "balanceUpdate" => decode_balance_update(exchange, data),
        other => Err(anyhow!("unsupported user-data event type '{other}'")),
    }
}

fn decode_execution_report(exchange: &ExchangeId, data: &Value) -> Result<DecodedEvent> {
    let native_symbol = str_field(data, "s")?;
    let symbol = symbols::normalize(native_symbol)?;
    let client_order_id = str_field(data, "c")?.into();
    let exchange_order_id_raw = data["i"].as_i64().context("missing order id 'i'")?.to_string();
    let exchange_order_id = exchange_order_id_raw.as_str().into();
    let side = xconn_core::driver::side_from_str(str_field(data, "S")?).ok_or_else(|| anyhow!("unrecognized side"))?;
    let order_type = order_type_from_raw(str_field(data, "o")?);
    let status = order_status_from_raw(str_field(data, "X")?)?;
    let price = decimal_field(data, "p")?;
    let quantity = decimal_field(data, "q")?;
    let filled_quantity = decimal_field(data, "z")?;
    let quote_quantity = price * quantity;
    let commission = decimal_field(data, "n").ok();
    let commission_asset = str_field(data, "N").ok().map(|s| s.to_owned());
    let updated_at = ms_to_datetime(i64_field(data, "T")?);
    let created_at = ms_to_datetime(i64_field(data, "O").unwrap_or_else(|_| i64_field(data, "T").unwrap_or_default()));
    let trade_id = data["t"].as_i64().filter(|id| *id >= 0).map(|id| (id as u64).into());
    let is_working = data["w"].as_bool().unwrap_or(false);

    Ok(DecodedEvent::Order(Order {
        exchange: exchange.clone(),
        symbol,
        exchange_order_id,
        client_order_id,
        trade_id,
        side,
        order_type,
        status,
        price,
        quantity,
        filled_quantity,
        quote_quantity,
        commission,
        commission_asset,
        created_at,
        updated_at,
        is_working,
    }))
}

fn decode_balance_update(exchange: &ExchangeId, data: &Value) -> Result<DecodedEvent> {
    let asset = str_field(data, "a")?.to_owned();
    let delta = decimal_field(data, "d")?;
    Ok(DecodedEvent::Balance(Balance { exchange: exchange.clone(), asset, free: delta, locked: Decimal::ZERO }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn exchange() -> ExchangeId {
        ExchangeId::new("binance")
    }

    fn normalize(native: &str) -> Result<Symbol> {
        symbols::normalize(native)
    }

    #[test]
    fn decodes_diff_depth_event() {
        let payload = json!({"e": "depthUpdate", "E": 1700000000000i64, "U": 10, "u": 12, "b": [["100", "1"]], "a": [["101", "2"]]});
        let bytes = serde_json::to_vec(&payload).unwrap();
        let event = decode_frame(&exchange(), "btcusdt@depth", &bytes, normalize).unwrap();
        match event {
            DecodedEvent::BookDiff(diff) => {
                assert_eq!(diff.first_update_id, 10);
                assert_eq!(diff.final_update_id, 12);
                assert_eq!(diff.bids[0].price, dec!(100));
            }
            other => panic!("expected BookDiff, got {other:?}"),
        }
    }

    #[test]
    fn decodes_partial_book_snapshot_stream() {
        let payload = json!({"lastUpdateId": 1027024, "bids": [["4.00000000", "431.00000000"]], "asks": [["4.00000200", "12.00000000"]]});
        let bytes = serde_json::to_vec(&payload).unwrap();
        let event = decode_frame(&exchange(), "btcusdt@depth20", &bytes, normalize).unwrap();
        match event {
            DecodedEvent::BookSnapshot { last_update_id, .. } => assert_eq!(last_update_id, 1027024),
            other => panic!("expected BookSnapshot, got {other:?}"),
        }
    }

    #[test]
    fn decodes_trade_stream() {
        let payload = json!({"e": "trade", "t": 42, "p": "20000.5", "q": "0.1", "m": true, "T": 1700000000000i64});
        let bytes = serde_json::to_vec(&payload).unwrap();
        let event = decode_frame(&exchange(), "btcusdt@trade", &bytes, normalize).unwrap();
        match event {
            DecodedEvent::Trade(trade) => {
                assert_eq!(trade.id, 42);
                assert_eq!(trade.quote_quantity, dec!(2000.05));
                assert!(trade.is_maker);
            }
            other => panic!("expected Trade, got {other:?}"),
        }
    }

    #[test]
    fn decodes_kline_stream() {
        let payload = json!({
            "e": "kline", "k": {
                "t": 1700000000000i64, "T": 1700000059999i64, "i": "1m",
                "o": "100", "h": "110", "l": "95", "c": "105",
                "v": "10", "q": "1000", "n": 42, "V": "4", "Q": "400", "x": true
            }
        });
        let bytes = serde_json::to_vec(&payload).unwrap();
        let event = decode_frame(&exchange(), "btcusdt@kline_1m", &bytes, normalize).unwrap();
        match event {
            DecodedEvent::Kline(kline) => {
                assert_eq!(kline.interval, "1m");
                assert!(kline.is_closed);
                assert_eq!(kline.trade_count, 42);
            }
            other => panic!("expected Kline, got {other:?}"),
        }
    }

    #[test]
    fn decodes_execution_report_into_order() {
        let payload = json!({
            "e": "executionReport", "s": "BTCUSDT", "c": "myOrder1", "S": "BUY", "o": "LIMIT",
            "X": "PARTIALLY_FILLED", "p": "100.0", "q": "1.0", "z": "0.5", "n": "0.0001",
            "N": "BNB", "T": 1700000000000i64, "O": 1699999990000i64, "t": 5, "w": true, "i": 999
        });
        let bytes = serde_json::to_vec(&payload).unwrap();
        let event = decode_frame(&exchange(), "", &bytes, normalize).unwrap();
        match event {
            DecodedEvent::Order(order) => {
                assert_eq!(order.status, OrderStatus::PartiallyFilled);
                assert_eq!(order.filled_quantity, dec!(0.5));
                assert!(order.is_working);
                assert_eq!(order.trade_id, Some(5u64.into()));
            }
            other => panic!("expected Order, got {other:?}"),
        }
    }

    #[test]
    fn decodes_balance_update_event() {
        let payload = json!({"e": "balanceUpdate", "a": "BTC", "d": "0.5"});
        let bytes = serde_json::to_vec(&payload).unwrap();
        let event = decode_frame(&exchange(), "", &bytes, normalize).unwrap();
        match event {
            DecodedEvent::Balance(balance) => {
                assert_eq!(balance.asset, "BTC");
                assert_eq!(balance.free, dec!(0.5));
            }
            other => panic!("expected Balance, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unsupported_event_type() {
        let payload = json!({"e": "mysteryEvent"});
        let bytes = serde_json::to_vec(&payload).unwrap();
        assert!(decode_frame(&exchange(), "", &bytes, normalize).is_err());
    }
}
