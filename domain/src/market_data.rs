use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::exchange_id::ExchangeId;
use crate::order::OrderSide;
use crate::symbol::Symbol;
use crate::DateTime;

/// Best bid/ask and, when the source stream carries it, 24h statistics.
/// Only `bid_price`/`bid_qty`/`ask_price`/`ask_qty` are guaranteed populated:
/// a bare `bookTicker`-style stream carries nothing else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub exchange: ExchangeId,
    pub symbol: Symbol,
    pub bid_price: Decimal,
    pub bid_qty: Decimal,
    pub ask_price: Decimal,
    pub ask_qty: Decimal,
    pub last_price: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub open_price: Option<Decimal>,
    pub volume: Option<Decimal>,
    pub quote_volume: Option<Decimal>,
    pub price_change: Option<Decimal>,
    pub price_change_pct: Option<Decimal>,
    pub timestamp: DateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub exchange: ExchangeId,
    pub symbol: Symbol,
    pub id: u64,
    pub price: Decimal,
    pub quantity: Decimal,
    pub quote_quantity: Decimal,
    pub side: OrderSide,
    pub is_maker: bool,
    pub timestamp: DateTime,
}

impl Trade {
    pub fn new(
        exchange: ExchangeId,
        symbol: Symbol,
        id: u64,
        price: Decimal,
        quantity: Decimal,
        side: OrderSide,
        is_maker: bool,
        timestamp: DateTime,
    ) -> Self {
        Self {
            exchange,
            symbol,
            id,
            price,
            quote_quantity: price * quantity,
            quantity,
            side,
            is_maker,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub exchange: ExchangeId,
    pub symbol: Symbol,
    pub interval: String,
    pub open_time: DateTime,
    pub close_time: DateTime,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub quote_volume: Decimal,
    pub trade_count: u64,
    pub taker_buy_volume: Decimal,
    pub taker_buy_quote_volume: Decimal,
    pub is_closed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub exchange: ExchangeId,
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

impl Balance {
    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn trade_computes_quote_quantity() {
        let trade = Trade::new(
            ExchangeId::new("binance"),
            Symbol::new("BTC", "USDT"),
            1,
            dec!(20000),
            dec!(0.5),
            OrderSide::Buy,
            false,
            chrono::Utc::now(),
        );
        assert_eq!(trade.quote_quantity, dec!(10000));
    }

    #[test]
    fn balance_total_sums_free_and_locked() {
        let balance = Balance {
            exchange: ExchangeId::new("binance"),
            asset: "BTC".to_owned(),
            free: dec!(1.5),
            locked: dec!(0.5),
        };
        assert_eq!(balance.total(), dec!(2));
    }
}
