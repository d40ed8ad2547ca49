use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::exchange_id::ExchangeId;
use crate::symbol::Symbol;
use crate::DateTime;

/// Ascending-by-price storage for one side of a book. Both asks and bids are
/// kept in ascending order; bids are read back-to-front for top-of-book.
pub type SortedLevels = BTreeMap<Decimal, Decimal>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub exchange: ExchangeId,
    pub symbol: Symbol,
    pub asks: SortedLevels,
    pub bids: SortedLevels,
    pub last_update_id: u64,
    pub timestamp: DateTime,
}

impl OrderBook {
    pub fn new(exchange: ExchangeId, symbol: Symbol, asks: SortedLevels, bids: SortedLevels, last_update_id: u64) -> Self {
        Self {
            exchange,
            symbol,
            asks,
            bids,
            last_update_id,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn top_ask(&self) -> Option<OrderBookLevel> {
        self.asks
            .iter()
            .next()
            .map(|(&price, &quantity)| OrderBookLevel { price, quantity })
    }

    pub fn top_bid(&self) -> Option<OrderBookLevel> {
        self.bids
            .iter()
            .next_back()
            .map(|(&price, &quantity)| OrderBookLevel { price, quantity })
    }

    /// Applies a batch of level updates to both sides: a zero quantity removes
    /// the level, any other quantity inserts or overwrites it.
    pub fn apply_levels(&mut self, asks: &[OrderBookLevel], bids: &[OrderBookLevel]) {
        Self::apply_side(&mut self.asks, asks);
        Self::apply_side(&mut self.bids, bids);
    }

    fn apply_side(side: &mut SortedLevels, updates: &[OrderBookLevel]) {
        for level in updates {
            if level.quantity.is_zero() {
                side.remove(&level.price);
            } else {
                side.insert(level.price, level.quantity);
            }
        }
    }

    /// `true` iff neither side has two adjacent levels at the same price and
    /// the book is not crossed (best bid strictly below best ask).
    pub fn is_consistent(&self) -> bool {
        match (self.top_bid(), self.top_ask()) {
            (Some(bid), Some(ask)) => bid.price < ask.price,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn book() -> OrderBook {
        let mut asks = SortedLevels::new();
        asks.insert(dec!(101), dec!(1));
        asks.insert(dec!(102), dec!(2));
        let mut bids = SortedLevels::new();
        bids.insert(dec!(99), dec!(1));
        bids.insert(dec!(98), dec!(3));
        OrderBook::new(ExchangeId::new("binance"), Symbol::new("BTC", "USDT"), asks, bids, 10)
    }

    #[test]
    fn top_of_book_picks_best_price_each_side() {
        let book = book();
        assert_eq!(book.top_ask().unwrap().price, dec!(101));
        assert_eq!(book.top_bid().unwrap().price, dec!(99));
    }

    #[test]
    fn zero_quantity_removes_level() {
        let mut book = book();
        book.apply_levels(&[OrderBookLevel { price: dec!(101), quantity: dec!(0) }], &[]);
        assert_eq!(book.asks.get(&dec!(101)), None);
        assert_eq!(book.top_ask().unwrap().price, dec!(102));
    }

    #[test]
    fn nonzero_quantity_upserts_level() {
        let mut book = book();
        book.apply_levels(
            &[OrderBookLevel { price: dec!(101), quantity: dec!(5) }],
            &[OrderBookLevel { price: dec!(97), quantity: dec!(4) }],
        );
        assert_eq!(book.asks.get(&dec!(101)), Some(&dec!(5)));
        assert_eq!(book.bids.get(&dec!(97)), Some(&dec!(4)));
    }

    #[test]
    fn consistent_book_has_bid_below_ask() {
        assert!(book().is_consistent());
    }

    #[test]
    fn crossed_book_is_inconsistent() {
        let mut book = book();
        book.apply_levels(&[], &[OrderBookLevel { price: dec!(150), quantity: dec!(1) }]);
        assert!(!book.is_consistent());
    }
}
