use std::fmt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smallstr::SmallString;
use xconn_utils::time::get_atomic_current_secs;
use xconn_utils::{impl_str_id, impl_u64_id};

use crate::exchange_id::ExchangeId;
use crate::symbol::Symbol;
use crate::DateTime;

impl_str_id!(ClientOrderId);
impl_str_id!(ExchangeOrderId);
impl_u64_id!(TradeId);

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, Hash)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl Display for OrderSide {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "Buy"),
            OrderSide::Sell => write!(f, "Sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, Hash)]
pub enum OrderType {
    Limit,
    Market,
    StopLoss,
    StopLossLimit,
    Unknown,
}

/// Lifecycle of an order as reported by the exchange.
///
/// Transitions are gated by [`OrderStatus::can_transition`]; callers applying an
/// `executionReport`-style update must check admissibility before mutating state,
/// since out-of-order WS delivery can otherwise regress a terminal order.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, Hash)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceling,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }

    /// Sole admission test for an order state mutation.
    pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
        use OrderStatus::*;

        if from.is_terminal() {
            return false;
        }

        match from {
            New => matches!(
                to,
                PartiallyFilled | Filled | Canceling | Canceled | Rejected | Expired
            ),
            PartiallyFilled => matches!(to, PartiallyFilled | Filled | Canceling | Canceled | Expired),
            Canceling => matches!(to, Canceled | Filled | PartiallyFilled),
            Filled | Canceled | Rejected | Expired => false,
        }
    }
}

impl Default for OrderStatus {
    fn default() -> Self {
        OrderStatus::New
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub exchange: ExchangeId,
    pub symbol: Symbol,
    pub exchange_order_id: ExchangeOrderId,
    pub client_order_id: ClientOrderId,
    pub trade_id: Option<TradeId>,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub price: Decimal,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub quote_quantity: Decimal,
    pub commission: Option<Decimal>,
    pub commission_asset: Option<String>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
    pub is_working: bool,
}

impl Order {
    /// Applies an incoming status update, returning `false` (and leaving `self`
    /// unchanged) if the transition is not admissible.
    pub fn apply_status(&mut self, new_status: OrderStatus, updated_at: DateTime) -> bool {
        if !OrderStatus::can_transition(self.status, new_status) {
            return false;
        }
        self.status = new_status;
        self.updated_at = updated_at;
        true
    }
}
