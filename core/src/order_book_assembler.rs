use std::collections::VecDeque;

use parking_lot::Mutex;
use xconn_domain::exchange_id::ExchangeId;
use xconn_domain::order_book::OrderBook;
use xconn_domain::symbol::Symbol;

use crate::driver::BookDiffEvent;

enum State {
    /// No bound REST snapshot yet; every incoming diff is buffered verbatim.
    Buffering(VecDeque<BookDiffEvent>),
    Synced { book: OrderBook, prev_update_id: u64 },
}

/// Result of feeding one WS diff event to the assembler.
#[derive(Debug, Eq, PartialEq)]
pub enum DiffOutcome {
    /// No snapshot bound yet; the event was buffered for later reconciliation.
    Buffered,
    /// Applied cleanly; `last_update_id` advanced by exactly one step.
    Applied,
    /// Stale relative to the current position (`U <= prev_u`); discarded.
    Dropped,
    /// `U > prev_u + 1`; the assembler dropped back to `Buffering` and a
    /// fresh REST snapshot must be requested.
    GapDetected,
}

/// Result of attempting to bind a REST snapshot against buffered diffs.
#[derive(Debug)]
pub enum SnapshotBindResult {
    /// Snapshot bound; book now carries the snapshot plus every retained,
    /// contiguous buffered diff applied on top.
    Bound(OrderBook),
    /// The first retained event did not satisfy `U <= L+1 <= u`, or a gap was
    /// found inside the buffered batch; the snapshot was discarded and the
    /// caller must re-fetch and retry from step 2 of the protocol.
    Retry,
    /// Already synced; the snapshot was ignored.
    AlreadySynced,
}

/// Reconciles a REST order-book snapshot with buffered WS deltas under
/// strict sequence validation. One instance per `(exchange, symbol)`.
pub struct OrderBookAssembler {
    exchange: ExchangeId,
    symbol: Symbol,
    state: Mutex<State>,
}

impl OrderBookAssembler {
    pub fn new(exchange: ExchangeId, symbol: Symbol) -> Self {
        Self {
            exchange,
            symbol,
            state: Mutex::new(State::Buffering(VecDeque::new())),
        }
    }

    pub fn exchange(&self) -> &ExchangeId {
        &self.exchange
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Feeds one inbound diff event, in arrival order.
    pub fn push_diff(&self, event: BookDiffEvent) -> DiffOutcome {
        let mut state = self.state.lock();
        match &mut *state {
            State::Buffering(buffered) => {
                buffered.push_back(event);
                DiffOutcome::Buffered
            }
            State::Synced { book, prev_update_id } => {
                if event.first_update_id <= *prev_update_id {
                    return DiffOutcome::Dropped;
                }
                if event.first_update_id > *prev_update_id + 1 {
                    *state = State::Buffering(VecDeque::from([event]));
                    return DiffOutcome::GapDetected;
                }
                book.apply_levels(&event.asks, &event.bids);
                *prev_update_id = event.final_update_id;
                book.last_update_id = *prev_update_id;
                DiffOutcome::Applied
            }
        }
    }

    /// Attempts to bind a freshly-fetched REST snapshot to the buffered
    /// diff stream, per steps 3-5 of the reconciliation protocol.
    pub fn bind_snapshot(&self, mut snapshot: OrderBook) -> SnapshotBindResult {
        let mut state = self.state.lock();
        let buffered = match &mut *state {
            State::Synced { .. } => return SnapshotBindResult::AlreadySynced,
            State::Buffering(buffered) => buffered,
        };

        let l = snapshot.last_update_id;
        while matches!(buffered.front(), Some(event) if event.final_update_id < l) {
            buffered.pop_front();
        }

        let Some(first) = buffered.front() else {
            // Nothing retained: the snapshot itself is the current state, and
            // any diff still in flight will arrive and validate against it.
            let prev_update_id = l;
            let book = snapshot;
            *state = State::Synced { book: book.clone(), prev_update_id };
            return SnapshotBindResult::Bound(book);
        };

        if !(first.first_update_id <= l + 1 && l + 1 <= first.final_update_id) {
            buffered.clear();
            return SnapshotBindResult::Retry;
        }

        let mut prev_update_id = l;
        for event in buffered.drain(..) {
            if event.first_update_id <= prev_update_id {
                continue;
            }
            if event.first_update_id > prev_update_id + 1 {
                *state = State::Buffering(VecDeque::new());
                return SnapshotBindResult::Retry;
            }
            snapshot.apply_levels(&event.asks, &event.bids);
            prev_update_id = event.final_update_id;
        }
        snapshot.last_update_id = prev_update_id;

        let book = snapshot;
        *state = State::Synced { book: book.clone(), prev_update_id };
        SnapshotBindResult::Bound(book)
    }

    /// Immutable copy of the current book, or `None` before a snapshot binds.
    pub fn snapshot(&self) -> Option<OrderBook> {
        match &*self.state.lock() {
            State::Synced { book, .. } => Some(book.clone()),
            State::Buffering(_) => None,
        }
    }

    pub fn is_synced(&self) -> bool {
        matches!(&*self.state.lock(), State::Synced { .. })
    }

    /// Drops back to `Buffering`, discarding the current book. Used when a
    /// caller detects an integrity violation outside the normal diff path.
    pub fn force_resync(&self) {
        *self.state.lock() = State::Buffering(VecDeque::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use xconn_domain::order_book::OrderBookLevel;

    fn exchange() -> ExchangeId {
        ExchangeId::new("binance")
    }

    fn symbol() -> Symbol {
        Symbol::new("BTC", "USDT")
    }

    fn diff(first: u64, final_id: u64) -> BookDiffEvent {
        BookDiffEvent {
            symbol: symbol(),
            first_update_id: first,
            final_update_id: final_id,
            bids: vec![OrderBookLevel { price: dec!(100), quantity: dec!(1) }],
            asks: vec![OrderBookLevel { price: dec!(101), quantity: dec!(1) }],
            timestamp: chrono::Utc::now(),
        }
    }

    fn snapshot(last_update_id: u64) -> OrderBook {
        OrderBook::new(
            exchange(),
            symbol(),
            Default::default(),
            Default::default(),
            last_update_id,
        )
    }

    #[test]
    fn diffs_buffer_until_snapshot_binds() {
        let assembler = OrderBookAssembler::new(exchange(), symbol());
        assert_eq!(assembler.push_diff(diff(90, 95)), DiffOutcome::Buffered);
        assert!(assembler.snapshot().is_none());
    }

    #[test]
    fn resync_scenario_from_spec_example_3() {
        let assembler = OrderBookAssembler::new(exchange(), symbol());
        for (first, last) in [(90, 95), (96, 98), (99, 101), (102, 103)] {
            assembler.push_diff(diff(first, last));
        }

        let result = assembler.bind_snapshot(snapshot(100));
        let book = match result {
            SnapshotBindResult::Bound(book) => book,
            other => panic!("expected Bound, got {other:?}"),
        };
        assert_eq!(book.last_update_id, 103);
    }

    #[test]
    fn mismatched_first_event_forces_retry() {
        let assembler = OrderBookAssembler::new(exchange(), symbol());
        assembler.push_diff(diff(150, 160));

        let result = assembler.bind_snapshot(snapshot(100));
        assert!(matches!(result, SnapshotBindResult::Retry));
        assert!(!assembler.is_synced());
    }

    #[test]
    fn gap_after_sync_triggers_exactly_one_resync() {
        let assembler = OrderBookAssembler::new(exchange(), symbol());
        assembler.push_diff(diff(99, 101));
        assembler.bind_snapshot(snapshot(100));
        assert!(assembler.is_synced());

        assert_eq!(assembler.push_diff(diff(105, 106)), DiffOutcome::GapDetected);
        assert!(!assembler.is_synced());

        // The event that caused the gap is retained as the start of the new
        // buffering window, not discarded a second time.
        assert_eq!(assembler.push_diff(diff(107, 108)), DiffOutcome::Buffered);
    }

    #[test]
    fn out_of_order_event_after_sync_is_dropped() {
        let assembler = OrderBookAssembler::new(exchange(), symbol());
        assembler.push_diff(diff(99, 101));
        assembler.bind_snapshot(snapshot(100));

        assert_eq!(assembler.push_diff(diff(95, 99)), DiffOutcome::Dropped);
        assert!(assembler.is_synced());
    }

    #[test]
    fn contiguous_event_advances_last_update_id() {
        let assembler = OrderBookAssembler::new(exchange(), symbol());
        assembler.push_diff(diff(99, 101));
        assembler.bind_snapshot(snapshot(100));

        assert_eq!(assembler.push_diff(diff(102, 104)), DiffOutcome::Applied);
        assert_eq!(assembler.snapshot().unwrap().last_update_id, 104);
    }

    #[test]
    fn applying_zero_quantity_removes_level() {
        let assembler = OrderBookAssembler::new(exchange(), symbol());
        assembler.push_diff(diff(99, 101));
        assembler.bind_snapshot(snapshot(100));

        let removal = BookDiffEvent {
            symbol: symbol(),
            first_update_id: 102,
            final_update_id: 103,
            bids: vec![],
            asks: vec![OrderBookLevel { price: dec!(101), quantity: dec!(0) }],
            timestamp: chrono::Utc::now(),
        };
        assembler.push_diff(removal);
        let book = assembler.snapshot().unwrap();
        assert!(book.asks.get(&dec!(101)).is_none());
    }
}
