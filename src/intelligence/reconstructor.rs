use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::{ConfigError, PositionError};
use crate::models::{EvaluationWindow, ExposurePoint, Position, PositionStatus, Side, TradeEvent};

/// How events older than the evaluation window are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostBasisPolicy {
    /// Replay earlier events so positions already open at the window start keep
    /// their real cost basis and count toward capital deployed.
    #[default]
    CarryForward,
    /// Discard everything before the window start. Selling holdings bought
    /// earlier then surfaces as an oversell.
    WindowOnly,
}

impl CostBasisPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CostBasisPolicy::CarryForward => "carry_forward",
            CostBasisPolicy::WindowOnly => "window_only",
        }
    }
}

impl FromStr for CostBasisPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "carry_forward" | "carry-forward" => Ok(CostBasisPolicy::CarryForward),
            "window_only" | "window-only" => Ok(CostBasisPolicy::WindowOnly),
            _ => Err(ConfigError::Invalid {
                field: "COST_BASIS_POLICY",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for CostBasisPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Positions of one wallet, each list ordered by opening time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconstructedPositions {
    pub closed: Vec<Position>,
    pub open: Vec<Position>,
}

impl ReconstructedPositions {
    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.closed.iter().chain(self.open.iter())
    }

    pub fn len(&self) -> usize {
        self.closed.len() + self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closed.is_empty() && self.open.is_empty()
    }
}

/// Rebuild a wallet's position lifecycles from its trade events.
///
/// Events may arrive in any order. They are replayed per token in
/// `(timestamp, tx id)` order against a weighted-average cost basis:
/// - a buy from zero holdings opens a position
/// - a sell resolves against the average cost accumulated so far
/// - a sell that brings holdings back to exactly zero closes it
///
/// Events after the window end are ignored. Events before the window start are
/// replayed or dropped according to `policy`. Only positions whose life
/// intersects the window are returned.
///
/// Fails on the first sell at or after the window start that exceeds the
/// quantity held at that point, or when an amount overflows.
pub fn reconstruct_positions(
    wallet: &str,
    events: &[TradeEvent],
    window: &EvaluationWindow,
    policy: CostBasisPolicy,
) -> Result<ReconstructedPositions, PositionError> {
    if let Some(foreign) = events.iter().find(|e| e.wallet() != wallet) {
        return Err(PositionError::WalletMismatch {
            tx_id: foreign.tx_id().to_string(),
            expected: wallet.to_string(),
            found: foreign.wallet().to_string(),
        });
    }

    let mut visible: Vec<&TradeEvent> = events
        .iter()
        .filter(|e| e.timestamp() <= window.end)
        .filter(|e| policy == CostBasisPolicy::CarryForward || e.timestamp() >= window.start)
        .collect();
    visible.sort_by(|a, b| a.replay_cmp(b));

    let mut seen: HashSet<(&str, &str)> = HashSet::with_capacity(visible.len());
    let mut by_token: BTreeMap<&str, Vec<&TradeEvent>> = BTreeMap::new();
    for event in visible {
        if !seen.insert((event.tx_id(), event.token())) {
            tracing::debug!(
                wallet = %wallet,
                tx = %event.tx_id(),
                token = %event.token(),
                "Duplicate trade event dropped"
            );
            continue;
        }
        by_token.entry(event.token()).or_default().push(event);
    }

    let mut result = ReconstructedPositions::default();
    for (token, token_events) in by_token {
        for position in replay_token(wallet, token, &token_events, window.start)? {
            if !position.intersects(window) {
                continue;
            }
            match position.status {
                PositionStatus::Closed => result.closed.push(position),
                PositionStatus::Open => result.open.push(position),
            }
        }
    }

    let by_opening = |a: &Position, b: &Position| {
        a.opened_at.cmp(&b.opened_at).then_with(|| a.token.cmp(&b.token))
    };
    result.closed.sort_by(by_opening);
    result.open.sort_by(by_opening);

    tracing::debug!(
        wallet = %wallet,
        closed = result.closed.len(),
        open = result.open.len(),
        total = result.len(),
        "Positions reconstructed"
    );

    Ok(result)
}

/// Replay one token's events, already sorted, into sequential positions.
///
/// Before `window_start` the replay runs over carried-in history whose oldest
/// acquisitions may lie beyond the fetched range. A sell there that exceeds the
/// tracked holdings marks that edge: the token's partial episode is discarded
/// and replay restarts from zero. From `window_start` on, an oversell is an error.
fn replay_token(
    wallet: &str,
    token: &str,
    events: &[&TradeEvent],
    window_start: DateTime<Utc>,
) -> Result<Vec<Position>, PositionError> {
    let mut positions = Vec::new();
    let mut current: Option<Episode> = None;

    for event in events {
        match event.side() {
            Side::Buy => {
                current
                    .get_or_insert_with(|| Episode::open(token, event.timestamp()))
                    .buy(event)?;
            }
            Side::Sell => {
                let held = current.as_ref().map(Episode::held).unwrap_or(Decimal::ZERO);
                if event.quantity() > held {
                    if event.timestamp() < window_start {
                        tracing::debug!(
                            wallet = %wallet,
                            token = %token,
                            tx = %event.tx_id(),
                            quantity = %event.quantity(),
                            held = %held,
                            "Pre-window sell beyond fetched history, restarting replay"
                        );
                        current = None;
                        continue;
                    }
                    return Err(PositionError::Oversell {
                        tx_id: event.tx_id().to_string(),
                        token: token.to_string(),
                        quantity: event.quantity(),
                        held,
                    });
                }
                let Some(episode) = current.as_mut() else {
                    continue;
                };
                episode.sell(event)?;
                if episode.held().is_zero() {
                    if let Some(ep) = current.take() {
                        positions.push(ep.close(event.timestamp()));
                    }
                }
            }
        }
    }

    if let Some(ep) = current {
        positions.push(ep.into_open());
    }

    Ok(positions)
}

/// Running state of the position currently being replayed.
struct Episode {
    token: String,
    opened_at: DateTime<Utc>,
    acquired: Decimal,
    disposed: Decimal,
    cost_basis: Decimal,
    proceeds: Decimal,
    realized: Decimal,
    remaining_cost: Decimal,
    exposure: Vec<ExposurePoint>,
}

impl Episode {
    fn open(token: &str, opened_at: DateTime<Utc>) -> Self {
        Self {
            token: token.to_string(),
            opened_at,
            acquired: Decimal::ZERO,
            disposed: Decimal::ZERO,
            cost_basis: Decimal::ZERO,
            proceeds: Decimal::ZERO,
            realized: Decimal::ZERO,
            remaining_cost: Decimal::ZERO,
            exposure: Vec::new(),
        }
    }

    fn held(&self) -> Decimal {
        self.acquired - self.disposed
    }

    fn buy(&mut self, event: &TradeEvent) -> Result<(), PositionError> {
        let notional = event.notional().ok_or_else(|| overflow(event))?;
        let acquired = self.acquired.checked_add(event.quantity());
        let cost_basis = self.cost_basis.checked_add(notional);
        let remaining_cost = self.remaining_cost.checked_add(notional);
        let (Some(acquired), Some(cost_basis), Some(remaining_cost)) =
            (acquired, cost_basis, remaining_cost)
        else {
            return Err(overflow(event));
        };

        self.acquired = acquired;
        self.cost_basis = cost_basis;
        self.remaining_cost = remaining_cost;
        self.mark(event);
        Ok(())
    }

    /// Caller guarantees `event.quantity() <= self.held()`.
    fn sell(&mut self, event: &TradeEvent) -> Result<(), PositionError> {
        let held = self.held();
        let quantity = event.quantity();
        // Full exit releases the whole remaining cost so no rounding residue is left.
        let released = if quantity == held {
            Some(self.remaining_cost)
        } else {
            quantity
                .checked_div(held)
                .and_then(|fraction| self.remaining_cost.checked_mul(fraction))
        };
        let notional = event.notional();
        let (Some(released), Some(notional)) = (released, notional) else {
            return Err(overflow(event));
        };
        let (Some(proceeds), Some(realized)) = (
            self.proceeds.checked_add(notional),
            notional
                .checked_sub(released)
                .and_then(|pnl| self.realized.checked_add(pnl)),
        ) else {
            return Err(overflow(event));
        };

        self.disposed += quantity;
        self.proceeds = proceeds;
        self.realized = realized;
        self.remaining_cost -= released;
        self.mark(event);
        Ok(())
    }

    fn mark(&mut self, event: &TradeEvent) {
        self.exposure.push(ExposurePoint {
            at: event.timestamp(),
            tx_id: event.tx_id().to_string(),
            open_cost: self.remaining_cost,
        });
    }

    fn close(self, closed_at: DateTime<Utc>) -> Position {
        self.finish(Some(closed_at), PositionStatus::Closed)
    }

    fn into_open(self) -> Position {
        self.finish(None, PositionStatus::Open)
    }

    fn finish(self, closed_at: Option<DateTime<Utc>>, status: PositionStatus) -> Position {
        Position {
            token: self.token,
            opened_at: self.opened_at,
            closed_at,
            quantity_acquired: self.acquired,
            quantity_disposed: self.disposed,
            cost_basis: self.cost_basis,
            proceeds: self.proceeds,
            realized_pnl: self.realized,
            status,
            exposure: self.exposure,
        }
    }
}

fn overflow(event: &TradeEvent) -> PositionError {
    PositionError::Overflow {
        tx_id: event.tx_id().to_string(),
        token: event.token().to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Timeframe;
    use chrono::{Duration, TimeZone};

    const WALLET: &str = "WaLLet1111111111111111111111111111111111111";

    fn window() -> EvaluationWindow {
        EvaluationWindow::ending_at(Timeframe::OneDay, Utc.timestamp_opt(1_700_000_000, 0).unwrap())
    }

    /// Event `offset` seconds after the window start.
    fn ev(token: &str, side: Side, qty: i64, price: Decimal, offset: i64, tx: &str) -> TradeEvent {
        TradeEvent::new(
            WALLET,
            token,
            side,
            Decimal::from(qty),
            price,
            window().start + Duration::seconds(offset),
            tx,
        )
        .unwrap()
    }

    fn usd(n: i64) -> Decimal {
        Decimal::from(n)
    }

    fn run(events: &[TradeEvent]) -> Result<ReconstructedPositions, PositionError> {
        reconstruct_positions(WALLET, events, &window(), CostBasisPolicy::CarryForward)
    }

    #[test]
    fn test_buy_then_full_sell_closes_position() {
        let events = vec![
            ev("X", Side::Buy, 10, usd(1), 100, "tx1"),
            ev("X", Side::Sell, 10, usd(2), 700, "tx2"),
        ];
        let positions = run(&events).unwrap();

        assert_eq!(positions.closed.len(), 1);
        assert!(positions.open.is_empty());
        let p = &positions.closed[0];
        assert_eq!(p.realized_pnl, usd(10));
        assert_eq!(p.cost_basis, usd(10));
        assert_eq!(p.proceeds, usd(20));
        assert_eq!(p.holding_period_secs(), Some(usd(600)));
        assert_eq!(p.held_quantity(), Decimal::ZERO);
    }

    #[test]
    fn test_unsold_buy_stays_open() {
        let events = vec![ev("Y", Side::Buy, 5, usd(2), 50, "tx1")];
        let positions = run(&events).unwrap();

        assert!(positions.closed.is_empty());
        assert_eq!(positions.open.len(), 1);
        assert_eq!(positions.open[0].status, PositionStatus::Open);
        assert_eq!(positions.open[0].cost_basis, usd(10));
        assert_eq!(positions.open[0].realized_pnl, Decimal::ZERO);
    }

    #[test]
    fn test_sell_without_holdings_is_an_error() {
        let events = vec![ev("Z", Side::Sell, 3, usd(1), 10, "bad")];
        let err = run(&events).unwrap_err();

        assert_eq!(
            err,
            PositionError::Oversell {
                tx_id: "bad".into(),
                token: "Z".into(),
                quantity: usd(3),
                held: Decimal::ZERO,
            }
        );
    }

    #[test]
    fn test_oversell_after_partial_exit_is_not_clamped() {
        let events = vec![
            ev("X", Side::Buy, 10, usd(1), 10, "a"),
            ev("X", Side::Sell, 6, usd(1), 20, "b"),
            ev("X", Side::Sell, 5, usd(1), 30, "c"),
        ];
        match run(&events).unwrap_err() {
            PositionError::Oversell { tx_id, held, .. } => {
                assert_eq!(tx_id, "c");
                assert_eq!(held, usd(4));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_partial_exits_use_weighted_average_cost() {
        let events = vec![
            ev("X", Side::Buy, 10, usd(1), 10, "a"),
            ev("X", Side::Buy, 10, usd(3), 20, "b"),
            // avg cost 2: 5 × (4 − 2) = +10
            ev("X", Side::Sell, 5, usd(4), 30, "c"),
            // 15 × (1 − 2) = −15
            ev("X", Side::Sell, 15, usd(1), 40, "d"),
        ];
        let positions = run(&events).unwrap();
        let p = &positions.closed[0];

        assert_eq!(p.realized_pnl, usd(-5));
        assert_eq!(p.realized_pnl, p.proceeds - p.cost_basis);
        let costs: Vec<Decimal> = p.exposure.iter().map(|x| x.open_cost).collect();
        assert_eq!(costs, vec![usd(10), usd(40), usd(30), Decimal::ZERO]);
    }

    #[test]
    fn test_reentry_creates_new_position() {
        let events = vec![
            ev("X", Side::Buy, 1, usd(1), 10, "a"),
            ev("X", Side::Sell, 1, usd(2), 20, "b"),
            ev("X", Side::Buy, 2, usd(2), 30, "c"),
        ];
        let positions = run(&events).unwrap();

        assert_eq!(positions.closed.len(), 1);
        assert_eq!(positions.open.len(), 1);
        assert_eq!(positions.open[0].token, "X");
        assert_eq!(positions.open[0].opened_at, window().start + Duration::seconds(30));
        assert_eq!(positions.open[0].quantity_acquired, usd(2));
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let events = vec![
            ev("A", Side::Buy, 10, usd(1), 10, "1"),
            ev("B", Side::Buy, 4, usd(5), 10, "2"),
            ev("A", Side::Sell, 4, usd(3), 20, "3"),
            ev("B", Side::Sell, 4, usd(2), 30, "4"),
            ev("A", Side::Sell, 6, usd(1), 40, "5"),
            ev("A", Side::Buy, 3, usd(2), 50, "6"),
        ];
        let expected = run(&events).unwrap();

        let mut reversed = events.clone();
        reversed.reverse();
        assert_eq!(run(&reversed).unwrap(), expected);

        let mut rotated = events.clone();
        rotated.rotate_left(3);
        assert_eq!(run(&rotated).unwrap(), expected);
        assert_eq!(run(&rotated).unwrap(), run(&rotated).unwrap());
    }

    #[test]
    fn test_same_timestamp_orders_by_tx_id() {
        // Buy "a" sorts before sell "b" even when supplied afterwards.
        let events = vec![
            ev("X", Side::Sell, 1, usd(2), 10, "b"),
            ev("X", Side::Buy, 1, usd(1), 10, "a"),
        ];
        let positions = run(&events).unwrap();
        assert_eq!(positions.closed.len(), 1);
    }

    #[test]
    fn test_duplicate_events_are_replayed_once() {
        let buy = ev("X", Side::Buy, 10, usd(1), 10, "a");
        let sell = ev("X", Side::Sell, 10, usd(2), 20, "b");
        let events = vec![buy.clone(), sell.clone(), buy, sell];

        let positions = run(&events).unwrap();
        assert_eq!(positions.closed.len(), 1);
        assert_eq!(positions.closed[0].realized_pnl, usd(10));
    }

    #[test]
    fn test_carry_forward_keeps_pre_window_cost_basis() {
        let events = vec![
            ev("X", Side::Buy, 10, usd(1), -500, "a"),
            ev("X", Side::Sell, 10, usd(3), 100, "b"),
        ];
        let positions = run(&events).unwrap();

        assert_eq!(positions.closed.len(), 1);
        assert_eq!(positions.closed[0].realized_pnl, usd(20));
        assert_eq!(positions.closed[0].holding_period_secs(), Some(usd(600)));
    }

    #[test]
    fn test_window_only_drops_pre_window_acquisitions() {
        let events = vec![
            ev("X", Side::Buy, 10, usd(1), -500, "a"),
            ev("X", Side::Sell, 10, usd(3), 100, "b"),
        ];
        let err = reconstruct_positions(WALLET, &events, &window(), CostBasisPolicy::WindowOnly)
            .unwrap_err();
        assert!(matches!(err, PositionError::Oversell { ref tx_id, .. } if tx_id == "b"));
    }

    #[test]
    fn test_positions_closed_before_window_are_dropped() {
        let events = vec![
            ev("X", Side::Buy, 1, usd(1), -500, "a"),
            ev("X", Side::Sell, 1, usd(9), -400, "b"),
            ev("Y", Side::Buy, 1, usd(1), -300, "c"),
        ];
        let positions = run(&events).unwrap();

        assert!(positions.closed.is_empty());
        assert_eq!(positions.open.len(), 1);
        assert_eq!(positions.open[0].token, "Y");
    }

    #[test]
    fn test_events_after_window_end_are_ignored() {
        let end = window().end.timestamp() - window().start.timestamp();
        let events = vec![
            ev("X", Side::Buy, 1, usd(1), 10, "a"),
            ev("X", Side::Sell, 1, usd(5), end + 1, "b"),
        ];
        let positions = run(&events).unwrap();

        assert!(positions.closed.is_empty());
        assert_eq!(positions.open.len(), 1);
    }

    #[test]
    fn test_foreign_wallet_event_rejected() {
        let other = TradeEvent::new(
            "SomeoneElse",
            "X",
            Side::Buy,
            usd(1),
            usd(1),
            window().start,
            "f",
        )
        .unwrap();
        let err = run(&[other]).unwrap_err();
        assert!(matches!(err, PositionError::WalletMismatch { .. }));
    }

    #[test]
    fn test_positions_ordered_by_opening_time() {
        let events = vec![
            ev("B", Side::Buy, 1, usd(1), 30, "1"),
            ev("A", Side::Buy, 1, usd(1), 20, "2"),
            ev("C", Side::Buy, 1, usd(1), 10, "3"),
        ];
        let positions = run(&events).unwrap();
        let tokens: Vec<&str> = positions.open.iter().map(|p| p.token.as_str()).collect();
        assert_eq!(tokens, vec!["C", "A", "B"]);
    }

    #[test]
    fn test_no_events_no_positions() {
        let positions = run(&[]).unwrap();
        assert!(positions.is_empty());
        assert_eq!(positions.len(), 0);
    }

    #[test]
    fn test_pre_window_sell_beyond_history_does_not_exclude() {
        let events = vec![
            ev("OLD", Side::Sell, 5, usd(1), -3 * 86_400, "pre"),
            ev("X", Side::Buy, 10, usd(1), 100, "in1"),
            ev("X", Side::Sell, 10, usd(2), 200, "in2"),
        ];

        let carried = run(&events).unwrap();
        let windowed =
            reconstruct_positions(WALLET, &events, &window(), CostBasisPolicy::WindowOnly).unwrap();

        assert_eq!(carried, windowed);
        assert_eq!(carried.closed.len(), 1);
        assert_eq!(carried.closed[0].realized_pnl, usd(10));
    }

    #[test]
    fn test_pre_window_oversell_restarts_token_replay() {
        // Held 2 before the fetched range, sold 5: the partial episode is dropped
        // and the later buy opens a fresh position.
        let events = vec![
            ev("Y", Side::Buy, 2, usd(1), -5 * 86_400, "p1"),
            ev("Y", Side::Sell, 5, usd(1), -4 * 86_400, "p2"),
            ev("Y", Side::Buy, 4, usd(3), -3_600, "p3"),
            ev("Y", Side::Sell, 4, usd(4), 100, "in"),
        ];
        let positions = run(&events).unwrap();

        assert_eq!(positions.closed.len(), 1);
        assert_eq!(positions.closed[0].cost_basis, usd(12));
        assert_eq!(positions.closed[0].realized_pnl, usd(4));
    }

    #[test]
    fn test_in_window_oversell_still_fails_under_carry_forward() {
        let events = vec![
            ev("Z", Side::Buy, 1, usd(1), -3_600, "p"),
            ev("Z", Side::Sell, 3, usd(1), 50, "bad"),
        ];
        let err = run(&events).unwrap_err();
        assert!(matches!(err, PositionError::Oversell { ref tx_id, .. } if tx_id == "bad"));
    }

    #[test]
    fn test_amount_overflow_is_wallet_scoped_error() {
        let huge = Decimal::from_i128_with_scale(10_000_000_000_000_000_000, 0);
        let event = TradeEvent::new(
            WALLET,
            "BIG",
            Side::Buy,
            huge,
            Decimal::from(10_000_000_000i64),
            window().start,
            "big",
        )
        .unwrap();
        let err = run(&[event]).unwrap_err();
        assert_eq!(
            err,
            PositionError::Overflow {
                tx_id: "big".into(),
                token: "BIG".into(),
            }
        );
    }

    #[test]
    fn test_partial_sell_of_large_position_does_not_overflow() {
        // remaining_cost * quantity alone would exceed the decimal range.
        let qty = Decimal::from_i128_with_scale(1_000_000_000_000_000, 0);
        let price = Decimal::from(1_000_000_000i64);
        let buy = TradeEvent::new(WALLET, "L", Side::Buy, qty, price, window().start, "b").unwrap();
        let sell = TradeEvent::new(
            WALLET,
            "L",
            Side::Sell,
            qty / Decimal::from(2),
            price,
            window().start + Duration::seconds(10),
            "s",
        )
        .unwrap();

        let positions = run(&[buy, sell]).unwrap();
        assert_eq!(positions.open.len(), 1);
        assert_eq!(positions.open[0].realized_pnl, Decimal::ZERO);
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("window_only".parse::<CostBasisPolicy>().unwrap(), CostBasisPolicy::WindowOnly);
        assert_eq!("Carry-Forward".parse::<CostBasisPolicy>().unwrap(), CostBasisPolicy::CarryForward);
        assert!("fifo".parse::<CostBasisPolicy>().is_err());
    }
}
