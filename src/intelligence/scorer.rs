use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::intelligence::reconstructor::ReconstructedPositions;
use crate::models::{EvaluationWindow, Position, WalletMetrics};

/// USD mark per token, used to value positions still open at the window end.
pub type MarkPrices = HashMap<String, Decimal>;

/// Reduce a wallet's reconstructed positions into its summary metrics.
///
/// Total over any input: sums saturate instead of overflowing.
pub fn score_wallet(
    wallet: &str,
    positions: &ReconstructedPositions,
    window: &EvaluationWindow,
    marks: &MarkPrices,
) -> WalletMetrics {
    let closed = &positions.closed;
    let winning_positions = closed
        .iter()
        .filter(|p| p.realized_pnl > Decimal::ZERO)
        .count();

    WalletMetrics {
        wallet: wallet.to_string(),
        total_pnl: total_realized_pnl(closed),
        unrealized_pnl: unrealized_pnl(&positions.open, marks),
        win_rate: win_rate(closed),
        avg_holding_period_secs: average_holding_period(closed),
        capital_deployed: peak_capital_deployed(positions, window),
        window: *window,
        closed_positions: closed.len(),
        open_positions: positions.open.len(),
        winning_positions,
    }
}

// ---------------------------------------------------------------------------
// Metric 1: Realized PnL
// ---------------------------------------------------------------------------

/// Open positions contribute nothing until they close.
pub fn total_realized_pnl(closed: &[Position]) -> Decimal {
    saturating_sum(closed.iter().map(|p| p.realized_pnl))
}

/// Mark-to-market gain of open positions: held quantity at the mark minus the
/// cost still committed. Positions without a mark contribute nothing.
pub fn unrealized_pnl(open: &[Position], marks: &MarkPrices) -> Decimal {
    saturating_sum(open.iter().filter_map(|p| {
        let mark = marks.get(&p.token)?;
        Some(
            mark.saturating_mul(p.held_quantity())
                .saturating_sub(p.remaining_cost()),
        )
    }))
}

// ---------------------------------------------------------------------------
// Metric 2: Win rate
// ---------------------------------------------------------------------------

/// Share of closed positions with strictly positive PnL. A break-even
/// position counts as a loss. Zero when nothing has closed.
pub fn win_rate(closed: &[Position]) -> Decimal {
    if closed.is_empty() {
        return Decimal::ZERO;
    }

    let wins = closed
        .iter()
        .filter(|p| p.realized_pnl > Decimal::ZERO)
        .count();

    Decimal::from(wins as i64) / Decimal::from(closed.len() as i64)
}

// ---------------------------------------------------------------------------
// Metric 3: Average holding period
// ---------------------------------------------------------------------------

/// Mean seconds from open to close. Zero when nothing has closed.
pub fn average_holding_period(closed: &[Position]) -> Decimal {
    let periods: Vec<Decimal> = closed
        .iter()
        .filter_map(Position::holding_period_secs)
        .collect();

    if periods.is_empty() {
        return Decimal::ZERO;
    }

    saturating_sum(periods.iter().copied()) / Decimal::from(periods.len() as i64)
}

// ---------------------------------------------------------------------------
// Metric 4: Capital deployed
// ---------------------------------------------------------------------------

/// High-water mark of the summed open cost basis across all positions inside
/// the window.
///
/// Positions carried into the window contribute their remaining cost from the
/// window start. Changes are applied in replay order, so a sell and a buy in
/// different tokens at the same instant are sequenced by transaction id.
pub fn peak_capital_deployed(
    positions: &ReconstructedPositions,
    window: &EvaluationWindow,
) -> Decimal {
    let all: Vec<&Position> = positions.iter().collect();

    let mut committed: Vec<Decimal> = all
        .iter()
        .map(|p| p.open_cost_before(window.start))
        .collect();
    let mut total = saturating_sum(committed.iter().copied());
    let mut peak = total;

    let mut changes: Vec<(usize, &crate::models::ExposurePoint)> = all
        .iter()
        .enumerate()
        .flat_map(|(idx, p)| p.exposure.iter().map(move |point| (idx, point)))
        .filter(|(_, point)| window.contains(point.at))
        .collect();
    changes.sort_by(|(ia, a), (ib, b)| {
        a.at.cmp(&b.at)
            .then_with(|| a.tx_id.cmp(&b.tx_id))
            .then_with(|| ia.cmp(ib))
    });

    for (idx, point) in changes {
        total = total
            .saturating_add(point.open_cost)
            .saturating_sub(committed[idx]);
        committed[idx] = point.open_cost;
        peak = peak.max(total);
    }

    peak
}

fn saturating_sum(values: impl Iterator<Item = Decimal>) -> Decimal {
    values.fold(Decimal::ZERO, Decimal::saturating_add)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intelligence::reconstructor::{reconstruct_positions, CostBasisPolicy};
    use crate::models::{Side, Timeframe, TradeEvent};
    use chrono::{Duration, TimeZone, Utc};

    const WALLET: &str = "ScoreWallet";

    fn window() -> EvaluationWindow {
        EvaluationWindow::ending_at(Timeframe::OneWeek, Utc.timestamp_opt(1_700_000_000, 0).unwrap())
    }

    fn ev(token: &str, side: Side, qty: i64, price: i64, offset: i64, tx: &str) -> TradeEvent {
        TradeEvent::new(
            WALLET,
            token,
            side,
            Decimal::from(qty),
            Decimal::from(price),
            window().start + Duration::seconds(offset),
            tx,
        )
        .unwrap()
    }

    fn score(events: &[TradeEvent]) -> WalletMetrics {
        let positions =
            reconstruct_positions(WALLET, events, &window(), CostBasisPolicy::CarryForward).unwrap();
        score_wallet(WALLET, &positions, &window(), &MarkPrices::new())
    }

    #[test]
    fn test_empty_wallet_scores_zero() {
        let m = score(&[]);
        assert_eq!(m, WalletMetrics::empty(WALLET, window()));
        assert!(!m.has_closed_positions());
    }

    #[test]
    fn test_single_winning_round_trip() {
        let m = score(&[
            ev("X", Side::Buy, 10, 1, 0, "a"),
            ev("X", Side::Sell, 10, 2, 3_600, "b"),
        ]);
        assert_eq!(m.total_pnl, Decimal::from(10));
        assert_eq!(m.win_rate, Decimal::ONE);
        assert_eq!(m.avg_holding_period_secs, Decimal::from(3_600));
        assert_eq!(m.capital_deployed, Decimal::from(10));
        assert_eq!(m.closed_positions, 1);
        assert_eq!(m.winning_positions, 1);
    }

    #[test]
    fn test_open_position_counts_only_as_capital() {
        let m = score(&[ev("Y", Side::Buy, 5, 2, 60, "a")]);
        assert_eq!(m.total_pnl, Decimal::ZERO);
        assert_eq!(m.win_rate, Decimal::ZERO);
        assert_eq!(m.avg_holding_period_secs, Decimal::ZERO);
        assert_eq!(m.capital_deployed, Decimal::from(10));
        assert_eq!(m.open_positions, 1);
        assert_eq!(m.closed_positions, 0);
    }

    #[test]
    fn test_break_even_is_not_a_win() {
        let m = score(&[
            ev("X", Side::Buy, 4, 3, 0, "a"),
            ev("X", Side::Sell, 4, 3, 10, "b"),
        ]);
        assert_eq!(m.total_pnl, Decimal::ZERO);
        assert_eq!(m.win_rate, Decimal::ZERO);
        assert_eq!(m.closed_positions, 1);
    }

    #[test]
    fn test_win_rate_and_holding_period_over_several_positions() {
        let m = score(&[
            ev("A", Side::Buy, 1, 10, 0, "1"),
            ev("A", Side::Sell, 1, 20, 100, "2"),
            ev("B", Side::Buy, 1, 10, 0, "3"),
            ev("B", Side::Sell, 1, 5, 300, "4"),
            ev("C", Side::Buy, 1, 10, 0, "5"),
            ev("C", Side::Sell, 1, 11, 200, "6"),
            ev("D", Side::Buy, 1, 10, 0, "7"),
        ]);
        // +10, −5, +1
        assert_eq!(m.total_pnl, Decimal::from(6));
        assert_eq!(m.win_rate, Decimal::from(2) / Decimal::from(3));
        assert_eq!(m.avg_holding_period_secs, Decimal::from(200));
        assert_eq!(m.open_positions, 1);
    }

    #[test]
    fn test_capital_is_peak_not_sum_of_sequential_positions() {
        // Two positions of 10 that never overlap: peak is 10, not 20.
        let m = score(&[
            ev("A", Side::Buy, 10, 1, 0, "1"),
            ev("A", Side::Sell, 10, 1, 10, "2"),
            ev("B", Side::Buy, 10, 1, 20, "3"),
            ev("B", Side::Sell, 10, 1, 30, "4"),
        ]);
        assert_eq!(m.capital_deployed, Decimal::from(10));
    }

    #[test]
    fn test_capital_sums_overlapping_positions() {
        let m = score(&[
            ev("A", Side::Buy, 10, 1, 0, "1"),
            ev("B", Side::Buy, 5, 2, 10, "2"),
            ev("A", Side::Sell, 5, 1, 20, "3"),
            ev("C", Side::Buy, 1, 3, 30, "4"),
        ]);
        // 10 → 20 → 15 → 18
        assert_eq!(m.capital_deployed, Decimal::from(20));
    }

    #[test]
    fn test_capital_includes_carried_position_from_window_start() {
        let m = score(&[
            ev("A", Side::Buy, 10, 3, -1_000, "1"),
            ev("B", Side::Buy, 1, 5, 10, "2"),
        ]);
        assert_eq!(m.capital_deployed, Decimal::from(35));
    }

    #[test]
    fn test_pre_window_peak_is_not_counted() {
        let m = score(&[
            ev("A", Side::Buy, 100, 1, -1_000, "1"),
            ev("A", Side::Sell, 90, 1, -500, "2"),
        ]);
        // Only the 10 still held at the window start counts.
        assert_eq!(m.capital_deployed, Decimal::from(10));
    }

    #[test]
    fn test_unrealized_pnl_values_open_positions_at_mark() {
        let events = [
            ev("A", Side::Buy, 10, 2, 0, "1"),
            ev("A", Side::Sell, 4, 3, 10, "2"),
            ev("B", Side::Buy, 5, 4, 20, "3"),
            ev("C", Side::Buy, 1, 1, 30, "4"),
            ev("C", Side::Sell, 1, 9, 40, "5"),
        ];
        let positions =
            reconstruct_positions(WALLET, &events, &window(), CostBasisPolicy::CarryForward).unwrap();
        let marks = MarkPrices::from([
            ("A".to_string(), Decimal::from(5)),
            ("C".to_string(), Decimal::from(100)),
        ]);

        let m = score_wallet(WALLET, &positions, &window(), &marks);
        // A: 6 held at 5 against 12 of remaining cost. B has no mark. C is closed.
        assert_eq!(m.unrealized_pnl, Decimal::from(18));
        // Only C has closed; A's partial gain stays out of realized PnL.
        assert_eq!(m.total_pnl, Decimal::from(8));
    }

    #[test]
    fn test_unrealized_pnl_is_zero_without_marks() {
        let m = score(&[ev("A", Side::Buy, 10, 2, 0, "1")]);
        assert_eq!(m.unrealized_pnl, Decimal::ZERO);
    }

    #[test]
    fn test_sums_saturate_instead_of_panicking() {
        let near_max = Decimal::MAX - Decimal::ONE;
        assert_eq!(saturating_sum([near_max, near_max].into_iter()), Decimal::MAX);

        let positions = reconstruct_positions(
            WALLET,
            &[ev("A", Side::Buy, 1, 1, 0, "1")],
            &window(),
            CostBasisPolicy::CarryForward,
        )
        .unwrap();
        let marks = MarkPrices::from([("A".to_string(), Decimal::MAX)]);
        assert_eq!(unrealized_pnl(&positions.open, &marks), Decimal::MAX - Decimal::ONE);
    }

    #[test]
    fn test_win_rate_empty() {
        assert_eq!(win_rate(&[]), Decimal::ZERO);
        assert_eq!(average_holding_period(&[]), Decimal::ZERO);
        assert_eq!(total_realized_pnl(&[]), Decimal::ZERO);
    }
}
