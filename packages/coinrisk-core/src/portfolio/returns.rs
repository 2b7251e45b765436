//! Return series construction from position snapshots and price history.

use chrono::NaiveDate;
use tracing::debug;

use crate::snapshot::PriceTable;
use crate::types::{Position, ReturnSeries};

/// Portfolio value on each distinct date of the price table.
///
/// A position without a recorded price on a date contributes zero for that
/// date.
pub fn portfolio_values(positions: &[Position], prices: &PriceTable) -> Vec<(NaiveDate, f64)> {
    prices
        .dates()
        .map(|date| {
            let value = match prices.closes_on(date) {
                Some(closes) => positions
                    .iter()
                    .filter_map(|p| closes.get(&p.symbol).map(|price| p.quantity * price))
                    .sum(),
                None => 0.0,
            };
            (date, value)
        })
        .collect()
}

/// Simple returns of the aggregate portfolio value.
///
/// Empty positions or an empty table give an empty series.
pub fn portfolio_returns(positions: &[Position], prices: &PriceTable) -> ReturnSeries {
    if positions.is_empty() || prices.is_empty() {
        return ReturnSeries::default();
    }
    pct_change(&portfolio_values(positions, prices))
}

/// Simple returns of a single symbol's own close prices.
pub fn asset_returns(symbol: &str, prices: &PriceTable) -> ReturnSeries {
    pct_change(&prices.closes(symbol))
}

/// Period-over-period percentage change of a dated value series.
///
/// The first point has no return. A step whose previous value is zero has no
/// defined return and is skipped.
pub fn pct_change(values: &[(NaiveDate, f64)]) -> ReturnSeries {
    let mut points = Vec::with_capacity(values.len().saturating_sub(1));

    for window in values.windows(2) {
        let (_, prev) = window[0];
        let (date, value) = window[1];
        let change = (value - prev) / prev;
        if change.is_finite() {
            points.push((date, change));
        } else {
            debug!(%date, prev, value, "skipping undefined return");
        }
    }

    ReturnSeries::from_sorted(points)
}
