//! Market value and weight bookkeeping for a position snapshot.

use crate::types::Position;

/// Sum of recomputed market values.
pub fn total_market_value(positions: &[Position]) -> f64 {
    positions.iter().map(Position::current_value).sum()
}

/// Recompute each position's market value and its weight in the total.
///
/// With a non-positive total every weight is zero.
pub fn assign_weights(positions: &[Position]) -> Vec<Position> {
    let total = total_market_value(positions);

    positions
        .iter()
        .map(|p| {
            let repriced = p.with_price(p.current_price);
            let weight = if total > 0.0 {
                repriced.market_value / total
            } else {
                0.0
            };
            repriced.with_weight(weight)
        })
        .collect()
}

/// How far the reported weights are from summing to one.
pub fn weight_sum_deviation(positions: &[Position]) -> f64 {
    (positions.iter().map(|p| p.weight).sum::<f64>() - 1.0).abs()
}
