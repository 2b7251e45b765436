//! Input snapshots: the position list and the historical price table.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use chrono::NaiveDate;

use crate::types::{Position, PricePoint};
use crate::Result;

/// Load a JSON array of positions.
pub fn load_positions(path: &Path) -> Result<Vec<Position>> {
    let content = fs::read_to_string(path)?;
    let mut positions: Vec<Position> = serde_json::from_str(&content)?;
    for position in &mut positions {
        position.symbol = position.symbol.to_uppercase();
    }
    Ok(positions)
}

/// Long-format historical price table indexed by date and symbol.
///
/// If the same `(date, symbol)` pair appears twice the later row wins, for
/// both the close and the volume.
#[derive(Debug, Clone, Default)]
pub struct PriceTable {
    closes: BTreeMap<NaiveDate, HashMap<String, f64>>,
    volumes: HashMap<String, BTreeMap<NaiveDate, f64>>,
}

impl PriceTable {
    pub fn new(points: impl IntoIterator<Item = PricePoint>) -> Self {
        let mut table = Self::default();
        for point in points {
            let symbol = point.symbol.to_uppercase();
            table
                .volumes
                .entry(symbol.clone())
                .or_default()
                .insert(point.date, point.volume);
            table
                .closes
                .entry(point.date)
                .or_default()
                .insert(symbol, point.close_price);
        }
        table
    }

    /// Load a JSON array of price points.
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let points: Vec<PricePoint> = serde_json::from_str(&content)?;
        Ok(Self::new(points))
    }

    pub fn is_empty(&self) -> bool {
        self.closes.is_empty()
    }

    /// Distinct dates, ascending.
    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.closes.keys().copied()
    }

    /// Closes on one date keyed by symbol.
    pub fn closes_on(&self, date: NaiveDate) -> Option<&HashMap<String, f64>> {
        self.closes.get(&date)
    }

    /// All recorded closes of `symbol`, in date order.
    pub fn closes(&self, symbol: &str) -> Vec<(NaiveDate, f64)> {
        self.closes
            .iter()
            .filter_map(|(date, by_symbol)| by_symbol.get(symbol).map(|p| (*date, *p)))
            .collect()
    }

    /// Mean traded volume of `symbol`, `None` without any rows.
    pub fn average_volume(&self, symbol: &str) -> Option<f64> {
        let volumes = self.volumes.get(symbol)?;
        if volumes.is_empty() {
            return None;
        }
        Some(volumes.values().sum::<f64>() / volumes.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use tempfile::tempdir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn sample_table() -> PriceTable {
        PriceTable::new(vec![
            PricePoint::new(day(2), "BTC", 51000.0, 2.0e10),
            PricePoint::new(day(1), "BTC", 50000.0, 3.0e10),
            PricePoint::new(day(1), "eth", 3000.0, 1.0e10),
            PricePoint::new(day(3), "BTC", 52000.0, 2.5e10),
        ])
    }

    #[test]
    fn test_dates_sorted_and_distinct() {
        let table = sample_table();
        assert_eq!(table.dates().collect::<Vec<_>>(), vec![day(1), day(2), day(3)]);
    }

    #[test]
    fn test_price_lookup() {
        let table = sample_table();
        let first = table.closes_on(day(1)).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first.get("ETH"), Some(&3000.0));
        assert_eq!(table.closes_on(day(2)).unwrap().get("ETH"), None);
        assert!(table.closes_on(day(9)).is_none());
    }

    #[test]
    fn test_closes_in_date_order() {
        let table = sample_table();
        let closes: Vec<f64> = table.closes("BTC").into_iter().map(|(_, p)| p).collect();
        assert_eq!(closes, vec![50000.0, 51000.0, 52000.0]);
    }

    #[test]
    fn test_average_volume() {
        let table = sample_table();
        assert_eq!(table.average_volume("BTC"), Some(2.5e10));
        assert_eq!(table.average_volume("DOGE"), None);
    }

    #[test]
    fn test_duplicate_rows_keep_latest_close_and_volume() {
        let table = PriceTable::new(vec![
            PricePoint::new(day(1), "BTC", 50000.0, 4.0e6),
            PricePoint::new(day(2), "BTC", 51000.0, 4.0e6),
            PricePoint::new(day(2), "BTC", 51500.0, 2.0e6),
        ]);

        assert_eq!(table.closes("BTC"), vec![(day(1), 50000.0), (day(2), 51500.0)]);
        assert_eq!(table.average_volume("BTC"), Some(3.0e6));
    }

    #[test]
    fn test_load_json_files() {
        let dir = tempdir().unwrap();
        let prices = dir.path().join("prices.json");
        let positions = dir.path().join("positions.json");
        fs::write(
            &prices,
            r#"[{"date":"2024-03-01","symbol":"BTC","close_price":50000.0,"volume":1.0},
                {"date":"2024-03-02","symbol":"BTC","close_price":51000.0}]"#,
        )
        .unwrap();
        fs::write(
            &positions,
            r#"[{"symbol":"btc","quantity":1.5,"avg_price":40000.0,"current_price":51000.0}]"#,
        )
        .unwrap();

        let table = PriceTable::load_json(&prices).unwrap();
        assert_eq!(table.closes("BTC").len(), 2);

        let loaded = load_positions(&positions).unwrap();
        assert_eq!(loaded[0].symbol, "BTC");
        assert_eq!(loaded[0].current_value(), 76500.0);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let result = load_positions(&dir.path().join("nope.json"));
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
