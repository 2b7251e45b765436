//! Deterministic stress scenarios applied to current position prices.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::AssetClassMap;
use crate::types::{Position, ScenarioShocks, StressResult, StressScenario};

/// Which shock bucket a position falls into.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Primary,
    Secondary,
    Residual,
}

impl AssetClass {
    /// Classify a symbol against the configured primary/secondary symbols.
    pub fn of(symbol: &str, classes: &AssetClassMap) -> Self {
        if symbol.eq_ignore_ascii_case(&classes.primary) {
            Self::Primary
        } else if symbol.eq_ignore_ascii_case(&classes.secondary) {
            Self::Secondary
        } else {
            Self::Residual
        }
    }
}

impl ScenarioShocks {
    pub fn new(primary: f64, secondary: f64, residual: f64) -> Self {
        Self {
            primary,
            secondary,
            residual,
        }
    }

    /// Shock for an asset class.
    pub fn for_class(&self, class: AssetClass) -> f64 {
        match class {
            AssetClass::Primary => self.primary,
            AssetClass::Secondary => self.secondary,
            AssetClass::Residual => self.residual,
        }
    }
}

impl StressScenario {
    pub fn new(name: &str, shocks: ScenarioShocks) -> Self {
        Self {
            name: name.to_string(),
            shocks,
        }
    }

    /// The built-in scenario catalog.
    pub fn catalog() -> Vec<StressScenario> {
        SCENARIOS
            .iter()
            .map(|(name, p, s, r)| StressScenario::new(name, ScenarioShocks::new(*p, *s, *r)))
            .collect()
    }
}

/// Built-in scenarios: name, primary, secondary, residual shock.
const SCENARIOS: [(&str, f64, f64, f64); 5] = [
    ("market_crash_20", -0.20, -0.25, -0.30),
    ("market_crash_50", -0.50, -0.55, -0.60),
    ("crypto_winter", -0.70, -0.75, -0.80),
    ("flash_crash", -0.15, -0.20, -0.25),
    ("correlation_breakdown", 0.05, -0.20, -0.30),
];

/// Apply one scenario to every position.
///
/// Impact is measured against the recomputed market value of the positions;
/// an unshocked value of zero reports a 0% impact.
pub fn run_stress_test(
    positions: &[Position],
    scenario: &StressScenario,
    classes: &AssetClassMap,
) -> StressResult {
    let original_value: f64 = positions.iter().map(Position::current_value).sum();
    let portfolio_value: f64 = positions
        .iter()
        .map(|p| {
            let shock = scenario.shocks.for_class(AssetClass::of(&p.symbol, classes));
            p.current_value() * (1.0 + shock)
        })
        .sum();

    let impact_dollar = portfolio_value - original_value;
    let impact_pct = if original_value != 0.0 {
        impact_dollar / original_value * 100.0
    } else {
        0.0
    };

    StressResult {
        portfolio_value,
        impact_pct,
        impact_dollar,
        scenario_shocks: scenario.shocks,
    }
}

/// Apply every scenario, keyed by scenario name.
pub fn run_stress_tests(
    positions: &[Position],
    scenarios: &[StressScenario],
    classes: &AssetClassMap,
) -> BTreeMap<String, StressResult> {
    scenarios
        .iter()
        .map(|s| (s.name.clone(), run_stress_test(positions, s, classes)))
        .collect()
}
