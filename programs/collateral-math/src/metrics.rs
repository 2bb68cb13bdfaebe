use serde::{Deserialize, Serialize};

use crate::calc;

/// USD quotes used to value a trove
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prices {
    pub btc_usd: f64,
    pub bitusd_usd: f64,
}

impl Prices {
    pub fn new(btc_usd: f64, bitusd_usd: f64) -> Self {
        Self { btc_usd, bitusd_usd }
    }
}

/// Derived figures for a single trove
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TroveMetrics {
    pub collateral_value: f64,
    pub debt_limit: f64,
    pub liquidation_price: f64,
    pub health_factor: f64,
    pub ltv_percent: f64,
}

impl TroveMetrics {
    pub fn compute(collateral: f64, debt: f64, prices: Prices) -> Self {
        Self {
            collateral_value: calc::collateral_value(collateral, prices.btc_usd),
            debt_limit: calc::debt_limit(collateral, prices.btc_usd),
            liquidation_price: calc::liquidation_price(collateral, debt, prices.bitusd_usd),
            health_factor: calc::health_factor(collateral, debt, prices.btc_usd),
            ltv_percent: calc::ltv_from_borrow_amount(debt, collateral, prices.btc_usd),
        }
    }

    pub fn amount_borrowable(&self, borrowed: f64) -> f64 {
        calc::amount_borrowable(self.debt_limit, borrowed)
    }
}

/// Risk bucket for a selected LTV
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LtvRisk {
    Low,      // <= 25%
    Moderate, // <= 50%
    Elevated, // <= 70%
    High,
}

impl LtvRisk {
    pub fn from_percent(ltv_percent: f64) -> Self {
        if ltv_percent <= 25.0 {
            LtvRisk::Low
        } else if ltv_percent <= 50.0 {
            LtvRisk::Moderate
        } else if ltv_percent <= 70.0 {
            LtvRisk::Elevated
        } else {
            LtvRisk::High
        }
    }
}

/// Qualitative reading of a health factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthBand {
    Excellent, // >= 2.5
    Good,      // >= 1.75
    Fair,      // >= 1.25
    Poor,
}

impl HealthBand {
    pub fn from_factor(health_factor: f64) -> Self {
        if health_factor >= 2.5 {
            HealthBand::Excellent
        } else if health_factor >= 1.75 {
            HealthBand::Good
        } else if health_factor >= 1.25 {
            HealthBand::Fair
        } else {
            HealthBand::Poor
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            HealthBand::Excellent => "Excellent",
            HealthBand::Good => "Good",
            HealthBand::Fair => "Fair",
            HealthBand::Poor => "Poor",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ltv_risk_boundaries() {
        assert_eq!(LtvRisk::from_percent(0.0), LtvRisk::Low);
        assert_eq!(LtvRisk::from_percent(25.0), LtvRisk::Low);
        assert_eq!(LtvRisk::from_percent(25.1), LtvRisk::Moderate);
        assert_eq!(LtvRisk::from_percent(70.0), LtvRisk::Elevated);
        assert_eq!(LtvRisk::from_percent(80.0), LtvRisk::High);
    }

    #[test]
    fn test_health_band() {
        assert_eq!(HealthBand::from_factor(f64::INFINITY), HealthBand::Excellent);
        assert_eq!(HealthBand::from_factor(2.0), HealthBand::Good);
        assert_eq!(HealthBand::from_factor(1.3), HealthBand::Fair);
        assert_eq!(HealthBand::from_factor(0.9).label(), "Poor");
    }

    #[test]
    fn test_metrics_for_debt_free_trove() {
        let metrics = TroveMetrics::compute(1.0, 0.0, Prices::new(60_000.0, 1.0));
        assert_eq!(metrics.collateral_value, 60_000.0);
        assert_eq!(metrics.liquidation_price, 0.0);
        assert!(metrics.health_factor.is_infinite());
        assert_eq!(metrics.ltv_percent, 0.0);
        assert_eq!(metrics.amount_borrowable(0.0), 40_000.0);
    }
}
