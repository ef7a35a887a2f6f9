use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

use super::SettlementPeriod;

/// Trading direction implied by own-vs-official forecast divergence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalDirection {
    /// Own forecast materially below official: less wind than the market expects
    Long,
    /// Own forecast materially above official: more wind than the market expects
    Short,
    Hold,
}

/// Divergence thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalThresholds {
    /// Relative opportunity bound, percent of the official forecast
    pub opportunity_pct: f64,
    /// Absolute opportunity bound (MW)
    pub opportunity_mw: f64,
    /// Absolute bound for a directional LONG/SHORT call (MW)
    pub signal_mw: f64,
}

impl Default for SignalThresholds {
    fn default() -> Self {
        Self {
            opportunity_pct: 5.0,
            opportunity_mw: 500.0,
            signal_mw: 500.0,
        }
    }
}

impl SignalThresholds {
    pub fn is_opportunity(&self, difference_mw: f64, difference_pct: Option<f64>) -> bool {
        let pct_breach = difference_pct.is_some_and(|pct| pct.abs() > self.opportunity_pct);
        pct_breach || difference_mw.abs() > self.opportunity_mw
    }

    pub fn direction(&self, difference_mw: f64) -> SignalDirection {
        if difference_mw > self.signal_mw {
            SignalDirection::Short
        } else if difference_mw < -self.signal_mw {
            SignalDirection::Long
        } else {
            SignalDirection::Hold
        }
    }
}

/// System-level own-vs-official comparison for one settlement period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastSignal {
    pub settlement: SettlementPeriod,
    pub start_time: DateTime<Utc>,
    /// `SYSTEM` for the aggregate
    pub scope: String,
    pub own_forecast_mw: f64,
    pub official_forecast_mw: f64,
    /// own - official
    pub difference_mw: f64,
    /// Difference as percent of official; undefined when official is zero
    pub difference_pct: Option<f64>,
    pub signal: SignalDirection,
    pub is_opportunity: bool,
}

impl ForecastSignal {
    pub const SYSTEM_SCOPE: &'static str = "SYSTEM";

    pub fn evaluate(
        settlement: SettlementPeriod,
        start_time: DateTime<Utc>,
        own_forecast_mw: f64,
        official_forecast_mw: f64,
        thresholds: &SignalThresholds,
    ) -> Self {
        let difference_mw = own_forecast_mw - official_forecast_mw;
        let difference_pct = (official_forecast_mw.abs() > f64::EPSILON)
            .then(|| difference_mw / official_forecast_mw * 100.0);

        Self {
            settlement,
            start_time,
            scope: Self::SYSTEM_SCOPE.to_string(),
            own_forecast_mw,
            official_forecast_mw,
            difference_mw,
            difference_pct,
            signal: thresholds.direction(difference_mw),
            is_opportunity: thresholds.is_opportunity(difference_mw, difference_pct),
        }
    }
}

/// One farm's contribution to the system forecast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FarmForecast {
    pub farm: String,
    pub settlement: SettlementPeriod,
    pub start_time: DateTime<Utc>,
    pub horizon_hours: u32,
    pub predicted_mw: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn evaluate(own: f64, official: f64) -> ForecastSignal {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        ForecastSignal::evaluate(
            SettlementPeriod::containing(ts),
            ts,
            own,
            official,
            &SignalThresholds::default(),
        )
    }

    #[rstest]
    #[case(10_700.0, 10_000.0, SignalDirection::Short, true)]
    #[case(9_300.0, 10_000.0, SignalDirection::Long, true)]
    #[case(10_100.0, 10_000.0, SignalDirection::Hold, false)]
    // 8% relative but only 400 MW: opportunity without a directional call
    #[case(5_400.0, 5_000.0, SignalDirection::Hold, true)]
    // 600 MW on a large base is < 5% yet still an opportunity
    #[case(20_600.0, 20_000.0, SignalDirection::Short, true)]
    fn test_signal_rules(
        #[case] own: f64,
        #[case] official: f64,
        #[case] expected: SignalDirection,
        #[case] opportunity: bool,
    ) {
        let signal = evaluate(own, official);
        assert_eq!(signal.signal, expected);
        assert_eq!(signal.is_opportunity, opportunity);
        assert_eq!(signal.difference_mw, own - official);
    }

    #[test]
    fn test_zero_official_has_no_percentage() {
        let signal = evaluate(300.0, 0.0);
        assert_eq!(signal.difference_pct, None);
        assert!(!signal.is_opportunity);
        assert_eq!(signal.signal, SignalDirection::Hold);
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(SignalDirection::Short.to_string(), "SHORT");
    }
}
