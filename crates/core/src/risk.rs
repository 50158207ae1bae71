use aether_shared::{AetherError, AetherResult, GateDecision, RejectReason, StrategyCandidate};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Float slack used when comparing against limits.
const LIMIT_EPS: f64 = 1e-12;

/// Portfolio-level limits. All values are fractions of portfolio equity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    pub max_position_fraction: f64,
    /// Ceiling on a candidate's configured stop-loss percentage.
    pub max_stop_loss: f64,
    pub daily_loss_limit: f64,
    /// Ceiling on open exposure after the proposed position is added.
    pub max_total_exposure: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_fraction: 0.1,
            max_stop_loss: 0.05,
            daily_loss_limit: 0.1,
            max_total_exposure: 0.5,
        }
    }
}

impl RiskLimits {
    pub fn validate(&self) -> AetherResult<()> {
        let fields = [
            ("max_position_fraction", self.max_position_fraction),
            ("max_stop_loss", self.max_stop_loss),
            ("daily_loss_limit", self.daily_loss_limit),
            ("max_total_exposure", self.max_total_exposure),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value <= 0.0 || value > 1.0 {
                return Err(AetherError::Configuration(format!(
                    "risk limit {} must be in (0.0, 1.0], got {}",
                    name, value
                )));
            }
        }
        if self.max_position_fraction > self.max_total_exposure {
            return Err(AetherError::Configuration(format!(
                "max_position_fraction {} exceeds max_total_exposure {}",
                self.max_position_fraction, self.max_total_exposure
            )));
        }
        // A single full stop-out at maximum size must not breach the daily limit.
        let worst_single_loss = self.max_position_fraction * self.max_stop_loss;
        if worst_single_loss > self.daily_loss_limit + LIMIT_EPS {
            return Err(AetherError::Configuration(format!(
                "conflicting risk limits: max position {} at stop-loss {} can lose {}, above daily loss limit {}",
                self.max_position_fraction,
                self.max_stop_loss,
                worst_single_loss,
                self.daily_loss_limit
            )));
        }
        Ok(())
    }
}

/// Read-only snapshot of the portfolio handed to the gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioState {
    pub equity: f64,
    /// Open exposure as a fraction of equity.
    pub open_exposure: f64,
    /// Realized loss for `trading_day` as a fraction of equity (positive number).
    pub realized_loss_today: f64,
    pub trading_day: NaiveDate,
}

impl PortfolioState {
    /// Flat book with no losses on the given day.
    #[must_use]
    pub fn flat(equity: f64, trading_day: NaiveDate) -> Self {
        Self {
            equity,
            open_exposure: 0.0,
            realized_loss_today: 0.0,
            trading_day,
        }
    }

    /// Starts a new trading day: the daily realized loss resets, exposure carries over.
    pub fn roll_to(&mut self, day: NaiveDate) {
        if day != self.trading_day {
            self.trading_day = day;
            self.realized_loss_today = 0.0;
        }
    }
}

/// Stateless pass/fail check of a candidate against `RiskLimits`.
///
/// Every call returns exactly one decision. Checks run in a fixed order and
/// the first failing one names the reason.
#[derive(Debug, Clone)]
pub struct RiskGate {
    limits: RiskLimits,
}

impl RiskGate {
    pub fn new(limits: RiskLimits) -> AetherResult<Self> {
        limits.validate()?;
        Ok(Self { limits })
    }

    #[must_use]
    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    #[must_use]
    pub fn gate(&self, candidate: &StrategyCandidate, portfolio: &PortfolioState) -> GateDecision {
        self.gate_at(candidate, portfolio, Utc::now())
    }

    #[must_use]
    pub fn gate_at(
        &self,
        candidate: &StrategyCandidate,
        portfolio: &PortfolioState,
        decided_at: DateTime<Utc>,
    ) -> GateDecision {
        let id = candidate.id;
        let reject = |reason: RejectReason, detail: String| {
            GateDecision::reject(id, reason, detail, decided_at)
        };
        let limits = &self.limits;

        // Stop-loss first: a candidate without one is never tradable,
        // whatever the portfolio looks like.
        let stop_loss = match candidate.numeric("stop_loss") {
            Some(sl) if sl.is_finite() && sl > 0.0 => sl,
            Some(sl) => {
                return reject(
                    RejectReason::MissingStopLoss,
                    format!("stop_loss {} is not a usable stop", sl),
                )
            }
            None => {
                return reject(
                    RejectReason::MissingStopLoss,
                    "stop_loss parameter absent".to_string(),
                )
            }
        };
        if stop_loss > limits.max_stop_loss + LIMIT_EPS {
            return reject(
                RejectReason::StopLossAboveCeiling,
                format!("stop_loss {} above ceiling {}", stop_loss, limits.max_stop_loss),
            );
        }

        let position = match candidate.numeric("position_size") {
            Some(p) if p.is_finite() && p > 0.0 => p,
            other => {
                return reject(
                    RejectReason::InvalidParameters,
                    format!("position_size {:?} is not a positive number", other),
                )
            }
        };
        if position > limits.max_position_fraction + LIMIT_EPS {
            return reject(
                RejectReason::PositionSizeExceeded,
                format!(
                    "position_size {} above max fraction {}",
                    position, limits.max_position_fraction
                ),
            );
        }

        if !portfolio.realized_loss_today.is_finite() || !portfolio.open_exposure.is_finite() {
            return reject(
                RejectReason::InvalidParameters,
                "portfolio state holds non-finite values".to_string(),
            );
        }
        if portfolio.realized_loss_today + LIMIT_EPS >= limits.daily_loss_limit {
            return reject(
                RejectReason::DailyLossLimitReached,
                format!(
                    "realized loss {} on {} reached daily limit {}",
                    portfolio.realized_loss_today, portfolio.trading_day, limits.daily_loss_limit
                ),
            );
        }
        let exposure_after = portfolio.open_exposure.max(0.0) + position;
        if exposure_after > limits.max_total_exposure + LIMIT_EPS {
            return reject(
                RejectReason::ExposureLimitExceeded,
                format!(
                    "exposure after trade {} above limit {}",
                    exposure_after, limits.max_total_exposure
                ),
            );
        }

        GateDecision::approve(id, decided_at)
    }
}
