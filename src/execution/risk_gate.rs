use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::db::Store;
use crate::models::TradeType;

/// Pre-trade verdict for the generic order-entry path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub allowed: bool,
    pub reason: Option<String>,
    /// Amount (token units) the gate would accept instead of the request.
    pub suggested_size: Option<Decimal>,
    pub stop_loss_price: Option<Decimal>,
    pub risk_reward_ratio: Option<Decimal>,
}

impl RiskAssessment {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            suggested_size: None,
            stop_loss_price: None,
            risk_reward_ratio: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            ..Self::allow()
        }
    }
}

#[async_trait]
pub trait RiskGate: Send + Sync {
    async fn analyze_trade_risk(
        &self,
        portfolio_id: Uuid,
        token_id: Uuid,
        trade_type: TradeType,
        amount: Decimal,
        price: Decimal,
    ) -> anyhow::Result<RiskAssessment>;
}

/// Configurable risk limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Max single position as fraction of portfolio value (default 20%).
    pub max_position_pct: Decimal,
    /// Max concurrent open positions (default 10).
    pub max_open_positions: usize,
    /// Max drawdown from starting capital as a fraction (default 25%).
    pub max_drawdown_pct: Decimal,
    /// Stop distance used for the suggested stop and reward ratio, percent.
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_pct: Decimal::new(20, 2),
            max_open_positions: 10,
            max_drawdown_pct: Decimal::new(25, 2),
            stop_loss_pct: Decimal::from(8),
            take_profit_pct: Decimal::from(15),
        }
    }
}

/// Portfolio figures the checks run against.
#[derive(Debug, Clone)]
pub struct PortfolioSnapshot {
    pub cash: Decimal,
    pub total_value: Decimal,
    pub starting_capital: Decimal,
    pub open_positions: usize,
    /// Amount currently held in the order's token.
    pub held_amount: Decimal,
}

#[derive(Debug, Clone)]
pub struct PendingOrder {
    pub trade_type: TradeType,
    pub amount: Decimal,
    pub price: Decimal,
}

#[derive(Debug, Error, PartialEq)]
pub enum RiskViolation {
    #[error("order value {value} exceeds max {max} ({pct}% of portfolio)")]
    PositionTooLarge {
        value: Decimal,
        max: Decimal,
        pct: Decimal,
    },

    #[error("too many open positions: {current}/{max}")]
    TooManyPositions { current: usize, max: usize },

    #[error("drawdown {drawdown_pct}% exceeds limit {limit_pct}%")]
    DrawdownExceeded {
        drawdown_pct: Decimal,
        limit_pct: Decimal,
    },

    #[error("insufficient cash: need {required}, have {available}")]
    InsufficientCash { required: Decimal, available: Decimal },

    #[error("nothing to sell: holding {held}")]
    NothingToSell { held: Decimal },

    #[error("invalid order: amount {amount} at price {price}")]
    InvalidOrder { amount: Decimal, price: Decimal },
}

/// Run the limit checks on a pending order. Sells are only checked against
/// the held amount; every other limit applies to buys.
pub fn check_risk(
    order: &PendingOrder,
    portfolio: &PortfolioSnapshot,
    limits: &RiskLimits,
) -> Result<(), RiskViolation> {
    if order.amount <= Decimal::ZERO || order.price <= Decimal::ZERO {
        return Err(RiskViolation::InvalidOrder {
            amount: order.amount,
            price: order.price,
        });
    }

    if order.trade_type == TradeType::Sell {
        if portfolio.held_amount <= Decimal::ZERO {
            return Err(RiskViolation::NothingToSell {
                held: portfolio.held_amount,
            });
        }
        return Ok(());
    }

    // 1. Drawdown
    if portfolio.starting_capital > Decimal::ZERO {
        let drawdown = (portfolio.starting_capital - portfolio.total_value) / portfolio.starting_capital;
        if drawdown > limits.max_drawdown_pct {
            return Err(RiskViolation::DrawdownExceeded {
                drawdown_pct: (drawdown * Decimal::ONE_HUNDRED).round_dp(2),
                limit_pct: limits.max_drawdown_pct * Decimal::ONE_HUNDRED,
            });
        }
    }

    // 2. Open position count
    if portfolio.open_positions >= limits.max_open_positions {
        return Err(RiskViolation::TooManyPositions {
            current: portfolio.open_positions,
            max: limits.max_open_positions,
        });
    }

    // 3. Single position size
    let value = order.amount * order.price;
    let max_value = portfolio.total_value * limits.max_position_pct;
    if value > max_value {
        return Err(RiskViolation::PositionTooLarge {
            value,
            max: max_value,
            pct: limits.max_position_pct * Decimal::ONE_HUNDRED,
        });
    }

    // 4. Cash
    if value > portfolio.cash {
        return Err(RiskViolation::InsufficientCash {
            required: value,
            available: portfolio.cash,
        });
    }

    Ok(())
}

/// Store-backed gate over [`RiskLimits`]. An oversized buy is allowed with a
/// `suggested_size` trimmed to the position cap; every other violation
/// denies.
pub struct LimitsRiskGate {
    store: Arc<dyn Store>,
    limits: RiskLimits,
}

impl LimitsRiskGate {
    pub fn new(store: Arc<dyn Store>, limits: RiskLimits) -> Self {
        Self { store, limits }
    }

    async fn snapshot(&self, portfolio_id: Uuid, token_id: Uuid) -> anyhow::Result<Option<PortfolioSnapshot>> {
        let Some(portfolio) = self.store.get_portfolio(portfolio_id).await? else {
            return Ok(None);
        };
        let positions = self.store.open_positions(portfolio_id).await?;
        let held_amount = positions
            .iter()
            .filter(|p| p.token_id == token_id)
            .map(|p| p.amount)
            .sum();

        Ok(Some(PortfolioSnapshot {
            cash: portfolio.cash_balance,
            total_value: portfolio.total_value,
            starting_capital: portfolio.starting_capital,
            open_positions: positions.len(),
            held_amount,
        }))
    }
}

#[async_trait]
impl RiskGate for LimitsRiskGate {
    async fn analyze_trade_risk(
        &self,
        portfolio_id: Uuid,
        token_id: Uuid,
        trade_type: TradeType,
        amount: Decimal,
        price: Decimal,
    ) -> anyhow::Result<RiskAssessment> {
        let Some(snapshot) = self.snapshot(portfolio_id, token_id).await? else {
            return Ok(RiskAssessment::deny(format!("portfolio {portfolio_id} not found")));
        };

        let order = PendingOrder {
            trade_type,
            amount,
            price,
        };

        let mut assessment = match check_risk(&order, &snapshot, &self.limits) {
            Ok(()) => RiskAssessment::allow(),
            Err(RiskViolation::PositionTooLarge { max, .. }) => {
                let trimmed = (max / price)
                    .min(snapshot.cash / price)
                    .round_dp_with_strategy(8, RoundingStrategy::ToZero);
                if trimmed <= Decimal::ZERO {
                    RiskAssessment::deny("position cap leaves no room")
                } else {
                    RiskAssessment {
                        suggested_size: Some(trimmed),
                        reason: Some("trimmed to position cap".into()),
                        ..RiskAssessment::allow()
                    }
                }
            }
            Err(violation) => {
                tracing::warn!(
                    portfolio_id = %portfolio_id,
                    token_id = %token_id,
                    violation = %violation,
                    "Risk check failed"
                );
                RiskAssessment::deny(violation.to_string())
            }
        };

        if assessment.allowed && trade_type == TradeType::Buy {
            let stop = price * (Decimal::ONE - self.limits.stop_loss_pct / Decimal::ONE_HUNDRED);
            assessment.stop_loss_price = Some(stop);
            if !self.limits.stop_loss_pct.is_zero() {
                assessment.risk_reward_ratio =
                    Some((self.limits.take_profit_pct / self.limits.stop_loss_pct).round_dp(2));
            }
        }

        Ok(assessment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> PortfolioSnapshot {
        PortfolioSnapshot {
            cash: Decimal::from(5_000),
            total_value: Decimal::from(10_000),
            starting_capital: Decimal::from(10_000),
            open_positions: 0,
            held_amount: Decimal::ZERO,
        }
    }

    fn buy(amount: i64, price: Decimal) -> PendingOrder {
        PendingOrder {
            trade_type: TradeType::Buy,
            amount: Decimal::from(amount),
            price,
        }
    }

    #[test]
    fn test_risk_check_passes() {
        let result = check_risk(&buy(1_000, Decimal::ONE), &snapshot(), &RiskLimits::default());
        assert!(result.is_ok());
    }

    #[test]
    fn test_position_too_large() {
        // 2500 > 20% of 10k
        let result = check_risk(&buy(2_500, Decimal::ONE), &snapshot(), &RiskLimits::default());
        assert!(matches!(result, Err(RiskViolation::PositionTooLarge { .. })));
    }

    #[test]
    fn test_too_many_positions() {
        let portfolio = PortfolioSnapshot {
            open_positions: 10,
            ..snapshot()
        };
        let result = check_risk(&buy(100, Decimal::ONE), &portfolio, &RiskLimits::default());
        assert!(matches!(result, Err(RiskViolation::TooManyPositions { .. })));
    }

    #[test]
    fn test_drawdown_exceeded() {
        let portfolio = PortfolioSnapshot {
            total_value: Decimal::from(7_000),
            ..snapshot()
        };
        let result = check_risk(&buy(100, Decimal::ONE), &portfolio, &RiskLimits::default());
        assert!(matches!(result, Err(RiskViolation::DrawdownExceeded { .. })));
    }

    #[test]
    fn test_insufficient_cash() {
        let portfolio = PortfolioSnapshot {
            cash: Decimal::from(50),
            ..snapshot()
        };
        let result = check_risk(&buy(100, Decimal::ONE), &portfolio, &RiskLimits::default());
        assert!(matches!(result, Err(RiskViolation::InsufficientCash { .. })));
    }

    #[test]
    fn test_sell_needs_holding() {
        let order = PendingOrder {
            trade_type: TradeType::Sell,
            amount: Decimal::from(10),
            price: Decimal::ONE,
        };
        let result = check_risk(&order, &snapshot(), &RiskLimits::default());
        assert!(matches!(result, Err(RiskViolation::NothingToSell { .. })));

        let holding = PortfolioSnapshot {
            held_amount: Decimal::from(10),
            open_positions: 50,
            ..snapshot()
        };
        assert!(check_risk(&order, &holding, &RiskLimits::default()).is_ok());
    }
}
