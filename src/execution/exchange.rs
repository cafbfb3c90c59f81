use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Trade, TradingSignal};

/// Real-exchange routing. When enabled for a portfolio, signals bypass the
/// paper-trading cash and position bookkeeping entirely.
#[async_trait]
pub trait ExchangeService: Send + Sync {
    async fn is_real_trading_enabled(&self, portfolio_id: Uuid) -> anyhow::Result<bool>;

    async fn execute_trade_signal(
        &self,
        portfolio_id: Uuid,
        signal: &TradingSignal,
    ) -> anyhow::Result<Option<Trade>>;
}

/// Paper-only exchange: never enabled, never fills.
#[derive(Debug, Clone, Copy, Default)]
pub struct PaperExchange;

#[async_trait]
impl ExchangeService for PaperExchange {
    async fn is_real_trading_enabled(&self, _portfolio_id: Uuid) -> anyhow::Result<bool> {
        Ok(false)
    }

    async fn execute_trade_signal(
        &self,
        portfolio_id: Uuid,
        signal: &TradingSignal,
    ) -> anyhow::Result<Option<Trade>> {
        tracing::debug!(
            portfolio_id = %portfolio_id,
            token_id = %signal.token_id,
            "Paper exchange has no live routing"
        );
        Ok(None)
    }
}
