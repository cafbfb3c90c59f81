use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analysis::Direction;
use crate::db::Store;
use crate::errors::EngineError;
use crate::models::{
    AlertTriggered, EngineEvent, MarketEvent, NewPosition, NewTrade, PatternDetected, Portfolio,
    Position, StatsUpdate, Token, Trade, TradeExecuted, TradeType, TradingSignal,
};
use crate::services::event_sink::EventSink;
use crate::services::pattern_feedback::PatternFeedback;

use super::exchange::ExchangeService;
use super::rebalancer::{self, RebalanceCandidate};
use super::risk_gate::RiskGate;
use super::state::PortfolioState;

pub type EngineResult<T> = Result<T, EngineError>;

/// Token amounts are truncated to this many decimal places, so a buy never
/// costs more than it was sized for.
const AMOUNT_DP: u32 = 8;

/// Thresholds for signal evaluation, exits and rebalancing. Percentages are
/// whole percent (8 = 8%).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Fixed notional per automated buy.
    pub trade_unit: Decimal,
    /// Enter sell-only mode when cash drops below this.
    pub sell_only_enter_cash: Decimal,
    /// Leave sell-only mode once cash reaches this.
    pub sell_only_exit_cash: Decimal,
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
    pub sell_only_take_profit_pct: Decimal,
    pub cash_generation_pct: Decimal,
    pub stagnant_max_gain_pct: Decimal,
    pub strong_bullish_confidence: Decimal,
    pub take_profit_confidence_factor: Decimal,
    pub bullish_patterns: Vec<String>,
    pub bearish_patterns: Vec<String>,
    /// Alert types treated as bullish patterns.
    pub alert_types: Vec<String>,
    /// Timeframe reported to the feedback service for alerts.
    pub alert_timeframe: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let names = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            trade_unit: Decimal::from(500),
            sell_only_enter_cash: Decimal::from(500),
            sell_only_exit_cash: Decimal::from(1_000),
            stop_loss_pct: Decimal::from(8),
            take_profit_pct: Decimal::from(15),
            sell_only_take_profit_pct: Decimal::from(5),
            cash_generation_pct: Decimal::TWO,
            stagnant_max_gain_pct: Decimal::from(3),
            strong_bullish_confidence: Decimal::from(80),
            take_profit_confidence_factor: Decimal::new(8, 1),
            bullish_patterns: names(&[
                "ascending_triangle",
                "falling_wedge",
                "channel_up",
                "double_bottom",
                "inverse_head_and_shoulders",
                "bullish_engulfing",
                "hammer",
                "morning_star",
                "golden_cross",
                "breakout",
            ]),
            bearish_patterns: names(&[
                "descending_triangle",
                "rising_wedge",
                "channel_down",
                "double_top",
                "head_and_shoulders",
                "bearish_engulfing",
                "shooting_star",
                "evening_star",
                "death_cross",
                "breakdown",
            ]),
            alert_types: names(&["volume_surge", "price_spike"]),
            alert_timeframe: "1h".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    CashGeneration,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::CashGeneration => "cash_generation",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EngineConfig {
    /// Exit rule for an open position, in priority order: stop-loss, then
    /// take-profit (tighter in sell-only mode), then cash generation
    /// (sell-only mode only).
    pub fn exit_reason(&self, pnl_pct: Decimal, sell_only: bool) -> Option<ExitReason> {
        let take_profit = if sell_only {
            self.sell_only_take_profit_pct
        } else {
            self.take_profit_pct
        };

        if pnl_pct <= -self.stop_loss_pct {
            Some(ExitReason::StopLoss)
        } else if pnl_pct >= take_profit {
            Some(ExitReason::TakeProfit)
        } else if sell_only && pnl_pct > self.cash_generation_pct {
            Some(ExitReason::CashGeneration)
        } else {
            None
        }
    }

    pub fn direction_of(&self, pattern_type: &str) -> Direction {
        if self.bullish_patterns.iter().any(|p| p == pattern_type) {
            Direction::Bullish
        } else if self.bearish_patterns.iter().any(|p| p == pattern_type) {
            Direction::Bearish
        } else {
            Direction::Neutral
        }
    }
}

/// Order submitted through the generic entry path.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderRequest {
    pub token_id: Uuid,
    pub trade_type: TradeType,
    /// Token units for buys; defaults to one trade unit. Sells always close
    /// the whole position.
    pub amount: Option<Decimal>,
    pub reason: Option<String>,
}

/// Outcome of one portfolio's monitor sweep.
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub sold: usize,
    pub open_positions: usize,
    pub total_value: Decimal,
}

/// A scored pattern or alert, before portfolio context is applied.
struct Candidate<'a> {
    token_id: Uuid,
    pattern_type: &'a str,
    timeframe: &'a str,
    confidence: Decimal,
    pattern_id: Option<Uuid>,
    direction: Direction,
}

/// Turns pattern/alert events into paper trades across every enabled
/// portfolio and manages the resulting positions.
///
/// Built once at startup; all collaborators are injected. Per-portfolio
/// decision state lives in memory and is rebuilt from the persisted
/// auto-trading flag by [`DecisionEngine::reconcile_enabled`].
pub struct DecisionEngine {
    store: Arc<dyn Store>,
    feedback: Arc<dyn PatternFeedback>,
    risk: Arc<dyn RiskGate>,
    exchange: Arc<dyn ExchangeService>,
    events: Arc<dyn EventSink>,
    config: EngineConfig,
    portfolios: RwLock<HashMap<Uuid, Arc<PortfolioState>>>,
}

impl DecisionEngine {
    pub fn new(
        store: Arc<dyn Store>,
        feedback: Arc<dyn PatternFeedback>,
        risk: Arc<dyn RiskGate>,
        exchange: Arc<dyn ExchangeService>,
        events: Arc<dyn EventSink>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            feedback,
            risk,
            exchange,
            events,
            config,
            portfolios: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self, portfolio_id: Uuid) -> Option<Arc<PortfolioState>> {
        self.portfolios
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&portfolio_id)
            .cloned()
    }

    pub fn enabled_portfolios(&self) -> Vec<Uuid> {
        self.portfolios
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    // -----------------------------------------------------------------------
    // Enable / disable / reconcile
    // -----------------------------------------------------------------------

    pub async fn enable_portfolio(&self, portfolio_id: Uuid) -> EngineResult<Portfolio> {
        let portfolio = self
            .store
            .set_auto_trading(portfolio_id, true)
            .await?
            .ok_or(EngineError::PortfolioNotFound(portfolio_id))?;

        self.install_state(&portfolio);
        tracing::info!(
            portfolio_id = %portfolio_id,
            cash = %portfolio.cash_balance,
            sell_only = self.state(portfolio_id).is_some_and(|s| s.is_sell_only()),
            "Auto-trading enabled"
        );
        Ok(portfolio)
    }

    pub async fn disable_portfolio(&self, portfolio_id: Uuid) -> EngineResult<Portfolio> {
        let portfolio = self
            .store
            .set_auto_trading(portfolio_id, false)
            .await?
            .ok_or(EngineError::PortfolioNotFound(portfolio_id))?;

        self.remove_state(portfolio_id);
        tracing::info!(portfolio_id = %portfolio_id, "Auto-trading disabled");
        Ok(portfolio)
    }

    /// Align in-memory state with the persisted flags. Returns
    /// `(added, removed)`.
    pub async fn reconcile_enabled(&self) -> EngineResult<(usize, usize)> {
        let persisted = self.store.list_auto_trading_portfolios().await?;
        let ids: HashSet<Uuid> = persisted.iter().map(|p| p.id).collect();

        let added = persisted.iter().filter(|p| self.install_state(p)).count();

        let stale: Vec<Uuid> = self
            .enabled_portfolios()
            .into_iter()
            .filter(|id| !ids.contains(id))
            .collect();
        for id in &stale {
            self.remove_state(*id);
        }

        if added > 0 || !stale.is_empty() {
            tracing::info!(added, removed = stale.len(), "Reconciled enabled portfolios");
        }
        Ok((added, stale.len()))
    }

    fn install_state(&self, portfolio: &Portfolio) -> bool {
        let mut map = self.portfolios.write().unwrap_or_else(PoisonError::into_inner);
        if map.contains_key(&portfolio.id) {
            return false;
        }
        let sell_only = portfolio.cash_balance < self.config.sell_only_enter_cash;
        map.insert(portfolio.id, Arc::new(PortfolioState::new(sell_only)));
        gauge!("enabled_portfolios").set(map.len() as f64);
        true
    }

    fn remove_state(&self, portfolio_id: Uuid) -> bool {
        let mut map = self.portfolios.write().unwrap_or_else(PoisonError::into_inner);
        let removed = map.remove(&portfolio_id).is_some();
        gauge!("enabled_portfolios").set(map.len() as f64);
        removed
    }

    fn require_state(&self, portfolio_id: Uuid) -> EngineResult<Arc<PortfolioState>> {
        self.state(portfolio_id)
            .ok_or(EngineError::PortfolioNotEnabled(portfolio_id))
    }

    // -----------------------------------------------------------------------
    // Signal evaluation
    // -----------------------------------------------------------------------

    pub async fn evaluate_pattern(
        &self,
        portfolio_id: Uuid,
        event: &PatternDetected,
    ) -> EngineResult<Option<TradingSignal>> {
        let candidate = Candidate {
            token_id: event.token_id,
            pattern_type: &event.pattern_type,
            timeframe: &event.timeframe,
            confidence: event.confidence,
            pattern_id: Some(event.id),
            direction: self.config.direction_of(&event.pattern_type),
        };
        self.evaluate(portfolio_id, candidate).await
    }

    pub async fn evaluate_alert(
        &self,
        portfolio_id: Uuid,
        event: &AlertTriggered,
    ) -> EngineResult<Option<TradingSignal>> {
        if !self.config.alert_types.iter().any(|t| *t == event.alert_type) {
            tracing::debug!(alert_type = %event.alert_type, "Alert type not tradable");
            return Ok(None);
        }

        let candidate = Candidate {
            token_id: event.token_id,
            pattern_type: &event.alert_type,
            timeframe: &self.config.alert_timeframe,
            confidence: event.confidence,
            pattern_id: None,
            direction: Direction::Bullish,
        };
        self.evaluate(portfolio_id, candidate).await
    }

    async fn evaluate(
        &self,
        portfolio_id: Uuid,
        c: Candidate<'_>,
    ) -> EngineResult<Option<TradingSignal>> {
        let state = self.require_state(portfolio_id)?;

        if c.direction == Direction::Neutral {
            tracing::debug!(pattern_type = c.pattern_type, "Pattern type not on any allow-list");
            return Ok(None);
        }

        let performance = self.feedback.get_performance(c.pattern_type, c.timeframe).await?;
        let confidence = (c.confidence * performance.confidence_multiplier)
            .min(Decimal::ONE_HUNDRED)
            .round_dp(2);
        let min_confidence = self.feedback.get_min_confidence().await?;
        if confidence < min_confidence {
            tracing::debug!(
                pattern_type = c.pattern_type,
                confidence = %confidence,
                min_confidence = %min_confidence,
                "Below confidence threshold"
            );
            return Ok(None);
        }

        let token = self.load_token(c.token_id).await?;
        let price = token.current_price;
        if price <= Decimal::ZERO {
            return Err(EngineError::InvalidPrice {
                token_id: token.id,
                price,
            });
        }

        let held = self
            .store
            .find_position(portfolio_id, c.token_id)
            .await?
            .filter(Position::is_open);
        let sell_only = state.is_sell_only();

        let decision = match (sell_only, c.direction, held) {
            (_, Direction::Bearish, Some(_)) => Some((
                TradeType::Sell,
                confidence,
                format!("Bearish {} on held position", c.pattern_type),
            )),
            (true, Direction::Bullish, Some(pos))
                if confidence > self.config.strong_bullish_confidence
                    && pos.pnl_pct(price) > Decimal::ZERO =>
            {
                Some((
                    TradeType::Sell,
                    confidence * self.config.take_profit_confidence_factor,
                    format!(
                        "Take profit on strong {} at {:.2}% gain",
                        c.pattern_type,
                        pos.pnl_pct(price)
                    ),
                ))
            }
            (false, Direction::Bullish, None) => Some((
                TradeType::Buy,
                confidence,
                format!("Bullish {} at {}% confidence", c.pattern_type, confidence),
            )),
            _ => None,
        };

        let Some((action, confidence, reason)) = decision else {
            tracing::debug!(
                portfolio_id = %portfolio_id,
                token_id = %c.token_id,
                pattern_type = c.pattern_type,
                sell_only,
                "No action for pattern"
            );
            return Ok(None);
        };

        counter!("signals_generated").increment(1);
        Ok(Some(TradingSignal {
            token_id: c.token_id,
            action,
            confidence: confidence.round_dp(2),
            price,
            reason,
            pattern_id: c.pattern_id,
            pattern_type: Some(c.pattern_type.to_string()),
        }))
    }

    /// Evaluate and execute `event` against every enabled portfolio. A
    /// failure in one portfolio is logged and does not affect the others.
    /// Returns the number of trades executed.
    pub async fn handle_market_event(&self, event: &MarketEvent) -> usize {
        let mut executed = 0;
        for portfolio_id in self.enabled_portfolios() {
            match self.process_event(portfolio_id, event).await {
                Ok(Some(_)) => executed += 1,
                Ok(None) => {}
                Err(e) => tracing::error!(
                    portfolio_id = %portfolio_id,
                    token_id = %event.token_id(),
                    error = %e,
                    "Failed to process market event"
                ),
            }
        }
        executed
    }

    async fn process_event(&self, portfolio_id: Uuid, event: &MarketEvent) -> EngineResult<Option<Trade>> {
        let signal = match event {
            MarketEvent::PatternDetected(p) => self.evaluate_pattern(portfolio_id, p).await?,
            MarketEvent::AlertTriggered(a) => self.evaluate_alert(portfolio_id, a).await?,
        };
        match signal {
            Some(signal) => self.execute_signal(portfolio_id, &signal).await,
            None => Ok(None),
        }
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Execute a signal. When real trading is enabled for the portfolio the
    /// exchange handles it and no paper bookkeeping happens.
    pub async fn execute_signal(
        &self,
        portfolio_id: Uuid,
        signal: &TradingSignal,
    ) -> EngineResult<Option<Trade>> {
        if self.exchange.is_real_trading_enabled(portfolio_id).await? {
            tracing::info!(portfolio_id = %portfolio_id, token_id = %signal.token_id, "Routing signal to exchange");
            return Ok(self.exchange.execute_trade_signal(portfolio_id, signal).await?);
        }

        match signal.action {
            TradeType::Buy => self.execute_buy(portfolio_id, signal).await,
            TradeType::Sell => self.execute_sell(portfolio_id, signal).await,
        }
    }

    /// Paper buy of one trade unit. Guard refusals (duplicate position,
    /// insufficient funds after rebalancing) return `Ok(None)`.
    pub async fn execute_buy(
        &self,
        portfolio_id: Uuid,
        signal: &TradingSignal,
    ) -> EngineResult<Option<Trade>> {
        let state = self.require_state(portfolio_id)?;
        match self.buy(portfolio_id, &state, signal, None).await {
            Ok(trade) => Ok(Some(trade)),
            Err(e) if e.is_guard() => {
                tracing::warn!(
                    portfolio_id = %portfolio_id,
                    token_id = %signal.token_id,
                    reason = %e,
                    "Buy rejected"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Paper sell of the whole open position in `signal.token_id`. A sell
    /// already in flight, or a position closed underneath us, returns
    /// `Ok(None)`.
    pub async fn execute_sell(
        &self,
        portfolio_id: Uuid,
        signal: &TradingSignal,
    ) -> EngineResult<Option<Trade>> {
        let state = self.require_state(portfolio_id)?;
        let Some(position) = self
            .store
            .find_position(portfolio_id, signal.token_id)
            .await?
            .filter(Position::is_open)
        else {
            tracing::debug!(portfolio_id = %portfolio_id, token_id = %signal.token_id, "No open position to sell");
            return Ok(None);
        };

        match self.sell(portfolio_id, &state, position.id, signal).await {
            Ok(trade) => Ok(Some(trade)),
            Err(e) if e.is_guard() => {
                tracing::warn!(
                    portfolio_id = %portfolio_id,
                    position_id = %position.id,
                    reason = %e,
                    "Sell rejected"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn buy(
        &self,
        portfolio_id: Uuid,
        state: &PortfolioState,
        signal: &TradingSignal,
        amount: Option<Decimal>,
    ) -> EngineResult<Trade> {
        let _buying = state.lock_buys().await;

        let price = signal.price;
        let amount = match amount {
            Some(a) => a,
            None if price > Decimal::ZERO => self.config.trade_unit / price,
            None => Decimal::ZERO,
        }
        .round_dp_with_strategy(AMOUNT_DP, RoundingStrategy::ToZero);
        if price <= Decimal::ZERO || amount <= Decimal::ZERO {
            return Err(EngineError::InvalidPrice {
                token_id: signal.token_id,
                price,
            });
        }

        let existing = self.store.find_position(portfolio_id, signal.token_id).await?;
        if existing.as_ref().is_some_and(Position::is_open) {
            return Err(EngineError::DuplicatePosition(signal.token_id));
        }

        let token = self.load_token(signal.token_id).await?;
        let cost = amount * price;

        let mut portfolio = self.load_portfolio(portfolio_id).await?;
        if portfolio.cash_balance < cost {
            let required = cost - portfolio.cash_balance;
            let freed = self
                .rebalance_with(portfolio_id, state, required, signal.token_id)
                .await?;
            tracing::info!(
                portfolio_id = %portfolio_id,
                required = %required,
                freed = %freed,
                "Rebalanced for pending buy"
            );

            // The ledger decides, not the quoted estimate.
            portfolio = self.load_portfolio(portfolio_id).await?;
            if portfolio.cash_balance < cost {
                return Err(EngineError::InsufficientFunds {
                    required: cost,
                    available: portfolio.cash_balance,
                });
            }
        }

        let trade = self
            .store
            .insert_trade(NewTrade {
                portfolio_id,
                token_id: signal.token_id,
                trade_type: TradeType::Buy,
                amount,
                price,
                pattern_id: signal.pattern_id,
                pattern_type: signal.pattern_type.clone(),
                reason: Some(signal.reason.clone()),
            })
            .await?;

        let opened = match existing {
            Some(row) => self
                .store
                .reopen_position(row.id, amount, price, trade.id)
                .await
                .map_err(EngineError::from)
                .and_then(|p| p.ok_or(EngineError::DuplicatePosition(signal.token_id))),
            None => self
                .store
                .create_position(NewPosition {
                    portfolio_id,
                    token_id: signal.token_id,
                    amount,
                    average_buy_price: price,
                    entry_trade_id: Some(trade.id),
                })
                .await
                .map_err(EngineError::from),
        };
        let position = match opened {
            Ok(position) => position,
            Err(e) => {
                self.discard_buy(&trade, None).await;
                return Err(e);
            }
        };

        let portfolio = match self
            .store
            .apply_cash_delta(portfolio_id, -cost, Decimal::ZERO)
            .await
        {
            Ok(Some(portfolio)) => portfolio,
            Ok(None) => {
                self.discard_buy(&trade, Some(&position)).await;
                return Err(EngineError::PortfolioNotFound(portfolio_id));
            }
            Err(e) => {
                self.discard_buy(&trade, Some(&position)).await;
                return Err(e.into());
            }
        };

        tracing::info!(
            portfolio_id = %portfolio_id,
            token = %token.symbol,
            amount = %amount,
            price = %price,
            cost = %cost,
            cash = %portfolio.cash_balance,
            "Buy executed"
        );

        self.after_trade(&portfolio, state, trade.clone(), signal, token).await;
        Ok(trade)
    }

    async fn sell(
        &self,
        portfolio_id: Uuid,
        state: &PortfolioState,
        position_id: Uuid,
        signal: &TradingSignal,
    ) -> EngineResult<Trade> {
        let Some(_selling) = state.try_begin_sell(position_id) else {
            counter!("sells_rejected").increment(1);
            return Err(EngineError::SellInFlight(position_id));
        };

        // Re-read: the caller's copy may be stale.
        let position = self
            .store
            .get_position(position_id)
            .await?
            .filter(|p| p.portfolio_id == portfolio_id)
            .ok_or(EngineError::PositionNotFound(position_id))?;
        if !position.is_open() {
            counter!("sells_rejected").increment(1);
            return Err(EngineError::PositionClosed(position_id));
        }

        let price = signal.price;
        if price <= Decimal::ZERO {
            return Err(EngineError::InvalidPrice {
                token_id: position.token_id,
                price,
            });
        }
        let token = self.load_token(position.token_id).await?;

        // Close first so any other writer sees the position gone.
        if !self.store.close_position(position.id, position.amount).await? {
            counter!("sells_rejected").increment(1);
            return Err(EngineError::PositionClosed(position_id));
        }

        let proceeds = position.amount * price;
        let realized_pnl = position.amount * (price - position.average_buy_price);
        let closed_at = Utc::now();

        let portfolio = match self
            .store
            .apply_cash_delta(portfolio_id, proceeds, realized_pnl)
            .await
        {
            Ok(Some(portfolio)) => portfolio,
            Ok(None) => {
                self.restore_position(&position).await;
                return Err(EngineError::PortfolioNotFound(portfolio_id));
            }
            Err(e) => {
                self.restore_position(&position).await;
                return Err(e.into());
            }
        };

        let trade = match self
            .close_lot(&position, signal, price, realized_pnl, closed_at)
            .await
        {
            Ok(trade) => trade,
            Err(e) => {
                match self
                    .store
                    .apply_cash_delta(portfolio_id, -proceeds, -realized_pnl)
                    .await
                {
                    Ok(_) => self.restore_position(&position).await,
                    Err(undo) => tracing::error!(
                        position_id = %position.id,
                        proceeds = %proceeds,
                        error = %undo,
                        "Sell booked without its trade record, credit could not be reversed"
                    ),
                }
                return Err(e);
            }
        };

        tracing::info!(
            portfolio_id = %portfolio_id,
            token = %token.symbol,
            amount = %position.amount,
            entry = %position.average_buy_price,
            exit = %price,
            realized_pnl = %realized_pnl,
            reason = %signal.reason,
            "Sell executed"
        );

        self.after_trade(&portfolio, state, trade.clone(), signal, token).await;
        Ok(trade)
    }

    /// Put a closed position back after the rest of its sell failed.
    async fn restore_position(&self, position: &Position) {
        match self.store.restore_position(position.id, position.amount).await {
            Ok(true) => tracing::warn!(
                position_id = %position.id,
                amount = %position.amount,
                "Sell rolled back, position restored"
            ),
            Ok(false) => tracing::error!(
                position_id = %position.id,
                "Position changed before the failed sell could be rolled back"
            ),
            Err(e) => tracing::error!(
                position_id = %position.id,
                error = %e,
                "Failed to restore position after failed sell"
            ),
        }
    }

    /// Undo the rows written by a buy that could not complete.
    async fn discard_buy(&self, trade: &Trade, position: Option<&Position>) {
        if let Some(position) = position {
            if let Err(e) = self.store.close_position(position.id, position.amount).await {
                tracing::error!(position_id = %position.id, error = %e, "Failed to close unpaid position");
            }
        }
        match self.store.delete_trade(trade.id).await {
            Ok(_) => tracing::warn!(trade_id = %trade.id, "Buy rolled back"),
            Err(e) => tracing::error!(trade_id = %trade.id, error = %e, "Failed to delete orphaned buy trade"),
        }
    }

    /// Amend the lot's entry trade with its exit. Lineage comes from
    /// `entry_trade_id`; rows without it fall back to matching an open buy
    /// at the average price. If nothing matches, a standalone sell trade is
    /// recorded.
    async fn close_lot(
        &self,
        position: &Position,
        signal: &TradingSignal,
        price: Decimal,
        realized_pnl: Decimal,
        closed_at: DateTime<Utc>,
    ) -> EngineResult<Trade> {
        let linked = match position.entry_trade_id {
            Some(id) => self.store.get_trade(id).await?.filter(|t| !t.is_closed()),
            None => None,
        };
        let entry = match linked {
            Some(trade) => Some(trade),
            None => {
                let matched = self
                    .store
                    .find_open_buy_trade(position.portfolio_id, position.token_id, position.average_buy_price)
                    .await?;
                if matched.is_some() {
                    tracing::warn!(position_id = %position.id, "Entry trade matched by price, no lot lineage");
                }
                matched
            }
        };

        if let Some(entry) = entry {
            if let Some(closed) = self
                .store
                .close_trade(entry.id, price, realized_pnl, closed_at)
                .await?
            {
                return Ok(closed);
            }
        }

        tracing::warn!(position_id = %position.id, "No open entry trade, recording standalone sell");
        let trade = self
            .store
            .insert_trade(NewTrade {
                portfolio_id: position.portfolio_id,
                token_id: position.token_id,
                trade_type: TradeType::Sell,
                amount: position.amount,
                price,
                pattern_id: signal.pattern_id,
                pattern_type: signal.pattern_type.clone(),
                reason: Some(signal.reason.clone()),
            })
            .await?;
        Ok(self
            .store
            .close_trade(trade.id, price, realized_pnl, closed_at)
            .await?
            .unwrap_or(trade))
    }

    async fn after_trade(
        &self,
        portfolio: &Portfolio,
        state: &PortfolioState,
        trade: Trade,
        signal: &TradingSignal,
        token: Token,
    ) {
        if let Some(sell_only) = state.update_mode(
            portfolio.cash_balance,
            self.config.sell_only_enter_cash,
            self.config.sell_only_exit_cash,
        ) {
            tracing::info!(
                portfolio_id = %portfolio.id,
                cash = %portfolio.cash_balance,
                sell_only,
                "Portfolio mode changed"
            );
        }

        let now = Utc::now();
        state.record_trade(now);
        counter!("trades_executed").increment(1);

        let stats = match self.portfolio_stats(portfolio.id).await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!(portfolio_id = %portfolio.id, error = %e, "Failed to compute stats for trade event");
                return;
            }
        };

        self.events.publish(EngineEvent::TradeExecuted(TradeExecuted {
            trade,
            signal: signal.clone(),
            token,
            portfolio_id: portfolio.id,
            stats,
            timestamp: now,
        }));
    }

    // -----------------------------------------------------------------------
    // Rebalancing
    // -----------------------------------------------------------------------

    /// Sell stagnant positions (0–3% gain, excluding `exclude_token`), most
    /// stagnant first, until their quoted value covers `required`. Returns
    /// the quoted value of what was sold.
    pub async fn rebalance(
        &self,
        portfolio_id: Uuid,
        required: Decimal,
        exclude_token: Uuid,
    ) -> EngineResult<Decimal> {
        let state = self.require_state(portfolio_id)?;
        self.rebalance_with(portfolio_id, &state, required, exclude_token)
            .await
    }

    async fn rebalance_with(
        &self,
        portfolio_id: Uuid,
        state: &PortfolioState,
        required: Decimal,
        exclude_token: Uuid,
    ) -> EngineResult<Decimal> {
        let positions = self.store.open_positions(portfolio_id).await?;
        let mut priced = Vec::with_capacity(positions.len());
        for position in positions {
            if position.token_id == exclude_token {
                continue;
            }
            match self.store.get_token(position.token_id).await? {
                Some(token) if token.current_price > Decimal::ZERO => {
                    priced.push(RebalanceCandidate::new(position, token.current_price));
                }
                _ => tracing::debug!(position_id = %position.id, "Skipping unpriced position"),
            }
        }

        let stagnant =
            rebalancer::select_stagnant(priced, exclude_token, self.config.stagnant_max_gain_pct);

        let mut freed = Decimal::ZERO;
        for candidate in stagnant {
            if freed >= required {
                break;
            }
            let signal = TradingSignal {
                token_id: candidate.position.token_id,
                action: TradeType::Sell,
                confidence: Decimal::ZERO,
                price: candidate.price,
                reason: format!("Rebalance: stagnant at {:.2}%", candidate.gain_pct),
                pattern_id: None,
                pattern_type: None,
            };
            match self
                .sell(portfolio_id, state, candidate.position.id, &signal)
                .await
            {
                Ok(_) => {
                    freed += candidate.value;
                    counter!("rebalance_sales").increment(1);
                }
                Err(e) => tracing::warn!(
                    portfolio_id = %portfolio_id,
                    position_id = %candidate.position.id,
                    error = %e,
                    "Rebalance sale failed"
                ),
            }
        }
        Ok(freed)
    }

    // -----------------------------------------------------------------------
    // Monitoring
    // -----------------------------------------------------------------------

    /// One sweep over every enabled portfolio. Returns the number of sells.
    pub async fn monitor_positions(&self) -> usize {
        let mut sold = 0;
        let mut open = 0;
        for portfolio_id in self.enabled_portfolios() {
            match self.monitor_portfolio(portfolio_id).await {
                Ok(report) => {
                    sold += report.sold;
                    open += report.open_positions;
                }
                Err(e) => tracing::error!(
                    portfolio_id = %portfolio_id,
                    error = %e,
                    "Position monitor failed for portfolio"
                ),
            }
        }
        gauge!("open_positions").set(open as f64);
        sold
    }

    /// Apply exit rules to each open position, then write back total value
    /// and P&L. The selling guard and the compare-and-swap close keep it to
    /// one sell per position even with overlapping sweeps.
    pub async fn monitor_portfolio(&self, portfolio_id: Uuid) -> EngineResult<SweepReport> {
        let state = self.require_state(portfolio_id)?;
        let positions = self.store.open_positions(portfolio_id).await?;

        let mut sold = 0;
        for position in positions {
            let token = match self.store.get_token(position.token_id).await {
                Ok(Some(token)) => token,
                Ok(None) => {
                    tracing::warn!(token_id = %position.token_id, "Token missing for open position");
                    continue;
                }
                Err(e) => {
                    tracing::error!(token_id = %position.token_id, error = %e, "Failed to load token");
                    continue;
                }
            };
            let price = token.current_price;
            if price <= Decimal::ZERO {
                continue;
            }

            let pnl_pct = position.pnl_pct(price);
            let Some(reason) = self.config.exit_reason(pnl_pct, state.is_sell_only()) else {
                tracing::debug!(
                    position_id = %position.id,
                    pnl_pct = %pnl_pct.round_dp(2),
                    "Position within exit bands"
                );
                continue;
            };

            tracing::info!(
                portfolio_id = %portfolio_id,
                token = %token.symbol,
                pnl_pct = %pnl_pct.round_dp(2),
                reason = %reason,
                "Exit triggered"
            );

            let signal = TradingSignal {
                token_id: position.token_id,
                action: TradeType::Sell,
                confidence: Decimal::ONE_HUNDRED,
                price,
                reason: format!("{reason} at {:.2}%", pnl_pct),
                pattern_id: None,
                pattern_type: None,
            };
            match self.sell(portfolio_id, &state, position.id, &signal).await {
                Ok(_) => sold += 1,
                Err(e) if e.is_guard() => {
                    tracing::debug!(position_id = %position.id, reason = %e, "Exit skipped")
                }
                Err(e) => tracing::error!(position_id = %position.id, error = %e, "Exit sell failed"),
            }
        }

        let stats = self.revalue(portfolio_id).await?;
        Ok(SweepReport {
            sold,
            open_positions: stats.active_positions,
            total_value: stats.total_value,
        })
    }

    async fn revalue(&self, portfolio_id: Uuid) -> EngineResult<StatsUpdate> {
        let stats = self.portfolio_stats(portfolio_id).await?;
        self.store
            .update_valuation(portfolio_id, stats.total_value, stats.total_pnl)
            .await?;
        self.events.publish(EngineEvent::StatsUpdate(stats.clone()));
        Ok(stats)
    }

    /// Live snapshot: cash plus open positions at current token prices.
    pub async fn portfolio_stats(&self, portfolio_id: Uuid) -> EngineResult<StatsUpdate> {
        let portfolio = self.load_portfolio(portfolio_id).await?;
        let positions = self.store.open_positions(portfolio_id).await?;

        let mut holdings = Decimal::ZERO;
        for position in &positions {
            // Without a quote, carry the position at cost.
            let price = match self.store.get_token(position.token_id).await? {
                Some(token) => token.current_price,
                None => position.average_buy_price,
            };
            holdings += position.market_value(price);
        }

        let now = Utc::now();
        let (total_trades, today_trades) = self
            .state(portfolio_id)
            .map(|s| s.trade_counts(now))
            .unwrap_or((0, 0));
        let total_value = portfolio.cash_balance + holdings;

        Ok(StatsUpdate {
            portfolio_id,
            total_value,
            total_pnl: total_value - portfolio.starting_capital,
            total_trades,
            today_trades,
            active_positions: positions.len(),
            timestamp: now,
        })
    }

    // -----------------------------------------------------------------------
    // Generic order entry
    // -----------------------------------------------------------------------

    /// Risk-gated order. Buys honour the gate's `suggested_size`; sells close
    /// the whole position. Guard refusals surface as errors here.
    pub async fn place_order(&self, portfolio_id: Uuid, request: &OrderRequest) -> EngineResult<Trade> {
        let state = self.require_state(portfolio_id)?;
        let token = self.load_token(request.token_id).await?;
        let price = token.current_price;
        if price <= Decimal::ZERO {
            return Err(EngineError::InvalidPrice {
                token_id: token.id,
                price,
            });
        }

        let held = self
            .store
            .find_position(portfolio_id, token.id)
            .await?
            .filter(Position::is_open);
        let amount = match request.trade_type {
            TradeType::Buy => request
                .amount
                .unwrap_or(self.config.trade_unit / price)
                .round_dp_with_strategy(AMOUNT_DP, RoundingStrategy::ToZero),
            TradeType::Sell => held.as_ref().map_or(Decimal::ZERO, |p| p.amount),
        };

        let assessment = self
            .risk
            .analyze_trade_risk(portfolio_id, token.id, request.trade_type, amount, price)
            .await?;
        if !assessment.allowed {
            return Err(EngineError::RiskRejected(
                assessment.reason.unwrap_or_else(|| "denied".into()),
            ));
        }

        let signal = TradingSignal {
            token_id: token.id,
            action: request.trade_type,
            confidence: Decimal::ONE_HUNDRED,
            price,
            reason: request.reason.clone().unwrap_or_else(|| "Manual order".into()),
            pattern_id: None,
            pattern_type: None,
        };

        match request.trade_type {
            TradeType::Buy => {
                let size = assessment.suggested_size.unwrap_or(amount);
                if size != amount {
                    tracing::info!(requested = %amount, size = %size, "Order resized by risk gate");
                }
                self.buy(portfolio_id, &state, &signal, Some(size)).await
            }
            TradeType::Sell => {
                let position = held.ok_or(EngineError::PositionNotFound(token.id))?;
                self.sell(portfolio_id, &state, position.id, &signal).await
            }
        }
    }

    async fn load_portfolio(&self, id: Uuid) -> EngineResult<Portfolio> {
        self.store
            .get_portfolio(id)
            .await?
            .ok_or(EngineError::PortfolioNotFound(id))
    }

    async fn load_token(&self, id: Uuid) -> EngineResult<Token> {
        self.store
            .get_token(id)
            .await?
            .ok_or(EngineError::TokenNotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pct(v: &str) -> Decimal {
        v.parse().unwrap()
    }

    #[test]
    fn test_exit_boundaries_are_inclusive() {
        let config = EngineConfig::default();
        assert_eq!(config.exit_reason(pct("-8.00"), false), Some(ExitReason::StopLoss));
        assert_eq!(config.exit_reason(pct("-7.99"), false), None);
        assert_eq!(config.exit_reason(pct("15.00"), false), Some(ExitReason::TakeProfit));
        assert_eq!(config.exit_reason(pct("14.99"), false), None);
        assert_eq!(config.exit_reason(pct("5.00"), true), Some(ExitReason::TakeProfit));
    }

    #[test]
    fn test_cash_generation_only_in_sell_only_mode() {
        let config = EngineConfig::default();
        assert_eq!(config.exit_reason(pct("2.5"), true), Some(ExitReason::CashGeneration));
        assert_eq!(config.exit_reason(pct("2.0"), true), None);
        assert_eq!(config.exit_reason(pct("2.5"), false), None);
    }

    #[test]
    fn test_stop_loss_checked_before_take_profit() {
        // Force both rules true at once
        let config = EngineConfig {
            stop_loss_pct: Decimal::from(-20),
            take_profit_pct: Decimal::from(5),
            ..EngineConfig::default()
        };
        assert_eq!(config.exit_reason(Decimal::from(10), false), Some(ExitReason::StopLoss));
    }

    #[test]
    fn test_allow_lists_are_disjoint() {
        let config = EngineConfig::default();
        assert!(config
            .bullish_patterns
            .iter()
            .all(|p| !config.bearish_patterns.contains(p)));
        assert_eq!(config.direction_of("double_bottom"), Direction::Bullish);
        assert_eq!(config.direction_of("double_top"), Direction::Bearish);
        assert_eq!(config.direction_of("doji"), Direction::Neutral);
    }
}
