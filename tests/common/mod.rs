use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::broadcast;
use uuid::Uuid;

use patternbot::db::{MemoryStore, Store};
use patternbot::execution::{DecisionEngine, EngineConfig, LimitsRiskGate, PaperExchange, RiskLimits};
use patternbot::models::{
    EngineEvent, NewPosition, NewTrade, Portfolio, Position, Token, TradeType, TradingSignal,
};
use patternbot::services::{BroadcastSink, StaticFeedback};

pub struct Harness {
    pub store: MemoryStore,
    pub engine: Arc<DecisionEngine>,
    pub events: BroadcastSink,
}

#[allow(dead_code)]
pub fn dec(s: &str) -> Decimal {
    s.parse().expect("decimal literal")
}

#[allow(dead_code)]
pub fn harness() -> Harness {
    harness_with(EngineConfig::default())
}

/// Engine over a fresh in-memory store with neutral feedback (multiplier 1,
/// minimum confidence 60).
#[allow(dead_code)]
pub fn harness_with(config: EngineConfig) -> Harness {
    let store = MemoryStore::new();
    let (tx, _) = broadcast::channel::<EngineEvent>(256);
    let events = BroadcastSink::new(tx);
    let engine = engine_on(&store, &events, config);
    Harness {
        store,
        engine: Arc::new(engine),
        events,
    }
}

/// A second engine instance over the same store, as another process would be.
#[allow(dead_code)]
pub fn engine_on(store: &MemoryStore, events: &BroadcastSink, config: EngineConfig) -> DecisionEngine {
    let shared: Arc<dyn Store> = Arc::new(store.clone());
    DecisionEngine::new(
        shared.clone(),
        Arc::new(StaticFeedback::new(Decimal::ONE, Decimal::from(60))),
        Arc::new(LimitsRiskGate::new(shared, RiskLimits::default())),
        Arc::new(PaperExchange),
        Arc::new(events.clone()),
        config,
    )
}

#[allow(dead_code)]
impl Harness {
    /// Seed an all-cash portfolio and enable auto-trading on it.
    pub async fn portfolio(&self, cash: &str) -> Portfolio {
        let portfolio = self.store.insert_portfolio(Portfolio::new("test", dec(cash)));
        self.engine
            .enable_portfolio(portfolio.id)
            .await
            .expect("enable portfolio")
    }

    /// Seed a portfolio with explicit cash and starting capital.
    pub async fn portfolio_with(&self, cash: &str, starting_capital: &str) -> Portfolio {
        let portfolio = Portfolio {
            cash_balance: dec(cash),
            total_value: dec(starting_capital),
            ..Portfolio::new("test", dec(starting_capital))
        };
        self.store.insert_portfolio(portfolio.clone());
        self.engine
            .enable_portfolio(portfolio.id)
            .await
            .expect("enable portfolio")
    }

    pub fn token(&self, symbol: &str, price: &str) -> Token {
        self.store.insert_token(symbol, dec(price))
    }

    /// Seed an open lot (entry trade + position) without touching cash.
    pub async fn seed_position(
        &self,
        portfolio_id: Uuid,
        token: &Token,
        amount: &str,
        avg_price: &str,
    ) -> Position {
        let trade = self
            .store
            .insert_trade(NewTrade {
                portfolio_id,
                token_id: token.id,
                trade_type: TradeType::Buy,
                amount: dec(amount),
                price: dec(avg_price),
                pattern_id: None,
                pattern_type: None,
                reason: Some("seed".into()),
            })
            .await
            .expect("seed trade");
        self.store
            .create_position(NewPosition {
                portfolio_id,
                token_id: token.id,
                amount: dec(amount),
                average_buy_price: dec(avg_price),
                entry_trade_id: Some(trade.id),
            })
            .await
            .expect("seed position")
    }

    pub fn open_positions(&self, portfolio_id: Uuid) -> Vec<Position> {
        self.store
            .positions_for(portfolio_id)
            .into_iter()
            .filter(|p| p.is_open())
            .collect()
    }

    pub fn cash(&self, portfolio_id: Uuid) -> Decimal {
        self.store
            .portfolio(portfolio_id)
            .expect("portfolio")
            .cash_balance
    }
}

#[allow(dead_code)]
pub fn signal(token: &Token, action: TradeType, price: &str) -> TradingSignal {
    TradingSignal {
        token_id: token.id,
        action,
        confidence: Decimal::from(75),
        price: dec(price),
        reason: format!("test {action}"),
        pattern_id: None,
        pattern_type: Some("double_bottom".into()),
    }
}
