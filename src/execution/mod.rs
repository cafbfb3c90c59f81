pub mod engine;
pub mod exchange;
pub mod rebalancer;
pub mod risk_gate;
pub mod state;

pub use engine::{DecisionEngine, EngineConfig, EngineResult, ExitReason, OrderRequest, SweepReport};
pub use exchange::{ExchangeService, PaperExchange};
pub use risk_gate::{LimitsRiskGate, RiskAssessment, RiskGate, RiskLimits};
pub use state::PortfolioState;
