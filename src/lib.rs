pub mod analysis;
pub mod api;
pub mod config;
pub mod db;
pub mod errors;
pub mod execution;
pub mod metrics;
pub mod models;
pub mod services;

use std::sync::Arc;

use crate::analysis::TechnicalAnalyzer;
use crate::db::Store;
use crate::execution::DecisionEngine;
use crate::services::{BroadcastSink, SignalIntake};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DecisionEngine>,
    pub analyzer: TechnicalAnalyzer,
    pub store: Arc<dyn Store>,
    pub intake: SignalIntake,
    pub events: BroadcastSink,
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
}
