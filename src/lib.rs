pub mod api;
pub mod config;
pub mod consensus;
pub mod db;
pub mod errors;
pub mod ingestion;
pub mod metrics;
pub mod models;
pub mod polymarket;
pub mod registry;
pub mod services;
pub mod store;

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::config::ConsensusConfig;
use crate::consensus::EngineStats;
use crate::registry::WalletRegistry;
use crate::store::AlertStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn AlertStore>,
    pub registry: WalletRegistry,
    pub stats: EngineStats,
    pub consensus: ConsensusConfig,
    pub metrics_handle: PrometheusHandle,
}
