use std::sync::Arc;

use polyconsensus::api::router::create_router;
use polyconsensus::config::AppConfig;
use polyconsensus::consensus::{EngineHandle, EngineStats, ShardContext};
use polyconsensus::db::{self, PgAlertStore};
use polyconsensus::ingestion::trade_poller::run_trade_poller;
use polyconsensus::models::Notification;
use polyconsensus::polymarket::{DataClient, GammaClient};
use polyconsensus::registry::{prune_wallets, run_registry_refresher, WalletRegistry};
use polyconsensus::services::dispatcher::run_dispatcher;
use polyconsensus::services::notifier::Notifier;
use polyconsensus::services::reporter::run_suppression_reporter;
use polyconsensus::store::{AlertStore, MemoryAlertStore};
use polyconsensus::{metrics, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing(AppConfig::log_json_from_env());
    let config = AppConfig::from_env()?;

    let addr = format!("{}:{}", config.host, config.port);
    let metrics_handle = metrics::init_metrics();
    let registry = match config.registry_max_age_secs {
        0 => WalletRegistry::new(),
        secs => WalletRegistry::with_max_age(chrono::Duration::seconds(secs as i64)),
    };

    // --- Persistence: Postgres when configured, otherwise in-memory ---
    let (store, pool) = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let pool = db::init_pool(url).await?;
            db::migrate(&pool).await?;
            tracing::info!("Database connected, migrations applied");
            let store: Arc<dyn AlertStore> = Arc::new(PgAlertStore::new(pool.clone()));
            (store, Some(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, alerts are kept in memory only");
            let store: Arc<dyn AlertStore> = Arc::new(MemoryAlertStore::new());
            (store, None)
        }
    };

    // `polyconsensus prune-wallets`: one-off registry maintenance.
    if std::env::args().nth(1).as_deref() == Some("prune-wallets") {
        let Some(pool) = pool else {
            anyhow::bail!("prune-wallets requires DATABASE_URL");
        };
        prune_wallets(&pool, &config.eligibility).await?;
        return Ok(());
    }

    // --- Wallet registry ---
    match &pool {
        Some(pool) => {
            let pool = pool.clone();
            let refresher_registry = registry.clone();
            let criteria = config.eligibility.clone();
            let interval = config.registry_refresh_secs;
            tokio::spawn(async move {
                run_registry_refresher(pool, refresher_registry, criteria, interval).await;
            });
        }
        None => tracing::warn!("No wallet source configured, registry stays empty"),
    }

    // --- Outbound notifications ---
    let (alert_tx, alert_rx) = tokio::sync::mpsc::channel::<Notification>(config.dispatch_queue_size);
    let notifier = match (&config.telegram_bot_token, &config.telegram_chat_id) {
        (Some(token), Some(chat)) => Some(Arc::new(
            Notifier::new(token.clone(), chat.clone())
                .with_reports_chat(config.telegram_reports_chat_id.clone()),
        )),
        _ => {
            tracing::info!("Telegram not configured, alerts will only be logged");
            None
        }
    };
    tokio::spawn(run_dispatcher(alert_rx, notifier, Some(GammaClient::new())));

    // --- Consensus engine shards ---
    let stats = EngineStats::new();
    if config.suppression_report_secs > 0 {
        tokio::spawn(run_suppression_reporter(
            stats.clone(),
            alert_tx.clone(),
            config.suppression_report_secs,
        ));
    }
    let (engine, _shards) = EngineHandle::spawn(
        config.engine_shards,
        ShardContext {
            config: config.consensus.clone(),
            registry: registry.clone(),
            store: store.clone(),
            outbound: Some(alert_tx),
            stats: stats.clone(),
        },
    );

    tracing::info!(
        min_consensus = config.consensus.min_consensus,
        window_min = config.consensus.window.num_minutes(),
        cooldown_min = config.consensus.cooldown.num_minutes(),
        min_total_usd = %config.consensus.min_total_position_usd,
        clock = ?config.consensus.clock,
        "Consensus engine configured"
    );

    // --- Trade feed ---
    if config.trade_poll_enabled {
        let data_client = DataClient::new(reqwest::Client::new());
        let poller_registry = registry.clone();
        let poller_engine = engine.clone();
        let interval = config.trade_poll_interval_secs;
        tokio::spawn(async move {
            run_trade_poller(data_client, poller_registry, poller_engine, interval).await;
        });
    } else {
        tracing::info!("Trade poller disabled (TRADE_POLL_ENABLED=false)");
    }

    let state = AppState {
        store,
        registry,
        stats,
        consensus: config.consensus.clone(),
        metrics_handle,
    };
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {addr}");
    axum::serve(listener, router).await?;

    Ok(())
}

fn init_tracing(json: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}
