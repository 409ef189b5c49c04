use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::ConsensusConfig;
use crate::errors::SubmitError;
use crate::ingestion;
use crate::models::{Notification, RawTrade, TradeEvent, WindowKey};
use crate::registry::WalletRegistry;
use crate::store::AlertStore;

use super::engine::{describe, ConsensusEngine};
use super::stats::EngineStats;

const SHARD_QUEUE_SIZE: usize = 1_000;
const SWEEP_INTERVAL_SECS: u64 = 60;

/// Routes trade events to engine shards by window key. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    shards: Vec<mpsc::Sender<TradeEvent>>,
    stats: EngineStats,
}

/// Everything a shard needs besides its own window state.
pub struct ShardContext {
    pub config: ConsensusConfig,
    pub registry: WalletRegistry,
    pub store: Arc<dyn AlertStore>,
    pub outbound: Option<mpsc::Sender<Notification>>,
    pub stats: EngineStats,
}

impl EngineHandle {
    /// Spawn `shards` engine tasks. Dropping every clone of the handle lets
    /// the tasks drain their queues and exit.
    pub fn spawn(shards: usize, ctx: ShardContext) -> (Self, Vec<JoinHandle<()>>) {
        let shards = shards.max(1);
        let mut senders = Vec::with_capacity(shards);
        let mut tasks = Vec::with_capacity(shards);

        for idx in 0..shards {
            let (tx, rx) = mpsc::channel::<TradeEvent>(SHARD_QUEUE_SIZE);
            let mut engine = ConsensusEngine::new(
                ctx.config.clone(),
                ctx.registry.clone(),
                ctx.store.clone(),
            )
            .with_stats(ctx.stats.clone());
            if let Some(out) = &ctx.outbound {
                engine = engine.with_outbound(out.clone());
            }

            senders.push(tx);
            tasks.push(tokio::spawn(run_shard(idx, engine, rx)));
        }

        tracing::info!(shards, "Consensus engine shards spawned");
        (
            Self {
                shards: senders,
                stats: ctx.stats,
            },
            tasks,
        )
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn shard_for(&self, key: &WindowKey) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    /// Queue a validated event on its key's shard.
    pub async fn submit(&self, event: TradeEvent) -> Result<(), SubmitError> {
        let idx = self.shard_for(&event.key());
        self.shards[idx]
            .send(event)
            .await
            .map_err(|_| SubmitError::ShardClosed(idx))
    }

    /// Validate a feed record, then queue it.
    pub async fn submit_raw(&self, raw: RawTrade) -> Result<(), SubmitError> {
        let event = ingestion::accept(raw).inspect_err(|_| self.stats.record_rejected())?;
        self.submit(event).await
    }
}

async fn run_shard(idx: usize, mut engine: ConsensusEngine, mut rx: mpsc::Receiver<TradeEvent>) {
    tracing::debug!(shard = idx, "Engine shard started");

    let mut sweep = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick completes immediately.
    sweep.tick().await;

    loop {
        tokio::select! {
            maybe_event = rx.recv() => {
                let Some(event) = maybe_event else {
                    break;
                };
                let outcome = engine.handle_event(event).await;
                tracing::trace!(shard = idx, outcome = %describe(&outcome), "Event processed");
            }
            _ = sweep.tick() => {
                engine.sweep_now();
            }
        }
    }

    tracing::info!(shard = idx, windows = engine.active_windows(), "Engine shard stopped");
}
