pub mod engine;
pub mod evaluator;
pub mod shard;
pub mod stats;
pub mod suppression;
pub mod window;

pub use engine::{ConsensusEngine, EngineOutcome, IgnoreReason};
pub use evaluator::{evaluate, Candidate, Evaluation};
pub use shard::{EngineHandle, ShardContext};
pub use stats::{EngineStats, StatsSnapshot};
pub use suppression::{Suppression, SuppressionPipeline, SuppressionReason};
pub use window::{WindowManager, WindowSnapshot, WindowUpdate};
