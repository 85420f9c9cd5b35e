pub mod detector;
pub mod leaderboard;
pub mod monte_carlo;
pub mod queue;
pub mod stats;
pub mod worker;

pub use detector::{FeedWatcher, PollOutcome, WatcherSettings};
pub use leaderboard::DbLeaderboard;
pub use monte_carlo::{monte_carlo, MATERIALITY_TOLERANCE};
pub use queue::FlagQueue;
pub use stats::{PipelineStats, StatsSnapshot};
pub use worker::{Evaluation, SignificanceWorker, SimulationPool, SkipReason, WorkerSettings};
