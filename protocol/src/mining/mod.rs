//! Proof-of-Indexing mining: the work mempool, the miner loop, and the
//! shared difficulty adjuster.

pub mod difficulty;
pub mod mempool;
pub mod miner;
pub mod work;

pub use difficulty::DifficultyAdjuster;
pub use mempool::Mempool;
pub use miner::{Miner, MinerConfig, MinerState};
pub use work::{WorkItem, WorkKind};
