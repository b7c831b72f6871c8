//! Block structure and persistence.

pub mod block;
pub mod store;

pub use block::{merkle_root_for_ids, merkle_root_for_items, Block, BlockHeader};
pub use store::{BlockStore, ChainTip, StoreError};
