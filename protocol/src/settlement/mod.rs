//! Settlement-chain claims: the OP_RETURN commitment script, raw
//! transaction assembly, and the retrying claim pipeline.

pub mod claim;
pub mod script;
pub mod tx;

pub use claim::{
    ArcBroadcaster, Broadcaster, ClaimAction, ClaimConfig, ClaimError, ClaimOutcome,
    ClaimPipeline, HttpUtxoProvider, UtxoProvider,
};
pub use tx::{ClaimTx, TxError, Utxo};
