//! Claim Transaction Module
//!
//! Auto-claims ready L1 deposits on the destination network:
//! - `chain`: JSON-RPC submission client
//! - `proof`: Merkle proof provider
//! - `calldata`: bridge claim call encoding
//! - `manager`: the monitored transaction lifecycle

pub mod calldata;
pub mod chain;
pub mod manager;
pub mod proof;

pub use calldata::{claim_calldata, encode_claim};
pub use chain::{BlockHeader, BlockTag, ChainClient, ChainError, JsonRpcChainClient, TxReceipt, TxRequest};
pub use manager::{ClaimTxManager, TickResult};
pub use proof::{ClaimProof, HttpProofProvider, ProofError, ProofProvider};
